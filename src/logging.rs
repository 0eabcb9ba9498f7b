//! Structured logging setup.
//!
//! `RUST_LOG` takes priority over `LOG_LEVEL`. Outside Kubernetes the log is
//! also appended to `logs/neural-webhook.log`.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;

pub const LOG_DIR: &str = "logs";
pub const LOG_FILE: &str = "neural-webhook.log";

/// Maps the service's `LOG_LEVEL` names onto tracing directives.
pub fn level_directive(level: &str) -> &'static str {
    match level.to_uppercase().as_str() {
        "TRACE" => "trace",
        "DEBUG" => "debug",
        "WARNING" | "WARN" => "warn",
        "ERROR" | "CRITICAL" => "error",
        _ => "info",
    }
}

/// Initialise the global subscriber. Call once, before anything logs.
pub fn init(level: &str, log_dir: Option<&Path>) -> io::Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level_directive(level))
    };

    let (writer, ansi) = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(LOG_FILE))?;
            (BoxMakeWriter::new(io::stderr.and(Arc::new(file))), false)
        }
        None => (BoxMakeWriter::new(io::stderr), true),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_service_level_names() {
        assert_eq!(level_directive("INFO"), "info");
        assert_eq!(level_directive("warning"), "warn");
        assert_eq!(level_directive("CRITICAL"), "error");
        assert_eq!(level_directive("DEBUG"), "debug");
        assert_eq!(level_directive("bogus"), "info");
    }
}
