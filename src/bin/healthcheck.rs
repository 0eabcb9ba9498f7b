//! Container health probe: exits 0 when `GET /health` answers 2xx.

use std::env;
use std::process::ExitCode;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let port = env::var("PORT").unwrap_or_else(|_| "8000".to_string());
    let url = format!("http://localhost:{}/health", port);

    let client = match reqwest::Client::builder().timeout(TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
            eprintln!("healthcheck: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match client.get(&url).send().await {
        Ok(response) if response.status().is_success() => ExitCode::SUCCESS,
        Ok(response) => {
            eprintln!("healthcheck: {} returned {}", url, response.status());
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("healthcheck: {}", e);
            ExitCode::FAILURE
        }
    }
}
