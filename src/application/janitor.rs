//! Daily purge of a scratch directory.

use crate::config::CleanupConfig;
use chrono::{DateTime, Local, NaiveTime, TimeZone};
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// First occurrence of `at` strictly after `now`, in `now`'s time zone.
/// Local times skipped by a DST change move to the next day.
pub fn next_run_after<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    let mut date = now.date_naive();
    for _ in 0..3 {
        if let Some(candidate) = tz.from_local_datetime(&date.and_time(at)).earliest() {
            if candidate > *now {
                return Some(candidate);
            }
        }
        date = date.succ_opt()?;
    }
    None
}

/// Removes everything inside `dir` and returns how many entries went away.
/// A missing directory counts as already clean.
pub async fn purge_directory(dir: &Path) -> io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let result = match entry.file_type().await {
            Ok(kind) if kind.is_dir() => tokio::fs::remove_dir_all(&path).await,
            Ok(_) => tokio::fs::remove_file(&path).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Could not remove entry"),
        }
    }
    Ok(removed)
}

/// Runs the purge every day at `config.at` local time until `shutdown` fires.
pub fn spawn(config: CleanupConfig, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(dir = %config.dir.display(), at = %config.at, "Cleanup scheduled");
        loop {
            let now = Local::now();
            let Some(next) = next_run_after(&now, config.at) else {
                tracing::error!(at = %config.at, "Cannot compute next cleanup time");
                return;
            };
            let wait = (next.clone() - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Cleanup task stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            match purge_directory(&config.dir).await {
                Ok(0) => tracing::info!(dir = %config.dir.display(), "Nothing to clean"),
                Ok(removed) => {
                    tracing::info!(dir = %config.dir.display(), removed, "Directory purged")
                }
                Err(e) => {
                    tracing::error!(dir = %config.dir.display(), error = %e, "Directory purge failed")
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn schedules_later_today_or_tomorrow() {
        let morning = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        assert_eq!(
            next_run_after(&morning, at(18, 6)),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 18, 6, 0).unwrap())
        );

        let exactly = Utc.with_ymd_and_hms(2024, 5, 1, 18, 6, 0).unwrap();
        assert_eq!(
            next_run_after(&exactly, at(18, 6)),
            Some(Utc.with_ymd_and_hms(2024, 5, 2, 18, 6, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn purges_files_and_subdirectories() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"video").unwrap();
        std::fs::write(dir.path().join("b.mp4"), b"video").unwrap();
        std::fs::create_dir_all(dir.path().join("nested/deeper")).unwrap();
        std::fs::write(dir.path().join("nested/deeper/c.mp4"), b"video").unwrap();

        assert_eq!(purge_directory(dir.path()).await.unwrap(), 3);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn empty_or_missing_directory_is_a_no_op() {
        let dir = tempdir().unwrap();
        assert_eq!(purge_directory(dir.path()).await.unwrap(), 0);
        assert_eq!(purge_directory(&dir.path().join("absent")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let dir = tempdir().unwrap();
        let token = CancellationToken::new();
        let handle = spawn(
            CleanupConfig {
                dir: dir.path().to_path_buf(),
                at: at(18, 6),
            },
            token.clone(),
        );
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
