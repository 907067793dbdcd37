//! The drain daemon and hourly maintenance sweep

use crate::rotation::{date_from_file_name, gz_path, plaintext_path};
use chrono::{Local, NaiveDate};
use flate2::write::GzEncoder;
use flate2::Compression;
use sandkube_common::Error;
use sandkube_queue::Queue;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long entries that can't be re-read from the gzip source are kept before eviction
const RETENTION_DAYS: i64 = 30;

/// Owns the append-only log file directory and the queue it drains from
pub struct AuditSink {
    log_directory: PathBuf,
    queue: Queue,
}

impl AuditSink {
    /// Builds a sink rooted at the configured log directory, creating it if missing
    ///
    /// # Arguments
    ///
    /// * `log_directory` - The root directory daily log files are written under
    /// * `queue` - The work queue to drain command audit entries from
    pub fn new(log_directory: impl Into<PathBuf>, queue: Queue) -> Result<Self, Error> {
        let log_directory = log_directory.into();
        fs::create_dir_all(&log_directory)?;
        Ok(AuditSink {
            log_directory,
            queue,
        })
    }

    /// Appends one newline-delimited JSON line to today's plaintext log file
    fn append_line(&self, line: &str) -> Result<(), Error> {
        let path = plaintext_path(&self.log_directory, Local::now().date_naive());
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Runs the drain daemon: blocks on the audit queue, appends each entry to today's file,
    /// and re-queues to the head on a write failure so no entry is silently lost
    ///
    /// # Arguments
    ///
    /// * `cancel` - Stops the loop the next time it wakes once cancelled
    pub async fn drain_task(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let popped = tokio::select! {
                popped = self.queue.audit_pop_blocking(5.0) => popped,
                _ = cancel.cancelled() => return,
            };
            let entry = match popped {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(err) => {
                    tracing::error!(%err, "audit queue poll failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            let serialized = match serde_json::to_string(&entry) {
                Ok(serialized) => serialized,
                Err(err) => {
                    tracing::error!(%err, entry_id = %entry.id, "failed to serialize audit entry, dropping");
                    continue;
                }
            };
            if let Err(err) = self.append_line(&serialized) {
                tracing::error!(%err, entry_id = %entry.id, "failed to write audit entry, requeuing");
                if let Err(err) = self.queue.audit_requeue_front(&entry).await {
                    tracing::error!(%err, entry_id = %entry.id, "failed to requeue audit entry, dropping");
                }
            }
        }
    }

    /// Runs the hourly maintenance sweep: gzips yesterday-or-older plaintext files and
    /// deletes gzip files past the retention window
    ///
    /// # Arguments
    ///
    /// * `cancel` - Stops the loop the next time it wakes once cancelled
    pub async fn maintenance_task(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(3600));
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => return,
            }
            if let Err(err) = self.sweep() {
                tracing::error!(%err, "audit log maintenance sweep failed");
            }
        }
    }

    /// One pass of the maintenance sweep, delegating to [`sweep_dir`] so the filesystem logic
    /// can be exercised directly in tests without a live redis connection
    fn sweep(&self) -> Result<(), Error> {
        sweep_dir(&self.log_directory)
    }
}

/// Gzips yesterday-or-older plaintext log files in `dir` and deletes gzip files past
/// [`RETENTION_DAYS`]
///
/// # Arguments
///
/// * `dir` - The audit log root directory to sweep
fn sweep_dir(dir: &std::path::Path) -> Result<(), Error> {
    let today = Local::now().date_naive();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(date) = date_from_file_name(file_name) else {
            continue;
        };
        if file_name.ends_with(".log") && date < today {
            compress(dir, date)?;
        } else if file_name.ends_with(".gz") && today - date > chrono::Duration::days(RETENTION_DAYS) {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Gzips a day's plaintext log file and removes the plaintext source
fn compress(dir: &std::path::Path, date: NaiveDate) -> Result<(), Error> {
    let src = plaintext_path(dir, date);
    let dst = gz_path(dir, date);
    let input = fs::read(&src)?;
    let out_file = File::create(&dst)?;
    let mut encoder = GzEncoder::new(out_file, Compression::default());
    encoder.write_all(&input)?;
    encoder.finish()?;
    fs::remove_file(&src)?;
    Ok(())
}

/// Spawns the maintenance sweep as a background task; split out of [`AuditSink`] so callers
/// that only need the periodic sweep (not the drain daemon) can start it independently
///
/// # Arguments
///
/// * `sink` - The sink to run maintenance for
/// * `cancel` - Stops the task once cancelled
pub fn maintenance_task(
    sink: std::sync::Arc<AuditSink>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { sink.maintenance_task(cancel).await })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use sandkube_common::AuditEntry;
    use uuid::Uuid;

    fn entry() -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            reservation_id: Uuid::new_v4(),
            user_id: "alice@example.com".to_owned(),
            user_name: None,
            pod_name: "k8s-playground-abcd1234-0".to_owned(),
            session_id: "alice-pod-123".to_owned(),
            command_text: "ls -la".to_owned(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn compress_removes_plaintext_and_writes_gz() {
        let dir = tempfile::tempdir().unwrap();
        let yesterday = Local::now().date_naive() - ChronoDuration::days(1);
        let plain = plaintext_path(dir.path(), yesterday);
        fs::write(&plain, format!("{}\n", serde_json::to_string(&entry()).unwrap())).unwrap();

        compress(dir.path(), yesterday).unwrap();

        assert!(!plain.exists());
        assert!(gz_path(dir.path(), yesterday).exists());
    }

    #[test]
    fn sweep_evicts_old_gz_files() {
        let dir = tempfile::tempdir().unwrap();
        let ancient = Local::now().date_naive() - ChronoDuration::days(RETENTION_DAYS + 5);
        let gz = gz_path(dir.path(), ancient);
        fs::write(&gz, b"not really gzip but eviction only checks age").unwrap();

        sweep_dir(dir.path()).unwrap();

        assert!(!gz.exists());
    }

    #[test]
    fn sweep_compresses_old_plaintext_and_keeps_recent_gz() {
        let dir = tempfile::tempdir().unwrap();
        let yesterday = Local::now().date_naive() - ChronoDuration::days(1);
        let recent = Local::now().date_naive() - ChronoDuration::days(2);
        fs::write(plaintext_path(dir.path(), yesterday), "line\n").unwrap();
        let recent_gz = gz_path(dir.path(), recent);
        fs::write(&recent_gz, b"already compressed").unwrap();

        sweep_dir(dir.path()).unwrap();

        assert!(gz_path(dir.path(), yesterday).exists());
        assert!(recent_gz.exists());
    }
}
