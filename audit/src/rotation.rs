//! File naming conventions for the daily command log

use chrono::NaiveDate;
use std::path::{Path, PathBuf};

/// The plaintext path for a given day's log file
///
/// # Arguments
///
/// * `dir` - The audit log root directory
/// * `date` - The local day the file covers
pub fn plaintext_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("commands-{}.log", date.format("%Y-%m-%d")))
}

/// The gzip-compressed path for a given day's log file
///
/// # Arguments
///
/// * `dir` - The audit log root directory
/// * `date` - The local day the file covers
pub fn gz_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("commands-{}.log.gz", date.format("%Y-%m-%d")))
}

/// Parses the date out of either a plaintext or gzipped command log filename
///
/// # Arguments
///
/// * `file_name` - The bare file name, e.g. `commands-2026-07-30.log.gz`
pub fn date_from_file_name(file_name: &str) -> Option<NaiveDate> {
    let stripped = file_name
        .strip_prefix("commands-")?
        .trim_end_matches(".gz")
        .trim_end_matches(".log");
    NaiveDate::parse_from_str(stripped, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plaintext_name() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 30).unwrap();
        let path = plaintext_path(Path::new("/var/log/sandkube"), date);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name, "commands-2026-07-30.log");
        assert_eq!(date_from_file_name(name), Some(date));
    }

    #[test]
    fn round_trips_gz_name() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let path = gz_path(Path::new("/var/log/sandkube"), date);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name, "commands-2026-07-01.log.gz");
        assert_eq!(date_from_file_name(name), Some(date));
    }

    #[test]
    fn rejects_unrelated_file_names() {
        assert_eq!(date_from_file_name("README.md"), None);
    }
}
