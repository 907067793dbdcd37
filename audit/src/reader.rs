//! The admin command-log read API: scans daily files newest-first and filters in memory

use crate::rotation::date_from_file_name;
use flate2::read::GzDecoder;
use sandkube_common::{AuditEntry, Error};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Filters and pagination for a command-log read
#[derive(Debug, Default, Clone)]
pub struct ListQuery {
    /// Restrict to entries run by this principal
    pub user_id: Option<String>,
    /// Restrict to entries run against this reservation
    pub reservation_id: Option<Uuid>,
    /// Maximum number of entries to return
    pub limit: usize,
    /// How many matching entries to skip before collecting `limit`
    pub offset: usize,
}

/// Lists command audit entries matching a query, newest-first, scanning both plaintext and
/// gzipped daily files
///
/// # Arguments
///
/// * `dir` - The audit log root directory
/// * `query` - The filters and pagination to apply
pub fn list(dir: &Path, query: &ListQuery) -> Result<Vec<AuditEntry>, Error> {
    let mut files: Vec<(chrono::NaiveDate, PathBuf)> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?.to_owned();
            let date = date_from_file_name(&name)?;
            Some((date, entry.path()))
        })
        .collect();
    files.sort_by(|a, b| b.0.cmp(&a.0));

    let mut matched = Vec::new();
    for (_, path) in files {
        let mut entries = read_entries(&path)?;
        entries.retain(|entry| {
            query
                .user_id
                .as_deref()
                .map(|uid| entry.user_id == uid)
                .unwrap_or(true)
                && query
                    .reservation_id
                    .map(|id| entry.reservation_id == id)
                    .unwrap_or(true)
        });
        matched.extend(entries);
    }
    matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let limit = if query.limit == 0 { matched.len() } else { query.limit };
    Ok(matched
        .into_iter()
        .skip(query.offset)
        .take(limit)
        .collect())
}

/// Reads every well-formed [`AuditEntry`] out of one log file, transparently decompressing
/// `.gz` files; malformed lines are skipped rather than failing the whole read
fn read_entries(path: &Path) -> Result<Vec<AuditEntry>, Error> {
    let file = File::open(path)?;
    let reader: Box<dyn Read> = if path.extension().and_then(|ext| ext.to_str()) == Some("gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut out = Vec::new();
    for line in BufReader::new(reader).lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(entry) => out.push(entry),
            Err(err) => tracing::warn!(%err, path = %path.display(), "skipping malformed audit log line"),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn entry(user: &str, minute: u32) -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            reservation_id: Uuid::nil(),
            user_id: user.to_owned(),
            user_name: None,
            pod_name: "pod".to_owned(),
            session_id: "session".to_owned(),
            command_text: "ls".to_owned(),
            timestamp: Utc.with_ymd_and_hms(2026, 7, 30, 12, minute, 0).unwrap(),
        }
    }

    #[test]
    fn lists_newest_first_across_plaintext_and_gz() {
        let dir = tempfile::tempdir().unwrap();
        let plain_path = dir.path().join("commands-2026-07-31.log");
        std::fs::write(&plain_path, format!("{}\n", serde_json::to_string(&entry("alice", 5)).unwrap()))
            .unwrap();

        let gz_path = dir.path().join("commands-2026-07-30.log.gz");
        let gz_file = File::create(&gz_path).unwrap();
        let mut encoder = GzEncoder::new(gz_file, Compression::default());
        writeln!(encoder, "{}", serde_json::to_string(&entry("alice", 1)).unwrap()).unwrap();
        encoder.finish().unwrap();

        let results = list(dir.path(), &ListQuery::default()).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].timestamp > results[1].timestamp);
    }

    #[test]
    fn filters_by_user_and_paginates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands-2026-07-30.log");
        let mut file = File::create(&path).unwrap();
        for minute in 0..5 {
            writeln!(file, "{}", serde_json::to_string(&entry("alice", minute)).unwrap()).unwrap();
        }
        writeln!(file, "{}", serde_json::to_string(&entry("bob", 6)).unwrap()).unwrap();

        let query = ListQuery {
            user_id: Some("alice".to_owned()),
            limit: 2,
            offset: 1,
            ..Default::default()
        };
        let results = list(dir.path(), &query).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|e| e.user_id == "alice"));
    }

    #[test]
    fn skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands-2026-07-30.log");
        std::fs::write(&path, "not json\n").unwrap();
        let results = list(dir.path(), &ListQuery::default()).unwrap();
        assert!(results.is_empty());
    }
}
