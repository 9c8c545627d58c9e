//! Per-show yaml database of observed stuck frames.
//!
//! Each flush merges the engine's cache with whatever is already on disk,
//! keyed by `"<job>/<frame>"`, so repeated flushes of the same cache are
//! idempotent and concurrent consoles only ever add observations.

use super::StuckFrame;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StuckLogRecord {
    pub frame: String,
    pub layer: String,
    pub host: String,
    pub llu_secs: i64,
    pub runtime_secs: i64,
    pub avg_frame_secs: u32,
    pub last_line: String,
}

impl From<&StuckFrame> for StuckLogRecord {
    fn from(frame: &StuckFrame) -> StuckLogRecord {
        StuckLogRecord {
            frame: frame.frame_name.clone(),
            layer: frame.layer_name.clone(),
            host: frame.host_name.clone(),
            llu_secs: frame.llu_secs,
            runtime_secs: frame.runtime_secs,
            avg_frame_secs: frame.avg_frame_secs,
            last_line: frame.last_line.clone(),
        }
    }
}

pub fn record_key(frame: &StuckFrame) -> String {
    format!("{}/{}", frame.job_name, frame.frame_name)
}

fn yaml_err(err: serde_yaml::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// Merge `records` into the database at `path`, creating it on first use.
pub fn merge_log_db(path: &Path, records: &BTreeMap<String, StuckLogRecord>) -> io::Result<()> {
    let mut db: BTreeMap<String, StuckLogRecord> = if path.exists() {
        serde_yaml::from_str(&std::fs::read_to_string(path)?).map_err(yaml_err)?
    } else {
        BTreeMap::new()
    };
    for (key, record) in records {
        db.insert(key.clone(), record.clone());
    }
    std::fs::write(path, serde_yaml::to_string(&db).map_err(yaml_err)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(frame: &str, llu: i64) -> StuckLogRecord {
        StuckLogRecord {
            frame: frame.to_string(),
            layer: "render".to_string(),
            host: "h01".to_string(),
            llu_secs: llu,
            runtime_secs: 1500,
            avg_frame_secs: 600,
            last_line: "rendering".to_string(),
        }
    }

    #[test]
    fn merge_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("testing.stuck.yaml");
        let mut records = BTreeMap::new();
        records.insert("job-a/0001-render".to_string(), record("0001-render", 900));
        records.insert("job-a/0002-render".to_string(), record("0002-render", 700));

        merge_log_db(&path, &records).unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        merge_log_db(&path, &records).unwrap();
        let second = std::fs::read_to_string(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn merge_preserves_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("testing.stuck.yaml");
        let mut old = BTreeMap::new();
        old.insert("job-a/0001-render".to_string(), record("0001-render", 900));
        merge_log_db(&path, &old).unwrap();

        let mut new = BTreeMap::new();
        new.insert("job-b/0005-comp".to_string(), record("0005-comp", 400));
        merge_log_db(&path, &new).unwrap();

        let db: BTreeMap<String, StuckLogRecord> =
            serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(db.len(), 2);
        assert!(db.contains_key("job-a/0001-render"));
        assert!(db.contains_key("job-b/0005-comp"));
    }

    #[test]
    fn newer_observation_overwrites_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("testing.stuck.yaml");
        let mut first = BTreeMap::new();
        first.insert("job-a/0001-render".to_string(), record("0001-render", 900));
        merge_log_db(&path, &first).unwrap();

        let mut second = BTreeMap::new();
        second.insert("job-a/0001-render".to_string(), record("0001-render", 1200));
        merge_log_db(&path, &second).unwrap();

        let db: BTreeMap<String, StuckLogRecord> =
            serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(db["job-a/0001-render"].llu_secs, 1200);
    }
}
