//! Line-of-succession bookkeeping for checkpoints.
//!
//! Restoring an older checkpoint never deletes newer ones; they are recorded
//! here as superseded until an explicit prune removes them from disk.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::util::atomic_write_json;

/// One restore operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreRecord {
    pub checkpoint: String,
    pub restored_at: DateTime<Utc>,
    pub superseded: Vec<String>,
}

/// Contents of `lineage.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lineage {
    #[serde(default)]
    pub superseded: BTreeSet<String>,
    #[serde(default)]
    pub restores: Vec<RestoreRecord>,
}

impl Lineage {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write_json(path, self)
    }

    pub fn is_superseded(&self, id: &str) -> bool {
        self.superseded.contains(id)
    }

    /// Record that `checkpoint` became the head and `superseded` left the current line.
    pub fn record_restore(&mut self, checkpoint: &str, superseded: Vec<String>) {
        self.superseded.remove(checkpoint);
        self.superseded.extend(superseded.iter().cloned());
        self.restores.push(RestoreRecord {
            checkpoint: checkpoint.to_string(),
            restored_at: Utc::now(),
            superseded,
        });
    }

    /// Forget ids that were physically removed.
    pub fn forget(&mut self, removed: &[String]) {
        for id in removed {
            self.superseded.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_record_restore_revives_target() {
        let mut lineage = Lineage::default();
        lineage.record_restore("00-a", vec!["01-b".into(), "02-c".into()]);
        assert!(lineage.is_superseded("01-b"));

        lineage.record_restore("01-b", vec![]);
        assert!(!lineage.is_superseded("01-b"));
        assert!(lineage.is_superseded("02-c"));
        assert_eq!(lineage.restores.len(), 2);
    }

    #[test]
    fn test_load_missing_and_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lineage.json");
        assert_eq!(Lineage::load(&path).unwrap(), Lineage::default());

        let mut lineage = Lineage::default();
        lineage.record_restore("00-a", vec!["03-d".into()]);
        lineage.save(&path).unwrap();
        assert_eq!(Lineage::load(&path).unwrap(), lineage);
    }
}
