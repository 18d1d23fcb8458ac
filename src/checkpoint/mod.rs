//! Durable per-stage checkpoints of a change directory.
//!
//! Each checkpoint is an immutable snapshot stored as
//! `checkpoints/<stage:02>-<timestamp>/{manifest.json, files/...}`. The store
//! is append-only: a restore materializes a snapshot back into the change
//! directory and moves newer checkpoints off the current line (see
//! [`lineage`]); only [`CheckpointStore::prune`] deletes anything.

pub mod digest;
pub mod lineage;
mod store;

pub use digest::tree_digest;
pub use lineage::Lineage;
pub use store::{CheckpointStore, PruneReport};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::stage::StageId;

/// An immutable snapshot taken after a stage succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// `<stage:02>-<YYYYmmddTHHMMSS.ffffff>`
    pub id: String,
    pub stage_id: StageId,
    pub created_at: DateTime<Utc>,
    /// SHA-256 over the snapshot's sorted relative paths and contents
    pub content_digest: String,
    /// Relative paths captured in the snapshot
    pub files: Vec<String>,
    /// Directory holding the checkpoint (not persisted)
    #[serde(skip)]
    pub path: PathBuf,
    /// Whether a restore moved this checkpoint off the current line (not persisted)
    #[serde(skip)]
    pub superseded: bool,
}

impl Checkpoint {
    pub fn files_dir(&self) -> PathBuf {
        self.path.join("files")
    }

    pub fn short_digest(&self) -> &str {
        &self.content_digest[..self.content_digest.len().min(12)]
    }
}
