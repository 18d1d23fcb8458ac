use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::PipelineError;

/// Exclusive per-change run lock held for the lifetime of a run.
///
/// Acquisition never waits: a second run for the same change fails fast with
/// `RunInProgress`. Drop releases the lock but leaves `run.lock` in place, so
/// every contender locks the same inode.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(state_dir: &Path, change_id: &str) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(state_dir).map_err(|e| PipelineError::io(state_dir, e))?;
        let path = state_dir.join("run.lock");
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| PipelineError::io(&path, e))?;

        if file.try_lock_exclusive().is_err() {
            return Err(PipelineError::RunInProgress {
                change_id: change_id.to_string(),
                lock_path: path,
            });
        }

        file.set_len(0).map_err(|e| PipelineError::io(&path, e))?;
        writeln!(file, "{}", std::process::id()).map_err(|e| PipelineError::io(&path, e))?;
        debug!(change_id, lock = %path.display(), "Acquired run lock");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
