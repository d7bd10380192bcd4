//! Scoped scratch space for stages that touch local files.
//!
//! A [`Workspace`] owns a temporary directory. Everything written below it
//! is removed when the workspace is closed or dropped, on success and on
//! every error path alike.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

pub struct Workspace {
    temp_dir: TempDir,
}

impl Workspace {
    /// Create a workspace below `base`, or below the system temp dir.
    pub fn new(base: Option<&Path>) -> io::Result<Self> {
        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix("cadenza-");
            builder
        };
        let temp_dir = match base {
            Some(base) => {
                std::fs::create_dir_all(base)?;
                builder.tempdir_in(base)?
            }
            None => builder.tempdir()?,
        };
        debug!(dir = %temp_dir.path().display(), "Opened workspace");
        Ok(Self { temp_dir })
    }

    /// Path to the workspace directory.
    pub fn dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Path for a named file inside the workspace.
    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Remove the workspace now, reporting failures instead of ignoring them.
    pub fn close(self) -> io::Result<()> {
        let dir = self.temp_dir.path().to_path_buf();
        self.temp_dir.close().map_err(|e| {
            warn!(dir = %dir.display(), error = %e, "Failed to remove workspace");
            e
        })?;
        debug!(dir = %dir.display(), "Closed workspace");
        Ok(())
    }
}
