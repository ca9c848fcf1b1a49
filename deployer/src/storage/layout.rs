//! State file layout

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Default lock file name, relative to the state directory
pub const LOCK_FILE: &str = ".deploy-lock";

/// Default tag history file name, relative to the state directory
pub const TAG_FILE: &str = ".deploy-tag";

/// Where the deploy lock and tag history live.
///
/// Both files are singletons per state directory. Tests point this at a
/// temporary directory so runs stay isolated.
#[derive(Debug, Clone)]
pub struct StateLayout {
    /// Base directory for all state files
    pub base_dir: PathBuf,
}

impl StateLayout {
    /// Create a new state layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the state directory
    pub fn state_dir(&self) -> Dir {
        Dir::new(&self.base_dir)
    }

    /// Get the lock file path
    pub fn lock_file(&self) -> File {
        self.state_dir().file(LOCK_FILE)
    }

    /// Get the tag history file path
    pub fn tag_file(&self) -> File {
        self.state_dir().file(TAG_FILE)
    }
}

impl Default for StateLayout {
    fn default() -> Self {
        // State is scoped to the directory the deploy runs from
        Self::new(".")
    }
}
