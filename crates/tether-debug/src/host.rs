use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

/// Supplies the file breakpoint operations fall back to when the caller names
/// no path, typically the file focused in the host editor.
pub trait ActiveFile: Send + Sync {
    fn active_file(&self) -> Option<PathBuf>;
}

/// An [`ActiveFile`] the host updates as focus moves.
#[derive(Debug, Clone, Default)]
pub struct SharedActiveFile {
    current: Arc<RwLock<Option<PathBuf>>>,
}

impl SharedActiveFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, path: Option<PathBuf>) {
        *self.current.write() = path;
    }
}

impl ActiveFile for SharedActiveFile {
    fn active_file(&self) -> Option<PathBuf> {
        self.current.read().clone()
    }
}
