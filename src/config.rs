use std::path::{Path, PathBuf};

pub const DEFAULT_DBPATH: &str = "/data/db";

/// Where databases opened by the default resolver live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// One SQLite file per database under the data root.
    Disk,
    /// Private in-memory SQLite databases, gone on close.
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    dbpath: PathBuf,
    storage: StorageMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dbpath: PathBuf::from(DEFAULT_DBPATH),
            storage: StorageMode::Disk,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_memory() -> Self {
        Self::default().storage(StorageMode::Memory)
    }

    /// Read `DBCLIENT_DBPATH` and `DBCLIENT_STORAGE` (`disk` or `memory`).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("DBCLIENT_DBPATH") {
            config.dbpath = PathBuf::from(path);
        }
        match std::env::var("DBCLIENT_STORAGE").as_deref() {
            Ok("memory") => config.storage = StorageMode::Memory,
            Ok("disk") | Err(_) => {}
            Ok(other) => log::warn!("unknown DBCLIENT_STORAGE `{other}`, using disk"),
        }
        config
    }

    pub fn dbpath(mut self, path: impl Into<PathBuf>) -> Self {
        self.dbpath = path.into();
        self
    }

    pub fn storage(mut self, mode: StorageMode) -> Self {
        self.storage = mode;
        self
    }

    pub fn data_root(&self) -> &Path {
        &self.dbpath
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::new();
        assert_eq!(config.data_root(), Path::new(DEFAULT_DBPATH));
        assert_eq!(config.storage_mode(), StorageMode::Disk);
    }

    #[test]
    fn builder_overrides() {
        let config = Config::in_memory().dbpath("/tmp/other");
        assert_eq!(config.data_root(), Path::new("/tmp/other"));
        assert_eq!(config.storage_mode(), StorageMode::Memory);
    }
}
