use std::path::PathBuf;
use std::time::Duration;

/// Connection settings for the ledger store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// SQLite database file
    pub database_path: PathBuf,
    pub max_connections: u32,
    /// Upper bound on waiting for a connection or the write lock
    pub lock_timeout: Duration,
    /// Create the database file when it does not exist yet
    pub create_if_missing: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("cashbox.db"),
            max_connections: 5,
            lock_timeout: Duration::from_secs(5),
            create_if_missing: false,
        }
    }
}

impl StoreConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            ..Self::default()
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        // A unit of work holds one connection; reads need another.
        self.max_connections = max_connections.max(1);
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.database_path, PathBuf::from("cashbox.db"));
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert!(!config.create_if_missing);
    }

    #[test]
    fn test_builder_keeps_at_least_one_connection() {
        let config = StoreConfig::new("/tmp/x.db")
            .with_max_connections(0)
            .with_lock_timeout(Duration::from_millis(200))
            .with_create_if_missing(true);
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.lock_timeout, Duration::from_millis(200));
        assert!(config.create_if_missing);
    }
}
