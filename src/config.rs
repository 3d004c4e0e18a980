use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read from `ALLOCD_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|s| s.parse().ok())
        }

        Self {
            bind: lookup("ALLOCD_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "ALLOCD_PORT").unwrap_or(7070),
            data_dir: lookup("ALLOCD_DATA_DIR")
                .unwrap_or_else(|| "./data".into())
                .into(),
            max_connections: parsed(&lookup, "ALLOCD_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed(&lookup, "ALLOCD_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: parsed(&lookup, "ALLOCD_METRICS_PORT"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("allocd.wal")
    }
}
