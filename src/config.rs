use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings, read from `SHAREIT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub wal_name: String,
    /// Appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            wal_name: "shareit".into(),
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(60),
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or unparsable values fall
    /// back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("SHAREIT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            wal_name: lookup("SHAREIT_WAL_NAME")
                .filter(|name| !name.is_empty())
                .unwrap_or(defaults.wal_name),
            compact_threshold: lookup("SHAREIT_COMPACT_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.compact_threshold),
            compact_interval: lookup("SHAREIT_COMPACT_INTERVAL_SECS")
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.compact_interval),
            metrics_port: lookup("SHAREIT_METRICS_PORT").and_then(|v| v.parse().ok()),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        let safe_name: String = self
            .wal_name
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return self.data_dir.join("shareit.wal");
        }
        self.data_dir.join(format!("{safe_name}.wal"))
    }
}
