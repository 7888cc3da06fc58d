use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::TransitionTable;
use crate::pricing::DEFAULT_DEBOUNCE;

/// Runtime settings, read once from `BOOKLINE_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub page_size: usize,
    pub debounce: Duration,
    /// Let Cancelled and NoShow bookings go back to Pending.
    pub allow_reopen: bool,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            page_size: 10,
            debounce: DEFAULT_DEBOUNCE,
            allow_reopen: false,
            metrics_port: None,
            compact_threshold: 1000,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable values fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        Self {
            data_dir: lookup("BOOKLINE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            page_size: parsed("BOOKLINE_PAGE_SIZE")
                .and_then(|n| usize::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.page_size),
            debounce: parsed("BOOKLINE_DEBOUNCE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.debounce),
            allow_reopen: lookup("BOOKLINE_ALLOW_REOPEN")
                .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(defaults.allow_reopen),
            metrics_port: lookup("BOOKLINE_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
            compact_threshold: parsed("BOOKLINE_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
        }
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }

    pub fn transition_table(&self) -> TransitionTable {
        TransitionTable::from_config(self.allow_reopen)
    }
}
