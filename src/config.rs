use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::notify;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub wal_file: String,
    pub metrics_port: Option<u16>,
    /// Appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub notify_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            wal_file: "tireslot.wal".into(),
            metrics_port: None,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(60),
            notify_capacity: notify::DEFAULT_CAPACITY,
        }
    }
}

/// Parse `raw` or fall back to `default`, warning about the bad value.
fn parsed<T: FromStr>(key: &str, raw: Option<String>, default: T) -> T {
    let Some(raw) = raw else { return default };
    match raw.trim().parse() {
        Ok(v) => v,
        Err(_) => {
            warn!("{key}={raw:?} is not valid, using the default");
            default
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let metrics_port = lookup("TIRESLOT_METRICS_PORT").and_then(|raw| match raw.trim().parse() {
            Ok(port) => Some(port),
            Err(_) => {
                warn!("TIRESLOT_METRICS_PORT={raw:?} is not a port, metrics disabled");
                None
            }
        });
        Self {
            data_dir: lookup("TIRESLOT_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            wal_file: lookup("TIRESLOT_WAL_FILE")
                .filter(|f| !f.trim().is_empty())
                .unwrap_or(defaults.wal_file),
            metrics_port,
            compact_threshold: parsed(
                "TIRESLOT_COMPACT_THRESHOLD",
                lookup("TIRESLOT_COMPACT_THRESHOLD"),
                defaults.compact_threshold,
            ),
            compact_interval: Duration::from_secs(parsed(
                "TIRESLOT_COMPACT_INTERVAL_SECS",
                lookup("TIRESLOT_COMPACT_INTERVAL_SECS"),
                defaults.compact_interval.as_secs(),
            ))
            .max(Duration::from_secs(1)),
            notify_capacity: parsed(
                "TIRESLOT_NOTIFY_CAPACITY",
                lookup("TIRESLOT_NOTIFY_CAPACITY"),
                defaults.notify_capacity,
            )
            .max(1),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(&self.wal_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(Config::from_lookup(|_| None), Config::default());
        assert_eq!(Config::default().wal_path(), PathBuf::from("./data/tireslot.wal"));
    }

    #[test]
    fn reads_every_key() {
        let config = Config::from_lookup(lookup(&[
            ("TIRESLOT_DATA_DIR", "/var/lib/tireslot"),
            ("TIRESLOT_WAL_FILE", "main.wal"),
            ("TIRESLOT_METRICS_PORT", "9102"),
            ("TIRESLOT_COMPACT_THRESHOLD", "50"),
            ("TIRESLOT_COMPACT_INTERVAL_SECS", "5"),
            ("TIRESLOT_NOTIFY_CAPACITY", "64"),
        ]));
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/tireslot/main.wal"));
        assert_eq!(config.metrics_port, Some(9102));
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.compact_interval, Duration::from_secs(5));
        assert_eq!(config.notify_capacity, 64);
    }

    #[test]
    fn bad_values_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("TIRESLOT_METRICS_PORT", "http"),
            ("TIRESLOT_COMPACT_THRESHOLD", "-3"),
            ("TIRESLOT_COMPACT_INTERVAL_SECS", "0"),
            ("TIRESLOT_NOTIFY_CAPACITY", "lots"),
        ]));
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.compact_interval, Duration::from_secs(1));
        assert_eq!(config.notify_capacity, notify::DEFAULT_CAPACITY);
    }
}
