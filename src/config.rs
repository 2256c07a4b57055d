use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Server settings, read from `STAYBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub operator_password: String,
    pub max_connections: usize,
    /// Journal appends before the compactor rewrites it.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    /// JSON array of availability periods loaded at startup.
    pub periods_file: Option<PathBuf>,
    /// Cancel expired pending bookings in the background. Off by default.
    pub auto_cancel_expired: bool,
    pub sweep_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 7878,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            operator_password: "staybook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            periods_file: None,
            auto_cancel_expired: false,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring unparseable {key}={raw:?}");
            None
        }
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let raw = lookup(key)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => {
            warn!("ignoring unparseable {key}={raw:?}");
            None
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Missing or unparseable values fall back
    /// to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            port: parsed(&lookup, "STAYBOOK_PORT").unwrap_or(d.port),
            bind: lookup("STAYBOOK_BIND").unwrap_or(d.bind),
            data_dir: lookup("STAYBOOK_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            operator_password: lookup("STAYBOOK_PASSWORD").unwrap_or(d.operator_password),
            max_connections: parsed(&lookup, "STAYBOOK_MAX_CONNECTIONS").unwrap_or(d.max_connections),
            compact_threshold: parsed(&lookup, "STAYBOOK_COMPACT_THRESHOLD").unwrap_or(d.compact_threshold),
            metrics_port: parsed(&lookup, "STAYBOOK_METRICS_PORT"),
            periods_file: lookup("STAYBOOK_PERIODS_FILE").map(PathBuf::from),
            auto_cancel_expired: flag(&lookup, "STAYBOOK_AUTO_CANCEL_EXPIRED").unwrap_or(d.auto_cancel_expired),
            sweep_interval: parsed(&lookup, "STAYBOOK_SWEEP_INTERVAL_SECS")
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(d.sweep_interval),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let c = config(&[]);
        assert_eq!(c, Config::default());
        assert_eq!(c.addr(), "0.0.0.0:7878");
        assert_eq!(c.wal_path(), PathBuf::from("./data/bookings.wal"));
        assert!(!c.auto_cancel_expired);
    }

    #[test]
    fn reads_every_key() {
        let c = config(&[
            ("STAYBOOK_PORT", "9000"),
            ("STAYBOOK_BIND", "127.0.0.1"),
            ("STAYBOOK_DATA_DIR", "/var/lib/staybook"),
            ("STAYBOOK_PASSWORD", "hunter2"),
            ("STAYBOOK_MAX_CONNECTIONS", "8"),
            ("STAYBOOK_COMPACT_THRESHOLD", "50"),
            ("STAYBOOK_METRICS_PORT", "9100"),
            ("STAYBOOK_PERIODS_FILE", "periods.json"),
            ("STAYBOOK_AUTO_CANCEL_EXPIRED", "true"),
            ("STAYBOOK_SWEEP_INTERVAL_SECS", "5"),
        ]);
        assert_eq!(c.addr(), "127.0.0.1:9000");
        assert_eq!(c.data_dir, PathBuf::from("/var/lib/staybook"));
        assert_eq!(c.operator_password, "hunter2");
        assert_eq!(c.max_connections, 8);
        assert_eq!(c.compact_threshold, 50);
        assert_eq!(c.metrics_port, Some(9100));
        assert_eq!(c.periods_file, Some(PathBuf::from("periods.json")));
        assert!(c.auto_cancel_expired);
        assert_eq!(c.sweep_interval, Duration::from_secs(5));
    }

    #[test]
    fn bad_values_fall_back() {
        let c = config(&[
            ("STAYBOOK_PORT", "eighty"),
            ("STAYBOOK_AUTO_CANCEL_EXPIRED", "maybe"),
            ("STAYBOOK_SWEEP_INTERVAL_SECS", "0"),
            ("STAYBOOK_METRICS_PORT", "-1"),
        ]);
        assert_eq!(c.port, 7878);
        assert!(!c.auto_cancel_expired);
        assert_eq!(c.sweep_interval, Duration::from_secs(60));
        assert_eq!(c.metrics_port, None);
    }
}
