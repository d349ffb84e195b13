//! Configuration module for pingwatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "pingwatch.db")
    pub db_path: String,
    /// How long a single probe may take before it counts as a timeout (default: 10s)
    pub probe_timeout: Duration,
    /// Upper bound on probe units running at once (default: 32)
    pub max_concurrent_probes: usize,
    /// How long a store call waits on a lock held by another connection (default: 5s)
    pub db_busy_timeout: Duration,
    /// User-Agent header sent with every probe
    pub user_agent: String,
    /// Monitoring location stamped on ping records
    pub location: Option<String>,
    /// Monitoring region code stamped on ping records
    pub region_code: Option<String>,
    /// Report every active site as due, ignoring intervals
    pub always_due: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "pingwatch.db".to_string(),
            probe_timeout: Duration::from_millis(10_000),
            max_concurrent_probes: 32,
            db_busy_timeout: Duration::from_millis(5_000),
            user_agent: "Website-Monitor/1.0".to_string(),
            location: None,
            region_code: None,
            always_due: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PINGWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `PINGWATCH_DB_PATH`: Database file path (default: "pingwatch.db")
    /// - `PINGWATCH_PROBE_TIMEOUT_MS`: Probe timeout in milliseconds (default: 10000)
    /// - `PINGWATCH_MAX_CONCURRENT_PROBES`: Concurrency cap for probe units (default: 32)
    /// - `PINGWATCH_DB_BUSY_TIMEOUT_MS`: SQLite busy timeout in milliseconds (default: 5000)
    /// - `PINGWATCH_USER_AGENT`: User-Agent for probes (default: "Website-Monitor/1.0")
    /// - `PINGWATCH_LOCATION`, `PINGWATCH_REGION_CODE`: optional location tags
    /// - `PINGWATCH_ALWAYS_DUE`: report all sites as due (default: false)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = parse_var(&lookup, "PINGWATCH_HTTP_PORT") {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("PINGWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(ms) = parse_var::<u64, _>(&lookup, "PINGWATCH_PROBE_TIMEOUT_MS") {
            if ms > 0 {
                cfg.probe_timeout = Duration::from_millis(ms);
            }
        }

        if let Some(max) = parse_var::<usize, _>(&lookup, "PINGWATCH_MAX_CONCURRENT_PROBES") {
            if max > 0 {
                cfg.max_concurrent_probes = max;
            }
        }

        if let Some(ms) = parse_var(&lookup, "PINGWATCH_DB_BUSY_TIMEOUT_MS") {
            cfg.db_busy_timeout = Duration::from_millis(ms);
        }

        if let Some(agent) = lookup("PINGWATCH_USER_AGENT").filter(|s| !s.trim().is_empty()) {
            cfg.user_agent = agent;
        }

        cfg.location = lookup("PINGWATCH_LOCATION").filter(|s| !s.trim().is_empty());
        cfg.region_code = lookup("PINGWATCH_REGION_CODE").filter(|s| !s.trim().is_empty());

        if let Some(always_due) = parse_var(&lookup, "PINGWATCH_ALWAYS_DUE") {
            cfg.always_due = always_due;
        }

        cfg
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring unparseable value {:?} for {}", raw, key);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load_from(vars: &[(&str, &str)]) -> ServerConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "pingwatch.db");
        assert_eq!(cfg.probe_timeout, Duration::from_secs(10));
        assert_eq!(cfg.max_concurrent_probes, 32);
        assert!(!cfg.always_due);
    }

    #[test]
    fn test_overrides() {
        let cfg = load_from(&[
            ("PINGWATCH_HTTP_PORT", "9999"),
            ("PINGWATCH_DB_PATH", "/tmp/x.db"),
            ("PINGWATCH_PROBE_TIMEOUT_MS", "2500"),
            ("PINGWATCH_MAX_CONCURRENT_PROBES", "4"),
            ("PINGWATCH_LOCATION", "Singapore"),
            ("PINGWATCH_REGION_CODE", "SG"),
            ("PINGWATCH_ALWAYS_DUE", "true"),
        ]);
        assert_eq!(cfg.http_port, 9999);
        assert_eq!(cfg.db_path, "/tmp/x.db");
        assert_eq!(cfg.probe_timeout, Duration::from_millis(2500));
        assert_eq!(cfg.max_concurrent_probes, 4);
        assert_eq!(cfg.location.as_deref(), Some("Singapore"));
        assert_eq!(cfg.region_code.as_deref(), Some("SG"));
        assert!(cfg.always_due);
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let cfg = load_from(&[
            ("PINGWATCH_HTTP_PORT", "not-a-port"),
            ("PINGWATCH_PROBE_TIMEOUT_MS", "0"),
            ("PINGWATCH_MAX_CONCURRENT_PROBES", "0"),
            ("PINGWATCH_LOCATION", "  "),
        ]);
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.probe_timeout, Duration::from_secs(10));
        assert_eq!(cfg.max_concurrent_probes, 32);
        assert!(cfg.location.is_none());
    }
}
