//! Server configuration from the environment

use std::time::Duration;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_STALE_NODE_SECS: u64 = 300;
const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: String,
    pub port: u16,
    /// Age after which an unsettled generation counts as interrupted
    pub stale_node_age: Duration,
    pub reconcile_interval: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = lookup("DAGCHAT_DB_PATH").unwrap_or_else(|| {
            let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
            format!("{home}/.dagchat/dagchat.db")
        });
        let port = lookup("DAGCHAT_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let secs = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.parse().ok())
                .filter(|&v| v > 0)
                .unwrap_or(default)
        };

        Self {
            db_path,
            port,
            stale_node_age: Duration::from_secs(secs(
                "DAGCHAT_STALE_NODE_SECS",
                DEFAULT_STALE_NODE_SECS,
            )),
            reconcile_interval: Duration::from_secs(secs(
                "DAGCHAT_RECONCILE_INTERVAL_SECS",
                DEFAULT_RECONCILE_INTERVAL_SECS,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("HOME", "/home/ada")]);
        assert_eq!(config.db_path, "/home/ada/.dagchat/dagchat.db");
        assert_eq!(config.port, 8000);
        assert_eq!(config.stale_node_age, Duration::from_secs(300));
        assert_eq!(config.reconcile_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let config = config(&[
            ("DAGCHAT_DB_PATH", "/data/graph.db"),
            ("DAGCHAT_PORT", "not-a-port"),
            ("DAGCHAT_STALE_NODE_SECS", "30"),
            ("DAGCHAT_RECONCILE_INTERVAL_SECS", "0"),
        ]);
        assert_eq!(config.db_path, "/data/graph.db");
        assert_eq!(config.port, 8000);
        assert_eq!(config.stale_node_age, Duration::from_secs(30));
        assert_eq!(config.reconcile_interval, Duration::from_secs(60));
    }
}
