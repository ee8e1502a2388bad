use anyhow::{bail, Context, Result};

/// Runtime configuration, resolved once at startup from the environment
/// (plus `.env` via dotenvy) and passed by reference into each component.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Namespaces to watch and reconcile.
    pub namespaces: Vec<String>,
    pub enable_leader_election: bool,
    /// Namespace holding the leadership lease.
    pub leader_election_namespace: String,
    /// Upper bound on concurrently running reconciles.
    pub reconcile_concurrency: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = match lookup("PORT") {
            Some(raw) => raw.parse().context("PORT must be a port number")?,
            None => 8080,
        };

        let namespaces: Vec<String> = lookup("WATCH_NAMESPACES")
            .unwrap_or_else(|| "default".to_string())
            .split(',')
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .map(str::to_string)
            .collect();
        if namespaces.is_empty() {
            bail!("WATCH_NAMESPACES must name at least one namespace");
        }

        let enable_leader_election = match lookup("ENABLE_LEADER_ELECTION") {
            Some(raw) => raw
                .parse()
                .context("ENABLE_LEADER_ELECTION must be true or false")?,
            None => true,
        };

        let leader_election_namespace =
            lookup("LEADER_ELECTION_NAMESPACE").unwrap_or_else(|| "default".to_string());

        let reconcile_concurrency = match lookup("RECONCILE_CONCURRENCY") {
            Some(raw) => raw
                .parse::<usize>()
                .context("RECONCILE_CONCURRENCY must be a positive integer")?
                .max(1),
            None => 1,
        };

        Ok(Self {
            port,
            namespaces,
            enable_leader_election,
            leader_election_namespace,
            reconcile_concurrency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.namespaces, vec!["default"]);
        assert!(config.enable_leader_election);
        assert_eq!(config.leader_election_namespace, "default");
        assert_eq!(config.reconcile_concurrency, 1);
    }

    #[test]
    fn namespace_list_is_split_and_trimmed() {
        let config =
            config_from(&[("WATCH_NAMESPACES", " team-a, team-b ,,team-c")]).unwrap();
        assert_eq!(config.namespaces, vec!["team-a", "team-b", "team-c"]);
    }

    #[test]
    fn blank_namespace_list_is_rejected() {
        assert!(config_from(&[("WATCH_NAMESPACES", " , ,")]).is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(config_from(&[("PORT", "not-a-port")]).is_err());
        assert!(config_from(&[("ENABLE_LEADER_ELECTION", "maybe")]).is_err());
        assert!(config_from(&[("RECONCILE_CONCURRENCY", "-1")]).is_err());
    }

    #[test]
    fn concurrency_floor_is_one() {
        let config = config_from(&[("RECONCILE_CONCURRENCY", "0")]).unwrap();
        assert_eq!(config.reconcile_concurrency, 1);
    }
}
