use chrono::Duration;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::overseer::{DispatchSettings, OverseerSettings, SelectionPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime configuration for the overseer binary
#[derive(Debug, Clone)]
pub struct OverseerConfig {
    pub dispatch_timeout_secs: i64,
    pub max_attempts: u32,
    pub stale_after_syncs: u32,
    pub record_retention_secs: i64,
    pub sync_interval_secs: u64,
    pub timeout_check_interval_ms: u64,
    pub snapshot_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub selection_policy: SelectionPolicy,
}

impl Default for OverseerConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout_secs: 30,
            max_attempts: 3,
            stale_after_syncs: 3,
            record_retention_secs: 300,
            sync_interval_secs: 15,
            timeout_check_interval_ms: 1000,
            snapshot_path: PathBuf::from("snapshot.json"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            selection_policy: SelectionPolicy::default(),
        }
    }
}

impl OverseerConfig {
    /// Read `OVERSEER_*` variables from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            dispatch_timeout_secs: parse(
                &lookup,
                "OVERSEER_DISPATCH_TIMEOUT_SECS",
                defaults.dispatch_timeout_secs,
            )?,
            max_attempts: parse(&lookup, "OVERSEER_MAX_ATTEMPTS", defaults.max_attempts)?,
            stale_after_syncs: parse(
                &lookup,
                "OVERSEER_STALE_AFTER_SYNCS",
                defaults.stale_after_syncs,
            )?,
            record_retention_secs: parse(
                &lookup,
                "OVERSEER_RECORD_RETENTION_SECS",
                defaults.record_retention_secs,
            )?,
            sync_interval_secs: parse(
                &lookup,
                "OVERSEER_SYNC_INTERVAL_SECS",
                defaults.sync_interval_secs,
            )?,
            timeout_check_interval_ms: parse(
                &lookup,
                "OVERSEER_TIMEOUT_CHECK_INTERVAL_MS",
                defaults.timeout_check_interval_ms,
            )?,
            snapshot_path: lookup("OVERSEER_SNAPSHOT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.snapshot_path),
            bind_addr: parse(&lookup, "OVERSEER_BIND_ADDR", defaults.bind_addr)?,
            selection_policy: parse(
                &lookup,
                "OVERSEER_SELECTION_POLICY",
                defaults.selection_policy,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("OVERSEER_DISPATCH_TIMEOUT_SECS", self.dispatch_timeout_secs),
            ("OVERSEER_MAX_ATTEMPTS", i64::from(self.max_attempts)),
            ("OVERSEER_SYNC_INTERVAL_SECS", self.sync_interval_secs as i64),
            ("OVERSEER_TIMEOUT_CHECK_INTERVAL_MS", self.timeout_check_interval_ms as i64),
        ];

        for (key, value) in positive {
            if value <= 0 {
                return Err(ConfigError::Invalid {
                    key,
                    value: value.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.record_retention_secs < 0 {
            return Err(ConfigError::Invalid {
                key: "OVERSEER_RECORD_RETENTION_SECS",
                value: self.record_retention_secs.to_string(),
                reason: "must not be negative".to_string(),
            });
        }
        Ok(())
    }

    /// Core settings derived from this configuration
    pub fn settings(&self) -> OverseerSettings {
        OverseerSettings {
            dispatch: DispatchSettings {
                dispatch_timeout: Duration::seconds(self.dispatch_timeout_secs),
                max_attempts: self.max_attempts,
                record_retention: Duration::seconds(self.record_retention_secs),
                policy: self.selection_policy,
            },
            stale_after_syncs: self.stale_after_syncs,
        }
    }

    pub fn sync_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sync_interval_secs)
    }

    pub fn timeout_check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_check_interval_ms)
    }

    /// Upper bound for one transport send; never longer than the ack window
    pub fn send_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.dispatch_timeout_secs.max(1) as u64)
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
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
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = OverseerConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.dispatch_timeout_secs, 30);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.selection_policy, SelectionPolicy::LeastRecentlyDispatched);
        assert_eq!(config.settings(), OverseerSettings::default());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = OverseerConfig::from_lookup(lookup(&[
            ("OVERSEER_DISPATCH_TIMEOUT_SECS", "5"),
            ("OVERSEER_MAX_ATTEMPTS", "7"),
            ("OVERSEER_SNAPSHOT_PATH", "/var/lib/overseer/state.json"),
            ("OVERSEER_BIND_ADDR", "127.0.0.1:8080"),
            ("OVERSEER_SELECTION_POLICY", "least-recently-seen"),
        ]))
        .unwrap();

        let settings = config.settings();
        assert_eq!(settings.dispatch.dispatch_timeout, Duration::seconds(5));
        assert_eq!(settings.dispatch.max_attempts, 7);
        assert_eq!(settings.dispatch.policy, SelectionPolicy::LeastRecentlySeen);
        assert_eq!(config.snapshot_path, PathBuf::from("/var/lib/overseer/state.json"));
        assert_eq!(config.bind_addr.port(), 8080);
    }

    #[test]
    fn unparsable_value_names_the_key() {
        let err = OverseerConfig::from_lookup(lookup(&[("OVERSEER_MAX_ATTEMPTS", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("OVERSEER_MAX_ATTEMPTS"));
    }

    #[test]
    fn zero_attempts_are_rejected() {
        assert!(OverseerConfig::from_lookup(lookup(&[("OVERSEER_MAX_ATTEMPTS", "0")])).is_err());
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(
            OverseerConfig::from_lookup(lookup(&[("OVERSEER_SELECTION_POLICY", "random")]))
                .is_err()
        );
    }
}
