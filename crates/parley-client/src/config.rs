//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so the client starts with zero
//! configuration.

use parley_net::NetworkConfig;
use parley_shared::constants::{APP_VERSION, DEFAULT_CHAIN_ID, DEFAULT_STREAM_BUFFER};
use parley_shared::transport::ClientOptions;
use parley_shared::types::Environment;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Network the messaging client registers on.
    /// Env: `PARLEY_ENV` (`local`, `dev`, `production`)
    /// Default: `production`
    pub env: Environment,

    /// Version tag sent with every client registration.
    /// Env: `PARLEY_APP_VERSION`
    /// Default: `parley/1.0.0`
    pub app_version: String,

    /// Chain id reported by the signer adapter.
    /// Env: `PARLEY_CHAIN_ID`
    /// Default: `2741`
    pub chain_id: u64,

    /// Per-subscription channel capacity of the loopback network.
    /// Env: `PARLEY_STREAM_BUFFER`
    /// Default: `64`
    pub stream_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            env: Environment::Production,
            app_version: APP_VERSION.to_string(),
            chain_id: DEFAULT_CHAIN_ID,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup("PARLEY_ENV") {
            match val.parse::<Environment>() {
                Ok(env) => config.env = env,
                Err(e) => tracing::warn!(value = %val, error = %e, "Invalid PARLEY_ENV, using default"),
            }
        }

        if let Some(version) = lookup("PARLEY_APP_VERSION") {
            if !version.trim().is_empty() {
                config.app_version = version.trim().to_string();
            }
        }

        if let Some(val) = lookup("PARLEY_CHAIN_ID") {
            match val.trim().parse::<u64>() {
                Ok(id) => config.chain_id = id,
                Err(_) => tracing::warn!(value = %val, "Invalid PARLEY_CHAIN_ID, using default"),
            }
        }

        if let Some(val) = lookup("PARLEY_STREAM_BUFFER") {
            match val.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.stream_buffer = n,
                _ => tracing::warn!(value = %val, "Invalid PARLEY_STREAM_BUFFER, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            env: self.env,
            app_version: self.app_version.clone(),
        }
    }

    /// Loopback network matching this configuration.
    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            env: self.env,
            stream_buffer: self.stream_buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.env, Environment::Production);
        assert_eq!(config.chain_id, 2741);
        assert_eq!(config.stream_buffer, 64);
        assert_eq!(config.app_version, "parley/1.0.0");
    }

    #[test]
    fn test_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("PARLEY_ENV", "dev"),
            ("PARLEY_APP_VERSION", "parley/2.0.0"),
            ("PARLEY_CHAIN_ID", "11124"),
            ("PARLEY_STREAM_BUFFER", "8"),
        ]));
        assert_eq!(config.env, Environment::Dev);
        assert_eq!(config.app_version, "parley/2.0.0");
        assert_eq!(config.chain_id, 11124);
        assert_eq!(config.stream_buffer, 8);
        assert_eq!(config.network_config().env, Environment::Dev);
        assert_eq!(config.client_options().app_version, "parley/2.0.0");
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("PARLEY_ENV", "staging"),
            ("PARLEY_CHAIN_ID", "abc"),
            ("PARLEY_STREAM_BUFFER", "0"),
        ]));
        assert_eq!(config, ClientConfig::default());
    }
}
