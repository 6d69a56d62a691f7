//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;

use crate::util::rate_limit::INPUT_RATE_LIMIT;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// HS256 secret used to verify identity tokens
    pub auth_jwt_secret: String,

    /// Supabase connection, `None` selects the in-memory stores
    pub supabase: Option<SupabaseConfig>,

    /// Allowed client origins for CORS (comma-separated)
    pub client_origin: String,

    /// Max real-time events per second accepted from one connection
    pub ws_input_rate_limit: u32,
}

/// PostgREST endpoint and service credentials
#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    /// Supabase project URL
    pub url: String,
    /// Supabase service role key (bypasses RLS - server only!)
    pub service_role_key: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let supabase = match (lookup("SUPABASE_URL"), lookup("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(url), Some(service_role_key)) => Some(SupabaseConfig {
                url: url.trim_end_matches('/').to_string(),
                service_role_key,
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY")),
            (None, Some(_)) => return Err(ConfigError::Missing("SUPABASE_URL")),
        };

        let ws_input_rate_limit = match lookup("WS_INPUT_RATE_LIMIT") {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::Invalid("WS_INPUT_RATE_LIMIT"))?,
            None => INPUT_RATE_LIMIT,
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),

            auth_jwt_secret: lookup("AUTH_JWT_SECRET")
                .ok_or(ConfigError::Missing("AUTH_JWT_SECRET"))?,

            supabase,

            client_origin: lookup("CLIENT_ORIGIN").unwrap_or_default(),

            ws_input_rate_limit,
        })
    }

    /// Name of the active storage backend
    pub fn storage_backend(&self) -> &'static str {
        if self.supabase.is_some() {
            "supabase"
        } else {
            "memory"
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
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
    fn defaults_to_memory_backend() {
        let config = Config::from_lookup(lookup(&[("AUTH_JWT_SECRET", "s")])).unwrap();
        assert_eq!(config.server_addr.port(), 8080);
        assert_eq!(config.log_level, "info");
        assert!(config.supabase.is_none());
        assert_eq!(config.storage_backend(), "memory");
        assert_eq!(config.ws_input_rate_limit, INPUT_RATE_LIMIT);
    }

    #[test]
    fn port_overrides_server_addr() {
        let config = Config::from_lookup(lookup(&[
            ("AUTH_JWT_SECRET", "s"),
            ("PORT", "9000"),
            ("SERVER_ADDR", "127.0.0.1:1234"),
        ]))
        .unwrap();
        assert_eq!(config.server_addr.port(), 9000);
    }

    #[test]
    fn missing_secret_is_rejected() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("AUTH_JWT_SECRET")));
    }

    #[test]
    fn supabase_requires_both_values() {
        let err = Config::from_lookup(lookup(&[
            ("AUTH_JWT_SECRET", "s"),
            ("SUPABASE_URL", "https://db.example"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY")));

        let config = Config::from_lookup(lookup(&[
            ("AUTH_JWT_SECRET", "s"),
            ("SUPABASE_URL", "https://db.example/"),
            ("SUPABASE_SERVICE_ROLE_KEY", "key"),
        ]))
        .unwrap();
        let supabase = config.supabase.as_ref().unwrap();
        assert_eq!(supabase.url, "https://db.example");
        assert_eq!(config.storage_backend(), "supabase");
    }

    #[test]
    fn zero_rate_limit_is_invalid() {
        let err = Config::from_lookup(lookup(&[
            ("AUTH_JWT_SECRET", "s"),
            ("WS_INPUT_RATE_LIMIT", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("WS_INPUT_RATE_LIMIT")));
    }
}
