//! Server configuration module
//!
//! Handles loading configuration from environment variables with sensible defaults.

use std::net::SocketAddr;
use std::time::Duration;

use rp_core::session::{SessionScope, DEFAULT_SESSION_TTL};

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 8080)
    pub port: u16,
    /// Server host (default: 127.0.0.1)
    pub host: [u8; 4],
    /// Allowed CORS origins, comma-separated (default: allow all in dev)
    pub allowed_origins: Option<Vec<String>>,
    /// Request body limit in KB (default: 256)
    pub body_limit_kb: usize,
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// Enable rate limiting (default: false for tests, true when loaded from env)
    pub rate_limit_enabled: bool,
    /// Rate limit: requests per minute per client address (default: 100)
    pub rate_limit_per_minute: u64,
    /// Rate limit: burst size (default: 20)
    pub rate_limit_burst: u32,
    /// PostgreSQL URL; the in-memory store is used when unset
    pub database_url: Option<String>,
    /// Database connection pool maximum connections (default: 10)
    pub database_max_connections: u32,
    /// Relying Party ID (default: localhost)
    pub rp_id: String,
    /// Relying Party origin (default: http://localhost:8080)
    pub rp_origin: String,
    /// Relying Party display name
    pub rp_name: String,
    /// Ceremony session lifetime (default: 300s)
    pub session_ttl_secs: u64,
    pub session_scope: SessionScope,
    /// Interval between expired-session sweeps (default: 60s)
    pub session_sweep_secs: u64,
    /// Clear the user's challenge after a successful Finish (default: true)
    pub purge_consumed_challenges: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            host: [127, 0, 0, 1],
            allowed_origins: None, // None = allow all (dev mode)
            body_limit_kb: 256,
            timeout_secs: 30,
            rate_limit_enabled: false, // Disabled by default (for tests)
            rate_limit_per_minute: 100,
            rate_limit_burst: 20,
            database_url: None,
            database_max_connections: 10,
            rp_id: "localhost".to_string(),
            rp_origin: "http://localhost:8080".to_string(),
            rp_name: "Relying Party".to_string(),
            session_ttl_secs: DEFAULT_SESSION_TTL.as_secs(),
            session_scope: SessionScope::Keyed,
            session_sweep_secs: 60,
            purge_consumed_challenges: true,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| match v.trim().to_lowercase().as_str() {
            "false" | "0" | "no" | "off" => false,
            "true" | "1" | "yes" | "on" => true,
            _ => default,
        })
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host = std::env::var("HOST")
            .ok()
            .and_then(|h| h.parse::<std::net::Ipv4Addr>().ok())
            .map(|ip| ip.octets())
            .unwrap_or(defaults.host);

        let allowed_origins = std::env::var("ALLOWED_ORIGINS").ok().map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let session_scope = match std::env::var("SESSION_SCOPE") {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Ignoring SESSION_SCOPE, using keyed sessions");
                SessionScope::Keyed
            }),
            Err(_) => defaults.session_scope,
        };

        Self {
            port: env_parse("PORT").unwrap_or(defaults.port),
            host,
            allowed_origins,
            body_limit_kb: env_parse("BODY_LIMIT_KB").unwrap_or(defaults.body_limit_kb),
            timeout_secs: env_parse("REQUEST_TIMEOUT_SECS").unwrap_or(defaults.timeout_secs),
            // Enabled by default in production, disable with RATE_LIMIT_ENABLED=false
            rate_limit_enabled: env_flag("RATE_LIMIT_ENABLED", true),
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MINUTE")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.rate_limit_per_minute),
            rate_limit_burst: env_parse("RATE_LIMIT_BURST")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.rate_limit_burst),
            database_url,
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            rp_id: std::env::var("RP_ID").unwrap_or(defaults.rp_id),
            rp_origin: std::env::var("RP_ORIGIN").unwrap_or(defaults.rp_origin),
            rp_name: std::env::var("RP_NAME").unwrap_or(defaults.rp_name),
            session_ttl_secs: env_parse("SESSION_TTL_SECS").unwrap_or(defaults.session_ttl_secs),
            session_scope,
            session_sweep_secs: env_parse("SESSION_SWEEP_SECS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.session_sweep_secs),
            purge_consumed_challenges: env_flag(
                "PURGE_CONSUMED_CHALLENGES",
                defaults.purge_consumed_challenges,
            ),
        }
    }

    /// Get socket address from config
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.host, self.port))
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_secs)
    }

    /// Replenish interval for one rate-limit token, derived from the per-minute quota
    ///
    /// Never shorter than 1 ms; the governor rejects a zero period.
    pub fn rate_limit_period(&self) -> Duration {
        Duration::from_millis((60_000 / self.rate_limit_per_minute.max(1)).max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert!(!config.rate_limit_enabled);
        assert!(config.database_url.is_none());
        assert_eq!(config.session_scope, SessionScope::Keyed);
        assert!(config.purge_consumed_challenges);
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn test_rate_limit_period() {
        let config = Config::default();
        assert_eq!(config.rate_limit_period(), Duration::from_millis(600));

        let config = Config {
            rate_limit_per_minute: 0,
            ..Config::default()
        };
        assert_eq!(config.rate_limit_period(), Duration::from_secs(60));

        let config = Config {
            rate_limit_per_minute: 120_000,
            ..Config::default()
        };
        assert_eq!(config.rate_limit_period(), Duration::from_millis(1));
    }
}
