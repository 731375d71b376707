//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts with zero configuration
//! for local development. Invalid values are logged and ignored.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use tracing::warn;

use roxx_db::Limits;

pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Upper bound for the expiry windows so `now - window` stays representable.
const MAX_WINDOW_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Credentials for the protected bootstrap administrator.
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Env: `ROXX_HOST` / `ROXX_PORT`. Default `0.0.0.0:3000`.
    pub addr: SocketAddr,

    /// Env: `ROXX_DB_PATH`. Default `roxx.db`.
    pub db_path: PathBuf,

    /// Env: `ROXX_JWT_SECRET`. Falls back to a development secret.
    pub jwt_secret: String,

    /// Env: `ROXX_MAX_MESSAGES`, `ROXX_MAX_STORIES`, `ROXX_STORY_TTL_SECS`,
    /// `ROXX_RING_TIMEOUT_SECS`, `ROXX_CALL_MAX_AGE_SECS`.
    pub limits: Limits,

    /// Env: `ROXX_CALL_GC_INTERVAL_SECS`. Default 30 seconds.
    pub call_gc_interval: Duration,

    /// Env: `ROXX_ADMIN_EMAIL` + `ROXX_ADMIN_PASSWORD` (+ `ROXX_ADMIN_NAME`).
    pub admin: Option<AdminSeed>,

    /// Env: `ROXX_ASSISTANT_URL` (+ `ROXX_ASSISTANT_KEY`). Unset disables `/ai`.
    pub assistant: Option<AssistantEndpoint>,
}

#[derive(Debug, Clone)]
pub struct AssistantEndpoint {
    pub url: String,
    pub api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3000),
            db_path: PathBuf::from("roxx.db"),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            limits: Limits::default(),
            call_gc_interval: Duration::from_secs(30),
            admin: None,
            assistant: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let host = lookup("ROXX_HOST")
            .and_then(|raw| parse_or_warn::<IpAddr>("ROXX_HOST", &raw))
            .unwrap_or(config.addr.ip());
        let port = lookup("ROXX_PORT")
            .and_then(|raw| parse_or_warn::<u16>("ROXX_PORT", &raw))
            .unwrap_or(config.addr.port());
        config.addr = SocketAddr::new(host, port);

        if let Some(path) = lookup("ROXX_DB_PATH").filter(|p| !p.is_empty()) {
            config.db_path = PathBuf::from(path);
        }

        if let Some(secret) = lookup("ROXX_JWT_SECRET").filter(|s| !s.is_empty()) {
            config.jwt_secret = secret;
        }

        let limits = &mut config.limits;
        if let Some(n) = positive::<usize>(&lookup, "ROXX_MAX_MESSAGES") {
            limits.max_messages = n;
        }
        if let Some(n) = positive::<usize>(&lookup, "ROXX_MAX_STORIES") {
            limits.max_stories = n;
        }
        if let Some(span) = window(&lookup, "ROXX_STORY_TTL_SECS") {
            limits.story_ttl = span;
        }
        if let Some(span) = window(&lookup, "ROXX_RING_TIMEOUT_SECS") {
            limits.ring_timeout = span;
        }
        if let Some(span) = window(&lookup, "ROXX_CALL_MAX_AGE_SECS") {
            limits.call_max_age = span;
        }
        if let Some(secs) = positive::<u64>(&lookup, "ROXX_CALL_GC_INTERVAL_SECS") {
            config.call_gc_interval = Duration::from_secs(secs);
        }

        config.admin = match (lookup("ROXX_ADMIN_EMAIL"), lookup("ROXX_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) if !email.is_empty() && !password.is_empty() => Some(AdminSeed {
                email,
                password,
                name: lookup("ROXX_ADMIN_NAME")
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| "Admin".to_string()),
            }),
            (None, None) => None,
            _ => {
                warn!("ROXX_ADMIN_EMAIL and ROXX_ADMIN_PASSWORD must both be set, skipping admin seed");
                None
            }
        };

        config.assistant = lookup("ROXX_ASSISTANT_URL")
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .map(|url| AssistantEndpoint {
                url,
                api_key: lookup("ROXX_ASSISTANT_KEY").filter(|k| !k.is_empty()),
            });

        config
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

fn parse_or_warn<T: FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(value = %raw, "Invalid {}, using default", key);
            None
        }
    }
}

/// A strictly positive number, or `None` (with a warning for bad values).
fn positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    let raw = lookup(key)?;
    let value = parse_or_warn::<T>(key, &raw)?;
    if value <= T::default() {
        warn!(value = %raw, "{} must be positive, using default", key);
        return None;
    }
    Some(value)
}

/// A positive number of seconds no larger than `MAX_WINDOW_SECS`.
fn window(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<TimeDelta> {
    let secs = positive::<i64>(lookup, key)?;
    match TimeDelta::try_seconds(secs).filter(|_| secs <= MAX_WINDOW_SECS) {
        Some(window) => Some(window),
        None => {
            warn!(secs, "{} is out of range, using default", key);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config(&[]);
        assert_eq!(config.addr, "0.0.0.0:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.db_path, PathBuf::from("roxx.db"));
        assert!(config.uses_dev_secret());
        assert_eq!(config.limits.max_messages, 500);
        assert_eq!(config.limits.max_stories, 50);
        assert_eq!(config.limits.story_ttl, TimeDelta::hours(24));
        assert_eq!(config.call_gc_interval, Duration::from_secs(30));
        assert!(config.admin.is_none());
        assert!(config.assistant.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = config(&[
            ("ROXX_HOST", "127.0.0.1"),
            ("ROXX_PORT", "8080"),
            ("ROXX_DB_PATH", "/tmp/roxx-test.db"),
            ("ROXX_JWT_SECRET", "s3cret"),
            ("ROXX_MAX_MESSAGES", "20"),
            ("ROXX_STORY_TTL_SECS", "3600"),
            ("ROXX_RING_TIMEOUT_SECS", "45"),
            ("ROXX_ADMIN_EMAIL", "root@example.com"),
            ("ROXX_ADMIN_PASSWORD", "rootpass"),
            ("ROXX_ASSISTANT_URL", " https://llm.example.com/complete "),
        ]);
        assert_eq!(config.addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.db_path, PathBuf::from("/tmp/roxx-test.db"));
        assert!(!config.uses_dev_secret());
        assert_eq!(config.limits.max_messages, 20);
        assert_eq!(config.limits.story_ttl, TimeDelta::hours(1));
        assert_eq!(config.limits.ring_timeout, TimeDelta::seconds(45));
        let admin = config.admin.unwrap();
        assert_eq!(admin.email, "root@example.com");
        assert_eq!(admin.name, "Admin");
        let assistant = config.assistant.unwrap();
        assert_eq!(assistant.url, "https://llm.example.com/complete");
        assert!(assistant.api_key.is_none());
    }

    #[test]
    fn empty_secret_keeps_the_dev_secret() {
        assert!(config(&[("ROXX_JWT_SECRET", "")]).uses_dev_secret());
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = config(&[
            ("ROXX_PORT", "not-a-port"),
            ("ROXX_MAX_STORIES", "0"),
            ("ROXX_CALL_MAX_AGE_SECS", "-5"),
            ("ROXX_STORY_TTL_SECS", "9999999999999999"),
            ("ROXX_RING_TIMEOUT_SECS", "99999999999999999999"),
            ("ROXX_ADMIN_EMAIL", "root@example.com"),
        ]);
        assert_eq!(config.addr.port(), 3000);
        assert_eq!(config.limits.max_stories, 50);
        assert_eq!(config.limits.call_max_age, TimeDelta::minutes(5));
        assert_eq!(config.limits.story_ttl, TimeDelta::hours(24));
        assert_eq!(config.limits.ring_timeout, TimeDelta::seconds(60));
        assert!(config.admin.is_none());
    }
}
