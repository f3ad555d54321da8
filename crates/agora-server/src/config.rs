use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

use agora_gateway::connection::GatewaySettings;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub auth_cookie: String,
    pub redis_url: Option<String>,
    pub presence_ttl: Duration,
    pub gateway: GatewaySettings,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Unset and empty values fall back
    /// to defaults; values that are set but unparsable are errors.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = get("AGORA_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("AGORA_JWT_SECRET is unset or still a placeholder");
        }

        let heartbeat_secs: u64 = parse_or(&get, "AGORA_HEARTBEAT_SECS", 15)?;
        let idle_timeout_secs: u64 = parse_or(&get, "AGORA_IDLE_TIMEOUT_SECS", 300)?;
        if heartbeat_secs == 0 || idle_timeout_secs == 0 {
            bail!("AGORA_HEARTBEAT_SECS and AGORA_IDLE_TIMEOUT_SECS must be positive");
        }
        // Redis rejects SET with EX 0.
        let presence_ttl_secs: u64 = parse_or(&get, "AGORA_PRESENCE_TTL_SECS", 86_400)?;
        if presence_ttl_secs == 0 {
            bail!("AGORA_PRESENCE_TTL_SECS must be positive");
        }

        Ok(Self {
            host: get("AGORA_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&get, "AGORA_PORT", 3000)?,
            db_path: PathBuf::from(get("AGORA_DB_PATH").unwrap_or_else(|| "agora.db".into())),
            jwt_secret,
            auth_cookie: get("AGORA_AUTH_COOKIE").unwrap_or_else(|| "access_token".into()),
            redis_url: get("AGORA_REDIS_URL"),
            presence_ttl: Duration::from_secs(presence_ttl_secs),
            gateway: GatewaySettings {
                heartbeat_interval: Duration::from_secs(heartbeat_secs),
                idle_timeout: Duration::from_secs(idle_timeout_secs),
            },
        })
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has invalid value {:?}: {}", key, raw, e)),
        None => Ok(default),
    }
}
