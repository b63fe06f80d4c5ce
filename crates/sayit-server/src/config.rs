use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use sayit_core::ChatConfig;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub chat: ChatConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source. Unset keys fall back to defaults,
    /// except the JWT secret which is required.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = lookup("SAYIT_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("SAYIT_JWT_SECRET is unset or still a placeholder; it must match the identity provider's secret");
        }

        let defaults = ChatConfig::default();
        let chat = ChatConfig {
            typing_timeout: match parse::<u64>(&lookup, "SAYIT_TYPING_TIMEOUT_MS")? {
                Some(ms) => Duration::from_millis(ms),
                None => defaults.typing_timeout,
            },
            typing_sweep_interval: match parse::<u64>(&lookup, "SAYIT_TYPING_SWEEP_SECS")? {
                Some(secs) => Duration::from_secs(secs.max(1)),
                None => defaults.typing_sweep_interval,
            },
            snapshot_limit: parse(&lookup, "SAYIT_SNAPSHOT_LIMIT")?.unwrap_or(defaults.snapshot_limit),
            max_page_size: parse(&lookup, "SAYIT_MAX_PAGE_SIZE")?.unwrap_or(defaults.max_page_size),
        };

        Ok(Self {
            host: lookup("SAYIT_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse(&lookup, "SAYIT_PORT")?.unwrap_or(3000),
            db_path: lookup("SAYIT_DB_PATH")
                .unwrap_or_else(|| "sayit.db".into())
                .into(),
            jwt_secret,
            chat,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| raw.parse::<T>().with_context(|| format!("{} has an invalid value '{}'", key, raw)))
        .transpose()
}
