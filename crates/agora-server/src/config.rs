use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use agora_gateway::{DEFAULT_QUEUE_LIMIT, RetentionPolicy, StreamConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub admin_user_id: i64,
    pub retention: RetentionPolicy,
    pub retention_sweep: Duration,
    pub heartbeat: Duration,
    /// `None` leaves streams open indefinitely.
    pub stream_timeout: Option<Duration>,
    pub stream_queue_limit: usize,
    /// Allowed CORS origin; permissive when unset.
    pub frontend_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let stream_timeout_secs: u64 = parse(&lookup, "AGORA_STREAM_TIMEOUT_SECS", 0)?;
        let heartbeat_secs: u64 = parse(&lookup, "AGORA_HEARTBEAT_SECS", 30)?;
        if heartbeat_secs == 0 {
            anyhow::bail!("AGORA_HEARTBEAT_SECS must be positive");
        }
        let stream_queue_limit: usize =
            parse(&lookup, "AGORA_STREAM_QUEUE_LIMIT", DEFAULT_QUEUE_LIMIT)?;
        if stream_queue_limit == 0 {
            anyhow::bail!("AGORA_STREAM_QUEUE_LIMIT must be positive");
        }
        let retention_hours: i64 =
            parse(&lookup, "AGORA_RETENTION_HOURS", RetentionPolicy::DEFAULT_HOURS)?;
        let retention = RetentionPolicy::try_hours(retention_hours).with_context(|| {
            format!("AGORA_RETENTION_HOURS must be a positive number of hours, got {}", retention_hours)
        })?;
        let sweep_secs: u64 = parse(&lookup, "AGORA_RETENTION_SWEEP_SECS", 3600)?;
        if sweep_secs == 0 {
            anyhow::bail!("AGORA_RETENTION_SWEEP_SECS must be positive");
        }

        Ok(Self {
            host: var("AGORA_HOST", "0.0.0.0"),
            port: parse(&lookup, "AGORA_PORT", 3000)?,
            db_path: PathBuf::from(var("AGORA_DB_PATH", "agora.db")),
            jwt_secret: var("AGORA_JWT_SECRET", "dev-secret-change-me"),
            admin_user_id: parse(&lookup, "AGORA_ADMIN_USER_ID", 1)?,
            retention,
            retention_sweep: Duration::from_secs(sweep_secs),
            heartbeat: Duration::from_secs(heartbeat_secs),
            stream_timeout: (stream_timeout_secs > 0).then(|| Duration::from_secs(stream_timeout_secs)),
            stream_queue_limit,
            frontend_url: lookup("FRONTEND_URL")
                .map(|url| url.trim().trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
        })
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            heartbeat_interval: self.heartbeat,
            max_lifetime: self.stream_timeout,
            queue_limit: self.stream_queue_limit,
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        self.retention
    }
}

fn parse<T, F>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {}: '{}'", key, raw)),
        None => Ok(default),
    }
}
