//! Configuration management for the WebAuthn relying-party service
//!
//! All environment variables are prefixed `MPO_AUTHN_`. Required variables
//! missing at startup, or present but malformed, abort the process with a
//! message naming the offending variable — no partial/implicit defaults for
//! anything security sensitive.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RelyingPartyConfig {
    pub id: String,
    pub name: String,
}

impl RelyingPartyConfig {
    /// The spec names only an `rp_id`; the origin webauthn-rs needs is
    /// derived from it (`https://<rp_id>`) since every supported deployment
    /// target is HTTPS.
    pub fn origin_url(&self) -> anyhow::Result<url::Url> {
        url::Url::parse(&format!("https://{}", self.id))
            .with_context(|| format!("relying party id {:?} is not a valid origin host", self.id))
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: String,
    pub max_pool_size: u32,
}

impl DatabaseConfig {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.name
        )
    }
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub database: u8,
    pub max_connections: u32,
}

impl RedisConfig {
    pub fn connection_string(&self) -> String {
        format!(
            "redis://:{}@{}:{}/{}",
            self.password, self.host, self.port, self.database
        )
    }
}

#[derive(Debug, Clone)]
pub struct KeyRotationConfig {
    pub enabled: bool,
    pub rotation_interval: Duration,
    pub grace_period: Duration,
    pub retention: Duration,
    pub key_size: u32,
    pub key_id_prefix: String,
    pub master_encryption_key: String,
}

#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    pub service_name: Option<String>,
    pub jaeger_endpoint: Option<String>,
    /// JSON-formatted logs when true. Defaults to on whenever a service name
    /// is configured (production-like deployments), off otherwise; always
    /// overridable via `MPO_AUTHN_LOG_FORMAT=json|text`.
    pub log_format_json: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub relying_party: RelyingPartyConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub key_rotation: KeyRotationConfig,
    pub telemetry: TelemetryConfig,
    /// Token lifetime in seconds. Not independently configurable per spec;
    /// fixed at the spec's documented default (15 minutes).
    pub token_lifetime_secs: i64,
    /// JWT issuer / audience, derived from the relying party id unless overridden.
    pub token_issuer: String,
    pub token_audience: String,
}

fn env_var(name: &str) -> Result<String> {
    env::var(name).with_context(|| format!("{name} is required"))
}

fn env_var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_strict<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| anyhow::anyhow!("{name} is malformed: {raw:?}"))
}

fn parse_port(name: &str, raw: &str) -> Result<u16> {
    let value: u32 = parse_strict(name, raw)?;
    if value < 1 || value > 65535 {
        anyhow::bail!("{name} must be between 1 and 65535, got {value}");
    }
    Ok(value as u16)
}

/// Parses a HOCON-style duration (`180d`, `1h`, `30s`, or a bare integer
/// meaning seconds) the way this system's rotation intervals are configured.
pub fn parse_duration(name: &str, raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    let (num_part, unit) = raw.split_at(raw.len().saturating_sub(1));
    let num: u64 = num_part
        .parse()
        .map_err(|_| anyhow::anyhow!("{name} is malformed: {raw:?}"))?;
    let secs = match unit {
        "s" => num,
        "m" => num * 60,
        "h" => num * 3600,
        "d" => num * 86400,
        _ => anyhow::bail!("{name} has an unrecognized duration unit: {raw:?}"),
    };
    Ok(Duration::from_secs(secs))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let relying_party = RelyingPartyConfig {
            id: env_var("MPO_AUTHN_APP_RELYING_PARTY_ID")?,
            name: env_var("MPO_AUTHN_APP_RELYING_PARTY_NAME")?,
        };

        let db_port_raw = env_var_or("MPO_AUTHN_DB_PORT", "5432");
        let database = DatabaseConfig {
            host: env_var("MPO_AUTHN_DB_HOST")?,
            port: parse_port("MPO_AUTHN_DB_PORT", &db_port_raw)?,
            name: env_var_or("MPO_AUTHN_DB_NAME", "webauthn"),
            username: env_var("MPO_AUTHN_DB_USERNAME")?,
            password: env_var("MPO_AUTHN_DB_PASSWORD")?,
            max_pool_size: parse_strict(
                "MPO_AUTHN_DB_MAX_POOL_SIZE",
                &env_var_or("MPO_AUTHN_DB_MAX_POOL_SIZE", "10"),
            )?,
        };

        let redis_port_raw = env_var_or("MPO_AUTHN_REDIS_PORT", "6379");
        let redis_db_raw = env_var_or("MPO_AUTHN_REDIS_DATABASE", "0");
        let redis_database: u8 = parse_strict("MPO_AUTHN_REDIS_DATABASE", &redis_db_raw)?;
        if redis_database > 15 {
            anyhow::bail!("MPO_AUTHN_REDIS_DATABASE must be between 0 and 15, got {redis_database}");
        }
        let redis = RedisConfig {
            host: env_var("MPO_AUTHN_REDIS_HOST")?,
            port: parse_port("MPO_AUTHN_REDIS_PORT", &redis_port_raw)?,
            password: env_var("MPO_AUTHN_REDIS_PASSWORD")?,
            database: redis_database,
            max_connections: parse_strict(
                "MPO_AUTHN_REDIS_MAX_CONNECTIONS",
                &env_var_or("MPO_AUTHN_REDIS_MAX_CONNECTIONS", "10"),
            )?,
        };

        let key_size: u32 = parse_strict(
            "MPO_AUTHN_JWT_KEY_SIZE",
            &env_var_or("MPO_AUTHN_JWT_KEY_SIZE", "2048"),
        )?;
        if !matches!(key_size, 2048 | 3072 | 4096) {
            anyhow::bail!("MPO_AUTHN_JWT_KEY_SIZE must be one of 2048, 3072, 4096, got {key_size}");
        }
        let key_id_prefix = env_var_or("MPO_AUTHN_JWT_KEY_ID_PREFIX", "webauthn");
        if !key_id_prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            anyhow::bail!(
                "MPO_AUTHN_JWT_KEY_ID_PREFIX must be lowercase alphanumeric and hyphens, got {key_id_prefix:?}"
            );
        }
        let enabled_raw = env_var_or("MPO_AUTHN_JWT_KEY_ROTATION_ENABLED", "false");
        let enabled: bool = parse_strict("MPO_AUTHN_JWT_KEY_ROTATION_ENABLED", &enabled_raw)?;
        let key_rotation = KeyRotationConfig {
            enabled,
            rotation_interval: parse_duration(
                "MPO_AUTHN_JWT_KEY_ROTATION_INTERVAL",
                &env_var_or("MPO_AUTHN_JWT_KEY_ROTATION_INTERVAL", "180d"),
            )?,
            grace_period: parse_duration(
                "MPO_AUTHN_JWT_KEY_GRACE_PERIOD",
                &env_var_or("MPO_AUTHN_JWT_KEY_GRACE_PERIOD", "1h"),
            )?,
            retention: parse_duration(
                "MPO_AUTHN_JWT_KEY_RETENTION",
                &env_var_or("MPO_AUTHN_JWT_KEY_RETENTION", "1h"),
            )?,
            key_size,
            key_id_prefix,
            master_encryption_key: env_var("MPO_AUTHN_JWT_MASTER_ENCRYPTION_KEY")?,
        };

        let service_name = env::var("MPO_AUTHN_OPEN_TELEMETRY_SERVICE_NAME").ok();
        let log_format_json = match env::var("MPO_AUTHN_LOG_FORMAT").ok().as_deref() {
            Some("json") => true,
            Some("text") => false,
            Some(other) => anyhow::bail!("MPO_AUTHN_LOG_FORMAT must be json or text, got {other:?}"),
            None => service_name.is_some(),
        };
        let telemetry = TelemetryConfig {
            service_name,
            jaeger_endpoint: env::var("MPO_AUTHN_OPEN_TELEMETRY_JAEGER_ENDPOINT").ok(),
            log_format_json,
        };

        let token_issuer = relying_party.id.clone();
        let token_audience = relying_party.id.clone();

        Ok(Self {
            relying_party,
            database,
            redis,
            key_rotation,
            telemetry,
            token_lifetime_secs: 900,
            token_issuer,
            token_audience,
        })
    }
}
