use crate::thresholds::{Range, ThresholdConfig, DEFAULT_HUMIDITY, DEFAULT_TEMPERATURE};
use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_SHARE_GROUP: &str = "sensor-ingest";

/// Optional JSON file (`SENSOR_SETUP_CONFIG_PATH`). Values only apply where the
/// matching env var is unset.
#[derive(Debug, Clone, Default, Deserialize)]
struct SetupConfigOverrides {
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default)]
    redis_url: Option<String>,
    #[serde(default)]
    mqtt_host: Option<String>,
    #[serde(default)]
    mqtt_port: Option<u16>,
    #[serde(default)]
    mqtt_username: Option<String>,
    #[serde(default)]
    mqtt_password: Option<String>,
    #[serde(default)]
    temperature: Option<Range>,
    #[serde(default)]
    humidity: Option<Range>,
    #[serde(default)]
    cache_ttl_secs: Option<u64>,
}

fn load_setup_config_overrides() -> Option<SetupConfigOverrides> {
    let path = PathBuf::from(env_optional("SENSOR_SETUP_CONFIG_PATH")?);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read setup config; using env defaults"
            );
            return None;
        }
    };
    match parse_setup_overrides(contents) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to parse setup config; using env defaults"
            );
            None
        }
    }
}

fn parse_setup_overrides(contents: String) -> Result<SetupConfigOverrides, simd_json::Error> {
    let mut bytes = contents.into_bytes();
    simd_json::serde::from_slice(&mut bytes)
}

fn apply_setup_overrides(
    config: &mut Config,
    overrides: &SetupConfigOverrides,
    env_allows: impl Fn(&str) -> bool,
) {
    let trimmed = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    if env_allows("SENSOR_REDIS_URL") {
        if let Some(url) = trimmed(&overrides.redis_url) {
            config.redis_url = url;
        }
    }
    if env_allows("SENSOR_MQTT_HOST") {
        if let Some(host) = trimmed(&overrides.mqtt_host) {
            config.mqtt_host = host;
        }
    }
    if env_allows("SENSOR_MQTT_PORT") {
        if let Some(port) = overrides.mqtt_port.filter(|v| *v != 0) {
            config.mqtt_port = port;
        }
    }
    if env_allows("SENSOR_MQTT_USERNAME") && overrides.mqtt_username.is_some() {
        config.mqtt_username = trimmed(&overrides.mqtt_username);
    }
    if env_allows("SENSOR_MQTT_PASSWORD") && overrides.mqtt_password.is_some() {
        config.mqtt_password = trimmed(&overrides.mqtt_password);
    }
    if env_allows("SENSOR_TEMP_MIN") && env_allows("SENSOR_TEMP_MAX") {
        if let Some(range) = overrides.temperature {
            config.thresholds.temperature = range;
        }
    }
    if env_allows("SENSOR_HUMIDITY_MIN") && env_allows("SENSOR_HUMIDITY_MAX") {
        if let Some(range) = overrides.humidity {
            config.thresholds.humidity = range;
        }
    }
    if env_allows("SENSOR_CACHE_TTL_SECS") {
        if let Some(ttl) = overrides.cache_ttl_secs.filter(|v| *v != 0) {
            config.cache_ttl_secs = ttl;
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_pool_size: u32,
    pub db_timeout_ms: u64,
    pub redis_url: String,
    pub cache_timeout_ms: u64,
    pub cache_ttl_secs: u64,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,
    pub mqtt_keepalive_secs: u64,
    pub mqtt_share_group: Option<String>,
    pub publish_timeout_ms: u64,
    pub readings_topic: String,
    pub alerts_topic: String,
    pub ingest_workers: usize,
    pub http_bind: String,
    pub enable_ingest: bool,
    pub enable_notifier: bool,
    pub enable_http: bool,
    pub enable_generator: bool,
    pub generator_interval_ms: u64,
    pub thresholds: ThresholdConfig,
    pub connect_attempts: u32,
    pub connect_retry_delay_ms: u64,
    pub stats_log_interval_secs: u64,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let setup_overrides = load_setup_config_overrides();

        let database_url = env_optional("SENSOR_DATABASE_URL")
            .or_else(|| env_optional("DATABASE_URL"))
            .or_else(|| {
                setup_overrides
                    .as_ref()
                    .and_then(|ov| ov.database_url.as_deref())
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
            })
            .context("SENSOR_DATABASE_URL or DATABASE_URL is required (or database_url in the setup config)")?;
        let database_url = normalize_database_url(database_url);

        let ingest_workers = env_u64("SENSOR_INGEST_WORKERS", 1)?.max(1) as usize;
        let mqtt_share_group = env_optional("SENSOR_MQTT_SHARE_GROUP").or_else(|| {
            (ingest_workers > 1).then(|| DEFAULT_SHARE_GROUP.to_string())
        });

        let thresholds = ThresholdConfig {
            temperature: Range {
                min: env_f64("SENSOR_TEMP_MIN", DEFAULT_TEMPERATURE.min)?,
                max: env_f64("SENSOR_TEMP_MAX", DEFAULT_TEMPERATURE.max)?,
            },
            humidity: Range {
                min: env_f64("SENSOR_HUMIDITY_MIN", DEFAULT_HUMIDITY.min)?,
                max: env_f64("SENSOR_HUMIDITY_MAX", DEFAULT_HUMIDITY.max)?,
            },
        };

        let mut config = Self {
            database_url,
            db_pool_size: env_u32("SENSOR_DB_POOL_SIZE", 5)?,
            db_timeout_ms: env_u64("SENSOR_DB_TIMEOUT_MS", 30_000)?,
            redis_url: env_string("SENSOR_REDIS_URL", "redis://127.0.0.1:6379"),
            cache_timeout_ms: env_u64("SENSOR_CACHE_TIMEOUT_MS", 2_000)?,
            cache_ttl_secs: env_u64("SENSOR_CACHE_TTL_SECS", 60)?,
            mqtt_host: env_string("SENSOR_MQTT_HOST", "127.0.0.1"),
            mqtt_port: env_u64("SENSOR_MQTT_PORT", 1883)?
                .try_into()
                .context("invalid SENSOR_MQTT_PORT")?,
            mqtt_username: env_optional("SENSOR_MQTT_USERNAME"),
            mqtt_password: env_optional("SENSOR_MQTT_PASSWORD"),
            mqtt_client_id: env_string("SENSOR_MQTT_CLIENT_ID", "sensor-pipeline"),
            mqtt_keepalive_secs: env_u64("SENSOR_MQTT_KEEPALIVE_SECS", 30)?,
            mqtt_share_group,
            publish_timeout_ms: env_u64("SENSOR_PUBLISH_TIMEOUT_MS", 5_000)?,
            readings_topic: env_string("SENSOR_READINGS_TOPIC", "sensor_data"),
            alerts_topic: env_string("SENSOR_ALERTS_TOPIC", "notifications"),
            ingest_workers,
            http_bind: env_string("SENSOR_HTTP_BIND", "0.0.0.0:8000"),
            enable_ingest: env_bool("SENSOR_ENABLE_INGEST", true)?,
            enable_notifier: env_bool("SENSOR_ENABLE_NOTIFIER", true)?,
            enable_http: env_bool("SENSOR_ENABLE_HTTP", true)?,
            enable_generator: env_bool("SENSOR_ENABLE_GENERATOR", false)?,
            generator_interval_ms: env_u64("SENSOR_GENERATOR_INTERVAL_MS", 10_000)?,
            thresholds,
            connect_attempts: env_u32("SENSOR_CONNECT_ATTEMPTS", 10)?.max(1),
            connect_retry_delay_ms: env_u64("SENSOR_CONNECT_RETRY_DELAY_MS", 5_000)?,
            stats_log_interval_secs: env_u64("SENSOR_STATS_LOG_INTERVAL_SECS", 60)?,
            otlp_endpoint: env_optional("OTEL_EXPORTER_OTLP_ENDPOINT"),
        };

        if let Some(overrides) = setup_overrides.as_ref() {
            apply_setup_overrides(&mut config, overrides, |key| env_optional(key).is_none());
        }

        config.thresholds = validate_thresholds(config.thresholds)?;
        Ok(config)
    }

    pub fn db_timeout(&self) -> Duration {
        Duration::from_millis(self.db_timeout_ms)
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn mqtt_keepalive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keepalive_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn generator_interval(&self) -> Duration {
        Duration::from_millis(self.generator_interval_ms.max(1))
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    pub fn stats_log_interval(&self) -> Duration {
        Duration::from_secs(self.stats_log_interval_secs.max(1))
    }

    pub fn ingest_client_id(&self, worker: usize) -> String {
        format!("{}-ingest-{worker}", self.mqtt_client_id)
    }
}

fn validate_thresholds(thresholds: ThresholdConfig) -> Result<ThresholdConfig> {
    let temperature = Range::new(thresholds.temperature.min, thresholds.temperature.max)
        .context("invalid temperature thresholds")?;
    let humidity = Range::new(thresholds.humidity.min, thresholds.humidity.max)
        .context("invalid humidity thresholds")?;
    Ok(ThresholdConfig {
        temperature,
        humidity,
    })
}

fn normalize_database_url(url: String) -> String {
    if let Some(stripped) = url.strip_prefix("postgresql+psycopg://") {
        return format!("postgresql://{stripped}");
    }
    if let Some(stripped) = url.strip_prefix("postgresql+psycopg2://") {
        return format!("postgresql://{stripped}");
    }
    if let Some(stripped) = url.strip_prefix("postgresql+asyncpg://") {
        return format!("postgresql://{stripped}");
    }
    url
}

fn env_string(key: &str, default: &str) -> String {
    env_optional(key).unwrap_or_else(|| default.to_string())
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match env_optional(key) {
        Some(value) => value.parse::<u64>().with_context(|| format!("invalid {key}")),
        None => Ok(default),
    }
}

fn env_u32(key: &str, default: u32) -> Result<u32> {
    let value = env_u64(key, u64::from(default))?;
    u32::try_from(value).with_context(|| format!("invalid {key}"))
}

fn env_f64(key: &str, default: f64) -> Result<f64> {
    match env_optional(key) {
        Some(value) => value.parse::<f64>().with_context(|| format!("invalid {key}")),
        None => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> Result<bool> {
    match env_optional(key) {
        Some(value) => parse_bool(&value).ok_or_else(|| anyhow!("invalid {key}: {value:?}")),
        None => Ok(default),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
