use std::net::IpAddr;
use std::time::Duration;

use ipnet::IpNet;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub host: IpAddr,
    pub port: u16,
    pub trusted_proxies: Vec<IpNet>,
    pub log_level: String,
    pub report: ReportConfig,
    pub retry: RetryPolicy,
    pub pool: PoolConfig,
    pub reconcile: ReconcileConfig,
}

/// Connection settings for the external audit system.
#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub url: String,
    pub api_key: String,
    pub enabled: bool,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9000/api/audit/logs".to_string(),
            api_key: String::new(),
            enabled: true,
            connect_timeout: Duration::from_millis(5_000),
            read_timeout: Duration::from_millis(10_000),
        }
    }
}

/// Backoff schedule applied within a single delivery call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    pub max_interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval_ms: 60_000,
            multiplier: 5.0,
            max_interval_ms: 1_800_000,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let raw = self.initial_interval_ms as f64 * self.multiplier.powi(exp);
        let capped = raw.min(self.max_interval_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub core_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_workers: 5,
            max_workers: 10,
            queue_capacity: 200,
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub interval: Duration,
    pub max_retry: i32,
    pub batch_size: i64,
    pub concurrency: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            max_retry: 3,
            batch_size: 100,
            concurrency: 4,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env_required("DATABASE_URL")?;
        let jwt_secret = env_required("JWT_SECRET")?;

        let host: IpAddr = env_or("AUDIT_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid AUDIT_HOST: {e}"))?;

        let port: u16 = env_parse("AUDIT_PORT", 3000)?;

        let trusted_proxies: Vec<IpNet> = env_or("AUDIT_TRUSTED_PROXIES", "")
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim()
                    .parse()
                    .map_err(|e| format!("Invalid AUDIT_TRUSTED_PROXIES entry '{s}': {e}"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let log_level = env_or("AUDIT_LOG_LEVEL", "info");

        let defaults = ReportConfig::default();
        let report = ReportConfig {
            url: env_or("AUDIT_REPORT_URL", &defaults.url),
            api_key: env_or("AUDIT_REPORT_API_KEY", ""),
            enabled: parse_bool("AUDIT_REPORT_ENABLED", &env_or("AUDIT_REPORT_ENABLED", "true"))?,
            connect_timeout: Duration::from_millis(env_parse(
                "AUDIT_REPORT_CONNECT_TIMEOUT_MS",
                5_000,
            )?),
            read_timeout: Duration::from_millis(env_parse("AUDIT_REPORT_READ_TIMEOUT_MS", 10_000)?),
        };

        let retry = RetryPolicy {
            max_attempts: env_parse("AUDIT_RETRY_MAX_ATTEMPTS", 3)?,
            initial_interval_ms: env_parse("AUDIT_RETRY_INITIAL_INTERVAL_MS", 60_000)?,
            multiplier: env_parse("AUDIT_RETRY_MULTIPLIER", 5.0)?,
            max_interval_ms: env_parse("AUDIT_RETRY_MAX_INTERVAL_MS", 1_800_000)?,
        };
        if retry.max_attempts == 0 {
            return Err("AUDIT_RETRY_MAX_ATTEMPTS must be at least 1".to_string());
        }

        let pool = PoolConfig {
            core_workers: env_parse("AUDIT_POOL_CORE_WORKERS", 5)?,
            max_workers: env_parse("AUDIT_POOL_MAX_WORKERS", 10)?,
            queue_capacity: env_parse("AUDIT_POOL_QUEUE_CAPACITY", 200)?,
            shutdown_timeout: Duration::from_secs(env_parse("AUDIT_POOL_SHUTDOWN_TIMEOUT_SECS", 60)?),
        };
        if pool.core_workers == 0 || pool.max_workers < pool.core_workers || pool.queue_capacity == 0 {
            return Err(format!(
                "Invalid worker pool sizing: core={}, max={}, queue={}",
                pool.core_workers, pool.max_workers, pool.queue_capacity
            ));
        }

        let reconcile = ReconcileConfig {
            interval: Duration::from_secs(env_parse("AUDIT_RECONCILE_INTERVAL_SECS", 3600)?),
            max_retry: env_parse("AUDIT_RECONCILE_MAX_RETRY", 3)?,
            batch_size: env_parse("AUDIT_RECONCILE_BATCH_SIZE", 100)?,
            concurrency: env_parse::<usize>("AUDIT_RECONCILE_CONCURRENCY", 4)?.max(1),
        };

        Ok(Config {
            database_url,
            jwt_secret,
            host,
            port,
            trusted_proxies,
            log_level,
            report,
            retry,
            pool,
            reconcile,
        })
    }
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| format!("Invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(format!("Invalid {key}: expected a boolean, got '{other}'")),
    }
}
