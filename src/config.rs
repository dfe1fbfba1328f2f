use crate::retry::{ExponentialBackoff, FixedInterval, RetryStrategy};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub storage_type: StorageType,
    pub redis_url: Option<String>,
    pub redis_username: Option<String>,
    pub redis_password: Option<String>,
    pub redis_db: Option<i64>,
    pub key_prefix: String,
    pub lock_key: String,
    pub lock_ttl: u64, // 秒
    pub attempt_timeout_ms: u64,
    pub refresh_interval: u64, // 秒
    pub refresh_timeout_ms: u64,
    pub retry_strategy: RetryKind,
    pub retry_interval_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_max_interval_ms: u64,
    pub hold_secs: u64, // 0 表示一直持有到 Ctrl-C
    pub memory_cleanup_interval: u64, // 秒
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RetryKind {
    Fixed,
    Exponential,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |name: &str, default: &str| {
            lookup(name).unwrap_or_else(|| default.to_string())
        };

        let storage_type = match var_or("STORAGE_TYPE", "memory").to_lowercase().as_str() {
            "redis" => StorageType::Redis,
            _ => StorageType::Memory,
        };

        let redis_url = if storage_type == StorageType::Redis {
            Some(var_or("REDIS_URL", "redis://127.0.0.1:6379"))
        } else {
            None
        };

        let redis_username = lookup("REDIS_USERNAME");
        let redis_password = lookup("REDIS_PASSWORD");
        let redis_db = lookup("REDIS_DB").and_then(|s| s.parse::<i64>().ok());

        let key_prefix = var_or("LOCK_KEY_PREFIX", "lock:");
        let lock_key = var_or("LOCK_KEY", "default");
        let lock_ttl = var_or("LOCK_TTL", "30").parse().unwrap_or(30);
        let attempt_timeout_ms = var_or("LOCK_ATTEMPT_TIMEOUT_MS", "1000")
            .parse()
            .unwrap_or(1000);

        // 默认每个租期续约三次
        let refresh_interval = lookup("LOCK_REFRESH_INTERVAL")
            .and_then(|s| s.parse().ok())
            .unwrap_or((lock_ttl / 3).max(1));
        let refresh_timeout_ms = var_or("LOCK_REFRESH_TIMEOUT_MS", "1000")
            .parse()
            .unwrap_or(1000);

        let retry_strategy = match var_or("RETRY_STRATEGY", "fixed").to_lowercase().as_str() {
            "exponential" => RetryKind::Exponential,
            _ => RetryKind::Fixed,
        };
        let retry_interval_ms = var_or("RETRY_INTERVAL_MS", "200").parse().unwrap_or(200);
        let retry_max_attempts = var_or("RETRY_MAX_ATTEMPTS", "10").parse().unwrap_or(10);
        let retry_max_interval_ms = var_or("RETRY_MAX_INTERVAL_MS", "10000")
            .parse()
            .unwrap_or(10000);

        let hold_secs = var_or("HOLD_SECS", "0").parse().unwrap_or(0);
        let memory_cleanup_interval = var_or("MEMORY_CLEANUP_INTERVAL", "60")
            .parse()
            .unwrap_or(60);

        Self {
            storage_type,
            redis_url,
            redis_username,
            redis_password,
            redis_db,
            key_prefix,
            lock_key,
            lock_ttl,
            attempt_timeout_ms,
            refresh_interval,
            refresh_timeout_ms,
            retry_strategy,
            retry_interval_ms,
            retry_max_attempts,
            retry_max_interval_ms,
            hold_secs,
            memory_cleanup_interval,
        }
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    /// 每次加锁都需要新的策略实例
    pub fn retry_strategy(&self) -> Box<dyn RetryStrategy> {
        let interval = Duration::from_millis(self.retry_interval_ms);
        match self.retry_strategy {
            RetryKind::Fixed => Box::new(FixedInterval::new(interval, self.retry_max_attempts)),
            RetryKind::Exponential => Box::new(ExponentialBackoff::new(
                interval,
                Duration::from_millis(self.retry_max_interval_ms),
            )),
        }
    }
}
