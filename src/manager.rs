use crate::error::{LockError, Result};
use crate::handle::LockHandle;
use crate::retry::RetryStrategy;
use crate::storage::LockStore;
use log::{debug, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// 租期上限，Redis 的过期秒数也需要落在这个范围内
pub const MAX_LEASE_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// 分布式锁入口
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self { store }
    }

    /// 尝试加锁一次，锁已被占用时返回 `RaceLost`
    pub async fn try_lock(&self, key: &str, ttl: Duration) -> Result<LockHandle> {
        if ttl.is_zero() {
            return Err(LockError::InvalidArgument(
                "lease ttl must be positive".to_string(),
            ));
        }
        if ttl > MAX_LEASE_TTL {
            return Err(LockError::InvalidArgument(format!(
                "lease ttl {:?} exceeds {:?}",
                ttl, MAX_LEASE_TTL
            )));
        }

        let token = Uuid::new_v4().to_string();
        if self.store.acquire(key, &token, ttl).await? {
            info!(
                "[ACQUIRE SUCCESS] Lock acquired - key: {}, token: {}, ttl: {:?}",
                key, token, ttl
            );
            Ok(LockHandle::new(key.to_string(), token, ttl, self.store.clone()))
        } else {
            debug!("[ACQUIRE FAILED] Lock already held - key: {}", key);
            Err(LockError::RaceLost)
        }
    }

    /// 阻塞加锁
    ///
    /// 每次尝试最多等待 `attempt_timeout`。超时不能说明锁被占用，按策略的超时
    /// 间隔无限重试；锁被占用才消耗 `strategy` 的重试次数。`cancelled` 完成时
    /// 立即返回 `Cancelled`，包括正在等待重试或者正在尝试的时候。
    pub async fn lock<S, F>(
        &self,
        key: &str,
        attempt_timeout: Duration,
        ttl: Duration,
        mut strategy: S,
        cancelled: F,
    ) -> Result<LockHandle>
    where
        S: RetryStrategy,
        F: Future<Output = ()>,
    {
        if attempt_timeout.is_zero() {
            return Err(LockError::InvalidArgument(
                "attempt timeout must be positive".to_string(),
            ));
        }

        info!(
            "[ACQUIRE] Attempting to acquire lock - key: {}, ttl: {:?}, attempt_timeout: {:?}",
            key, ttl, attempt_timeout
        );

        tokio::pin!(cancelled);
        let backoff = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(backoff);
        let mut race_losses = 0u32;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = &mut cancelled => {
                    info!("[ACQUIRE CANCELLED] key: {}", key);
                    return Err(LockError::Cancelled);
                }
                outcome = tokio::time::timeout(attempt_timeout, self.try_lock(key, ttl)) => outcome,
            };

            let err = match outcome {
                Ok(Ok(handle)) => return Ok(handle),
                Ok(Err(LockError::RaceLost)) => {
                    race_losses += 1;
                    LockError::RaceLost
                }
                Ok(Err(e)) if e.is_timeout() => e,
                Ok(Err(e)) => {
                    warn!("[ACQUIRE FAILED] Failed to acquire lock - key: {}, error: {}", key, e);
                    return Err(e);
                }
                Err(_) => LockError::timeout(),
            };

            let delay = match strategy.next(&err) {
                Some(delay) => delay,
                None => {
                    info!(
                        "[ACQUIRE FAILED] Retries exhausted - key: {}, race losses: {}",
                        key, race_losses
                    );
                    return Err(LockError::RetryExhausted {
                        attempts: race_losses,
                    });
                }
            };
            debug!(
                "[RETRY] key: {}, reason: {}, next attempt in {:?}",
                key, err, delay
            );

            backoff.as_mut().reset(Instant::now() + delay);
            tokio::select! {
                biased;
                _ = &mut cancelled => {
                    info!("[ACQUIRE CANCELLED] key: {}", key);
                    return Err(LockError::Cancelled);
                }
                _ = &mut backoff => {}
            }
        }
    }
}
