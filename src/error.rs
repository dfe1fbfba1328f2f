use std::sync::Arc;
use thiserror::Error;

/// 存储层错误
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Store operation timed out")]
    Timeout,

    #[error("Redis operation failed: {0}")]
    Redis(Arc<redis::RedisError>),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Lease ttl out of range: {0:?}")]
    InvalidTtl(std::time::Duration),
}

impl StoreError {
    pub fn is_timeout(&self) -> bool {
        match self {
            StoreError::Timeout => true,
            StoreError::Redis(e) => e.is_timeout(),
            StoreError::Unavailable(_) | StoreError::InvalidTtl(_) => false,
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_timeout() {
            StoreError::Timeout
        } else {
            StoreError::Redis(Arc::new(e))
        }
    }
}

/// 分布式锁错误
///
/// `RaceLost` / `RetryExhausted` / `Cancelled` 表示没有拿到锁，
/// `LockNotHeld` 表示持有期间锁已经丢失，两者的处理方式不同。
#[derive(Debug, Clone, Error)]
pub enum LockError {
    #[error("Lock already held by another holder")]
    RaceLost,

    #[error("Lock is not held by this holder (released or expired)")]
    LockNotHeld,

    #[error("Store transport error: {0}")]
    Transport(#[from] StoreError),

    #[error("Retry strategy gave up after {attempts} failed attempts")]
    RetryExhausted { attempts: u32 },

    #[error("Lock acquisition cancelled")]
    Cancelled,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl LockError {
    /// 超时不能证明锁被占用，只是基础设施延迟
    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::Transport(e) if e.is_timeout())
    }

    pub(crate) fn timeout() -> Self {
        LockError::Transport(StoreError::Timeout)
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
