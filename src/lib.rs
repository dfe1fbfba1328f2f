//! 基于共享键值存储的租约式分布式锁
//!
//! ```rust,ignore
//! let manager = LockManager::new(Arc::new(MemoryStore::new()));
//! let handle = manager
//!     .lock("order:42", Duration::from_secs(1), Duration::from_secs(30),
//!           FixedInterval::new(Duration::from_millis(200), 10), std::future::pending())
//!     .await?;
//! let refresher = handle.auto_refresh(Duration::from_secs(10), Duration::from_secs(1))?;
//! // 临界区，每一步之间检查 handle.is_held()
//! handle.unlock().await?;
//! refresher.join().await?;
//! ```

pub mod config;
pub mod error;
pub mod handle;
pub mod manager;
pub mod retry;
pub mod storage;

pub use error::{LockError, Result, StoreError};
pub use handle::{AutoRefresh, LockHandle, LockState};
pub use manager::{LockManager, MAX_LEASE_TTL};
pub use retry::{ExponentialBackoff, FixedInterval, RetryStrategy};
pub use storage::memory::MemoryStore;
pub use storage::redis::RedisStore;
pub use storage::LockStore;
