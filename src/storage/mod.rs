pub mod memory;
pub mod redis;
pub mod scripts;

use crate::error::StoreError;
use async_trait::async_trait;
use std::time::Duration;

/// 锁存储接口，每个操作在存储端都必须是原子的
#[async_trait]
pub trait LockStore: Send + Sync {
    /// key 不存在时写入 token 并设置过期时间
    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// 当前值等于 token 时重置过期时间
    async fn renew(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// 当前值等于 token 时删除 key
    async fn release(&self, key: &str, token: &str) -> Result<bool, StoreError>;

    /// 剩余过期时间，key 不存在时返回 None
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;
}
