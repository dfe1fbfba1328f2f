use crate::error::StoreError;
use crate::storage::LockStore;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct LockEntry {
    token: String,
    expires_at: Instant,
}

impl LockEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

fn expires_at(now: Instant, ttl: Duration) -> Result<Instant, StoreError> {
    now.checked_add(ttl).ok_or(StoreError::InvalidTtl(ttl))
}

/// 进程内存储，单个 key 上的操作通过 DashMap 的分片锁保证原子性
#[derive(Default)]
pub struct MemoryStore {
    locks: DashMap<String, LockEntry>, // lock_key -> LockEntry
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 清理过期锁，返回清理的数量
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.locks.len();
        self.locks.retain(|key, entry| {
            let expired = entry.is_expired(now);
            if expired {
                log::info!(
                    "[EXPIRED CLEANUP] Removed expired lock - key: {}, token: {}",
                    key,
                    entry.token
                );
            }
            !expired
        });
        before.saturating_sub(self.locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let lock_entry = LockEntry {
            token: token.to_string(),
            expires_at: expires_at(now, ttl)?,
        };

        match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                // 过期的锁视为不存在
                if occupied.get().is_expired(now) {
                    occupied.insert(lock_entry);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(lock_entry);
                Ok(true)
            }
        }
    }

    async fn renew(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let renewed_until = expires_at(now, ttl)?;
        if let Some(mut lock_entry) = self.locks.get_mut(key) {
            if lock_entry.token == token && !lock_entry.is_expired(now) {
                lock_entry.expires_at = renewed_until;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let removed = self
            .locks
            .remove_if(key, |_, entry| entry.token == token && !entry.is_expired(now));
        Ok(removed.is_some())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = Instant::now();
        Ok(self
            .locks
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.expires_at.saturating_duration_since(now)))
    }
}
