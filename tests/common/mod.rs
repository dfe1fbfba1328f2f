#![allow(dead_code)]

use async_trait::async_trait;
use fe_lease_lock::{LockStore, MemoryStore, StoreError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Acquire,
    Renew,
    Release,
}

#[derive(Debug, Clone)]
pub enum Fault {
    /// 先等待再转发给内存存储
    Delay(Duration),
    Fail(StoreError),
}

/// 包装内存存储，按操作注入延迟或错误并记录调用
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    faults: Mutex<Vec<(Op, VecDeque<Option<Fault>>)>>,
    calls: Mutex<Vec<(Op, Instant)>>,
    releases: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// 为某个操作按顺序安排故障，`None` 表示这一次正常执行
    pub fn script(&self, op: Op, plan: Vec<Option<Fault>>) {
        self.faults.lock().push((op, plan.into()));
    }

    pub fn calls(&self, op: Op) -> Vec<Instant> {
        self.calls
            .lock()
            .iter()
            .filter(|(o, _)| *o == op)
            .map(|(_, at)| *at)
            .collect()
    }

    /// 真正到达存储的释放次数
    pub fn release_mutations(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    async fn before(&self, op: Op) -> Result<(), StoreError> {
        self.calls.lock().push((op, Instant::now()));
        let fault = {
            let mut faults = self.faults.lock();
            faults
                .iter_mut()
                .find(|(o, _)| *o == op)
                .and_then(|(_, plan)| plan.pop_front())
                .flatten()
        };
        match fault {
            Some(Fault::Delay(d)) => {
                tokio::time::sleep(d).await;
                Ok(())
            }
            Some(Fault::Fail(e)) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LockStore for FlakyStore {
    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.before(Op::Acquire).await?;
        self.inner.acquire(key, token, ttl).await
    }

    async fn renew(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.before(Op::Renew).await?;
        self.inner.renew(key, token, ttl).await
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        self.before(Op::Release).await?;
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.inner.release(key, token).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.inner.ttl(key).await
    }
}
