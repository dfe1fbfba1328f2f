use crate::error::{LockError, Result};
use crate::storage::LockStore;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// 锁在本进程内的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Held,
    Released,
    /// 续约时发现 token 不匹配，临界区已不受保护
    Lost,
}

struct Inner {
    key: String,
    token: String,
    ttl: Duration,
    store: Arc<dyn LockStore>,
    state: watch::Sender<LockState>,
    // 只会被置为 true 一次，通知自动续约退出
    stop: watch::Sender<bool>,
    releasing: AtomicBool,
    // 存储端释放的结果，所有 unlock 调用共享
    released: watch::Sender<Option<Result<()>>>,
    refreshing: AtomicBool,
}

impl Inner {
    fn current_state(&self) -> LockState {
        *self.state.borrow()
    }

    async fn refresh(&self) -> Result<()> {
        if self.current_state() == LockState::Released {
            return Err(LockError::LockNotHeld);
        }

        match self.store.renew(&self.key, &self.token, self.ttl).await {
            Ok(true) => {
                debug!("[REFRESH] Lease renewed - key: {}, ttl: {:?}", self.key, self.ttl);
                Ok(())
            }
            Ok(false) => {
                self.state.send_if_modified(|state| {
                    // 已经开始释放时 key 被删除是预期内的
                    if *state == LockState::Held && !*self.stop.borrow() {
                        *state = LockState::Lost;
                        true
                    } else {
                        false
                    }
                });
                Err(LockError::LockNotHeld)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// 已经持有的锁
pub struct LockHandle {
    inner: Arc<Inner>,
}

impl LockHandle {
    pub(crate) fn new(
        key: String,
        token: String,
        ttl: Duration,
        store: Arc<dyn LockStore>,
    ) -> Self {
        let (state, _) = watch::channel(LockState::Held);
        let (stop, _) = watch::channel(false);
        let (released, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                key,
                token,
                ttl,
                store,
                state,
                stop,
                releasing: AtomicBool::new(false),
                released,
                refreshing: AtomicBool::new(false),
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn token(&self) -> &str {
        &self.inner.token
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn state(&self) -> LockState {
        self.inner.current_state()
    }

    /// 临界区内可以随时检查锁是否仍然有效
    pub fn is_held(&self) -> bool {
        self.state() == LockState::Held
    }

    pub fn watch_state(&self) -> watch::Receiver<LockState> {
        self.inner.state.subscribe()
    }

    /// 手动续约一次。需要超时控制时由调用方包一层 `tokio::time::timeout`。
    pub async fn refresh(&self) -> Result<()> {
        self.inner.refresh().await
    }

    pub async fn remaining_ttl(&self) -> Result<Option<Duration>> {
        Ok(self.inner.store.ttl(&self.inner.key).await?)
    }

    /// 启动后台自动续约
    ///
    /// 每隔 `interval` 续约一次，单次续约超过 `call_timeout` 视为超时并立即重试，
    /// 不等下一个周期。锁丢失或其他传输错误会结束续约，错误通过
    /// [`AutoRefresh::join`] 和 [`LockHandle::state`] 暴露给调用方。
    /// `interval` 需要明显小于锁的过期时间。
    pub fn auto_refresh(&self, interval: Duration, call_timeout: Duration) -> Result<AutoRefresh> {
        if self.inner.ttl.is_zero() {
            return Err(LockError::InvalidArgument(
                "auto refresh requires a positive lease ttl".to_string(),
            ));
        }
        if interval.is_zero() || call_timeout.is_zero() {
            return Err(LockError::InvalidArgument(
                "refresh interval and timeout must be positive".to_string(),
            ));
        }
        if *self.inner.stop.borrow() || !self.is_held() {
            return Err(LockError::LockNotHeld);
        }
        if self.inner.refreshing.swap(true, Ordering::AcqRel) {
            return Err(LockError::InvalidArgument(format!(
                "auto refresh already running for key {}",
                self.inner.key
            )));
        }

        info!(
            "[AUTO REFRESH] Starting - key: {}, interval: {:?}, call_timeout: {:?}, ttl: {:?}",
            self.inner.key, interval, call_timeout, self.inner.ttl
        );
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let result = run_auto_refresh(&inner, interval, call_timeout).await;
            inner.refreshing.store(false, Ordering::Release);
            result
        });
        Ok(AutoRefresh { task })
    }

    /// 释放锁，多次或并发调用只会执行一次存储端删除，之后的调用返回同一个结果
    ///
    /// 第一次调用在任何等待之前就停止续约并标记为已释放，存储端删除在后台任务中执行，
    /// 调用方取消等待（例如外层超时）不会中断删除，也不会导致重复删除。
    pub async fn unlock(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.releasing.swap(true, Ordering::AcqRel) {
            // 无论结果如何本地都标记为已释放
            inner.stop.send_replace(true);
            inner.state.send_replace(LockState::Released);

            let task_inner = inner.clone();
            tokio::spawn(async move {
                let result = release(&task_inner).await;
                task_inner.released.send_replace(Some(result));
            });
        }

        let mut released = inner.released.subscribe();
        let published = released
            .wait_for(Option::is_some)
            .await
            .map(|result| result.clone());
        match published {
            Ok(Some(result)) => result,
            // 发送端随 Inner 存活，不会走到这里
            _ => Err(LockError::LockNotHeld),
        }
    }
}

async fn release(inner: &Inner) -> Result<()> {
    info!("[RELEASE] Attempting to release lock - key: {}", inner.key);
    match inner.store.release(&inner.key, &inner.token).await {
        Ok(true) => {
            info!("[RELEASE SUCCESS] Lock released - key: {}", inner.key);
            Ok(())
        }
        Ok(false) => {
            warn!(
                "[RELEASE FAILED] Lock not found or not owned - key: {}, token: {}",
                inner.key, inner.token
            );
            Err(LockError::LockNotHeld)
        }
        Err(e) => {
            error!("[RELEASE FAILED] Failed to release lock - key: {}, error: {}", inner.key, e);
            Err(LockError::Transport(e))
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        // 没有 unlock 就丢弃时只停止续约，key 由存储端过期
        self.inner.stop.send_replace(true);
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.inner.key)
            .field("token", &self.inner.token)
            .field("ttl", &self.inner.ttl)
            .field("state", &self.state())
            .finish()
    }
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    // 发送端关闭同样视为停止
    let _ = stop.wait_for(|stopped| *stopped).await;
}

async fn run_auto_refresh(inner: &Inner, interval: Duration, call_timeout: Duration) -> Result<()> {
    let mut stop = inner.stop.subscribe();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            _ = ticker.tick() => {}
        }

        // 超时立即重试，直到成功、出现确定性错误或收到停止信号
        loop {
            let attempt = tokio::select! {
                biased;
                _ = stopped(&mut stop) => return Ok(()),
                attempt = tokio::time::timeout(call_timeout, inner.refresh()) => attempt,
            };

            match attempt {
                Ok(Ok(())) => break,
                Ok(Err(e)) if e.is_timeout() => {
                    warn!("[REFRESH TIMEOUT] Store timed out, retrying - key: {}", inner.key);
                }
                Err(_) => {
                    warn!(
                        "[REFRESH TIMEOUT] Renewal exceeded {:?}, retrying - key: {}",
                        call_timeout, inner.key
                    );
                }
                Ok(Err(e)) => {
                    if *inner.stop.borrow() {
                        return Ok(());
                    }
                    error!("[LOCK LOST] Auto refresh stopped - key: {}, error: {}", inner.key, e);
                    return Err(e);
                }
            }
        }
    }

    info!("[AUTO REFRESH] Stopped - key: {}", inner.key);
    Ok(())
}

/// 后台续约任务
#[derive(Debug)]
pub struct AutoRefresh {
    task: JoinHandle<Result<()>>,
}

impl AutoRefresh {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// 等待续约结束。收到停止信号正常退出时返回 `Ok(())`，否则返回导致退出的错误。
    pub async fn join(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Ok(()),
        }
    }
}
