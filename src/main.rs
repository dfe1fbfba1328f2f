use anyhow::{bail, Context, Result};
use fe_lease_lock::config::{Config, StorageType};
use fe_lease_lock::{LockError, LockHandle, LockManager, LockStore, MemoryStore, RedisStore};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// 锁丢失后仍然尝试释放，失败只记录日志
async fn release_after_loss(handle: &LockHandle) -> Option<LockError> {
    let err = handle.unlock().await.err();
    if let Some(e) = &err {
        warn!("Failed to release lock {} after losing it: {}", handle.key(), e);
    }
    err
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // 加载配置
    let config = Config::from_env();
    info!("Starting fe-lease-lock with config: {:?}", config);

    // 创建存储
    let store: Arc<dyn LockStore> = match config.storage_type {
        StorageType::Memory => {
            info!("Using memory storage");
            let memory_store = Arc::new(MemoryStore::new());

            // 启动清理任务
            let cleanup_store = memory_store.clone();
            let cleanup_interval = Duration::from_secs(config.memory_cleanup_interval.max(1));
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(cleanup_interval);
                loop {
                    interval.tick().await;
                    let purged = cleanup_store.purge_expired();
                    if purged > 0 {
                        info!("[CLEANUP] Purged {} expired locks", purged);
                    }
                }
            });
            memory_store as Arc<dyn LockStore>
        }
        StorageType::Redis => {
            info!("Using Redis storage");
            let redis_url = config
                .redis_url
                .as_deref()
                .context("Redis URL not configured")?;
            let redis_store = RedisStore::new(
                redis_url,
                config.redis_username.clone(),
                config.redis_password.clone(),
                config.redis_db,
                config.key_prefix.clone(),
            )
            .await
            .context("Failed to connect to Redis")?;
            Arc::new(redis_store) as Arc<dyn LockStore>
        }
    };

    let manager = LockManager::new(store);
    let handle = match manager
        .lock(
            &config.lock_key,
            config.attempt_timeout(),
            config.lock_ttl(),
            config.retry_strategy(),
            ctrl_c(),
        )
        .await
    {
        Ok(handle) => handle,
        Err(LockError::Cancelled) => {
            warn!("Interrupted before the lock was acquired");
            return Ok(());
        }
        Err(e) => bail!("Failed to acquire lock {}: {}", config.lock_key, e),
    };

    let refresher = handle.auto_refresh(config.refresh_interval(), config.refresh_timeout())?;
    let refresh_done = refresher.join();
    tokio::pin!(refresh_done);

    let hold = async {
        if config.hold_secs == 0 {
            ctrl_c().await;
        } else {
            tokio::select! {
                _ = ctrl_c() => {}
                _ = tokio::time::sleep(Duration::from_secs(config.hold_secs)) => {}
            }
        }
    };

    // 续约提前结束说明临界区已经不受保护
    let stopped_early = tokio::select! {
        _ = hold => None,
        result = &mut refresh_done => Some(result),
    };

    if let Some(result) = stopped_early {
        let state = handle.state();
        release_after_loss(&handle).await;
        match result {
            Err(e) => bail!("Lost lock {} while holding it ({:?}): {}", config.lock_key, state, e),
            Ok(()) => bail!("Auto refresh for {} stopped unexpectedly", config.lock_key),
        }
    }

    handle.unlock().await?;
    if let Err(e) = refresh_done.await {
        warn!("Auto refresh ended with error: {}", e);
    }
    info!("Lock {} released, exiting", config.lock_key);
    Ok(())
}
