mod common;

use common::{Fault, FlakyStore, Op};
use fe_lease_lock::{
    ExponentialBackoff, FixedInterval, LockError, LockManager, LockStore, MemoryStore, StoreError,
};
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const TTL: Duration = Duration::from_secs(30);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquirers_are_mutually_exclusive() {
    let manager = LockManager::new(Arc::new(MemoryStore::new()));

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.try_lock("inventory", TTL).await })
        })
        .collect();

    let mut winners = Vec::new();
    for task in tasks {
        match task.await.unwrap() {
            Ok(handle) => winners.push(handle),
            Err(LockError::RaceLost) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(winners.len(), 1);

    winners[0].unlock().await.unwrap();
    assert!(manager.try_lock("inventory", TTL).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn blocking_acquirers_take_turns() {
    let manager = LockManager::new(Arc::new(MemoryStore::new()));
    let inside = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            let inside = inside.clone();
            tokio::spawn(async move {
                let handle = manager
                    .lock(
                        "ledger",
                        Duration::from_secs(1),
                        TTL,
                        FixedInterval::new(Duration::from_millis(5), 10_000),
                        pending(),
                    )
                    .await
                    .unwrap();
                let now_inside = inside.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                assert_eq!(now_inside, 1);
                tokio::time::sleep(Duration::from_millis(10)).await;
                inside.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                handle.unlock().await.unwrap();
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn fixed_interval_exhausts_after_race_losses_only() {
    let store = Arc::new(FlakyStore::new());
    store.inner().acquire("report", "other", Duration::from_secs(3600)).await.unwrap();
    // 超时与抢锁失败交替出现
    store.script(
        Op::Acquire,
        vec![
            Some(Fault::Delay(Duration::from_secs(10))),
            None,
            Some(Fault::Fail(StoreError::Timeout)),
            None,
            Some(Fault::Delay(Duration::from_secs(10))),
            None,
        ],
    );
    let manager = LockManager::new(store.clone());

    let err = manager
        .lock(
            "report",
            Duration::from_secs(1),
            TTL,
            FixedInterval::new(Duration::from_millis(100), 3),
            pending(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, LockError::RetryExhausted { attempts: 3 }));
    assert_eq!(store.calls(Op::Acquire).len(), 6);
}

#[tokio::test(start_paused = true)]
async fn timeouts_retry_at_the_same_interval() {
    let store = Arc::new(FlakyStore::new());
    store.script(
        Op::Acquire,
        vec![
            Some(Fault::Delay(Duration::from_secs(5))),
            Some(Fault::Delay(Duration::from_secs(5))),
            Some(Fault::Delay(Duration::from_secs(5))),
            None,
        ],
    );
    let manager = LockManager::new(store.clone());

    // 只允许一次抢锁失败，超时不消耗次数
    let handle = manager
        .lock(
            "report",
            Duration::from_secs(1),
            TTL,
            FixedInterval::new(Duration::from_millis(500), 1),
            pending(),
        )
        .await
        .unwrap();
    assert!(handle.is_held());

    let calls = store.calls(Op::Acquire);
    assert_eq!(calls.len(), 4);
    for pair in calls.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_millis(1500));
    }
}

#[tokio::test(start_paused = true)]
async fn exponential_backoff_exhausts_at_ceiling() {
    let store = Arc::new(MemoryStore::new());
    store.acquire("report", "other", Duration::from_secs(3600)).await.unwrap();
    let manager = LockManager::new(store);

    let start = Instant::now();
    let err = manager
        .lock(
            "report",
            Duration::from_secs(1),
            TTL,
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(1600)),
            pending(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, LockError::RetryExhausted { attempts: 4 }));
    // 200 + 400 + 800
    assert_eq!(start.elapsed(), Duration::from_millis(1400));
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_backoff() {
    let store = Arc::new(MemoryStore::new());
    store.acquire("report", "other", Duration::from_secs(3600)).await.unwrap();
    let manager = LockManager::new(store);

    let start = Instant::now();
    let err = manager
        .lock(
            "report",
            Duration::from_secs(1),
            TTL,
            FixedInterval::new(Duration::from_secs(60), 10),
            tokio::time::sleep(Duration::from_secs(1)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, LockError::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_inflight_attempt() {
    let store = Arc::new(FlakyStore::new());
    store.script(Op::Acquire, vec![Some(Fault::Delay(Duration::from_secs(30)))]);
    let manager = LockManager::new(store);

    let start = Instant::now();
    let err = manager
        .lock(
            "report",
            Duration::from_secs(60),
            TTL,
            FixedInterval::new(Duration::from_secs(1), 10),
            tokio::time::sleep(Duration::from_millis(200)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, LockError::Cancelled));
    assert_eq!(start.elapsed(), Duration::from_millis(200));
}

#[tokio::test]
async fn transport_errors_abort_without_retry() {
    let store = Arc::new(FlakyStore::new());
    store.script(
        Op::Acquire,
        vec![Some(Fault::Fail(StoreError::Unavailable("connection reset".into())))],
    );
    let manager = LockManager::new(store.clone());

    let err = manager
        .lock(
            "report",
            Duration::from_secs(1),
            TTL,
            FixedInterval::new(Duration::from_millis(10), 10),
            pending(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, LockError::Transport(StoreError::Unavailable(_))));
    assert!(!err.is_timeout());
    assert_eq!(store.calls(Op::Acquire).len(), 1);
}

#[tokio::test]
async fn try_lock_separates_race_loss_from_transport_error() {
    let store = Arc::new(FlakyStore::new());
    store.script(Op::Acquire, vec![None, None, Some(Fault::Fail(StoreError::Timeout))]);
    let manager = LockManager::new(store);

    let _held = manager.try_lock("report", TTL).await.unwrap();
    assert!(matches!(manager.try_lock("report", TTL).await, Err(LockError::RaceLost)));
    let err = manager.try_lock("report", TTL).await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test(start_paused = true)]
async fn expired_lease_can_be_acquired_by_next_holder() {
    let store = Arc::new(MemoryStore::new());
    let manager = LockManager::new(store);

    let stale = manager.try_lock("report", Duration::from_secs(5)).await.unwrap();
    let next = manager
        .lock(
            "report",
            Duration::from_secs(1),
            Duration::from_secs(5),
            FixedInterval::new(Duration::from_secs(1), 100),
            pending(),
        )
        .await
        .unwrap();

    assert_ne!(stale.token(), next.token());
    // 旧持有者无法再操作新持有者的锁
    assert!(matches!(stale.refresh().await, Err(LockError::LockNotHeld)));
    assert!(matches!(stale.unlock().await, Err(LockError::LockNotHeld)));
    next.refresh().await.unwrap();
    next.unlock().await.unwrap();
}
