use crate::error::LockError;
use std::time::Duration;

/// 重试策略
///
/// `next` 根据上一次失败返回下一次重试前的等待时间，返回 `None` 表示放弃。
/// 策略带有可变状态，每个加锁循环使用自己的实例。
pub trait RetryStrategy: Send {
    fn next(&mut self, err: &LockError) -> Option<Duration>;
}

impl<S: RetryStrategy + ?Sized> RetryStrategy for Box<S> {
    fn next(&mut self, err: &LockError) -> Option<Duration> {
        (**self).next(err)
    }
}

/// 固定时间间隔，非超时失败达到 `max_attempts` 次后放弃
#[derive(Debug, Clone)]
pub struct FixedInterval {
    interval: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl FixedInterval {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl RetryStrategy for FixedInterval {
    fn next(&mut self, err: &LockError) -> Option<Duration> {
        if err.is_timeout() {
            return Some(self.interval);
        }

        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            None
        } else {
            Some(self.interval)
        }
    }
}

/// 指数退避，每次非超时失败间隔翻倍，达到上限即放弃
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current: Duration,
    max_interval: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max_interval: Duration) -> Self {
        // 间隔为 0 时翻倍永远不会增长
        let initial = initial.max(Duration::from_millis(1));
        Self {
            current: initial,
            max_interval,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next(&mut self, err: &LockError) -> Option<Duration> {
        if err.is_timeout() {
            return Some(self.current);
        }

        self.current = self.current.saturating_mul(2);
        if self.current >= self.max_interval {
            None
        } else {
            Some(self.current)
        }
    }
}
