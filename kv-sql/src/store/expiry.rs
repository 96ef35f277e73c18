use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::ExpiryConfig;
use super::error::StoreResult;
use super::key_ops::KeyTx;
use super::transactor::Transactor;

/// 时间源，返回 Unix 毫秒时间戳
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// 手动控制的时钟（用于测试过期逻辑）
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// 过期键清理器：周期性地物理删除已过期的键
pub struct ExpiryManager<T: Transactor> {
    db: Arc<T>,
    batch_size: usize,
    interval: Duration,
}

/// 清理统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryStats {
    /// 清理轮数
    pub sweeps: u64,
    /// 删除的键总数
    pub removed: u64,
}

impl<T: Transactor> ExpiryManager<T> {
    pub fn new(db: Arc<T>, config: &ExpiryConfig) -> Self {
        Self {
            db,
            batch_size: config.sweep_batch_size,
            interval: Duration::from_secs(config.sweep_interval_seconds.max(1)),
        }
    }

    /// 覆盖每轮删除的键数上限（0 表示不限数量）
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// 执行一轮清理，返回删除的键数
    pub fn sweep(&self) -> StoreResult<usize> {
        let removed = self
            .db
            .update(|tx| KeyTx::new(tx).delete_expired(self.batch_size))?;
        if removed > 0 {
            info!("清理了 {} 个过期键", removed);
        } else {
            debug!("没有需要清理的过期键");
        }
        Ok(removed)
    }

    /// 循环清理直到 `stop` 被置位。批次删满时立即进入下一轮。
    pub fn run(&self, stop: &AtomicBool) -> ExpiryStats {
        let mut stats = ExpiryStats::default();
        while !stop.load(Ordering::SeqCst) {
            let full_batch = match self.sweep() {
                Ok(removed) => {
                    stats.sweeps += 1;
                    stats.removed += removed as u64;
                    self.batch_size > 0 && removed >= self.batch_size
                }
                Err(e) if e.is_transient() => {
                    warn!("清理过期键失败，下一轮重试: {}", e);
                    false
                }
                Err(e) => {
                    error!("清理过期键出错: {}", e);
                    false
                }
            };
            if full_batch {
                continue;
            }
            self.wait(stop);
        }
        stats
    }

    /// 分段睡眠，以便及时响应停止信号
    fn wait(&self, stop: &AtomicBool) {
        let step = Duration::from_millis(100);
        let mut waited = Duration::ZERO;
        while waited < self.interval && !stop.load(Ordering::SeqCst) {
            thread::sleep(step);
            waited += step;
        }
    }
}
