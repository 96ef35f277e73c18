use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kv_sql::store::{ExpiryManager, ExpiryStats, SqliteTransactor, StoreManager};
use kv_sql::{Settings, StoreResult};
use log::info;

/// 过期键清理守护进程
pub struct Sweeper {
    manager: StoreManager,
    batch_size: Option<usize>,
    stop: Arc<AtomicBool>,
}

impl Sweeper {
    pub fn new(manager: StoreManager) -> Self {
        Sweeper {
            manager,
            batch_size: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 按配置打开数据库
    pub fn open(settings: Settings) -> StoreResult<Self> {
        Ok(Self::new(StoreManager::open(settings)?))
    }

    /// 覆盖配置中的批次大小
    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.batch_size = batch_size;
        self
    }

    fn expiry(&self) -> ExpiryManager<SqliteTransactor> {
        let expiry = self.manager.expiry_manager();
        match self.batch_size {
            Some(n) => expiry.with_batch_size(n),
            None => expiry,
        }
    }

    /// 执行一轮清理
    pub fn sweep_once(&self) -> StoreResult<usize> {
        self.expiry().sweep()
    }

    /// 循环清理，直到收到 Ctrl+C
    pub fn start(&self) -> Result<ExpiryStats, String> {
        self.stop.store(false, Ordering::SeqCst);

        let stop_sig = Arc::clone(&self.stop);
        ctrlc::set_handler(move || {
            info!("接收到终止信号，正在停止清理...");
            stop_sig.store(true, Ordering::SeqCst);
        })
        .map_err(|e| format!("无法设置信号处理程序: {}", e))?;

        let stats = self.expiry().run(&self.stop);
        info!("清理已停止: 轮数={}, 删除键数={}", stats.sweeps, stats.removed);
        Ok(stats)
    }
}
