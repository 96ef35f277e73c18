use std::sync::Arc;

use log::info;

use crate::config::Settings;
use super::error::StoreResult;
use super::expiry::{Clock, ExpiryManager};
use super::hash_ops::{HashStore, HashTx};
use super::key_ops::{KeyStore, KeyTx};
use super::list_ops::{ListStore, ListTx};
use super::set_ops::{SetStore, SetTx};
use super::string_ops::{StringStore, StringTx};
use super::transactor::{SqliteTransactor, Transactor, Tx};
use super::zset_ops::{ZSetStore, ZSetTx};

/// 同一事务内的各类型存储，用于把多个操作组合成一个原子操作
pub struct TxStores<'a> {
    tx: &'a mut dyn Tx,
}

impl<'a> TxStores<'a> {
    pub fn new(tx: &'a mut dyn Tx) -> Self {
        Self { tx }
    }

    /// 事务开始时刻（Unix毫秒）
    pub fn now(&self) -> i64 {
        self.tx.now()
    }

    pub fn keys(&mut self) -> KeyTx<'_> {
        KeyTx::new(self.tx)
    }

    pub fn strings(&mut self) -> StringTx<'_> {
        StringTx::new(self.tx)
    }

    pub fn hashes(&mut self) -> HashTx<'_> {
        HashTx::new(self.tx)
    }

    pub fn lists(&mut self) -> ListTx<'_> {
        ListTx::new(self.tx)
    }

    pub fn sets(&mut self) -> SetTx<'_> {
        SetTx::new(self.tx)
    }

    pub fn zsets(&mut self) -> ZSetTx<'_> {
        ZSetTx::new(self.tx)
    }
}

/// 存储管理器：持有共享的事务执行器，并提供各类型存储
pub struct StoreManager<T: Transactor = SqliteTransactor> {
    db: Arc<T>,
    settings: Option<Arc<Settings>>,
}

impl<T: Transactor> Clone for StoreManager<T> {
    fn clone(&self) -> Self {
        StoreManager {
            db: Arc::clone(&self.db),
            settings: self.settings.clone(),
        }
    }
}

impl StoreManager<SqliteTransactor> {
    /// 按配置打开 SQLite 数据库
    pub fn open(settings: Settings) -> StoreResult<Self> {
        let db = SqliteTransactor::open(&settings.database)?;
        info!("存储管理器已启动: {}", settings.database.path);
        Ok(StoreManager {
            db: Arc::new(db),
            settings: Some(Arc::new(settings)),
        })
    }

    /// 打开内存数据库
    pub fn open_memory() -> StoreResult<Self> {
        Ok(Self::new(SqliteTransactor::open_memory()?))
    }

    /// 打开使用指定时钟的内存数据库
    pub fn open_memory_with_clock(clock: Arc<dyn Clock>) -> StoreResult<Self> {
        Ok(Self::new(SqliteTransactor::open_memory()?.with_clock(clock)))
    }
}

impl<T: Transactor> StoreManager<T> {
    pub fn new(db: T) -> Self {
        StoreManager {
            db: Arc::new(db),
            settings: None,
        }
    }

    /// 共享的事务执行器
    pub fn transactor(&self) -> Arc<T> {
        Arc::clone(&self.db)
    }

    pub fn settings(&self) -> Option<&Settings> {
        self.settings.as_deref()
    }

    pub fn keys(&self) -> KeyStore<T> {
        KeyStore::new(Arc::clone(&self.db))
    }

    pub fn strings(&self) -> StringStore<T> {
        StringStore::new(Arc::clone(&self.db))
    }

    pub fn hashes(&self) -> HashStore<T> {
        HashStore::new(Arc::clone(&self.db))
    }

    pub fn lists(&self) -> ListStore<T> {
        ListStore::new(Arc::clone(&self.db))
    }

    pub fn sets(&self) -> SetStore<T> {
        SetStore::new(Arc::clone(&self.db))
    }

    pub fn zsets(&self) -> ZSetStore<T> {
        ZSetStore::new(Arc::clone(&self.db))
    }

    /// 在一个可写事务中运行，出错时所有修改回滚
    pub fn update<R, F>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut TxStores<'_>) -> StoreResult<R>,
    {
        self.db.update(|tx| f(&mut TxStores::new(tx)))
    }

    /// 在一个只读事务中运行
    pub fn view<R, F>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut TxStores<'_>) -> StoreResult<R>,
    {
        self.db.view(|tx| f(&mut TxStores::new(tx)))
    }

    /// 按配置创建过期键清理器；没有配置时使用默认值
    pub fn expiry_manager(&self) -> ExpiryManager<T> {
        let expiry = self
            .settings
            .as_ref()
            .map(|s| s.expiry.clone())
            .unwrap_or_default();
        ExpiryManager::new(Arc::clone(&self.db), &expiry)
    }
}
