
// 基础设施
mod error;
mod data_types;
mod dialect;
mod transactor;
mod scan;
mod expiry;

// 键注册表与各类型存储
mod key_ops;
mod string_ops;
mod hash_ops;
mod list_ops;
mod set_ops;
mod zset_ops;
mod store_manager;

pub use error::{StoreError, StoreResult};
pub use data_types::{DataType, HashItem, Key, Value, ZItem};
pub use dialect::{Dialect, PostgresDialect, SqliteDialect};
pub use transactor::{Row, SqlValue, SqliteTransactor, Transactor, Tx};
pub use scan::{ScanResult, Scanner, DEFAULT_PAGE_SIZE};
pub use expiry::{Clock, ExpiryManager, ExpiryStats, ManualClock, SystemClock};

pub use key_ops::{KeyStore, KeyTx};
pub use string_ops::{SetCmd, SetOptions, SetOut, StringStore, StringTx};
pub use hash_ops::{HashStore, HashTx};
pub use list_ops::{InsertResult, ListStore, ListTx};
pub use set_ops::{SetStore, SetTx};
pub use zset_ops::{
    Aggregate, AlgebraCmd, AlgebraStoreCmd, DeleteCmd, RangeCmd, RangeOptions, ZSetStore, ZSetTx,
};
pub use store_manager::{StoreManager, TxStores};
