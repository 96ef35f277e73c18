pub mod store;
pub mod config;
pub mod logger;

// 重新导出一些常用的类型，使其他crate更容易使用
pub use store::{StoreError, StoreManager, StoreResult, Value};
pub use config::Settings;
