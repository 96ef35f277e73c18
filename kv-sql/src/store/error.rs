use std::fmt;

/// 存储操作错误类型
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// 键、元素不存在，或索引越界
    NotFound,
    /// 键已存在且类型与操作要求的类型不同
    KeyType,
    /// 值无法按要求解释（如对非数字字符串自增）
    ValueType,
    /// 操作超过截止时间，事务已回滚
    Timeout,
    /// SQL 执行错误
    Sql(String),
    /// 文件IO错误
    IoError(String),
    /// 配置错误
    ConfigError(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "键或元素不存在"),
            StoreError::KeyType => write!(f, "键类型不匹配"),
            StoreError::ValueType => write!(f, "值类型不匹配"),
            StoreError::Timeout => write!(f, "操作超时"),
            StoreError::Sql(msg) => write!(f, "SQL错误: {}", msg),
            StoreError::IoError(msg) => write!(f, "IO错误: {}", msg),
            StoreError::ConfigError(msg) => write!(f, "配置错误: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl StoreError {
    /// 是否为调用方可重试的瞬时错误
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Timeout | StoreError::Sql(_) | StoreError::IoError(_)
        )
    }
}

/// 存储操作结果类型
pub type StoreResult<T> = Result<T, StoreError>;

impl From<std::io::Error> for StoreError {
    fn from(error: std::io::Error) -> Self {
        StoreError::IoError(error.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(error: rusqlite::Error) -> Self {
        match &error {
            // 进度回调中断语句即视为超时
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::OperationInterrupted =>
            {
                StoreError::Timeout
            }
            _ => StoreError::Sql(error.to_string()),
        }
    }
}

impl From<config::ConfigError> for StoreError {
    fn from(error: config::ConfigError) -> Self {
        StoreError::ConfigError(error.to_string())
    }
}
