use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub read_connections: usize,
    pub busy_timeout_ms: u64,
    pub op_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: "data/kv.db".to_string(),
            read_connections: 4,
            busy_timeout_ms: 5000,
            op_timeout_ms: 10000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpiryConfig {
    pub sweep_interval_seconds: u64,
    pub sweep_batch_size: usize, // 0 表示不限数量
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        ExpiryConfig {
            sweep_interval_seconds: 60,
            sweep_batch_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub log_file: String,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_file: "logs/kv-sql.log".to_string(),
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub expiry: ExpiryConfig,
    pub logging: LoggingConfig,
}

const DEFAULT_CONFIG: &str = r#"[database]
# SQLite 数据库文件路径，":memory:" 表示内存数据库
path = "data/kv.db"
# 只读连接池大小
read_connections = 4
# 等待数据库锁的超时时间(毫秒)
busy_timeout_ms = 5000
# 单个操作的截止时间(毫秒)，超时后事务回滚
op_timeout_ms = 10000

[expiry]
# 过期键清理间隔(秒)
sweep_interval_seconds = 60
# 每次清理的最大键数，0 表示不限
sweep_batch_size = 1000

[logging]
# 日志文件路径
log_file = "logs/kv-sql.log"
# 日志级别: "error", "warn", "info", "debug", "trace"
level = "info"
"#;

impl Settings {
    /// 从 `config/default.toml` 加载配置，文件不存在时写入默认配置；
    /// 以 `KVSQL__` 为前缀的环境变量覆盖文件中的值
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = "config";
        let default_config_path = Path::new(config_dir).join("default.toml");

        // 确保配置目录存在
        if !Path::new(config_dir).exists() {
            fs::create_dir_all(config_dir).map_err(|e| {
                ConfigError::Message(format!("无法创建配置目录: {}", e))
            })?;
        }

        // 检查配置文件是否存在，如果不存在则创建默认配置
        if !default_config_path.exists() {
            let mut file = fs::File::create(&default_config_path).map_err(|e| {
                ConfigError::Message(format!("无法创建配置文件: {}", e))
            })?;

            file.write_all(DEFAULT_CONFIG.as_bytes()).map_err(|e| {
                ConfigError::Message(format!("无法写入配置文件: {}", e))
            })?;
        }

        Self::from_file(&default_config_path)
    }

    /// 从指定文件加载配置
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .add_source(File::from(path))
            .add_source(Environment::with_prefix("KVSQL").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}
