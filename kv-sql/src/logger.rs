use log::{LevelFilter, SetLoggerError};
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode, WriteLogger};
use std::fs::OpenOptions;
use std::path::Path;

/// 解析日志级别，无法识别时使用 info
pub fn parse_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// 初始化日志：同时输出到终端和文件。日志文件无法打开时只输出到终端。
pub fn init_logger(log_file: &str, level: &str) -> Result<(), SetLoggerError> {
    // 确保日志目录存在
    if let Some(parent) = Path::new(log_file).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).unwrap_or_else(|e| {
                eprintln!("无法创建日志目录: {}", e);
            });
        }
    }

    let level_filter = parse_level(level);

    let term = TermLogger::new(
        level_filter,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );

    match OpenOptions::new().create(true).append(true).open(log_file) {
        Ok(file) => CombinedLogger::init(vec![
            term,
            WriteLogger::new(level_filter, Config::default(), file),
        ]),
        Err(e) => {
            eprintln!("无法打开日志文件 {}: {}", log_file, e);
            CombinedLogger::init(vec![term])
        }
    }
}
