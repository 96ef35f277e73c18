mod sweeper;

use clap::{Arg, ArgAction, Command};
use kv_sql::config::Settings;
use kv_sql::logger;
use log::{error, info};
use std::path::Path;
use std::process;
use sweeper::Sweeper;

fn main() {
    // 解析命令行参数
    let matches = Command::new("KV SQL Sweeper")
        .version("0.1")
        .about("Reclaims expired keys from a kv-sql database")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .num_args(1),
        )
        .arg(
            Arg::new("batch")
                .short('b')
                .long("batch")
                .value_name("N")
                .help("每轮最多删除的键数，0 表示不限")
                .value_parser(clap::value_parser!(usize))
                .num_args(1),
        )
        .arg(
            Arg::new("once")
                .long("once")
                .help("只执行一轮清理后退出")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    // 加载配置
    let settings = match matches.get_one::<String>("config") {
        Some(path) => Settings::from_file(Path::new(path)),
        None => Settings::new(),
    };
    let settings = match settings {
        Ok(s) => s,
        Err(e) => {
            eprintln!("加载配置失败: {}", e);
            process::exit(1);
        }
    };

    // 初始化日志
    if let Err(e) = logger::init_logger(&settings.logging.log_file, &settings.logging.level) {
        eprintln!("初始化日志失败: {}", e);
        process::exit(1);
    }

    info!(
        "启动过期键清理: 数据库={}, 间隔={}秒",
        settings.database.path, settings.expiry.sweep_interval_seconds
    );

    let sweeper = match Sweeper::open(settings) {
        Ok(s) => s.with_batch_size(matches.get_one::<usize>("batch").copied()),
        Err(e) => {
            error!("打开数据库失败: {}", e);
            process::exit(1);
        }
    };

    if matches.get_flag("once") {
        match sweeper.sweep_once() {
            Ok(n) => info!("清理完成，删除了 {} 个过期键", n),
            Err(e) => {
                error!("清理失败: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    match sweeper.start() {
        Ok(_) => info!("清理进程正常退出"),
        Err(e) => {
            error!("清理进程启动失败: {}", e);
            process::exit(1);
        }
    }
}
