use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags, TransactionBehavior};

use crate::config::DatabaseConfig;
use super::data_types::Value;
use super::dialect::{Dialect, SqliteDialect};
use super::error::{StoreError, StoreResult};
use super::expiry::{Clock, SystemClock};

/// 进度回调的调用间隔（虚拟机指令数）
const PROGRESS_STEPS: i32 = 1000;

/// SQL 参数或结果单元
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for SqlValue {
    fn from(n: i64) -> Self {
        SqlValue::Int(n)
    }
}

impl From<usize> for SqlValue {
    fn from(n: usize) -> Self {
        SqlValue::Int(n as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(f: f64) -> Self {
        SqlValue::Real(f)
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<&Value> for SqlValue {
    fn from(v: &Value) -> Self {
        SqlValue::Blob(v.as_bytes().to_vec())
    }
}

impl From<Value> for SqlValue {
    fn from(v: Value) -> Self {
        SqlValue::Blob(v.into_bytes())
    }
}

impl From<Option<i64>> for SqlValue {
    fn from(n: Option<i64>) -> Self {
        n.map_or(SqlValue::Null, SqlValue::Int)
    }
}

/// 查询结果中的一行
#[derive(Debug, Clone, PartialEq)]
pub struct Row(pub Vec<SqlValue>);

impl Row {
    fn cell(&self, i: usize) -> StoreResult<&SqlValue> {
        self.0
            .get(i)
            .ok_or_else(|| StoreError::Sql(format!("结果列 {} 不存在", i)))
    }

    fn mismatch(i: usize, expected: &str) -> StoreError {
        StoreError::Sql(format!("结果列 {} 不是 {}", i, expected))
    }

    pub fn int(&self, i: usize) -> StoreResult<i64> {
        match self.cell(i)? {
            SqlValue::Int(n) => Ok(*n),
            SqlValue::Real(f) => Ok(*f as i64),
            _ => Err(Self::mismatch(i, "integer")),
        }
    }

    pub fn opt_int(&self, i: usize) -> StoreResult<Option<i64>> {
        match self.cell(i)? {
            SqlValue::Null => Ok(None),
            _ => self.int(i).map(Some),
        }
    }

    pub fn real(&self, i: usize) -> StoreResult<f64> {
        match self.cell(i)? {
            SqlValue::Real(f) => Ok(*f),
            SqlValue::Int(n) => Ok(*n as f64),
            _ => Err(Self::mismatch(i, "real")),
        }
    }

    pub fn opt_real(&self, i: usize) -> StoreResult<Option<f64>> {
        match self.cell(i)? {
            SqlValue::Null => Ok(None),
            _ => self.real(i).map(Some),
        }
    }

    pub fn text(&self, i: usize) -> StoreResult<String> {
        match self.cell(i)? {
            SqlValue::Text(s) => Ok(s.clone()),
            SqlValue::Blob(b) => Ok(String::from_utf8_lossy(b).into_owned()),
            _ => Err(Self::mismatch(i, "text")),
        }
    }

    pub fn value(&self, i: usize) -> StoreResult<Value> {
        match self.cell(i)? {
            SqlValue::Blob(b) => Ok(Value::new(b.clone())),
            SqlValue::Text(s) => Ok(Value::from(s.as_str())),
            SqlValue::Int(n) => Ok(Value::from(*n)),
            SqlValue::Real(f) => Ok(Value::from(*f)),
            SqlValue::Null => Err(Self::mismatch(i, "value")),
        }
    }
}

/// 事务句柄，所有存储操作都通过它访问数据库
///
/// 存储层生成的 SQL 一律使用 `?` 占位符。实现者在执行前必须先用
/// `self.dialect().rebind(sql)` 转换为方言自己的占位符（如 Postgres 的 `$1`）。
pub trait Tx {
    /// 当前连接的 SQL 方言
    fn dialect(&self) -> &dyn Dialect;

    /// 事务开始时刻（Unix毫秒），事务内所有 TTL 比较都以此为准
    fn now(&self) -> i64;

    /// 执行不返回结果的语句，返回受影响的行数
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> StoreResult<usize>;

    /// 执行查询并返回所有结果行
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> StoreResult<Vec<Row>>;

    /// 执行查询并返回第一行
    fn query_row(&mut self, sql: &str, params: &[SqlValue]) -> StoreResult<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }
}

/// 事务执行器：在事务内运行回调，成功则提交，出错则回滚并返回错误
pub trait Transactor: Send + Sync {
    /// 在可写事务中运行
    fn update<R, F>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut dyn Tx) -> StoreResult<R>;

    /// 在只读事务中运行
    fn view<R, F>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut dyn Tx) -> StoreResult<R>;
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            SqlValue::Int(n) => ToSqlOutput::Borrowed(ValueRef::Integer(*n)),
            SqlValue::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(v: ValueRef<'_>) -> Self {
        match v {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(n) => SqlValue::Int(n),
            ValueRef::Real(f) => SqlValue::Real(f),
            ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        }
    }
}

/// SQLite 事务
struct SqliteTx<'t, 'c> {
    tx: &'t rusqlite::Transaction<'c>,
    now: i64,
    deadline: Instant,
}

impl SqliteTx<'_, '_> {
    fn check_deadline(&self) -> StoreResult<()> {
        if Instant::now() >= self.deadline {
            return Err(StoreError::Timeout);
        }
        Ok(())
    }
}

impl Tx for SqliteTx<'_, '_> {
    fn dialect(&self) -> &dyn Dialect {
        &SqliteDialect
    }

    fn now(&self) -> i64 {
        self.now
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> StoreResult<usize> {
        self.check_deadline()?;
        let sql = self.dialect().rebind(sql);
        let mut stmt = self.tx.prepare_cached(&sql)?;
        Ok(stmt.execute(params_from_iter(params.iter()))?)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> StoreResult<Vec<Row>> {
        self.check_deadline()?;
        let sql = self.dialect().rebind(sql);
        let mut stmt = self.tx.prepare_cached(&sql)?;
        let columns = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(columns);
            for i in 0..columns {
                cells.push(SqlValue::from(row.get_ref(i)?));
            }
            out.push(Row(cells));
        }
        Ok(out)
    }
}

/// SQLite 连接集合：一个写连接和若干只读连接
struct Connections {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
}

/// 基于 SQLite 的事务执行器
#[derive(Clone)]
pub struct SqliteTransactor {
    conns: Arc<Connections>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl SqliteTransactor {
    /// 按配置打开数据库，必要时创建数据表
    pub fn open(config: &DatabaseConfig) -> StoreResult<Self> {
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let memory = config.path == ":memory:";

        if !memory {
            if let Some(parent) = Path::new(&config.path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let writer = Connection::open(&config.path)?;
        if !memory {
            writer.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        }
        writer.pragma_update(None, "synchronous", "NORMAL")?;
        writer.pragma_update(None, "foreign_keys", "ON")?;
        writer.busy_timeout(busy_timeout)?;
        writer.execute_batch(SqliteDialect.schema())?;

        // 内存数据库无法在连接间共享，读写共用一个连接
        let mut readers = Vec::new();
        if !memory {
            for _ in 0..config.read_connections {
                let reader = Connection::open_with_flags(
                    &config.path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?;
                reader.pragma_update(None, "query_only", "ON")?;
                reader.busy_timeout(busy_timeout)?;
                readers.push(Mutex::new(reader));
            }
        }

        info!(
            "打开数据库: 路径={}, 只读连接数={}",
            config.path,
            readers.len()
        );

        Ok(SqliteTransactor {
            conns: Arc::new(Connections {
                writer: Mutex::new(writer),
                readers,
                next_reader: AtomicUsize::new(0),
            }),
            clock: Arc::new(SystemClock),
            timeout: Duration::from_millis(config.op_timeout_ms),
        })
    }

    /// 打开内存数据库（用于测试）
    pub fn open_memory() -> StoreResult<Self> {
        Self::open(&DatabaseConfig {
            path: ":memory:".to_string(),
            ..DatabaseConfig::default()
        })
    }

    /// 替换时钟
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 共享连接、使用另一个操作截止时间的句柄
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        SqliteTransactor {
            conns: Arc::clone(&self.conns),
            clock: Arc::clone(&self.clock),
            timeout,
        }
    }

    /// 当前的操作超时时间
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn reader(&self) -> &Mutex<Connection> {
        let readers = &self.conns.readers;
        if readers.is_empty() {
            return &self.conns.writer;
        }
        let i = self.conns.next_reader.fetch_add(1, Ordering::Relaxed);
        &readers[i % readers.len()]
    }

    fn run<R, F>(
        &self,
        conn: &Mutex<Connection>,
        behavior: TransactionBehavior,
        f: F,
    ) -> StoreResult<R>
    where
        F: FnOnce(&mut dyn Tx) -> StoreResult<R>,
    {
        let mut conn = conn.lock().unwrap_or_else(|e| e.into_inner());
        let deadline = Instant::now() + self.timeout;
        conn.progress_handler(PROGRESS_STEPS, Some(move || Instant::now() >= deadline));

        let result = Self::run_in(&mut conn, behavior, self.clock.now_millis(), deadline, f);

        conn.progress_handler(0, None::<fn() -> bool>);
        match &result {
            Err(StoreError::Timeout) => warn!("事务超时，已回滚"),
            Err(e) => debug!("事务回滚: {}", e),
            Ok(_) => {}
        }
        result
    }

    fn run_in<R, F>(
        conn: &mut Connection,
        behavior: TransactionBehavior,
        now: i64,
        deadline: Instant,
        f: F,
    ) -> StoreResult<R>
    where
        F: FnOnce(&mut dyn Tx) -> StoreResult<R>,
    {
        let tx = conn.transaction_with_behavior(behavior)?;
        let out = {
            let mut sqlite_tx = SqliteTx {
                tx: &tx,
                now,
                deadline,
            };
            f(&mut sqlite_tx)?
        };
        tx.commit()?;
        Ok(out)
    }
}

impl Transactor for SqliteTransactor {
    fn update<R, F>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut dyn Tx) -> StoreResult<R>,
    {
        self.run(&self.conns.writer, TransactionBehavior::Immediate, f)
    }

    fn view<R, F>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut dyn Tx) -> StoreResult<R>,
    {
        self.run(self.reader(), TransactionBehavior::Deferred, f)
    }
}
