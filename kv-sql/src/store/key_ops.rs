//! 键注册表
//!
//! 键表是每个键存在性、类型和 TTL 的唯一依据。各类型存储在同一事务中先通过
//! 这里的辅助函数检查/创建键行，再读写自己的数据行。

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use super::data_types::{DataType, Key};
use super::error::{StoreError, StoreResult};
use super::scan::{page_size, ScanResult, Scanner};
use super::transactor::{Row, SqlValue, Transactor, Tx};

pub(crate) const KEY_COLUMNS: &str = "id, key, type, version, etime, mtime, len";

/// 有效键的过滤条件，参数为当前时间
pub(crate) const LIVE: &str = "(etime is null or etime > ?)";

const VERSION_FLOOR: &str = "version_floor";

pub(crate) fn key_from_row(row: &Row) -> StoreResult<Key> {
    Ok(Key {
        id: row.int(0)?,
        name: row.text(1)?,
        data_type: DataType::from_code(row.int(2)?),
        version: row.int(3)?,
        expire_at: row.opt_int(4)?,
        mtime: row.int(5)?,
        len: row.int(6)?,
    })
}

/// 写操作对 TTL 的处理方式
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Ttl {
    /// 保留原有过期时间
    Keep,
    /// 设置新的过期时间（`None` 表示永不过期）
    Set(Option<i64>),
}

/// 读取键行，包括已过期但尚未删除的行
pub(crate) fn lookup(tx: &mut dyn Tx, name: &str) -> StoreResult<Option<Key>> {
    let sql = format!("select {} from rkey where key = ?", KEY_COLUMNS);
    match tx.query_row(&sql, &[name.into()])? {
        Some(row) => Ok(Some(key_from_row(&row)?)),
        None => Ok(None),
    }
}

/// 读取有效的键
pub(crate) fn get_live(tx: &mut dyn Tx, name: &str) -> StoreResult<Option<Key>> {
    let now = tx.now();
    Ok(lookup(tx, name)?.filter(|k| k.is_live(now)))
}

/// 读取有效且类型为 `data_type` 的键；类型不同返回 `KeyType`
pub(crate) fn get_typed(
    tx: &mut dyn Tx,
    name: &str,
    data_type: DataType,
) -> StoreResult<Option<Key>> {
    match get_live(tx, name)? {
        Some(key) if key.data_type != data_type => Err(StoreError::KeyType),
        other => Ok(other),
    }
}

/// 读取有效且类型为 `data_type` 的键；不存在或类型不同均视为不存在
pub(crate) fn get_typed_or_none(
    tx: &mut dyn Tx,
    name: &str,
    data_type: DataType,
) -> StoreResult<Option<Key>> {
    Ok(get_live(tx, name)?.filter(|k| k.data_type == data_type))
}

/// 写入前确保键存在且类型为 `data_type`。
///
/// - 有效键类型不同：返回 `KeyType`，不做任何修改；
/// - 已过期的键：清除旧数据并复用该行，类型改为 `data_type`；
/// - 不存在：新建键行，版本号从已删除键的最大版本号开始，由随后的 [`touch`] 递增。
pub(crate) fn ensure(
    tx: &mut dyn Tx,
    name: &str,
    data_type: DataType,
    ttl: Ttl,
) -> StoreResult<Key> {
    let now = tx.now();
    match lookup(tx, name)? {
        Some(key) if key.is_live(now) => {
            if key.data_type != data_type {
                return Err(StoreError::KeyType);
            }
            match ttl {
                Ttl::Keep => Ok(key),
                Ttl::Set(expire_at) => {
                    tx.execute(
                        "update rkey set etime = ? where id = ?",
                        &[expire_at.into(), key.id.into()],
                    )?;
                    Ok(Key { expire_at, ..key })
                }
            }
        }
        Some(key) => {
            clear_data(tx, &key)?;
            let expire_at = match ttl {
                Ttl::Keep => None,
                Ttl::Set(at) => at,
            };
            tx.execute(
                "update rkey set type = ?, etime = ?, len = 0 where id = ?",
                &[data_type.code().into(), expire_at.into(), key.id.into()],
            )?;
            Ok(Key {
                data_type,
                expire_at,
                len: 0,
                ..key
            })
        }
        None => {
            let expire_at = match ttl {
                Ttl::Keep => None,
                Ttl::Set(at) => at,
            };
            let version = version_floor(tx)?;
            let row = tx
                .query_row(
                    "insert into rkey (key, type, version, etime, mtime, len) \
                     values (?, ?, ?, ?, ?, 0) returning id",
                    &[
                        name.into(),
                        data_type.code().into(),
                        version.into(),
                        expire_at.into(),
                        now.into(),
                    ],
                )?
                .ok_or_else(|| StoreError::Sql("插入键未返回 id".to_string()))?;
            Ok(Key {
                id: row.int(0)?,
                name: name.to_string(),
                data_type,
                version,
                expire_at,
                mtime: now,
                len: 0,
            })
        }
    }
}

/// 记录一次修改：版本号加一，更新修改时间，长度增加 `len_delta`
pub(crate) fn touch(tx: &mut dyn Tx, key_id: i64, len_delta: i64) -> StoreResult<()> {
    let now = tx.now();
    tx.execute(
        "update rkey set version = version + 1, mtime = ?, len = len + ? where id = ?",
        &[now.into(), len_delta.into(), key_id.into()],
    )?;
    Ok(())
}

/// 记录一次修改，并按数据表重新统计长度
pub(crate) fn touch_recount(tx: &mut dyn Tx, key: &Key) -> StoreResult<i64> {
    let table = key.data_type.table().ok_or(StoreError::KeyType)?;
    let sql = format!("select count(*) from {} where kid = ?", table);
    let len = match tx.query_row(&sql, &[key.id.into()])? {
        Some(row) => row.int(0)?,
        None => 0,
    };
    let now = tx.now();
    tx.execute(
        "update rkey set version = version + 1, mtime = ?, len = ? where id = ?",
        &[now.into(), len.into(), key.id.into()],
    )?;
    Ok(len)
}

/// 删除键的所有数据行，键行保留
pub(crate) fn clear_data(tx: &mut dyn Tx, key: &Key) -> StoreResult<usize> {
    match key.data_type.table() {
        Some(table) => {
            let sql = format!("delete from {} where kid = ?", table);
            tx.execute(&sql, &[key.id.into()])
        }
        None => Ok(0),
    }
}

/// 已删除键的最大版本号
fn version_floor(tx: &mut dyn Tx) -> StoreResult<i64> {
    match tx.query_row("select value from rmeta where name = ?", &[VERSION_FLOOR.into()])? {
        Some(row) => row.int(0),
        None => Ok(0),
    }
}

/// 删除键行前记录其版本号，同名键重建后版本号不会回退
fn raise_version_floor(tx: &mut dyn Tx, version: i64) -> StoreResult<()> {
    tx.execute(
        "update rmeta set value = ? where name = ? and value < ?",
        &[version.into(), VERSION_FLOOR.into(), version.into()],
    )?;
    Ok(())
}

/// 删除键行及其数据
pub(crate) fn purge(tx: &mut dyn Tx, key: &Key) -> StoreResult<()> {
    raise_version_floor(tx, key.version)?;
    clear_data(tx, key)?;
    tx.execute("delete from rkey where id = ?", &[key.id.into()])?;
    Ok(())
}

/// 将相对 TTL 转换为绝对过期时间
pub(crate) fn expire_at(now: i64, ttl: Duration) -> i64 {
    now.saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64)
}

/// 事务内的键操作
pub struct KeyTx<'a> {
    tx: &'a mut dyn Tx,
}

impl<'a> KeyTx<'a> {
    pub fn new(tx: &'a mut dyn Tx) -> Self {
        Self { tx }
    }

    /// 获取键的元信息
    pub fn get(&mut self, name: &str) -> StoreResult<Key> {
        get_live(self.tx, name)?.ok_or(StoreError::NotFound)
    }

    /// 键是否存在
    pub fn exists(&mut self, name: &str) -> StoreResult<bool> {
        Ok(get_live(self.tx, name)?.is_some())
    }

    /// 统计给定键名中存在的个数（重复的键名重复计数）
    pub fn count(&mut self, names: &[&str]) -> StoreResult<usize> {
        let mut n = 0;
        for name in names {
            if get_live(self.tx, name)?.is_some() {
                n += 1;
            }
        }
        Ok(n)
    }

    /// 有效键的总数
    pub fn len(&mut self) -> StoreResult<usize> {
        let sql = format!("select count(*) from rkey where {}", LIVE);
        let now = self.tx.now();
        match self.tx.query_row(&sql, &[now.into()])? {
            Some(row) => Ok(row.int(0)? as usize),
            None => Ok(0),
        }
    }

    /// 返回匹配 glob 模式的所有键
    pub fn keys(&mut self, pattern: &str) -> StoreResult<Vec<Key>> {
        let sql = format!(
            "select {} from rkey where {} and {} order by id",
            KEY_COLUMNS,
            self.tx.dialect().glob_predicate("key"),
            LIVE
        );
        let pattern = self.tx.dialect().translate_pattern(pattern);
        let now = self.tx.now();
        let rows = self.tx.query(&sql, &[pattern.into(), now.into()])?;
        rows.iter().map(key_from_row).collect()
    }

    /// 游标扫描。`data_type` 为 `None` 时不按类型过滤。
    pub fn scan(
        &mut self,
        cursor: i64,
        pattern: &str,
        data_type: Option<DataType>,
        count: usize,
    ) -> StoreResult<ScanResult<Key>> {
        let now = self.tx.now();
        let dialect = self.tx.dialect();
        let pattern = dialect.translate_pattern(pattern);
        let mut params: Vec<SqlValue> = vec![cursor.into(), pattern.into(), now.into()];
        let filter = match data_type {
            Some(t) => {
                params.push(t.code().into());
                format!("and {} and type = ?", LIVE)
            }
            None => format!("and {}", LIVE),
        };
        params.push(page_size(count).into());
        let sql = dialect.scan_query(
            KEY_COLUMNS,
            "rkey",
            "id",
            &dialect.glob_predicate("key"),
            &filter,
        );
        let rows = self.tx.query(&sql, &params)?;
        let keys = rows
            .iter()
            .map(|row| key_from_row(row).map(|k| (k.id, k)))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(ScanResult::from_rows(keys))
    }

    /// 随机返回一个有效键
    pub fn random(&mut self) -> StoreResult<Key> {
        let total = self.len()?;
        if total == 0 {
            return Err(StoreError::NotFound);
        }
        let offset = rand::rng().random_range(0..total);
        let sql = format!(
            "select {} from rkey where {} order by id {}",
            KEY_COLUMNS,
            LIVE,
            self.tx.dialect().limit_offset(Some(1), offset)
        );
        let now = self.tx.now();
        match self.tx.query_row(&sql, &[now.into()])? {
            Some(row) => key_from_row(&row),
            None => Err(StoreError::NotFound),
        }
    }

    /// 设置相对过期时间
    pub fn expire(&mut self, name: &str, ttl: Duration) -> StoreResult<()> {
        let at = expire_at(self.tx.now(), ttl);
        self.expire_at(name, at)
    }

    /// 设置绝对过期时间（Unix毫秒）
    pub fn expire_at(&mut self, name: &str, at: i64) -> StoreResult<()> {
        let key = self.get(name)?;
        let now = self.tx.now();
        self.tx.execute(
            "update rkey set etime = ?, version = version + 1, mtime = ? where id = ?",
            &[at.into(), now.into(), key.id.into()],
        )?;
        Ok(())
    }

    /// 移除过期时间
    pub fn persist(&mut self, name: &str) -> StoreResult<()> {
        let key = self.get(name)?;
        let now = self.tx.now();
        self.tx.execute(
            "update rkey set etime = null, version = version + 1, mtime = ? where id = ?",
            &[now.into(), key.id.into()],
        )?;
        Ok(())
    }

    /// 重命名键。目标键存在且类型不同时返回 `KeyType`；
    /// 否则目标键原有的数据被丢弃。
    pub fn rename(&mut self, name: &str, new_name: &str) -> StoreResult<()> {
        let key = self.get(name)?;
        if name == new_name {
            return Ok(());
        }
        if let Some(target) = lookup(self.tx, new_name)? {
            if target.is_live(self.tx.now()) && target.data_type != key.data_type {
                return Err(StoreError::KeyType);
            }
            purge(self.tx, &target)?;
        }
        self.move_row(&key, new_name)
    }

    /// 仅当目标键不存在时重命名，返回是否重命名
    pub fn rename_nx(&mut self, name: &str, new_name: &str) -> StoreResult<bool> {
        let key = self.get(name)?;
        if let Some(target) = lookup(self.tx, new_name)? {
            if target.is_live(self.tx.now()) {
                return Ok(false);
            }
            purge(self.tx, &target)?;
        }
        self.move_row(&key, new_name)?;
        Ok(true)
    }

    fn move_row(&mut self, key: &Key, new_name: &str) -> StoreResult<()> {
        let now = self.tx.now();
        self.tx.execute(
            "update rkey set key = ?, version = version + 1, mtime = ? where id = ?",
            &[new_name.into(), now.into(), key.id.into()],
        )?;
        Ok(())
    }

    /// 删除键，返回删除的有效键个数。同名的过期键一并回收。
    pub fn delete(&mut self, names: &[&str]) -> StoreResult<usize> {
        let now = self.tx.now();
        let mut deleted = 0;
        for name in names {
            if let Some(key) = lookup(self.tx, name)? {
                if key.is_live(now) {
                    deleted += 1;
                }
                purge(self.tx, &key)?;
            }
        }
        Ok(deleted)
    }

    /// 物理删除最多 `n` 个已过期的键（`n = 0` 不限数量），返回删除数
    pub fn delete_expired(&mut self, n: usize) -> StoreResult<usize> {
        let limit = if n == 0 { None } else { Some(n) };
        let sql = format!(
            "select {} from rkey where etime <= ? order by etime {}",
            KEY_COLUMNS,
            self.tx.dialect().limit_offset(limit, 0)
        );
        let now = self.tx.now();
        let rows = self.tx.query(&sql, &[now.into()])?;
        let keys = rows
            .iter()
            .map(key_from_row)
            .collect::<StoreResult<Vec<_>>>()?;
        for key in &keys {
            purge(self.tx, key)?;
        }
        Ok(keys.len())
    }

    /// 删除所有键
    pub fn delete_all(&mut self) -> StoreResult<()> {
        if let Some(row) = self.tx.query_row("select max(version) from rkey", &[])? {
            if let Some(version) = row.opt_int(0)? {
                raise_version_floor(self.tx, version)?;
            }
        }
        for table in ["rstring", "rhash", "rlist", "rset", "rzset", "rkey"] {
            self.tx.execute(&format!("delete from {}", table), &[])?;
        }
        Ok(())
    }
}

/// 键存储
pub struct KeyStore<T: Transactor> {
    db: Arc<T>,
}

impl<T: Transactor> KeyStore<T> {
    pub fn new(db: Arc<T>) -> Self {
        Self { db }
    }

    /// 获取键的元信息，不存在返回 `NotFound`
    pub fn get(&self, name: &str) -> StoreResult<Key> {
        self.db.view(|tx| KeyTx::new(tx).get(name))
    }

    pub fn exists(&self, name: &str) -> StoreResult<bool> {
        self.db.view(|tx| KeyTx::new(tx).exists(name))
    }

    pub fn count(&self, names: &[&str]) -> StoreResult<usize> {
        self.db.view(|tx| KeyTx::new(tx).count(names))
    }

    pub fn len(&self) -> StoreResult<usize> {
        self.db.view(|tx| KeyTx::new(tx).len())
    }

    pub fn keys(&self, pattern: &str) -> StoreResult<Vec<Key>> {
        self.db.view(|tx| KeyTx::new(tx).keys(pattern))
    }

    pub fn scan(
        &self,
        cursor: i64,
        pattern: &str,
        data_type: Option<DataType>,
        count: usize,
    ) -> StoreResult<ScanResult<Key>> {
        self.db
            .view(|tx| KeyTx::new(tx).scan(cursor, pattern, data_type, count))
    }

    /// 逐页遍历匹配的键
    pub fn scanner<'s>(
        &'s self,
        pattern: &'s str,
        data_type: Option<DataType>,
        page_size: usize,
    ) -> Scanner<'s, Key> {
        Scanner::new(page_size, move |cursor, count| {
            self.scan(cursor, pattern, data_type, count)
        })
    }

    pub fn random(&self) -> StoreResult<Key> {
        self.db.view(|tx| KeyTx::new(tx).random())
    }

    pub fn expire(&self, name: &str, ttl: Duration) -> StoreResult<()> {
        self.db.update(|tx| KeyTx::new(tx).expire(name, ttl))
    }

    pub fn expire_at(&self, name: &str, at: i64) -> StoreResult<()> {
        self.db.update(|tx| KeyTx::new(tx).expire_at(name, at))
    }

    pub fn persist(&self, name: &str) -> StoreResult<()> {
        self.db.update(|tx| KeyTx::new(tx).persist(name))
    }

    pub fn rename(&self, name: &str, new_name: &str) -> StoreResult<()> {
        self.db.update(|tx| KeyTx::new(tx).rename(name, new_name))
    }

    pub fn rename_nx(&self, name: &str, new_name: &str) -> StoreResult<bool> {
        self.db.update(|tx| KeyTx::new(tx).rename_nx(name, new_name))
    }

    pub fn delete(&self, names: &[&str]) -> StoreResult<usize> {
        self.db.update(|tx| KeyTx::new(tx).delete(names))
    }

    pub fn delete_expired(&self, n: usize) -> StoreResult<usize> {
        self.db.update(|tx| KeyTx::new(tx).delete_expired(n))
    }

    pub fn delete_all(&self) -> StoreResult<()> {
        self.db.update(|tx| KeyTx::new(tx).delete_all())
    }
}
