use std::collections::HashMap;
use std::sync::Arc;

use super::data_types::{DataType, HashItem, Value};
use super::error::{StoreError, StoreResult};
use super::key_ops::{ensure, get_typed, get_typed_or_none, touch, Ttl, LIVE};
use super::scan::{page_size, ScanResult, Scanner};
use super::transactor::{Transactor, Tx};

fn read_field(tx: &mut dyn Tx, key_id: i64, field: &str) -> StoreResult<Option<Value>> {
    match tx.query_row(
        "select value from rhash where kid = ? and field = ?",
        &[key_id.into(), field.into()],
    )? {
        Some(row) => Ok(Some(row.value(0)?)),
        None => Ok(None),
    }
}

/// 写入字段，返回字段是否为新建
fn write_field(tx: &mut dyn Tx, key_id: i64, field: &str, value: &Value) -> StoreResult<bool> {
    let existed = read_field(tx, key_id, field)?.is_some();
    tx.execute(
        "insert into rhash (kid, field, value) values (?, ?, ?) \
         on conflict (kid, field) do update set value = excluded.value",
        &[key_id.into(), field.into(), value.into()],
    )?;
    Ok(!existed)
}

/// 事务内的哈希表操作
pub struct HashTx<'a> {
    tx: &'a mut dyn Tx,
}

impl<'a> HashTx<'a> {
    pub fn new(tx: &'a mut dyn Tx) -> Self {
        Self { tx }
    }

    /// 获取字段值，键或字段不存在返回 `NotFound`
    pub fn get(&mut self, name: &str, field: &str) -> StoreResult<Value> {
        let key = get_typed_or_none(self.tx, name, DataType::Hash)?.ok_or(StoreError::NotFound)?;
        read_field(self.tx, key.id, field)?.ok_or(StoreError::NotFound)
    }

    /// 批量获取字段，结果中只包含存在的字段
    pub fn get_many(&mut self, name: &str, fields: &[&str]) -> StoreResult<HashMap<String, Value>> {
        let mut out = HashMap::new();
        if let Some(key) = get_typed_or_none(self.tx, name, DataType::Hash)? {
            for field in fields {
                if let Some(value) = read_field(self.tx, key.id, field)? {
                    out.insert(field.to_string(), value);
                }
            }
        }
        Ok(out)
    }

    pub fn exists(&mut self, name: &str, field: &str) -> StoreResult<bool> {
        match get_typed_or_none(self.tx, name, DataType::Hash)? {
            Some(key) => Ok(read_field(self.tx, key.id, field)?.is_some()),
            None => Ok(false),
        }
    }

    fn rows(&mut self, name: &str) -> StoreResult<Vec<(String, Value)>> {
        let key = match get_typed_or_none(self.tx, name, DataType::Hash)? {
            Some(key) => key,
            None => return Ok(Vec::new()),
        };
        let rows = self.tx.query(
            "select field, value from rhash where kid = ? order by id",
            &[key.id.into()],
        )?;
        rows.iter()
            .map(|row| Ok((row.text(0)?, row.value(1)?)))
            .collect()
    }

    /// 所有字段和值
    pub fn items(&mut self, name: &str) -> StoreResult<HashMap<String, Value>> {
        Ok(self.rows(name)?.into_iter().collect())
    }

    pub fn fields(&mut self, name: &str) -> StoreResult<Vec<String>> {
        Ok(self.rows(name)?.into_iter().map(|(f, _)| f).collect())
    }

    pub fn values(&mut self, name: &str) -> StoreResult<Vec<Value>> {
        Ok(self.rows(name)?.into_iter().map(|(_, v)| v).collect())
    }

    /// 字段数量
    pub fn len(&mut self, name: &str) -> StoreResult<usize> {
        Ok(get_typed_or_none(self.tx, name, DataType::Hash)?
            .map_or(0, |k| k.len.max(0) as usize))
    }

    /// 按字段名模式扫描
    pub fn scan(
        &mut self,
        name: &str,
        cursor: i64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<ScanResult<HashItem>> {
        let now = self.tx.now();
        let dialect = self.tx.dialect();
        let filter = format!("and rkey.key = ? and rkey.type = ? and {}", LIVE);
        let sql = dialect.scan_query(
            "rhash.id, rhash.field, rhash.value",
            "rhash join rkey on rhash.kid = rkey.id",
            "rhash.id",
            &dialect.glob_predicate("rhash.field"),
            &filter,
        );
        let pattern = dialect.translate_pattern(pattern);
        let rows = self.tx.query(
            &sql,
            &[
                cursor.into(),
                pattern.into(),
                name.into(),
                DataType::Hash.code().into(),
                now.into(),
                page_size(count).into(),
            ],
        )?;
        let items = rows
            .iter()
            .map(|row| {
                Ok((
                    row.int(0)?,
                    HashItem {
                        field: row.text(1)?,
                        value: row.value(2)?,
                    },
                ))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(ScanResult::from_rows(items))
    }

    /// 写入字段，返回字段是否为新建
    pub fn set(&mut self, name: &str, field: &str, value: impl Into<Value>) -> StoreResult<bool> {
        let value = value.into();
        let key = ensure(self.tx, name, DataType::Hash, Ttl::Keep)?;
        let created = write_field(self.tx, key.id, field, &value)?;
        touch(self.tx, key.id, created as i64)?;
        Ok(created)
    }

    /// 仅当字段不存在时写入，返回是否写入
    pub fn set_not_exists(
        &mut self,
        name: &str,
        field: &str,
        value: impl Into<Value>,
    ) -> StoreResult<bool> {
        if let Some(key) = get_typed(self.tx, name, DataType::Hash)? {
            if read_field(self.tx, key.id, field)?.is_some() {
                return Ok(false);
            }
        }
        self.set(name, field, value)
    }

    /// 批量写入字段，返回 `(新建的字段数, 更新的字段数)`
    pub fn set_many<F, V>(
        &mut self,
        name: &str,
        items: impl IntoIterator<Item = (F, V)>,
    ) -> StoreResult<(usize, usize)>
    where
        F: AsRef<str>,
        V: Into<Value>,
    {
        let items: Vec<(F, Value)> = items.into_iter().map(|(f, v)| (f, v.into())).collect();
        if items.is_empty() {
            get_typed(self.tx, name, DataType::Hash)?;
            return Ok((0, 0));
        }
        let key = ensure(self.tx, name, DataType::Hash, Ttl::Keep)?;
        let (mut created, mut updated) = (0, 0);
        for (field, value) in &items {
            if write_field(self.tx, key.id, field.as_ref(), value)? {
                created += 1;
            } else {
                updated += 1;
            }
        }
        touch(self.tx, key.id, created as i64)?;
        Ok((created, updated))
    }

    /// 字段整数自增，字段不存在时视为 0
    pub fn incr(&mut self, name: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let current = match get_typed(self.tx, name, DataType::Hash)? {
            Some(key) => read_field(self.tx, key.id, field)?,
            None => None,
        };
        let current = match current {
            Some(v) => v.to_i64()?,
            None => 0,
        };
        let next = current.checked_add(delta).ok_or(StoreError::ValueType)?;
        self.set(name, field, next)?;
        Ok(next)
    }

    /// 字段浮点自增，字段不存在时视为 0
    pub fn incr_float(&mut self, name: &str, field: &str, delta: f64) -> StoreResult<f64> {
        let current = match get_typed(self.tx, name, DataType::Hash)? {
            Some(key) => read_field(self.tx, key.id, field)?,
            None => None,
        };
        let current = match current {
            Some(v) => v.to_f64()?,
            None => 0.0,
        };
        let next = current + delta;
        if !next.is_finite() {
            return Err(StoreError::ValueType);
        }
        self.set(name, field, next)?;
        Ok(next)
    }

    /// 删除字段，返回删除数。键本身保留，即使已没有字段。
    pub fn delete(&mut self, name: &str, fields: &[&str]) -> StoreResult<usize> {
        let key = match get_typed(self.tx, name, DataType::Hash)? {
            Some(key) => key,
            None => return Ok(0),
        };
        let mut deleted = 0;
        for field in fields {
            deleted += self.tx.execute(
                "delete from rhash where kid = ? and field = ?",
                &[key.id.into(), (*field).into()],
            )?;
        }
        if deleted > 0 {
            touch(self.tx, key.id, -(deleted as i64))?;
        }
        Ok(deleted)
    }
}

/// 哈希表存储
pub struct HashStore<T: Transactor> {
    db: Arc<T>,
}

impl<T: Transactor> HashStore<T> {
    pub fn new(db: Arc<T>) -> Self {
        Self { db }
    }

    pub fn get(&self, name: &str, field: &str) -> StoreResult<Value> {
        self.db.view(|tx| HashTx::new(tx).get(name, field))
    }

    pub fn get_many(&self, name: &str, fields: &[&str]) -> StoreResult<HashMap<String, Value>> {
        self.db.view(|tx| HashTx::new(tx).get_many(name, fields))
    }

    pub fn exists(&self, name: &str, field: &str) -> StoreResult<bool> {
        self.db.view(|tx| HashTx::new(tx).exists(name, field))
    }

    pub fn items(&self, name: &str) -> StoreResult<HashMap<String, Value>> {
        self.db.view(|tx| HashTx::new(tx).items(name))
    }

    pub fn fields(&self, name: &str) -> StoreResult<Vec<String>> {
        self.db.view(|tx| HashTx::new(tx).fields(name))
    }

    pub fn values(&self, name: &str) -> StoreResult<Vec<Value>> {
        self.db.view(|tx| HashTx::new(tx).values(name))
    }

    pub fn len(&self, name: &str) -> StoreResult<usize> {
        self.db.view(|tx| HashTx::new(tx).len(name))
    }

    pub fn scan(
        &self,
        name: &str,
        cursor: i64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<ScanResult<HashItem>> {
        self.db
            .view(|tx| HashTx::new(tx).scan(name, cursor, pattern, count))
    }

    /// 逐页遍历字段
    pub fn scanner<'s>(
        &'s self,
        name: &'s str,
        pattern: &'s str,
        page_size: usize,
    ) -> Scanner<'s, HashItem> {
        Scanner::new(page_size, move |cursor, count| {
            self.scan(name, cursor, pattern, count)
        })
    }

    pub fn set(&self, name: &str, field: &str, value: impl Into<Value>) -> StoreResult<bool> {
        let value = value.into();
        self.db.update(|tx| HashTx::new(tx).set(name, field, value))
    }

    pub fn set_not_exists(
        &self,
        name: &str,
        field: &str,
        value: impl Into<Value>,
    ) -> StoreResult<bool> {
        let value = value.into();
        self.db
            .update(|tx| HashTx::new(tx).set_not_exists(name, field, value))
    }

    pub fn set_many<F, V>(
        &self,
        name: &str,
        items: impl IntoIterator<Item = (F, V)>,
    ) -> StoreResult<(usize, usize)>
    where
        F: AsRef<str>,
        V: Into<Value>,
    {
        let items: Vec<(F, Value)> = items.into_iter().map(|(f, v)| (f, v.into())).collect();
        self.db.update(|tx| HashTx::new(tx).set_many(name, items))
    }

    pub fn incr(&self, name: &str, field: &str, delta: i64) -> StoreResult<i64> {
        self.db.update(|tx| HashTx::new(tx).incr(name, field, delta))
    }

    pub fn incr_float(&self, name: &str, field: &str, delta: f64) -> StoreResult<f64> {
        self.db
            .update(|tx| HashTx::new(tx).incr_float(name, field, delta))
    }

    pub fn delete(&self, name: &str, fields: &[&str]) -> StoreResult<usize> {
        self.db.update(|tx| HashTx::new(tx).delete(name, fields))
    }
}
