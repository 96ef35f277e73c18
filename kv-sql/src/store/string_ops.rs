use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::data_types::{DataType, Value};
use super::error::{StoreError, StoreResult};
use super::key_ops::{ensure, expire_at, get_live, get_typed, get_typed_or_none, touch, Ttl};
use super::transactor::{Transactor, Tx};

/// 写入时的过期时间处理
#[derive(Debug, Clone, Copy, PartialEq, Default)]
enum Expire {
    /// 清除过期时间
    #[default]
    Persist,
    /// 相对过期时间
    After(Duration),
    /// 绝对过期时间（Unix毫秒）
    At(i64),
    /// 保留原有过期时间（仅更新值）
    Keep,
}

/// `set_with` 的选项
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SetOptions {
    expire: Expire,
    if_exists: bool,
    if_not_exists: bool,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置相对过期时间
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.expire = Expire::After(ttl);
        self
    }

    /// 设置绝对过期时间（Unix毫秒）
    pub fn at(mut self, at: i64) -> Self {
        self.expire = Expire::At(at);
        self
    }

    /// 保留原有过期时间
    pub fn keep_ttl(mut self) -> Self {
        self.expire = Expire::Keep;
        self
    }

    /// 仅当键存在时写入
    pub fn if_exists(mut self) -> Self {
        self.if_exists = true;
        self
    }

    /// 仅当键不存在时写入
    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }
}

/// `set_with` 的结果
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SetOut {
    /// 写入前的值
    pub prev: Option<Value>,
    /// 是否新建了键
    pub created: bool,
    /// 是否覆盖了已有的值
    pub updated: bool,
}

fn read_value(tx: &mut dyn Tx, key_id: i64) -> StoreResult<Option<Value>> {
    match tx.query_row("select value from rstring where kid = ?", &[key_id.into()])? {
        Some(row) => Ok(Some(row.value(0)?)),
        None => Ok(None),
    }
}

fn write_value(tx: &mut dyn Tx, key_id: i64, value: &Value) -> StoreResult<()> {
    tx.execute(
        "insert into rstring (kid, value) values (?, ?) \
         on conflict (kid) do update set value = excluded.value",
        &[key_id.into(), value.into()],
    )?;
    Ok(())
}

/// 事务内的字符串操作
pub struct StringTx<'a> {
    tx: &'a mut dyn Tx,
}

impl<'a> StringTx<'a> {
    pub fn new(tx: &'a mut dyn Tx) -> Self {
        Self { tx }
    }

    /// 获取值，键不存在或不是字符串返回 `NotFound`
    pub fn get(&mut self, name: &str) -> StoreResult<Value> {
        let key = get_typed_or_none(self.tx, name, DataType::String)?
            .ok_or(StoreError::NotFound)?;
        read_value(self.tx, key.id)?.ok_or(StoreError::NotFound)
    }

    /// 批量获取，结果中只包含存在的字符串键
    pub fn get_many(&mut self, names: &[&str]) -> StoreResult<HashMap<String, Value>> {
        let mut out = HashMap::with_capacity(names.len());
        for name in names {
            if let Some(key) = get_typed_or_none(self.tx, name, DataType::String)? {
                if let Some(value) = read_value(self.tx, key.id)? {
                    out.insert(name.to_string(), value);
                }
            }
        }
        Ok(out)
    }

    /// 按选项写入
    pub fn set_with(
        &mut self,
        name: &str,
        value: impl Into<Value>,
        opts: SetOptions,
    ) -> StoreResult<SetOut> {
        let value = value.into();
        let now = self.tx.now();

        // 仅在不存在时写入：任何类型的有效键都使写入不发生
        if opts.if_not_exists {
            if let Some(key) = get_live(self.tx, name)? {
                let prev = match key.data_type {
                    DataType::String => read_value(self.tx, key.id)?,
                    _ => None,
                };
                return Ok(SetOut {
                    prev,
                    created: false,
                    updated: false,
                });
            }
        }

        let existing = get_typed(self.tx, name, DataType::String)?;
        let prev = match &existing {
            Some(key) => read_value(self.tx, key.id)?,
            None => None,
        };

        if (opts.if_not_exists && existing.is_some()) || (opts.if_exists && existing.is_none()) {
            return Ok(SetOut {
                prev,
                created: false,
                updated: false,
            });
        }

        let ttl = match opts.expire {
            Expire::Persist => Ttl::Set(None),
            Expire::After(d) => Ttl::Set(Some(expire_at(now, d))),
            Expire::At(at) => Ttl::Set(Some(at)),
            Expire::Keep => Ttl::Keep,
        };
        let key = ensure(self.tx, name, DataType::String, ttl)?;
        write_value(self.tx, key.id, &value)?;
        let created = existing.is_none();
        touch(self.tx, key.id, if created { 1 } else { 0 })?;

        Ok(SetOut {
            prev,
            created,
            updated: !created,
        })
    }

    /// 写入值并清除过期时间
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> StoreResult<()> {
        self.set_with(name, value, SetOptions::new()).map(|_| ())
    }

    /// 写入值并设置过期时间
    pub fn set_expires(
        &mut self,
        name: &str,
        value: impl Into<Value>,
        ttl: Duration,
    ) -> StoreResult<()> {
        self.set_with(name, value, SetOptions::new().ttl(ttl))
            .map(|_| ())
    }

    /// 仅当键不存在时写入，返回是否写入
    pub fn set_not_exists(
        &mut self,
        name: &str,
        value: impl Into<Value>,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let mut opts = SetOptions::new().if_not_exists();
        if let Some(ttl) = ttl {
            opts = opts.ttl(ttl);
        }
        Ok(self.set_with(name, value, opts)?.created)
    }

    /// 仅当键存在时写入，返回是否写入
    pub fn set_exists(
        &mut self,
        name: &str,
        value: impl Into<Value>,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let mut opts = SetOptions::new().if_exists();
        if let Some(ttl) = ttl {
            opts = opts.ttl(ttl);
        }
        Ok(self.set_with(name, value, opts)?.updated)
    }

    /// 写入新值并返回旧值
    pub fn get_set(
        &mut self,
        name: &str,
        value: impl Into<Value>,
        ttl: Option<Duration>,
    ) -> StoreResult<Option<Value>> {
        let opts = match ttl {
            Some(ttl) => SetOptions::new().ttl(ttl),
            None => SetOptions::new(),
        };
        Ok(self.set_with(name, value, opts)?.prev)
    }

    /// 批量写入。任一键类型不符时整体失败，不做任何修改。
    pub fn set_many<K, V>(&mut self, items: impl IntoIterator<Item = (K, V)>) -> StoreResult<()>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let items: Vec<(K, Value)> = items.into_iter().map(|(k, v)| (k, v.into())).collect();
        for (name, _) in &items {
            get_typed(self.tx, name.as_ref(), DataType::String)?;
        }
        for (name, value) in items {
            self.set(name.as_ref(), value)?;
        }
        Ok(())
    }

    /// 仅当所有键都不存在时批量写入，返回是否写入
    pub fn set_many_nx<K, V>(
        &mut self,
        items: impl IntoIterator<Item = (K, V)>,
    ) -> StoreResult<bool>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let items: Vec<(K, Value)> = items.into_iter().map(|(k, v)| (k, v.into())).collect();
        for (name, _) in &items {
            if get_live(self.tx, name.as_ref())?.is_some() {
                return Ok(false);
            }
        }
        for (name, value) in items {
            self.set(name.as_ref(), value)?;
        }
        Ok(true)
    }

    /// 整数自增，键不存在时视为 0；保留过期时间
    pub fn incr(&mut self, name: &str, delta: i64) -> StoreResult<i64> {
        let existing = get_typed(self.tx, name, DataType::String)?;
        let current = match &existing {
            Some(key) => match read_value(self.tx, key.id)? {
                Some(v) => v.to_i64()?,
                None => 0,
            },
            None => 0,
        };
        let next = current.checked_add(delta).ok_or(StoreError::ValueType)?;
        self.store_number(name, existing.is_none(), Value::from(next))?;
        Ok(next)
    }

    /// 浮点自增，键不存在时视为 0；保留过期时间
    pub fn incr_float(&mut self, name: &str, delta: f64) -> StoreResult<f64> {
        let existing = get_typed(self.tx, name, DataType::String)?;
        let current = match &existing {
            Some(key) => match read_value(self.tx, key.id)? {
                Some(v) => v.to_f64()?,
                None => 0.0,
            },
            None => 0.0,
        };
        let next = current + delta;
        if !next.is_finite() {
            return Err(StoreError::ValueType);
        }
        self.store_number(name, existing.is_none(), Value::from(next))?;
        Ok(next)
    }

    fn store_number(&mut self, name: &str, created: bool, value: Value) -> StoreResult<()> {
        let key = ensure(self.tx, name, DataType::String, Ttl::Keep)?;
        write_value(self.tx, key.id, &value)?;
        touch(self.tx, key.id, if created { 1 } else { 0 })
    }
}

/// 字符串存储
pub struct StringStore<T: Transactor> {
    db: Arc<T>,
}

/// `StringStore::set_with` 返回的写入命令
pub struct SetCmd<'s, T: Transactor> {
    store: &'s StringStore<T>,
    name: String,
    value: Value,
    opts: SetOptions,
}

impl<T: Transactor> SetCmd<'_, T> {
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.opts = self.opts.ttl(ttl);
        self
    }

    pub fn at(mut self, at: i64) -> Self {
        self.opts = self.opts.at(at);
        self
    }

    pub fn keep_ttl(mut self) -> Self {
        self.opts = self.opts.keep_ttl();
        self
    }

    pub fn if_exists(mut self) -> Self {
        self.opts = self.opts.if_exists();
        self
    }

    pub fn if_not_exists(mut self) -> Self {
        self.opts = self.opts.if_not_exists();
        self
    }

    pub fn run(self) -> StoreResult<SetOut> {
        let SetCmd {
            store,
            name,
            value,
            opts,
        } = self;
        store
            .db
            .update(|tx| StringTx::new(tx).set_with(&name, value, opts))
    }
}

impl<T: Transactor> StringStore<T> {
    pub fn new(db: Arc<T>) -> Self {
        Self { db }
    }

    pub fn get(&self, name: &str) -> StoreResult<Value> {
        self.db.view(|tx| StringTx::new(tx).get(name))
    }

    pub fn get_many(&self, names: &[&str]) -> StoreResult<HashMap<String, Value>> {
        self.db.view(|tx| StringTx::new(tx).get_many(names))
    }

    /// 构造带选项的写入命令
    pub fn set_with(&self, name: &str, value: impl Into<Value>) -> SetCmd<'_, T> {
        SetCmd {
            store: self,
            name: name.to_string(),
            value: value.into(),
            opts: SetOptions::new(),
        }
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) -> StoreResult<()> {
        let value = value.into();
        self.db.update(|tx| StringTx::new(tx).set(name, value))
    }

    pub fn set_expires(&self, name: &str, value: impl Into<Value>, ttl: Duration) -> StoreResult<()> {
        let value = value.into();
        self.db
            .update(|tx| StringTx::new(tx).set_expires(name, value, ttl))
    }

    pub fn set_not_exists(
        &self,
        name: &str,
        value: impl Into<Value>,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let value = value.into();
        self.db
            .update(|tx| StringTx::new(tx).set_not_exists(name, value, ttl))
    }

    pub fn set_exists(
        &self,
        name: &str,
        value: impl Into<Value>,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let value = value.into();
        self.db
            .update(|tx| StringTx::new(tx).set_exists(name, value, ttl))
    }

    pub fn get_set(
        &self,
        name: &str,
        value: impl Into<Value>,
        ttl: Option<Duration>,
    ) -> StoreResult<Option<Value>> {
        let value = value.into();
        self.db
            .update(|tx| StringTx::new(tx).get_set(name, value, ttl))
    }

    pub fn set_many<K, V>(&self, items: impl IntoIterator<Item = (K, V)>) -> StoreResult<()>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let items: Vec<(K, Value)> = items.into_iter().map(|(k, v)| (k, v.into())).collect();
        self.db.update(|tx| StringTx::new(tx).set_many(items))
    }

    pub fn set_many_nx<K, V>(&self, items: impl IntoIterator<Item = (K, V)>) -> StoreResult<bool>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let items: Vec<(K, Value)> = items.into_iter().map(|(k, v)| (k, v.into())).collect();
        self.db.update(|tx| StringTx::new(tx).set_many_nx(items))
    }

    pub fn incr(&self, name: &str, delta: i64) -> StoreResult<i64> {
        self.db.update(|tx| StringTx::new(tx).incr(name, delta))
    }

    pub fn incr_float(&self, name: &str, delta: f64) -> StoreResult<f64> {
        self.db.update(|tx| StringTx::new(tx).incr_float(name, delta))
    }
}
