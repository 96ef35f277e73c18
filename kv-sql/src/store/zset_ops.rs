//! 有序集合存储
//!
//! 规范顺序为 `(score asc, elem asc)`，降序时两者同时反转。
//! 排名从 0 开始；按排名的范围查询和删除不接受负数排名。

use std::sync::Arc;

use super::data_types::{DataType, Key, Value, ZItem};
use super::error::{StoreError, StoreResult};
use super::key_ops::{
    clear_data, ensure, get_typed, get_typed_or_none, touch, touch_recount, Ttl, LIVE,
};
use super::scan::{page_size, ScanResult, Scanner};
use super::transactor::{Row, SqlValue, Transactor, Tx};

/// 集合运算时合并分数的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregate {
    #[default]
    Sum,
    Min,
    Max,
}

impl Aggregate {
    fn sql(&self) -> &'static str {
        match self {
            Aggregate::Sum => "sum",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum By {
    Rank(i64, i64),
    Score(f64, f64),
}

/// 范围查询选项
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeOptions {
    by: By,
    desc: bool,
    offset: usize,
    count: Option<usize>,
}

impl Default for RangeOptions {
    fn default() -> Self {
        RangeOptions {
            by: By::Rank(0, i64::MAX),
            desc: false,
            offset: 0,
            count: None,
        }
    }
}

impl RangeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按排名取 `start..=stop`
    pub fn by_rank(mut self, start: i64, stop: i64) -> Self {
        self.by = By::Rank(start, stop);
        self
    }

    /// 按分数取 `[min, max]`
    pub fn by_score(mut self, min: f64, max: f64) -> Self {
        self.by = By::Score(min, max);
        self
    }

    /// 降序
    pub fn desc(mut self) -> Self {
        self.desc = true;
        self
    }

    /// 跳过前 `n` 个结果（仅按分数查询）
    pub fn offset(mut self, n: usize) -> Self {
        self.offset = n;
        self
    }

    /// 最多返回 `n` 个结果（仅按分数查询）
    pub fn count(mut self, n: usize) -> Self {
        self.count = Some(n);
        self
    }
}

fn order_by(desc: bool) -> &'static str {
    if desc {
        "order by score desc, elem desc"
    } else {
        "order by score asc, elem asc"
    }
}

fn zitem(row: &Row) -> StoreResult<ZItem> {
    Ok(ZItem {
        elem: row.value(0)?,
        score: row.real(1)?,
    })
}

/// 将排名区间裁剪到 `0..len`，区间为空返回 `None`
fn clamp_ranks(start: i64, stop: i64, len: i64) -> Option<(usize, usize)> {
    if start < 0 || stop < 0 || start > stop || start >= len {
        return None;
    }
    let stop = stop.min(len - 1);
    Some((start as usize, (stop - start + 1) as usize))
}

fn read_score(tx: &mut dyn Tx, key_id: i64, elem: &Value) -> StoreResult<Option<f64>> {
    match tx.query_row(
        "select score from rzset where kid = ? and elem = ?",
        &[key_id.into(), elem.into()],
    )? {
        Some(row) => Ok(Some(row.real(0)?)),
        None => Ok(None),
    }
}

/// 写入分数，返回是否为新元素
fn write_score(tx: &mut dyn Tx, key_id: i64, elem: &Value, score: f64) -> StoreResult<bool> {
    if score.is_nan() {
        return Err(StoreError::ValueType);
    }
    let existed = read_score(tx, key_id, elem)?.is_some();
    tx.execute(
        "insert into rzset (kid, elem, score) values (?, ?, ?) \
         on conflict (kid, elem) do update set score = excluded.score",
        &[key_id.into(), elem.into(), score.into()],
    )?;
    Ok(!existed)
}

fn range(tx: &mut dyn Tx, key: &Key, opts: &RangeOptions) -> StoreResult<Vec<ZItem>> {
    let rows = match opts.by {
        By::Rank(start, stop) => {
            let (offset, limit) = match clamp_ranks(start, stop, key.len) {
                Some(r) => r,
                None => return Ok(Vec::new()),
            };
            let sql = format!(
                "select elem, score from rzset where kid = ? {} {}",
                order_by(opts.desc),
                tx.dialect().limit_offset(Some(limit), offset)
            );
            tx.query(&sql, &[key.id.into()])?
        }
        By::Score(min, max) => {
            let sql = format!(
                "select elem, score from rzset where kid = ? and score >= ? and score <= ? {} {}",
                order_by(opts.desc),
                tx.dialect().limit_offset(opts.count, opts.offset)
            );
            tx.query(&sql, &[key.id.into(), min.into(), max.into()])?
        }
    };
    rows.iter().map(zitem).collect()
}

fn source_ids(tx: &mut dyn Tx, names: &[&str]) -> StoreResult<Vec<Option<i64>>> {
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        ids.push(get_typed_or_none(tx, name, DataType::SortedSet)?.map(|k| k.id));
    }
    Ok(ids)
}

/// 按 `aggregate` 合并各集合中的分数。
/// `all` 为真时只保留出现在每个集合中的元素（交集），否则取并集。
/// 重复的键只计一次。
fn combine(tx: &mut dyn Tx, names: &[&str], aggregate: Aggregate, all: bool) -> StoreResult<Vec<ZItem>> {
    let ids = source_ids(tx, names)?;
    if all && ids.iter().any(Option::is_none) {
        return Ok(Vec::new());
    }
    let mut ids: Vec<i64> = ids.into_iter().flatten().collect();
    ids.sort_unstable();
    ids.dedup();
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let having = if all { "having count(distinct kid) = ?" } else { "" };
    let sql = format!(
        "select elem, {}(score) as agg from rzset where kid in ({}) \
         group by elem {} order by agg asc, elem asc",
        aggregate.sql(),
        tx.dialect().placeholders(ids.len()),
        having
    );
    let n = ids.len();
    let mut params: Vec<SqlValue> = ids.into_iter().map(SqlValue::from).collect();
    if all {
        params.push(n.into());
    }
    let rows = tx.query(&sql, &params)?;
    rows.iter().map(zitem).collect()
}

/// 用 `items` 覆盖目标有序集合，返回结果大小
fn store_into(tx: &mut dyn Tx, dest: &str, items: &[ZItem]) -> StoreResult<usize> {
    let key = ensure(tx, dest, DataType::SortedSet, Ttl::Set(None))?;
    clear_data(tx, &key)?;
    for item in items {
        write_score(tx, key.id, &item.elem, item.score)?;
    }
    Ok(touch_recount(tx, &key)? as usize)
}

/// 事务内的有序集合操作
pub struct ZSetTx<'a> {
    tx: &'a mut dyn Tx,
}

impl<'a> ZSetTx<'a> {
    pub fn new(tx: &'a mut dyn Tx) -> Self {
        Self { tx }
    }

    fn zset(&mut self, name: &str) -> StoreResult<Option<Key>> {
        get_typed_or_none(self.tx, name, DataType::SortedSet)
    }

    /// 添加或更新元素，返回是否为新元素
    pub fn add(&mut self, name: &str, elem: impl Into<Value>, score: f64) -> StoreResult<bool> {
        Ok(self.add_many(name, [(elem.into(), score)])? == 1)
    }

    /// 批量添加或更新元素，返回新增的元素个数
    pub fn add_many<V: Into<Value>>(
        &mut self,
        name: &str,
        items: impl IntoIterator<Item = (V, f64)>,
    ) -> StoreResult<usize> {
        let items: Vec<(Value, f64)> = items.into_iter().map(|(e, s)| (e.into(), s)).collect();
        if items.iter().any(|(_, s)| s.is_nan()) {
            return Err(StoreError::ValueType);
        }
        if items.is_empty() {
            get_typed(self.tx, name, DataType::SortedSet)?;
            return Ok(0);
        }
        let key = ensure(self.tx, name, DataType::SortedSet, Ttl::Keep)?;
        let mut created = 0;
        for (elem, score) in &items {
            if write_score(self.tx, key.id, elem, *score)? {
                created += 1;
            }
        }
        touch(self.tx, key.id, created as i64)?;
        Ok(created)
    }

    /// 分数在 `[min, max]` 内的元素个数
    pub fn count(&mut self, name: &str, min: f64, max: f64) -> StoreResult<usize> {
        let key = match self.zset(name)? {
            Some(key) => key,
            None => return Ok(0),
        };
        match self.tx.query_row(
            "select count(*) from rzset where kid = ? and score >= ? and score <= ?",
            &[key.id.into(), min.into(), max.into()],
        )? {
            Some(row) => Ok(row.int(0)? as usize),
            None => Ok(0),
        }
    }

    /// 元素的分数，键或元素不存在返回 `NotFound`
    pub fn get_score(&mut self, name: &str, elem: impl Into<Value>) -> StoreResult<f64> {
        let elem = elem.into();
        let key = self.zset(name)?.ok_or(StoreError::NotFound)?;
        read_score(self.tx, key.id, &elem)?.ok_or(StoreError::NotFound)
    }

    fn rank(&mut self, name: &str, elem: Value, desc: bool) -> StoreResult<usize> {
        let key = self.zset(name)?.ok_or(StoreError::NotFound)?;
        let score = read_score(self.tx, key.id, &elem)?.ok_or(StoreError::NotFound)?;
        let sql = if desc {
            "select count(*) from rzset where kid = ? \
             and (score > ? or (score = ? and elem > ?))"
        } else {
            "select count(*) from rzset where kid = ? \
             and (score < ? or (score = ? and elem < ?))"
        };
        match self.tx.query_row(
            sql,
            &[key.id.into(), score.into(), score.into(), (&elem).into()],
        )? {
            Some(row) => Ok(row.int(0)? as usize),
            None => Err(StoreError::NotFound),
        }
    }

    /// 元素在升序中的排名
    pub fn get_rank(&mut self, name: &str, elem: impl Into<Value>) -> StoreResult<usize> {
        self.rank(name, elem.into(), false)
    }

    /// 元素在降序中的排名
    pub fn get_rank_rev(&mut self, name: &str, elem: impl Into<Value>) -> StoreResult<usize> {
        self.rank(name, elem.into(), true)
    }

    /// 增加元素的分数，元素或键不存在时先以 0 分创建
    pub fn incr(&mut self, name: &str, elem: impl Into<Value>, delta: f64) -> StoreResult<f64> {
        let elem = elem.into();
        let key = ensure(self.tx, name, DataType::SortedSet, Ttl::Keep)?;
        let current = read_score(self.tx, key.id, &elem)?.unwrap_or(0.0);
        let next = current + delta;
        let created = write_score(self.tx, key.id, &elem, next)?;
        touch(self.tx, key.id, created as i64)?;
        Ok(next)
    }

    pub fn len(&mut self, name: &str) -> StoreResult<usize> {
        Ok(self.zset(name)?.map_or(0, |k| k.len.max(0) as usize))
    }

    /// 按选项查询范围
    pub fn range_with(&mut self, name: &str, opts: &RangeOptions) -> StoreResult<Vec<ZItem>> {
        match self.zset(name)? {
            Some(key) => range(self.tx, &key, opts),
            None => Ok(Vec::new()),
        }
    }

    /// 按排名 `start..=stop` 升序查询
    pub fn range(&mut self, name: &str, start: i64, stop: i64) -> StoreResult<Vec<ZItem>> {
        self.range_with(name, &RangeOptions::new().by_rank(start, stop))
    }

    /// 按分数 `[min, max]` 升序查询
    pub fn range_by_score(&mut self, name: &str, min: f64, max: f64) -> StoreResult<Vec<ZItem>> {
        self.range_with(name, &RangeOptions::new().by_score(min, max))
    }

    /// 删除元素，返回删除数
    pub fn delete<V: Into<Value>>(
        &mut self,
        name: &str,
        elems: impl IntoIterator<Item = V>,
    ) -> StoreResult<usize> {
        let key = match get_typed(self.tx, name, DataType::SortedSet)? {
            Some(key) => key,
            None => return Ok(0),
        };
        let mut deleted = 0;
        for elem in elems {
            let elem: Value = elem.into();
            deleted += self.tx.execute(
                "delete from rzset where kid = ? and elem = ?",
                &[key.id.into(), (&elem).into()],
            )?;
        }
        if deleted > 0 {
            touch(self.tx, key.id, -(deleted as i64))?;
        }
        Ok(deleted)
    }

    /// 按排名或分数范围删除，返回删除数。`desc`/`offset`/`count` 不参与删除。
    pub fn delete_with(&mut self, name: &str, opts: &RangeOptions) -> StoreResult<usize> {
        let key = match get_typed(self.tx, name, DataType::SortedSet)? {
            Some(key) => key,
            None => return Ok(0),
        };
        let deleted = match opts.by {
            By::Rank(start, stop) => {
                let (offset, limit) = match clamp_ranks(start, stop, key.len) {
                    Some(r) => r,
                    None => return Ok(0),
                };
                let sql = format!(
                    "select id from rzset where kid = ? {} {}",
                    order_by(false),
                    self.tx.dialect().limit_offset(Some(limit), offset)
                );
                let rows = self.tx.query(&sql, &[key.id.into()])?;
                let mut n = 0;
                for row in &rows {
                    n += self
                        .tx
                        .execute("delete from rzset where id = ?", &[row.int(0)?.into()])?;
                }
                n
            }
            By::Score(min, max) => self.tx.execute(
                "delete from rzset where kid = ? and score >= ? and score <= ?",
                &[key.id.into(), min.into(), max.into()],
            )?,
        };
        if deleted > 0 {
            touch(self.tx, key.id, -(deleted as i64))?;
        }
        Ok(deleted)
    }

    /// 按元素模式扫描
    pub fn scan(
        &mut self,
        name: &str,
        cursor: i64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<ScanResult<ZItem>> {
        let now = self.tx.now();
        let dialect = self.tx.dialect();
        let filter = format!("and rkey.key = ? and rkey.type = ? and {}", LIVE);
        let sql = dialect.scan_query(
            "rzset.id, rzset.elem, rzset.score",
            "rzset join rkey on rzset.kid = rkey.id",
            "rzset.id",
            &dialect.blob_glob_predicate("rzset.elem"),
            &filter,
        );
        let pattern = dialect.translate_pattern(pattern);
        let rows = self.tx.query(
            &sql,
            &[
                cursor.into(),
                pattern.into(),
                name.into(),
                DataType::SortedSet.code().into(),
                now.into(),
                page_size(count).into(),
            ],
        )?;
        let items = rows
            .iter()
            .map(|row| {
                Ok((
                    row.int(0)?,
                    ZItem {
                        elem: row.value(1)?,
                        score: row.real(2)?,
                    },
                ))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(ScanResult::from_rows(items))
    }

    /// 交集，任一输入不存在时结果为空
    pub fn inter(&mut self, names: &[&str], aggregate: Aggregate) -> StoreResult<Vec<ZItem>> {
        combine(self.tx, names, aggregate, true)
    }

    /// 并集，忽略不存在的输入
    pub fn union(&mut self, names: &[&str], aggregate: Aggregate) -> StoreResult<Vec<ZItem>> {
        combine(self.tx, names, aggregate, false)
    }

    /// 交集写入 `dest`，返回结果大小
    pub fn inter_store(&mut self, dest: &str, names: &[&str], aggregate: Aggregate) -> StoreResult<usize> {
        let items = combine(self.tx, names, aggregate, true)?;
        store_into(self.tx, dest, &items)
    }

    /// 并集写入 `dest`，返回结果大小
    pub fn union_store(&mut self, dest: &str, names: &[&str], aggregate: Aggregate) -> StoreResult<usize> {
        let items = combine(self.tx, names, aggregate, false)?;
        store_into(self.tx, dest, &items)
    }
}

/// 有序集合存储
pub struct ZSetStore<T: Transactor> {
    db: Arc<T>,
}

/// 范围查询命令
pub struct RangeCmd<'s, T: Transactor> {
    store: &'s ZSetStore<T>,
    name: String,
    opts: RangeOptions,
}

impl<T: Transactor> RangeCmd<'_, T> {
    pub fn by_rank(mut self, start: i64, stop: i64) -> Self {
        self.opts = self.opts.by_rank(start, stop);
        self
    }

    pub fn by_score(mut self, min: f64, max: f64) -> Self {
        self.opts = self.opts.by_score(min, max);
        self
    }

    pub fn desc(mut self) -> Self {
        self.opts = self.opts.desc();
        self
    }

    pub fn offset(mut self, n: usize) -> Self {
        self.opts = self.opts.offset(n);
        self
    }

    pub fn count(mut self, n: usize) -> Self {
        self.opts = self.opts.count(n);
        self
    }

    pub fn run(self) -> StoreResult<Vec<ZItem>> {
        let RangeCmd { store, name, opts } = self;
        store
            .db
            .view(|tx| ZSetTx::new(tx).range_with(&name, &opts))
    }
}

/// 范围删除命令
pub struct DeleteCmd<'s, T: Transactor> {
    store: &'s ZSetStore<T>,
    name: String,
    opts: RangeOptions,
}

impl<T: Transactor> DeleteCmd<'_, T> {
    pub fn by_rank(mut self, start: i64, stop: i64) -> Self {
        self.opts = self.opts.by_rank(start, stop);
        self
    }

    pub fn by_score(mut self, min: f64, max: f64) -> Self {
        self.opts = self.opts.by_score(min, max);
        self
    }

    pub fn run(self) -> StoreResult<usize> {
        let DeleteCmd { store, name, opts } = self;
        store
            .db
            .update(|tx| ZSetTx::new(tx).delete_with(&name, &opts))
    }
}

/// 交集/并集命令
pub struct AlgebraCmd<'s, T: Transactor> {
    store: &'s ZSetStore<T>,
    names: Vec<String>,
    aggregate: Aggregate,
    inter: bool,
}

impl<'s, T: Transactor> AlgebraCmd<'s, T> {
    pub fn sum(mut self) -> Self {
        self.aggregate = Aggregate::Sum;
        self
    }

    pub fn min(mut self) -> Self {
        self.aggregate = Aggregate::Min;
        self
    }

    pub fn max(mut self) -> Self {
        self.aggregate = Aggregate::Max;
        self
    }

    /// 计算结果，按 `(score, elem)` 升序
    pub fn run(self) -> StoreResult<Vec<ZItem>> {
        let names: Vec<&str> = self.names.iter().map(String::as_str).collect();
        let (aggregate, inter) = (self.aggregate, self.inter);
        self.store
            .db
            .view(|tx| combine(tx, &names, aggregate, inter))
    }

    /// 指定结果写入的键
    pub fn dest(self, dest: &str) -> AlgebraStoreCmd<'s, T> {
        AlgebraStoreCmd {
            cmd: self,
            dest: dest.to_string(),
        }
    }
}

/// 将交集/并集写入目标键的命令
pub struct AlgebraStoreCmd<'s, T: Transactor> {
    cmd: AlgebraCmd<'s, T>,
    dest: String,
}

impl<T: Transactor> AlgebraStoreCmd<'_, T> {
    /// 写入目标键，返回结果大小
    pub fn store(self) -> StoreResult<usize> {
        let AlgebraStoreCmd { cmd, dest } = self;
        let names: Vec<&str> = cmd.names.iter().map(String::as_str).collect();
        let (aggregate, inter) = (cmd.aggregate, cmd.inter);
        cmd.store.db.update(|tx| {
            let items = combine(tx, &names, aggregate, inter)?;
            store_into(tx, &dest, &items)
        })
    }
}

impl<T: Transactor> ZSetStore<T> {
    pub fn new(db: Arc<T>) -> Self {
        Self { db }
    }

    pub fn add(&self, name: &str, elem: impl Into<Value>, score: f64) -> StoreResult<bool> {
        let elem = elem.into();
        self.db.update(|tx| ZSetTx::new(tx).add(name, elem, score))
    }

    pub fn add_many<V: Into<Value>>(
        &self,
        name: &str,
        items: impl IntoIterator<Item = (V, f64)>,
    ) -> StoreResult<usize> {
        let items: Vec<(Value, f64)> = items.into_iter().map(|(e, s)| (e.into(), s)).collect();
        self.db.update(|tx| ZSetTx::new(tx).add_many(name, items))
    }

    pub fn count(&self, name: &str, min: f64, max: f64) -> StoreResult<usize> {
        self.db.view(|tx| ZSetTx::new(tx).count(name, min, max))
    }

    pub fn get_score(&self, name: &str, elem: impl Into<Value>) -> StoreResult<f64> {
        let elem = elem.into();
        self.db.view(|tx| ZSetTx::new(tx).get_score(name, elem))
    }

    pub fn get_rank(&self, name: &str, elem: impl Into<Value>) -> StoreResult<usize> {
        let elem = elem.into();
        self.db.view(|tx| ZSetTx::new(tx).get_rank(name, elem))
    }

    pub fn get_rank_rev(&self, name: &str, elem: impl Into<Value>) -> StoreResult<usize> {
        let elem = elem.into();
        self.db.view(|tx| ZSetTx::new(tx).get_rank_rev(name, elem))
    }

    pub fn incr(&self, name: &str, elem: impl Into<Value>, delta: f64) -> StoreResult<f64> {
        let elem = elem.into();
        self.db.update(|tx| ZSetTx::new(tx).incr(name, elem, delta))
    }

    pub fn len(&self, name: &str) -> StoreResult<usize> {
        self.db.view(|tx| ZSetTx::new(tx).len(name))
    }

    pub fn range(&self, name: &str, start: i64, stop: i64) -> StoreResult<Vec<ZItem>> {
        self.db.view(|tx| ZSetTx::new(tx).range(name, start, stop))
    }

    pub fn range_by_score(&self, name: &str, min: f64, max: f64) -> StoreResult<Vec<ZItem>> {
        self.db
            .view(|tx| ZSetTx::new(tx).range_by_score(name, min, max))
    }

    /// 构造范围查询命令，默认按排名升序返回全部元素
    pub fn range_with(&self, name: &str) -> RangeCmd<'_, T> {
        RangeCmd {
            store: self,
            name: name.to_string(),
            opts: RangeOptions::new(),
        }
    }

    pub fn delete<V: Into<Value>>(
        &self,
        name: &str,
        elems: impl IntoIterator<Item = V>,
    ) -> StoreResult<usize> {
        let elems: Vec<Value> = elems.into_iter().map(Into::into).collect();
        self.db.update(|tx| ZSetTx::new(tx).delete(name, elems))
    }

    /// 构造范围删除命令
    pub fn delete_with(&self, name: &str) -> DeleteCmd<'_, T> {
        DeleteCmd {
            store: self,
            name: name.to_string(),
            opts: RangeOptions::new(),
        }
    }

    pub fn scan(
        &self,
        name: &str,
        cursor: i64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<ScanResult<ZItem>> {
        self.db
            .view(|tx| ZSetTx::new(tx).scan(name, cursor, pattern, count))
    }

    /// 逐页遍历元素
    pub fn scanner<'s>(
        &'s self,
        name: &'s str,
        pattern: &'s str,
        page_size: usize,
    ) -> Scanner<'s, ZItem> {
        Scanner::new(page_size, move |cursor, count| {
            self.scan(name, cursor, pattern, count)
        })
    }

    fn algebra(&self, names: &[&str], inter: bool) -> AlgebraCmd<'_, T> {
        AlgebraCmd {
            store: self,
            names: names.iter().map(|n| n.to_string()).collect(),
            aggregate: Aggregate::default(),
            inter,
        }
    }

    /// 构造交集命令，默认按分数求和
    pub fn inter_with(&self, names: &[&str]) -> AlgebraCmd<'_, T> {
        self.algebra(names, true)
    }

    /// 构造并集命令，默认按分数求和
    pub fn union_with(&self, names: &[&str]) -> AlgebraCmd<'_, T> {
        self.algebra(names, false)
    }
}
