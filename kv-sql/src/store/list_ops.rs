//! 列表存储
//!
//! 元素按 `pos` 升序排列。头尾推入取 `min(pos) - 1` / `max(pos) + 1`，
//! 在元素前后插入取与相邻元素的中点，已有元素的位置不变。
//! 当两个相邻位置之间无法再表示中点时，整个列表重新编号为 `0..n` 后再插入。

use std::sync::Arc;

use log::debug;

use super::data_types::{DataType, Key, Value};
use super::error::{StoreError, StoreResult};
use super::key_ops::{ensure, get_typed, get_typed_or_none, touch, Ttl};
use super::transactor::{Transactor, Tx};

/// 插入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// 插入成功，附带插入后的长度
    Inserted(usize),
    /// 列表中没有参照元素
    PivotNotFound,
    /// 键不存在或不是列表
    KeyNotFound,
}

impl InsertResult {
    /// Redis 风格的返回值：长度、-1（参照元素不存在）或 0（键不存在）
    pub fn sentinel(&self) -> i64 {
        match self {
            InsertResult::Inserted(len) => *len as i64,
            InsertResult::PivotNotFound => -1,
            InsertResult::KeyNotFound => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Before,
    After,
}

/// 将 `start..=stop` 解析为非负下标区间，区间为空返回 `None`
fn resolve_range(start: i64, stop: i64, len: i64) -> Option<(i64, i64)> {
    if (start < 0) == (stop < 0) && start > stop {
        return None;
    }
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((start, stop))
}

/// 按逻辑下标定位元素，返回 `(行 id, 位置, 元素)`；负下标从尾部计数
fn row_at(tx: &mut dyn Tx, key_id: i64, idx: i64) -> StoreResult<Option<(i64, f64, Value)>> {
    let (order, rank) = if idx >= 0 { ("asc", idx) } else { ("desc", -(idx + 1)) };
    let sql = format!(
        "select id, pos, elem from (\
           select id, pos, elem, row_number() over (order by pos {}) - 1 as rnk \
           from rlist where kid = ?\
         ) as ranked where rnk = ?",
        order
    );
    match tx.query_row(&sql, &[key_id.into(), rank.into()])? {
        Some(row) => Ok(Some((row.int(0)?, row.real(1)?, row.value(2)?))),
        None => Ok(None),
    }
}

fn end_row(tx: &mut dyn Tx, key_id: i64, end: End) -> StoreResult<Option<(i64, Value)>> {
    let sql = match end {
        End::Front => "select id, elem from rlist where kid = ? order by pos asc limit 1",
        End::Back => "select id, elem from rlist where kid = ? order by pos desc limit 1",
    };
    match tx.query_row(sql, &[key_id.into()])? {
        Some(row) => Ok(Some((row.int(0)?, row.value(1)?))),
        None => Ok(None),
    }
}

/// 第一个等于 `pivot` 的元素的位置
fn pivot_pos(tx: &mut dyn Tx, key_id: i64, pivot: &Value) -> StoreResult<Option<f64>> {
    match tx.query_row(
        "select pos from rlist where kid = ? and elem = ? order by pos asc limit 1",
        &[key_id.into(), pivot.into()],
    )? {
        Some(row) => Ok(Some(row.real(0)?)),
        None => Ok(None),
    }
}

fn insert_at(tx: &mut dyn Tx, key_id: i64, pos: f64, elem: &Value) -> StoreResult<()> {
    tx.execute(
        "insert into rlist (kid, pos, elem) values (?, ?, ?)",
        &[key_id.into(), pos.into(), elem.into()],
    )?;
    Ok(())
}

/// 将列表位置重新编号为 `0..n`，保持顺序
fn renumber(tx: &mut dyn Tx, key_id: i64) -> StoreResult<()> {
    let rows = tx.query(
        "select id from rlist where kid = ? order by pos asc",
        &[key_id.into()],
    )?;
    debug!("列表位置重新编号: kid={}, 元素数={}", key_id, rows.len());
    for (i, row) in rows.iter().enumerate() {
        tx.execute(
            "update rlist set pos = ? where id = ?",
            &[(i as f64).into(), row.int(0)?.into()],
        )?;
    }
    Ok(())
}

/// 事务内的列表操作
pub struct ListTx<'a> {
    tx: &'a mut dyn Tx,
}

impl<'a> ListTx<'a> {
    pub fn new(tx: &'a mut dyn Tx) -> Self {
        Self { tx }
    }

    fn list(&mut self, name: &str) -> StoreResult<Option<Key>> {
        get_typed_or_none(self.tx, name, DataType::List)
    }

    /// 按下标获取元素，越界返回 `NotFound`
    pub fn get(&mut self, name: &str, idx: i64) -> StoreResult<Value> {
        let key = self.list(name)?.ok_or(StoreError::NotFound)?;
        match row_at(self.tx, key.id, idx)? {
            Some((_, _, elem)) => Ok(elem),
            None => Err(StoreError::NotFound),
        }
    }

    /// 列表长度
    pub fn len(&mut self, name: &str) -> StoreResult<usize> {
        Ok(self.list(name)?.map_or(0, |k| k.len.max(0) as usize))
    }

    /// 返回 `start..=stop` 范围内的元素，支持负下标
    pub fn range(&mut self, name: &str, start: i64, stop: i64) -> StoreResult<Vec<Value>> {
        let key = match self.list(name)? {
            Some(key) => key,
            None => return Ok(Vec::new()),
        };
        let (start, stop) = match resolve_range(start, stop, key.len) {
            Some(r) => r,
            None => return Ok(Vec::new()),
        };
        let sql = format!(
            "select elem from rlist where kid = ? order by pos asc {}",
            self.tx
                .dialect()
                .limit_offset(Some((stop - start + 1) as usize), start as usize)
        );
        let rows = self.tx.query(&sql, &[key.id.into()])?;
        rows.iter().map(|row| row.value(0)).collect()
    }

    fn push(&mut self, name: &str, elem: Value, end: End) -> StoreResult<usize> {
        let key = ensure(self.tx, name, DataType::List, Ttl::Keep)?;
        let sql = match end {
            End::Front => "select min(pos) from rlist where kid = ?",
            End::Back => "select max(pos) from rlist where kid = ?",
        };
        let edge = match self.tx.query_row(sql, &[key.id.into()])? {
            Some(row) => row.opt_real(0)?,
            None => None,
        };
        let pos = match (edge, end) {
            (None, _) => 0.0,
            (Some(p), End::Front) => p - 1.0,
            (Some(p), End::Back) => p + 1.0,
        };
        insert_at(self.tx, key.id, pos, &elem)?;
        touch(self.tx, key.id, 1)?;
        Ok((key.len + 1) as usize)
    }

    /// 头部推入，返回新长度
    pub fn push_front(&mut self, name: &str, elem: impl Into<Value>) -> StoreResult<usize> {
        self.push(name, elem.into(), End::Front)
    }

    /// 尾部推入，返回新长度
    pub fn push_back(&mut self, name: &str, elem: impl Into<Value>) -> StoreResult<usize> {
        self.push(name, elem.into(), End::Back)
    }

    fn pop(&mut self, name: &str, end: End) -> StoreResult<Value> {
        let key = get_typed(self.tx, name, DataType::List)?.ok_or(StoreError::NotFound)?;
        let (id, elem) = end_row(self.tx, key.id, end)?.ok_or(StoreError::NotFound)?;
        self.tx
            .execute("delete from rlist where id = ?", &[id.into()])?;
        touch(self.tx, key.id, -1)?;
        Ok(elem)
    }

    /// 头部弹出，列表为空或不存在返回 `NotFound`
    pub fn pop_front(&mut self, name: &str) -> StoreResult<Value> {
        self.pop(name, End::Front)
    }

    /// 尾部弹出，列表为空或不存在返回 `NotFound`
    pub fn pop_back(&mut self, name: &str) -> StoreResult<Value> {
        self.pop(name, End::Back)
    }

    /// 从 `src` 尾部弹出并推入 `dst` 头部；`src == dst` 时为旋转
    pub fn pop_back_push_front(&mut self, src: &str, dst: &str) -> StoreResult<Value> {
        get_typed(self.tx, dst, DataType::List)?;
        let elem = self.pop_back(src)?;
        self.push_front(dst, elem.clone())?;
        Ok(elem)
    }

    fn insert(&mut self, name: &str, pivot: Value, elem: Value, side: Side) -> StoreResult<InsertResult> {
        let key = match self.list(name)? {
            Some(key) => key,
            None => return Ok(InsertResult::KeyNotFound),
        };
        let at = match pivot_pos(self.tx, key.id, &pivot)? {
            Some(at) => at,
            None => return Ok(InsertResult::PivotNotFound),
        };
        let mut pos = self.between(key.id, at, side)?;
        if pos.is_none() {
            renumber(self.tx, key.id)?;
            let at = pivot_pos(self.tx, key.id, &pivot)?.ok_or(StoreError::NotFound)?;
            pos = self.between(key.id, at, side)?;
        }
        let pos = pos.ok_or_else(|| StoreError::Sql("无法计算插入位置".to_string()))?;

        insert_at(self.tx, key.id, pos, &elem)?;
        touch(self.tx, key.id, 1)?;
        Ok(InsertResult::Inserted((key.len + 1) as usize))
    }

    /// 参照位置与插入侧相邻元素之间的位置，无法表示时返回 `None`
    fn between(&mut self, key_id: i64, pivot_pos: f64, side: Side) -> StoreResult<Option<f64>> {
        let sql = match side {
            Side::Before => "select pos from rlist where kid = ? and pos < ? order by pos desc limit 1",
            Side::After => "select pos from rlist where kid = ? and pos > ? order by pos asc limit 1",
        };
        let neighbor = match self.tx.query_row(sql, &[key_id.into(), pivot_pos.into()])? {
            Some(row) => Some(row.real(0)?),
            None => None,
        };
        let pos = match (neighbor, side) {
            (None, Side::Before) => pivot_pos - 1.0,
            (None, Side::After) => pivot_pos + 1.0,
            (Some(n), _) => n + (pivot_pos - n) / 2.0,
        };
        let (lo, hi) = match (neighbor, side) {
            (Some(n), Side::Before) => (n, pivot_pos),
            (Some(n), Side::After) => (pivot_pos, n),
            (None, Side::Before) => (f64::NEG_INFINITY, pivot_pos),
            (None, Side::After) => (pivot_pos, f64::INFINITY),
        };
        if pos > lo && pos < hi {
            Ok(Some(pos))
        } else {
            Ok(None)
        }
    }

    /// 在第一个等于 `pivot` 的元素之前插入
    pub fn insert_before(
        &mut self,
        name: &str,
        pivot: impl Into<Value>,
        elem: impl Into<Value>,
    ) -> StoreResult<InsertResult> {
        self.insert(name, pivot.into(), elem.into(), Side::Before)
    }

    /// 在第一个等于 `pivot` 的元素之后插入
    pub fn insert_after(
        &mut self,
        name: &str,
        pivot: impl Into<Value>,
        elem: impl Into<Value>,
    ) -> StoreResult<InsertResult> {
        self.insert(name, pivot.into(), elem.into(), Side::After)
    }

    /// 按下标替换元素，键不存在或越界返回 `NotFound`
    pub fn set(&mut self, name: &str, idx: i64, elem: impl Into<Value>) -> StoreResult<()> {
        let elem = elem.into();
        let key = get_typed(self.tx, name, DataType::List)?.ok_or(StoreError::NotFound)?;
        let (id, _, _) = row_at(self.tx, key.id, idx)?.ok_or(StoreError::NotFound)?;
        self.tx.execute(
            "update rlist set elem = ? where id = ?",
            &[(&elem).into(), id.into()],
        )?;
        touch(self.tx, key.id, 0)
    }

    /// 只保留 `start..=stop` 范围内的元素，返回删除数。
    /// 同号下标且 `start > stop` 时不做任何删除。
    pub fn trim(&mut self, name: &str, start: i64, stop: i64) -> StoreResult<usize> {
        let key = match get_typed(self.tx, name, DataType::List)? {
            Some(key) => key,
            None => return Ok(0),
        };
        if (start < 0) == (stop < 0) && start > stop {
            return Ok(0);
        }
        let deleted = match resolve_range(start, stop, key.len) {
            None => self
                .tx
                .execute("delete from rlist where kid = ?", &[key.id.into()])?,
            Some((start, stop)) => {
                let first = row_at(self.tx, key.id, start)?;
                let last = row_at(self.tx, key.id, stop)?;
                match (first, last) {
                    (Some((_, lo, _)), Some((_, hi, _))) => self.tx.execute(
                        "delete from rlist where kid = ? and (pos < ? or pos > ?)",
                        &[key.id.into(), lo.into(), hi.into()],
                    )?,
                    _ => 0,
                }
            }
        };
        if deleted > 0 {
            touch(self.tx, key.id, -(deleted as i64))?;
        }
        Ok(deleted)
    }

    fn delete_matching(
        &mut self,
        name: &str,
        elem: Value,
        limit: Option<(usize, End)>,
    ) -> StoreResult<usize> {
        let key = match get_typed(self.tx, name, DataType::List)? {
            Some(key) => key,
            None => return Ok(0),
        };
        let deleted = match limit {
            None => self.tx.execute(
                "delete from rlist where kid = ? and elem = ?",
                &[key.id.into(), (&elem).into()],
            )?,
            Some((count, end)) => {
                let order = if end == End::Front { "asc" } else { "desc" };
                let sql = format!(
                    "select id from rlist where kid = ? and elem = ? order by pos {} {}",
                    order,
                    self.tx.dialect().limit_offset(Some(count), 0)
                );
                let rows = self.tx.query(&sql, &[key.id.into(), (&elem).into()])?;
                let mut n = 0;
                for row in &rows {
                    n += self
                        .tx
                        .execute("delete from rlist where id = ?", &[row.int(0)?.into()])?;
                }
                n
            }
        };
        if deleted > 0 {
            touch(self.tx, key.id, -(deleted as i64))?;
        }
        Ok(deleted)
    }

    /// 删除所有等于 `elem` 的元素，返回删除数
    pub fn delete(&mut self, name: &str, elem: impl Into<Value>) -> StoreResult<usize> {
        self.delete_matching(name, elem.into(), None)
    }

    /// 从头部开始删除最多 `count` 个等于 `elem` 的元素；`count = 0` 删除全部
    pub fn delete_front(
        &mut self,
        name: &str,
        elem: impl Into<Value>,
        count: usize,
    ) -> StoreResult<usize> {
        let limit = if count == 0 { None } else { Some((count, End::Front)) };
        self.delete_matching(name, elem.into(), limit)
    }

    /// 从尾部开始删除最多 `count` 个等于 `elem` 的元素；`count = 0` 删除全部
    pub fn delete_back(
        &mut self,
        name: &str,
        elem: impl Into<Value>,
        count: usize,
    ) -> StoreResult<usize> {
        let limit = if count == 0 { None } else { Some((count, End::Back)) };
        self.delete_matching(name, elem.into(), limit)
    }
}

/// 列表存储
pub struct ListStore<T: Transactor> {
    db: Arc<T>,
}

impl<T: Transactor> ListStore<T> {
    pub fn new(db: Arc<T>) -> Self {
        Self { db }
    }

    pub fn get(&self, name: &str, idx: i64) -> StoreResult<Value> {
        self.db.view(|tx| ListTx::new(tx).get(name, idx))
    }

    pub fn len(&self, name: &str) -> StoreResult<usize> {
        self.db.view(|tx| ListTx::new(tx).len(name))
    }

    pub fn range(&self, name: &str, start: i64, stop: i64) -> StoreResult<Vec<Value>> {
        self.db.view(|tx| ListTx::new(tx).range(name, start, stop))
    }

    pub fn push_front(&self, name: &str, elem: impl Into<Value>) -> StoreResult<usize> {
        let elem = elem.into();
        self.db.update(|tx| ListTx::new(tx).push_front(name, elem))
    }

    pub fn push_back(&self, name: &str, elem: impl Into<Value>) -> StoreResult<usize> {
        let elem = elem.into();
        self.db.update(|tx| ListTx::new(tx).push_back(name, elem))
    }

    pub fn pop_front(&self, name: &str) -> StoreResult<Value> {
        self.db.update(|tx| ListTx::new(tx).pop_front(name))
    }

    pub fn pop_back(&self, name: &str) -> StoreResult<Value> {
        self.db.update(|tx| ListTx::new(tx).pop_back(name))
    }

    pub fn pop_back_push_front(&self, src: &str, dst: &str) -> StoreResult<Value> {
        self.db
            .update(|tx| ListTx::new(tx).pop_back_push_front(src, dst))
    }

    pub fn insert_before(
        &self,
        name: &str,
        pivot: impl Into<Value>,
        elem: impl Into<Value>,
    ) -> StoreResult<InsertResult> {
        let (pivot, elem) = (pivot.into(), elem.into());
        self.db
            .update(|tx| ListTx::new(tx).insert_before(name, pivot, elem))
    }

    pub fn insert_after(
        &self,
        name: &str,
        pivot: impl Into<Value>,
        elem: impl Into<Value>,
    ) -> StoreResult<InsertResult> {
        let (pivot, elem) = (pivot.into(), elem.into());
        self.db
            .update(|tx| ListTx::new(tx).insert_after(name, pivot, elem))
    }

    pub fn set(&self, name: &str, idx: i64, elem: impl Into<Value>) -> StoreResult<()> {
        let elem = elem.into();
        self.db.update(|tx| ListTx::new(tx).set(name, idx, elem))
    }

    pub fn trim(&self, name: &str, start: i64, stop: i64) -> StoreResult<usize> {
        self.db.update(|tx| ListTx::new(tx).trim(name, start, stop))
    }

    pub fn delete(&self, name: &str, elem: impl Into<Value>) -> StoreResult<usize> {
        let elem = elem.into();
        self.db.update(|tx| ListTx::new(tx).delete(name, elem))
    }

    pub fn delete_front(&self, name: &str, elem: impl Into<Value>, count: usize) -> StoreResult<usize> {
        let elem = elem.into();
        self.db
            .update(|tx| ListTx::new(tx).delete_front(name, elem, count))
    }

    pub fn delete_back(&self, name: &str, elem: impl Into<Value>, count: usize) -> StoreResult<usize> {
        let elem = elem.into();
        self.db
            .update(|tx| ListTx::new(tx).delete_back(name, elem, count))
    }
}
