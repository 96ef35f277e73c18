use std::sync::Arc;

use rand::Rng;

use super::data_types::{DataType, Key, Value};
use super::error::{StoreError, StoreResult};
use super::key_ops::{clear_data, ensure, get_typed, get_typed_or_none, touch, touch_recount, Ttl, LIVE};
use super::scan::{page_size, ScanResult, Scanner};
use super::transactor::{SqlValue, Transactor, Tx};

/// 写入元素，返回是否为新元素
fn insert_elem(tx: &mut dyn Tx, key_id: i64, elem: &Value) -> StoreResult<bool> {
    let n = tx.execute(
        "insert into rset (kid, elem) values (?, ?) on conflict (kid, elem) do nothing",
        &[key_id.into(), elem.into()],
    )?;
    Ok(n > 0)
}

/// 参与集合运算的键 id；不存在或类型不同的键为 `None`
fn source_ids(tx: &mut dyn Tx, names: &[&str]) -> StoreResult<Vec<Option<i64>>> {
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        ids.push(get_typed_or_none(tx, name, DataType::Set)?.map(|k| k.id));
    }
    Ok(ids)
}

fn dedup(mut ids: Vec<i64>) -> Vec<i64> {
    ids.sort_unstable();
    ids.dedup();
    ids
}

fn elems(tx: &mut dyn Tx, sql: &str, params: &[SqlValue]) -> StoreResult<Vec<Value>> {
    let rows = tx.query(sql, params)?;
    rows.iter().map(|row| row.value(0)).collect()
}

fn diff(tx: &mut dyn Tx, names: &[&str]) -> StoreResult<Vec<Value>> {
    let ids = source_ids(tx, names)?;
    let first = match ids.first() {
        Some(Some(id)) => *id,
        _ => return Ok(Vec::new()),
    };
    let others = dedup(ids[1..].iter().flatten().copied().collect());
    if others.is_empty() {
        return elems(
            tx,
            "select elem from rset where kid = ? order by id",
            &[first.into()],
        );
    }
    let sql = format!(
        "select elem from rset where kid = ? \
         and elem not in (select elem from rset where kid in ({})) order by id",
        tx.dialect().placeholders(others.len())
    );
    let mut params: Vec<SqlValue> = vec![first.into()];
    params.extend(others.into_iter().map(SqlValue::from));
    elems(tx, &sql, &params)
}

fn inter(tx: &mut dyn Tx, names: &[&str]) -> StoreResult<Vec<Value>> {
    let ids = source_ids(tx, names)?;
    if ids.is_empty() || ids.iter().any(Option::is_none) {
        return Ok(Vec::new());
    }
    let ids = dedup(ids.into_iter().flatten().collect());
    let sql = format!(
        "select elem from rset where kid in ({}) \
         group by elem having count(distinct kid) = ? order by min(id)",
        tx.dialect().placeholders(ids.len())
    );
    let n = ids.len();
    let mut params: Vec<SqlValue> = ids.into_iter().map(SqlValue::from).collect();
    params.push(n.into());
    elems(tx, &sql, &params)
}

fn union(tx: &mut dyn Tx, names: &[&str]) -> StoreResult<Vec<Value>> {
    let ids = dedup(source_ids(tx, names)?.into_iter().flatten().collect());
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "select elem from rset where kid in ({}) group by elem order by min(id)",
        tx.dialect().placeholders(ids.len())
    );
    let params: Vec<SqlValue> = ids.into_iter().map(SqlValue::from).collect();
    elems(tx, &sql, &params)
}

/// 用 `items` 覆盖目标集合，返回结果集合的大小。
/// 目标键为其他类型时返回 `KeyType`，不做任何修改。
fn store_into(tx: &mut dyn Tx, dest: &str, items: &[Value]) -> StoreResult<usize> {
    let key = ensure(tx, dest, DataType::Set, Ttl::Set(None))?;
    clear_data(tx, &key)?;
    for elem in items {
        insert_elem(tx, key.id, elem)?;
    }
    Ok(touch_recount(tx, &key)? as usize)
}

/// 事务内的集合操作
pub struct SetTx<'a> {
    tx: &'a mut dyn Tx,
}

impl<'a> SetTx<'a> {
    pub fn new(tx: &'a mut dyn Tx) -> Self {
        Self { tx }
    }

    /// 添加元素，返回新增的元素个数
    pub fn add<V: Into<Value>>(
        &mut self,
        name: &str,
        elems: impl IntoIterator<Item = V>,
    ) -> StoreResult<usize> {
        let elems: Vec<Value> = elems.into_iter().map(Into::into).collect();
        if elems.is_empty() {
            get_typed(self.tx, name, DataType::Set)?;
            return Ok(0);
        }
        let key = ensure(self.tx, name, DataType::Set, Ttl::Keep)?;
        let mut created = 0;
        for elem in &elems {
            if insert_elem(self.tx, key.id, elem)? {
                created += 1;
            }
        }
        touch(self.tx, key.id, created as i64)?;
        Ok(created)
    }

    /// 删除元素，返回删除数。集合为空时键保留。
    pub fn delete<V: Into<Value>>(
        &mut self,
        name: &str,
        elems: impl IntoIterator<Item = V>,
    ) -> StoreResult<usize> {
        let key = match get_typed(self.tx, name, DataType::Set)? {
            Some(key) => key,
            None => return Ok(0),
        };
        let mut deleted = 0;
        for elem in elems {
            let elem: Value = elem.into();
            deleted += self.tx.execute(
                "delete from rset where kid = ? and elem = ?",
                &[key.id.into(), (&elem).into()],
            )?;
        }
        if deleted > 0 {
            touch(self.tx, key.id, -(deleted as i64))?;
        }
        Ok(deleted)
    }

    pub fn exists(&mut self, name: &str, elem: impl Into<Value>) -> StoreResult<bool> {
        let elem = elem.into();
        let key = match get_typed_or_none(self.tx, name, DataType::Set)? {
            Some(key) => key,
            None => return Ok(false),
        };
        let row = self.tx.query_row(
            "select 1 from rset where kid = ? and elem = ?",
            &[key.id.into(), (&elem).into()],
        )?;
        Ok(row.is_some())
    }

    /// 所有元素，按加入顺序
    pub fn items(&mut self, name: &str) -> StoreResult<Vec<Value>> {
        match get_typed_or_none(self.tx, name, DataType::Set)? {
            Some(key) => elems(
                self.tx,
                "select elem from rset where kid = ? order by id",
                &[key.id.into()],
            ),
            None => Ok(Vec::new()),
        }
    }

    pub fn len(&mut self, name: &str) -> StoreResult<usize> {
        Ok(get_typed_or_none(self.tx, name, DataType::Set)?
            .map_or(0, |k| k.len.max(0) as usize))
    }

    /// 将元素从 `src` 移到 `dst`。
    /// `src` 不存在或不含该元素返回 `NotFound`；`dst` 为其他类型返回 `KeyType`。
    pub fn move_elem(&mut self, src: &str, dst: &str, elem: impl Into<Value>) -> StoreResult<()> {
        let elem = elem.into();
        let key = get_typed(self.tx, src, DataType::Set)?.ok_or(StoreError::NotFound)?;
        let n = self.tx.execute(
            "delete from rset where kid = ? and elem = ?",
            &[key.id.into(), (&elem).into()],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        touch(self.tx, key.id, -1)?;
        let dest = ensure(self.tx, dst, DataType::Set, Ttl::Keep)?;
        let created = insert_elem(self.tx, dest.id, &elem)?;
        touch(self.tx, dest.id, created as i64)
    }

    /// 随机取出一行 `(行 id, 元素)`
    fn pick(&mut self, key: &Key) -> StoreResult<(i64, Value)> {
        if key.len <= 0 {
            return Err(StoreError::NotFound);
        }
        let offset = rand::rng().random_range(0..key.len as usize);
        let sql = format!(
            "select id, elem from rset where kid = ? order by id {}",
            self.tx.dialect().limit_offset(Some(1), offset)
        );
        match self.tx.query_row(&sql, &[key.id.into()])? {
            Some(row) => Ok((row.int(0)?, row.value(1)?)),
            None => Err(StoreError::NotFound),
        }
    }

    /// 随机删除并返回一个元素，集合为空返回 `NotFound`
    pub fn pop(&mut self, name: &str) -> StoreResult<Value> {
        let key = get_typed(self.tx, name, DataType::Set)?.ok_or(StoreError::NotFound)?;
        let (id, elem) = self.pick(&key)?;
        self.tx
            .execute("delete from rset where id = ?", &[id.into()])?;
        touch(self.tx, key.id, -1)?;
        Ok(elem)
    }

    /// 随机返回一个元素，集合为空返回 `NotFound`
    pub fn random(&mut self, name: &str) -> StoreResult<Value> {
        let key = get_typed_or_none(self.tx, name, DataType::Set)?.ok_or(StoreError::NotFound)?;
        Ok(self.pick(&key)?.1)
    }

    /// 按元素模式扫描
    pub fn scan(
        &mut self,
        name: &str,
        cursor: i64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<ScanResult<Value>> {
        let now = self.tx.now();
        let dialect = self.tx.dialect();
        let filter = format!("and rkey.key = ? and rkey.type = ? and {}", LIVE);
        let sql = dialect.scan_query(
            "rset.id, rset.elem",
            "rset join rkey on rset.kid = rkey.id",
            "rset.id",
            &dialect.blob_glob_predicate("rset.elem"),
            &filter,
        );
        let pattern = dialect.translate_pattern(pattern);
        let rows = self.tx.query(
            &sql,
            &[
                cursor.into(),
                pattern.into(),
                name.into(),
                DataType::Set.code().into(),
                now.into(),
                page_size(count).into(),
            ],
        )?;
        let items = rows
            .iter()
            .map(|row| Ok((row.int(0)?, row.value(1)?)))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(ScanResult::from_rows(items))
    }

    /// 第一个集合中不属于其余集合的元素
    pub fn diff(&mut self, names: &[&str]) -> StoreResult<Vec<Value>> {
        diff(self.tx, names)
    }

    /// 所有集合共有的元素
    pub fn inter(&mut self, names: &[&str]) -> StoreResult<Vec<Value>> {
        inter(self.tx, names)
    }

    /// 任一集合中的元素
    pub fn union(&mut self, names: &[&str]) -> StoreResult<Vec<Value>> {
        union(self.tx, names)
    }

    /// 差集写入 `dest`，返回结果大小
    pub fn diff_store(&mut self, dest: &str, names: &[&str]) -> StoreResult<usize> {
        let items = diff(self.tx, names)?;
        store_into(self.tx, dest, &items)
    }

    /// 交集写入 `dest`，返回结果大小
    pub fn inter_store(&mut self, dest: &str, names: &[&str]) -> StoreResult<usize> {
        let items = inter(self.tx, names)?;
        store_into(self.tx, dest, &items)
    }

    /// 并集写入 `dest`，返回结果大小
    pub fn union_store(&mut self, dest: &str, names: &[&str]) -> StoreResult<usize> {
        let items = union(self.tx, names)?;
        store_into(self.tx, dest, &items)
    }
}

/// 集合存储
pub struct SetStore<T: Transactor> {
    db: Arc<T>,
}

impl<T: Transactor> SetStore<T> {
    pub fn new(db: Arc<T>) -> Self {
        Self { db }
    }

    pub fn add<V: Into<Value>>(
        &self,
        name: &str,
        elems: impl IntoIterator<Item = V>,
    ) -> StoreResult<usize> {
        let elems: Vec<Value> = elems.into_iter().map(Into::into).collect();
        self.db.update(|tx| SetTx::new(tx).add(name, elems))
    }

    pub fn delete<V: Into<Value>>(
        &self,
        name: &str,
        elems: impl IntoIterator<Item = V>,
    ) -> StoreResult<usize> {
        let elems: Vec<Value> = elems.into_iter().map(Into::into).collect();
        self.db.update(|tx| SetTx::new(tx).delete(name, elems))
    }

    pub fn exists(&self, name: &str, elem: impl Into<Value>) -> StoreResult<bool> {
        let elem = elem.into();
        self.db.view(|tx| SetTx::new(tx).exists(name, elem))
    }

    pub fn items(&self, name: &str) -> StoreResult<Vec<Value>> {
        self.db.view(|tx| SetTx::new(tx).items(name))
    }

    pub fn len(&self, name: &str) -> StoreResult<usize> {
        self.db.view(|tx| SetTx::new(tx).len(name))
    }

    pub fn move_elem(&self, src: &str, dst: &str, elem: impl Into<Value>) -> StoreResult<()> {
        let elem = elem.into();
        self.db.update(|tx| SetTx::new(tx).move_elem(src, dst, elem))
    }

    pub fn pop(&self, name: &str) -> StoreResult<Value> {
        self.db.update(|tx| SetTx::new(tx).pop(name))
    }

    pub fn random(&self, name: &str) -> StoreResult<Value> {
        self.db.view(|tx| SetTx::new(tx).random(name))
    }

    pub fn scan(
        &self,
        name: &str,
        cursor: i64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<ScanResult<Value>> {
        self.db
            .view(|tx| SetTx::new(tx).scan(name, cursor, pattern, count))
    }

    /// 逐页遍历元素
    pub fn scanner<'s>(
        &'s self,
        name: &'s str,
        pattern: &'s str,
        page_size: usize,
    ) -> Scanner<'s, Value> {
        Scanner::new(page_size, move |cursor, count| {
            self.scan(name, cursor, pattern, count)
        })
    }

    pub fn diff(&self, names: &[&str]) -> StoreResult<Vec<Value>> {
        self.db.view(|tx| SetTx::new(tx).diff(names))
    }

    pub fn inter(&self, names: &[&str]) -> StoreResult<Vec<Value>> {
        self.db.view(|tx| SetTx::new(tx).inter(names))
    }

    pub fn union(&self, names: &[&str]) -> StoreResult<Vec<Value>> {
        self.db.view(|tx| SetTx::new(tx).union(names))
    }

    pub fn diff_store(&self, dest: &str, names: &[&str]) -> StoreResult<usize> {
        self.db.update(|tx| SetTx::new(tx).diff_store(dest, names))
    }

    pub fn inter_store(&self, dest: &str, names: &[&str]) -> StoreResult<usize> {
        self.db.update(|tx| SetTx::new(tx).inter_store(dest, names))
    }

    pub fn union_store(&self, dest: &str, names: &[&str]) -> StoreResult<usize> {
        self.db.update(|tx| SetTx::new(tx).union_store(dest, names))
    }
}
