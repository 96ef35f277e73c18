//! 游标扫描
//!
//! 游标是上一页中最大的行 id（初始为 0）。每页取 `id > cursor` 的行，按 id 升序，
//! 最多 `count` 行；返回的新游标是本页最大的 id，空页返回 0 表示扫描结束。
//!
//! 扫描跨越多个事务，不提供快照一致性：扫描期间新增或删除的行可能被看到，
//! 也可能不被看到，与 Redis `SCAN` 的保证相同。扫描开始前已存在、且扫描期间
//! 未被删除的行恰好被访问一次。

use std::collections::VecDeque;

use super::error::{StoreError, StoreResult};

/// 未指定页大小时的默认值
pub const DEFAULT_PAGE_SIZE: usize = 10;

pub(crate) fn page_size(count: usize) -> usize {
    if count == 0 {
        DEFAULT_PAGE_SIZE
    } else {
        count
    }
}

/// 一页扫描结果
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult<T> {
    /// 下一页的游标，0 表示已扫描完毕
    pub cursor: i64,
    pub items: Vec<T>,
}

impl<T> ScanResult<T> {
    /// 由 `(行 id, 元素)` 列表构造一页结果
    pub(crate) fn from_rows(rows: Vec<(i64, T)>) -> Self {
        let cursor = rows.iter().map(|(id, _)| *id).max().unwrap_or(0);
        ScanResult {
            cursor,
            items: rows.into_iter().map(|(_, item)| item).collect(),
        }
    }
}

type FetchPage<'a, T> = Box<dyn FnMut(i64, usize) -> StoreResult<ScanResult<T>> + 'a>;

/// 按需逐页拉取的扫描迭代器。
///
/// 当前页耗尽时才查询下一页；遇到空页结束。出错时产出一次 `Err`，
/// 随后迭代结束，错误可通过 [`Scanner::err`] 再次取得。
pub struct Scanner<'a, T> {
    fetch: FetchPage<'a, T>,
    cursor: i64,
    page_size: usize,
    page: VecDeque<T>,
    done: bool,
    err: Option<StoreError>,
}

impl<'a, T> Scanner<'a, T> {
    pub(crate) fn new<F>(page_size: usize, fetch: F) -> Self
    where
        F: FnMut(i64, usize) -> StoreResult<ScanResult<T>> + 'a,
    {
        Scanner {
            fetch: Box::new(fetch),
            cursor: 0,
            page_size: self::page_size(page_size),
            page: VecDeque::new(),
            done: false,
            err: None,
        }
    }

    /// 扫描中遇到的错误
    pub fn err(&self) -> Option<&StoreError> {
        self.err.as_ref()
    }

    /// 当前游标
    pub fn cursor(&self) -> i64 {
        self.cursor
    }
}

impl<T> Iterator for Scanner<'_, T> {
    type Item = StoreResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.page.pop_front() {
                return Some(Ok(item));
            }
            if self.done {
                return None;
            }
            match (self.fetch)(self.cursor, self.page_size) {
                Ok(result) => {
                    if result.items.is_empty() {
                        self.done = true;
                        return None;
                    }
                    self.cursor = result.cursor;
                    self.page = result.items.into();
                }
                Err(e) => {
                    self.done = true;
                    self.err = Some(e.clone());
                    return Some(Err(e));
                }
            }
        }
    }
}
