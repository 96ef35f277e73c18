//! SQL 方言
//!
//! 各存储的查询语句以 `?` 作为占位符书写，语义在两种方言下相同；
//! 方言只负责真正有差异的部分：建表语句、glob 模式匹配、分页子句和占位符形式。

use std::borrow::Cow;
use std::fmt;

/// SQL 方言抽象
pub trait Dialect: Send + Sync + fmt::Debug {
    /// 方言名称
    fn name(&self) -> &'static str;

    /// 建表语句
    fn schema(&self) -> &'static str;

    /// 对文本列 `column` 做 glob 匹配的谓词，模式参数用一个占位符表示
    fn glob_predicate(&self, column: &str) -> String;

    /// 对二进制列（元素、值）做 glob 匹配的谓词，元素按 UTF-8 文本比较
    fn blob_glob_predicate(&self, column: &str) -> String {
        self.glob_predicate(column)
    }

    /// 将 glob 模式（`*` 任意长度，`?` 单个字符）翻译为方言原生的模式文本
    fn translate_pattern(&self, pattern: &str) -> String;

    /// 分页子句，`limit` 为 `None` 表示不限制数量
    fn limit_offset(&self, limit: Option<usize>, offset: usize) -> String;

    /// 将 `?` 占位符改写为方言的参数形式
    fn rebind<'q>(&self, sql: &'q str) -> Cow<'q, str>;

    /// `n` 个以逗号分隔的占位符，用于 `in (...)`
    fn placeholders(&self, n: usize) -> String {
        vec!["?"; n].join(", ")
    }

    /// 游标扫描查询：`id_column > ?`、模式匹配谓词 `glob`（由 [`Dialect::glob_predicate`]
    /// 或 [`Dialect::blob_glob_predicate`] 生成）、附加过滤条件，按 `id_column` 升序取一页。
    /// 参数顺序为：游标、模式、`filter` 中的参数、页大小。
    fn scan_query(
        &self,
        select: &str,
        from: &str,
        id_column: &str,
        glob: &str,
        filter: &str,
    ) -> String {
        format!(
            "select {select} from {from} where {id_column} > ? and {glob} {filter} \
             order by {id_column} asc limit ?"
        )
    }
}

/// SQLite 方言
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

/// PostgreSQL 方言
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

const SQLITE_SCHEMA: &str = r#"
create table if not exists rkey (
    id       integer primary key autoincrement,
    key      text not null,
    type     integer not null,
    version  integer not null,
    etime    integer,
    mtime    integer not null,
    len      integer not null default 0
);
create unique index if not exists rkey_key_idx on rkey (key);
create index if not exists rkey_etime_idx on rkey (etime) where etime is not null;

create table if not exists rstring (
    id    integer primary key autoincrement,
    kid   integer not null references rkey (id) on delete cascade,
    value blob not null
);
create unique index if not exists rstring_kid_idx on rstring (kid);

create table if not exists rhash (
    id    integer primary key autoincrement,
    kid   integer not null references rkey (id) on delete cascade,
    field text not null,
    value blob not null
);
create unique index if not exists rhash_kid_field_idx on rhash (kid, field);

create table if not exists rlist (
    id   integer primary key autoincrement,
    kid  integer not null references rkey (id) on delete cascade,
    pos  real not null,
    elem blob not null
);
create index if not exists rlist_kid_pos_idx on rlist (kid, pos);

create table if not exists rset (
    id   integer primary key autoincrement,
    kid  integer not null references rkey (id) on delete cascade,
    elem blob not null
);
create unique index if not exists rset_kid_elem_idx on rset (kid, elem);

create table if not exists rzset (
    id    integer primary key autoincrement,
    kid   integer not null references rkey (id) on delete cascade,
    elem  blob not null,
    score real not null
);
create unique index if not exists rzset_kid_elem_idx on rzset (kid, elem);
create index if not exists rzset_kid_score_idx on rzset (kid, score, elem);

create table if not exists rmeta (
    name  text primary key,
    value integer not null
);
insert into rmeta (name, value) values ('version_floor', 0) on conflict (name) do nothing;
"#;

const POSTGRES_SCHEMA: &str = r#"
create table if not exists rkey (
    id       bigserial primary key,
    key      text not null,
    type     integer not null,
    version  bigint not null,
    etime    bigint,
    mtime    bigint not null,
    len      bigint not null default 0
);
create unique index if not exists rkey_key_idx on rkey (key);
create index if not exists rkey_etime_idx on rkey (etime) where etime is not null;

create table if not exists rstring (
    id    bigserial primary key,
    kid   bigint not null references rkey (id) on delete cascade,
    value bytea not null
);
create unique index if not exists rstring_kid_idx on rstring (kid);

create table if not exists rhash (
    id    bigserial primary key,
    kid   bigint not null references rkey (id) on delete cascade,
    field text not null,
    value bytea not null
);
create unique index if not exists rhash_kid_field_idx on rhash (kid, field);

create table if not exists rlist (
    id   bigserial primary key,
    kid  bigint not null references rkey (id) on delete cascade,
    pos  double precision not null,
    elem bytea not null
);
create index if not exists rlist_kid_pos_idx on rlist (kid, pos);

create table if not exists rset (
    id   bigserial primary key,
    kid  bigint not null references rkey (id) on delete cascade,
    elem bytea not null
);
create unique index if not exists rset_kid_elem_idx on rset (kid, elem);

create table if not exists rzset (
    id    bigserial primary key,
    kid   bigint not null references rkey (id) on delete cascade,
    elem  bytea not null,
    score double precision not null
);
create unique index if not exists rzset_kid_elem_idx on rzset (kid, elem);
create index if not exists rzset_kid_score_idx on rzset (kid, score, elem);

create table if not exists rmeta (
    name  text primary key,
    value bigint not null
);
insert into rmeta (name, value) values ('version_floor', 0) on conflict (name) do nothing;
"#;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn schema(&self) -> &'static str {
        SQLITE_SCHEMA
    }

    fn glob_predicate(&self, column: &str) -> String {
        format!("{} glob ?", column)
    }

    fn translate_pattern(&self, pattern: &str) -> String {
        // GLOB 的字符类只保留字面含义
        pattern.replace('[', "[[]")
    }

    fn limit_offset(&self, limit: Option<usize>, offset: usize) -> String {
        match (limit, offset) {
            (Some(limit), 0) => format!("limit {}", limit),
            (Some(limit), offset) => format!("limit {} offset {}", limit, offset),
            (None, 0) => String::new(),
            (None, offset) => format!("limit -1 offset {}", offset),
        }
    }

    fn rebind<'q>(&self, sql: &'q str) -> Cow<'q, str> {
        Cow::Borrowed(sql)
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn schema(&self) -> &'static str {
        POSTGRES_SCHEMA
    }

    fn glob_predicate(&self, column: &str) -> String {
        format!("{} like ? escape '\\'", column)
    }

    fn blob_glob_predicate(&self, column: &str) -> String {
        // bytea 没有 like 运算符
        format!("convert_from({}, 'UTF8') like ? escape '\\'", column)
    }

    fn translate_pattern(&self, pattern: &str) -> String {
        let mut out = String::with_capacity(pattern.len() + 4);
        for c in pattern.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '%' => out.push_str("\\%"),
                '_' => out.push_str("\\_"),
                '*' => out.push('%'),
                '?' => out.push('_'),
                c => out.push(c),
            }
        }
        out
    }

    fn limit_offset(&self, limit: Option<usize>, offset: usize) -> String {
        match (limit, offset) {
            (Some(limit), 0) => format!("limit {}", limit),
            (Some(limit), offset) => format!("limit {} offset {}", limit, offset),
            (None, 0) => String::new(),
            (None, offset) => format!("offset {}", offset),
        }
    }

    fn rebind<'q>(&self, sql: &'q str) -> Cow<'q, str> {
        if !sql.contains('?') {
            return Cow::Borrowed(sql);
        }
        let mut out = String::with_capacity(sql.len() + 16);
        let mut n = 0;
        let mut quoted = false;
        for c in sql.chars() {
            match c {
                '\'' => {
                    quoted = !quoted;
                    out.push(c);
                }
                '?' if !quoted => {
                    n += 1;
                    out.push('$');
                    out.push_str(&n.to_string());
                }
                c => out.push(c),
            }
        }
        Cow::Owned(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_pattern() {
        let d = SqliteDialect;
        assert_eq!(d.glob_predicate("key"), "key glob ?");
        assert_eq!(d.translate_pattern("user:*"), "user:*");
        assert_eq!(d.translate_pattern("a?c"), "a?c");
        assert_eq!(d.translate_pattern("[x]*"), "[[]x]*");
    }

    #[test]
    fn test_postgres_pattern() {
        let d = PostgresDialect;
        assert_eq!(d.glob_predicate("key"), "key like ? escape '\\'");
        assert_eq!(d.translate_pattern("user:*"), "user:%");
        assert_eq!(d.translate_pattern("a?c"), "a_c");
        assert_eq!(d.translate_pattern("50%_off*"), "50\\%\\_off%");
        assert_eq!(d.translate_pattern("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_blob_pattern() {
        assert_eq!(SqliteDialect.blob_glob_predicate("rset.elem"), "rset.elem glob ?");
        assert_eq!(
            PostgresDialect.blob_glob_predicate("rset.elem"),
            "convert_from(rset.elem, 'UTF8') like ? escape '\\'"
        );
        let sql = PostgresDialect.scan_query(
            "rset.id, rset.elem",
            "rset",
            "rset.id",
            &PostgresDialect.blob_glob_predicate("rset.elem"),
            "and rset.kid = ?",
        );
        assert_eq!(
            PostgresDialect.rebind(&sql),
            "select rset.id, rset.elem from rset where rset.id > $1 and \
             convert_from(rset.elem, 'UTF8') like $2 escape '\\' and rset.kid = $3 \
             order by rset.id asc limit $4"
        );
    }

    #[test]
    fn test_limit_offset() {
        assert_eq!(SqliteDialect.limit_offset(Some(5), 0), "limit 5");
        assert_eq!(SqliteDialect.limit_offset(None, 3), "limit -1 offset 3");
        assert_eq!(SqliteDialect.limit_offset(None, 0), "");
        assert_eq!(PostgresDialect.limit_offset(Some(5), 2), "limit 5 offset 2");
        assert_eq!(PostgresDialect.limit_offset(None, 3), "offset 3");
    }

    #[test]
    fn test_rebind() {
        let sql = "select id from rkey where key = ? and etime > ?";
        assert_eq!(SqliteDialect.rebind(sql), sql);
        assert_eq!(
            PostgresDialect.rebind(sql),
            "select id from rkey where key = $1 and etime > $2"
        );
        let sql = "select key from rkey where key like ? escape '?' limit ?";
        assert_eq!(
            PostgresDialect.rebind(sql),
            "select key from rkey where key like $1 escape '?' limit $2"
        );
    }

    #[test]
    fn test_scan_query() {
        let q = SqliteDialect.scan_query(
            "id, key",
            "rkey",
            "id",
            &SqliteDialect.glob_predicate("key"),
            "and type = ?",
        );
        assert_eq!(
            q,
            "select id, key from rkey where id > ? and key glob ? and type = ? \
             order by id asc limit ?"
        );
        let q = PostgresDialect.scan_query(
            "id, key",
            "rkey",
            "id",
            &PostgresDialect.glob_predicate("key"),
            "",
        );
        assert!(q.contains("key like ? escape '\\'"));
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(SqliteDialect.placeholders(3), "?, ?, ?");
        assert_eq!(PostgresDialect.placeholders(1), "?");
    }
}
