use anyhow::{ensure, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use log::debug;
use sqlx::query::Query as SqlxQuery;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{ColumnIndex, ConnectOptions, Executor, Row as _, TypeInfo, ValueRef};
use std::str::FromStr;
use tokio::sync::Mutex;

use super::{Aggregate, Backend};
use crate::cond::Cond;
use crate::model::{ColumnType, ModelMeta};
use crate::query::Query;
use crate::sql;
use crate::value::{Row, Value};

struct Inner {
    conn: SqliteConnection,
    depth: usize,
}

/// SQLite through one `sqlx` connection; nested transactions use savepoints.
pub struct SqliteBackend {
    inner: Mutex<Inner>,
}

type SqliteQuery<'q> = SqlxQuery<'q, Sqlite, SqliteArguments<'q>>;

fn bind<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    debug!("bind:{:?}", value);
    match value.clone() {
        Value::Null => query.bind(None::<i64>),
        Value::Bool(v) => query.bind(v),
        Value::Int(v) => query.bind(v),
        Value::Float(v) => query.bind(v),
        Value::DateTime(v) => query.bind(v),
        Value::Text(v) => query.bind(v),
    }
}

fn decode_value<I>(row: &SqliteRow, index: I, ty: ColumnType) -> Result<Value>
where
    I: ColumnIndex<SqliteRow>,
{
    Ok(match ty {
        ColumnType::Bool => row.try_get::<Option<bool>, _>(index)?.into(),
        ColumnType::Int => row.try_get::<Option<i64>, _>(index)?.into(),
        ColumnType::Float => row.try_get::<Option<f64>, _>(index)?.into(),
        ColumnType::Text => row.try_get::<Option<String>, _>(index)?.into(),
        ColumnType::DateTime => row.try_get::<Option<NaiveDateTime>, _>(index)?.into(),
    })
}

/// Decodes a computed column by its storage class.
fn decode_any(row: &SqliteRow, index: usize) -> Result<Value> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let ty = raw.type_info().name().to_owned();
    Ok(match ty.as_str() {
        "INTEGER" | "BOOLEAN" => Value::Int(row.try_get::<i64, _>(index)?),
        "REAL" | "NUMERIC" => Value::Float(row.try_get::<f64, _>(index)?),
        _ => Value::Text(row.try_get::<String, _>(index)?),
    })
}

fn decode_row(meta: &ModelMeta, row: &SqliteRow) -> Result<Row> {
    let mut result = Row::with_capacity(meta.columns.len());
    for c in &meta.columns {
        result.insert(c.name.clone(), decode_value(row, c.name.as_str(), c.ty)?);
    }
    Ok(result)
}

impl SqliteBackend {
    /// Opens `url`, e.g. `sqlite::memory:` or `sqlite://data.db`, creating the file when missing.
    pub async fn connect(url: &str) -> Result<SqliteBackend> {
        let conn = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .connect()
            .await?;
        Ok(SqliteBackend {
            inner: Mutex::new(Inner { conn, depth: 0 }),
        })
    }

    /// Runs raw SQL such as DDL.
    pub async fn execute(&self, sql: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        debug!("{}", sql);
        inner.conn.execute(sql).await?;
        Ok(())
    }

    async fn fetch(&self, meta: &ModelMeta, sql: &str, binds: &[Value]) -> Result<Vec<Row>> {
        let mut inner = self.inner.lock().await;
        debug!("{}", sql);
        let mut query = sqlx::query(sql);
        for value in binds {
            query = bind(query, value);
        }
        let rows = query.fetch_all(&mut inner.conn).await?;
        rows.iter().map(|r| decode_row(meta, r)).collect()
    }

    /// First column of the first row, decoded as `ty` when given.
    async fn fetch_scalar(
        &self,
        sql: &str,
        binds: &[Value],
        ty: Option<ColumnType>,
    ) -> Result<Value> {
        let mut inner = self.inner.lock().await;
        debug!("{}", sql);
        let mut query = sqlx::query(sql);
        for value in binds {
            query = bind(query, value);
        }
        let row = query.fetch_one(&mut inner.conn).await?;
        match ty {
            Some(ty) => decode_value(&row, 0, ty),
            None => decode_any(&row, 0),
        }
    }

    async fn write(&self, sql: &str, binds: &[Value]) -> Result<(u64, i64)> {
        let mut inner = self.inner.lock().await;
        debug!("{}", sql);
        let mut query = sqlx::query(sql);
        for value in binds {
            query = bind(query, value);
        }
        let result = query.execute(&mut inner.conn).await?;
        Ok((result.rows_affected(), result.last_insert_rowid()))
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn select(&self, meta: &ModelMeta, query: &Query) -> Result<Vec<Row>> {
        let mut binds = Vec::new();
        let sql = sql::select_sql(meta, query, &mut binds);
        self.fetch(meta, &sql, &binds).await
    }

    async fn count(&self, meta: &ModelMeta, query: &Query) -> Result<u64> {
        let mut binds = Vec::new();
        let sql = sql::count_sql(meta, query, &mut binds);
        match self.fetch_scalar(&sql, &binds, None).await? {
            Value::Int(v) => Ok(v as u64),
            v => anyhow::bail!("unexpected count: {:?}", v),
        }
    }

    async fn aggregate(
        &self,
        meta: &ModelMeta,
        query: &Query,
        aggregate: &Aggregate,
    ) -> Result<Value> {
        let mut binds = Vec::new();
        let sql = sql::aggregate_sql(meta, query, aggregate, &mut binds);
        let column_type = meta.column_meta(aggregate.column()).map(|c| c.ty);
        let ty = match aggregate {
            Aggregate::Count(_) => Some(ColumnType::Int),
            Aggregate::Sum(_) => match column_type {
                Some(ColumnType::Int | ColumnType::Bool) => Some(ColumnType::Int),
                Some(ColumnType::Float) => Some(ColumnType::Float),
                _ => None,
            },
            Aggregate::Min(_) | Aggregate::Max(_) => column_type,
        };
        self.fetch_scalar(&sql, &binds, ty).await
    }

    async fn insert(&self, meta: &ModelMeta, row: &Row) -> Result<Row> {
        let mut binds = Vec::new();
        let sql = sql::insert_sql(meta, row, &mut binds);
        let (_, rowid) = self.write(&sql, &binds).await?;
        let pk = match row.get(&meta.primary_key) {
            Some(v) if !v.is_null() => v.clone(),
            _ => Value::Int(rowid),
        };
        let mut query = Query::new();
        query.add_cond(Cond::eq(&meta.primary_key, pk));
        let mut rows = self.select(meta, &query).await?;
        ensure!(rows.len() == 1, "inserted row of {} not found", meta.table);
        Ok(rows.remove(0))
    }

    async fn update(
        &self,
        meta: &ModelMeta,
        query: &Query,
        values: &[(String, Value)],
    ) -> Result<u64> {
        let mut binds = Vec::new();
        let sql = sql::update_sql(meta, query, values, &mut binds);
        Ok(self.write(&sql, &binds).await?.0)
    }

    async fn delete(&self, meta: &ModelMeta, query: &Query) -> Result<u64> {
        let mut binds = Vec::new();
        let sql = sql::delete_sql(meta, query, &mut binds);
        Ok(self.write(&sql, &binds).await?.0)
    }

    async fn begin(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let sql = if inner.depth == 0 {
            "BEGIN".to_owned()
        } else {
            format!("SAVEPOINT sp_{}", inner.depth)
        };
        debug!("{}", sql);
        inner.conn.execute(sql.as_str()).await?;
        inner.depth += 1;
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        ensure!(inner.depth > 0, "no transaction is open");
        inner.depth -= 1;
        let sql = if inner.depth == 0 {
            "COMMIT".to_owned()
        } else {
            format!("RELEASE SAVEPOINT sp_{}", inner.depth)
        };
        debug!("{}", sql);
        inner.conn.execute(sql.as_str()).await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        ensure!(inner.depth > 0, "no transaction is open");
        inner.depth -= 1;
        let sql = if inner.depth == 0 {
            "ROLLBACK".to_owned()
        } else {
            format!(
                "ROLLBACK TO SAVEPOINT sp_{0}; RELEASE SAVEPOINT sp_{0}",
                inner.depth
            )
        };
        debug!("{}", sql);
        inner.conn.execute(sql.as_str()).await?;
        Ok(())
    }
}
