use anyhow::{ensure, Result};
use async_trait::async_trait;
use fxhash::FxHashMap;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use super::{Aggregate, Backend};
use crate::cond::OrderBy;
use crate::err::IntegrityError;
use crate::model::ModelMeta;
use crate::query::Query;
use crate::value::{Row, Value};

#[derive(Debug, Clone)]
struct Table {
    rows: Vec<Row>,
    next_id: i64,
}

impl Default for Table {
    fn default() -> Self {
        Table {
            rows: Vec::new(),
            next_id: 1,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    tables: FxHashMap<String, Table>,
    snapshots: Vec<FxHashMap<String, Table>>,
}

/// In-process tables; transactions are snapshots of every table.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
    writes: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> MemoryBackend {
        MemoryBackend::default()
    }

    /// Number of insert, update and delete statements executed so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Indexes of the rows a query selects, in query order.
fn target(table: &Table, query: &Query) -> Vec<usize> {
    let mut list: Vec<usize> = table
        .rows
        .iter()
        .enumerate()
        .filter(|(_, r)| query.matches(r))
        .map(|(i, _)| i)
        .collect();
    if !query.order_by().is_empty() {
        list.sort_by(|a, b| OrderBy::cmp_rows(query.order_by(), &table.rows[*a], &table.rows[*b]));
    }
    let list = list.into_iter().skip(query.offset().unwrap_or(0) as usize);
    match query.limit() {
        Some(limit) => list.take(limit as usize).collect(),
        None => list.collect(),
    }
}

fn check_unique(meta: &ModelMeta, rows: &[Row]) -> Result<()> {
    let names = std::iter::once(meta.primary_key.as_str())
        .chain(meta.unique_columns().map(|c| c.name.as_str()));
    for name in names {
        let mut seen = FxHashMap::default();
        for row in rows {
            let value = row.get(name).unwrap_or(&Value::Null);
            if value.is_null() {
                continue;
            }
            ensure!(
                seen.insert(value.key(), ()).is_none(),
                IntegrityError {
                    table: meta.table.clone(),
                    column: name.to_owned(),
                }
            );
        }
    }
    Ok(())
}

fn aggregate(rows: &[Row], aggregate: &Aggregate) -> Value {
    let values: Vec<&Value> = rows
        .iter()
        .filter_map(|r| r.get(aggregate.column()))
        .filter(|v| !v.is_null())
        .collect();
    match aggregate {
        Aggregate::Count(_) => Value::Int(values.len() as i64),
        Aggregate::Sum(_) => {
            if values.is_empty() {
                return Value::Null;
            }
            if values.iter().all(|v| matches!(v, Value::Int(_) | Value::Bool(_))) {
                Value::Int(values.iter().map(|v| i64_of(v)).sum())
            } else {
                Value::Float(values.iter().map(|v| f64_of(v)).sum())
            }
        }
        Aggregate::Min(_) => extreme(values, CmpOrdering::Less),
        Aggregate::Max(_) => extreme(values, CmpOrdering::Greater),
    }
}

fn i64_of(v: &Value) -> i64 {
    match v {
        Value::Int(v) => *v,
        Value::Bool(v) => *v as i64,
        _ => 0,
    }
}

fn f64_of(v: &Value) -> f64 {
    match v {
        Value::Int(v) => *v as f64,
        Value::Float(v) => *v,
        Value::Bool(v) => *v as i64 as f64,
        _ => 0.0,
    }
}

fn extreme(values: Vec<&Value>, wanted: CmpOrdering) -> Value {
    let mut result: Option<&Value> = None;
    for v in values {
        result = match result {
            Some(r) if v.compare(r) != Some(wanted) => Some(r),
            _ => Some(v),
        };
    }
    result.cloned().unwrap_or_default()
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn select(&self, meta: &ModelMeta, query: &Query) -> Result<Vec<Row>> {
        let state = self.state.lock().await;
        let Some(table) = state.tables.get(&meta.table) else {
            return Ok(Vec::new());
        };
        Ok(target(table, query)
            .into_iter()
            .map(|i| table.rows[i].clone())
            .collect())
    }

    async fn count(&self, meta: &ModelMeta, query: &Query) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state
            .tables
            .get(&meta.table)
            .map_or(0, |t| target(t, query).len() as u64))
    }

    async fn aggregate(
        &self,
        meta: &ModelMeta,
        query: &Query,
        agg: &Aggregate,
    ) -> Result<Value> {
        let rows = self.select(meta, query).await?;
        Ok(aggregate(&rows, agg))
    }

    async fn insert(&self, meta: &ModelMeta, row: &Row) -> Result<Row> {
        let mut state = self.state.lock().await;
        let table = state.tables.entry(meta.table.clone()).or_default();
        let mut stored = Row::new();
        for c in &meta.columns {
            stored.insert(c.name.clone(), Value::Null);
        }
        for (k, v) in row {
            stored.insert(k.clone(), v.clone());
        }
        match stored.get(&meta.primary_key).cloned().unwrap_or_default() {
            Value::Int(id) => table.next_id = table.next_id.max(id.saturating_add(1)),
            Value::Null => {
                stored.insert(meta.primary_key.clone(), Value::Int(table.next_id));
                table.next_id += 1;
            }
            _ => {}
        }
        let mut rows = table.rows.clone();
        rows.push(stored.clone());
        check_unique(meta, &rows)?;
        table.rows = rows;
        self.write();
        Ok(stored)
    }

    async fn update(
        &self,
        meta: &ModelMeta,
        query: &Query,
        values: &[(String, Value)],
    ) -> Result<u64> {
        let mut state = self.state.lock().await;
        self.write();
        let Some(table) = state.tables.get_mut(&meta.table) else {
            return Ok(0);
        };
        let target = target(table, query);
        let mut rows = table.rows.clone();
        for i in &target {
            for (k, v) in values {
                rows[*i].insert(k.clone(), v.clone());
            }
        }
        check_unique(meta, &rows)?;
        table.rows = rows;
        Ok(target.len() as u64)
    }

    async fn delete(&self, meta: &ModelMeta, query: &Query) -> Result<u64> {
        let mut state = self.state.lock().await;
        self.write();
        let Some(table) = state.tables.get_mut(&meta.table) else {
            return Ok(0);
        };
        let mut target = target(table, query);
        target.sort_unstable();
        for i in target.iter().rev() {
            table.rows.remove(*i);
        }
        Ok(target.len() as u64)
    }

    async fn begin(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let snapshot = state.tables.clone();
        state.snapshots.push(snapshot);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        ensure!(state.snapshots.pop().is_some(), "no transaction is open");
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.snapshots.pop() {
            Some(snapshot) => {
                state.tables = snapshot;
                Ok(())
            }
            None => anyhow::bail!("no transaction is open"),
        }
    }
}
