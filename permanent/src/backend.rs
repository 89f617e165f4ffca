use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::ModelMeta;
use crate::query::Query;
use crate::value::{Row, Value};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregate {
    /// Non-null values of the column.
    Count(String),
    Sum(String),
    Min(String),
    Max(String),
}

impl Aggregate {
    pub fn column(&self) -> &str {
        match self {
            Aggregate::Count(c) | Aggregate::Sum(c) | Aggregate::Min(c) | Aggregate::Max(c) => c,
        }
    }
}

/// The relational store a query set executes against.
///
/// Transactions nest: a `begin` inside an open transaction opens a savepoint
/// that the matching `commit` or `rollback` closes.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn select(&self, meta: &ModelMeta, query: &Query) -> Result<Vec<Row>>;
    async fn count(&self, meta: &ModelMeta, query: &Query) -> Result<u64>;
    async fn aggregate(&self, meta: &ModelMeta, query: &Query, aggregate: &Aggregate)
        -> Result<Value>;
    /// Inserts a row and returns it as stored, generated primary key included.
    async fn insert(&self, meta: &ModelMeta, row: &Row) -> Result<Row>;
    async fn update(&self, meta: &ModelMeta, query: &Query, values: &[(String, Value)])
        -> Result<u64>;
    async fn delete(&self, meta: &ModelMeta, query: &Query) -> Result<u64>;
    async fn begin(&self) -> Result<()>;
    async fn commit(&self) -> Result<()>;
    async fn rollback(&self) -> Result<()>;
}
