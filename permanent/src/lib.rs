//! Soft deletion for a small async ORM.
//!
//! Rows of a permanent model are never removed by default: deleting sets a
//! marker column, and every query set sees the table through one of three
//! views (active, deleted, all).
//!
//! ```ignore
//! #[derive(Clone, Permanent)]
//! #[permanent(table = "books")]
//! struct Book {
//!     id: Option<i64>,
//!     title: String,
//!     #[permanent(marker)]
//!     removed: Option<NaiveDateTime>,
//! }
//!
//! let db = Database::new(MemoryBackend::new()).with_registry(Registry::new().register::<Book>());
//! Book::objects(&db).filter(cond!(title = "Dune")).delete().await?;
//! assert_eq!(Book::deleted_objects(&db).count().await?, 1);
//! ```

pub mod backend;
pub mod cond;
pub mod config;
pub mod db;
pub mod deletion;
pub mod err;
pub mod lifecycle;
pub mod manager;
pub mod model;
pub mod query;
pub mod queryset;
pub mod signals;
pub(crate) mod sql;
pub mod value;

pub use backend::{Aggregate, Backend, MemoryBackend, SqliteBackend};
pub use cond::{Cond, OrderBy};
pub use config::{Settings, SoftDelete};
pub use db::Database;
pub use deletion::{Collector, DeleteResult};
pub use lifecycle::PermanentModel;
pub use manager::Manager;
pub use model::{
    ColumnMeta, ColumnType, ForeignKey, HasColumnType, Marker, Model, ModelMeta, ReferenceOption,
    Registry,
};
pub use permanent_macros::Permanent;
pub use query::{apply_view, Query, ViewKind};
pub use queryset::QuerySet;
pub use signals::{RestoreEvent, Signal, Signals};
pub use value::{FromValue, Row, Value};

#[doc(hidden)]
pub mod __private {
    pub use crate::model::column;
    pub use anyhow::Result;
    pub use once_cell::sync::Lazy;
}
