use anyhow::Result;
use fxhash::FxHashSet;
use indexmap::IndexMap;
use log::{debug, warn};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::cond::Cond;
use crate::db::Database;
use crate::err::ProtectedError;
use crate::model::{ModelMeta, ReferenceOption};
use crate::query::{apply_view, Query, ViewKind};
use crate::value::Value;

pub const IN_CONDITION_LIMIT: usize = 500;

/// Total rows affected and the count per model label.
pub type DeleteResult = (u64, BTreeMap<String, u64>);

struct Collected {
    meta: Arc<ModelMeta>,
    pks: Vec<Value>,
    seen: FxHashSet<String>,
}

struct FieldUpdate {
    meta: Arc<ModelMeta>,
    column: String,
    value: Value,
    pks: Vec<Value>,
}

struct Restricted {
    table: String,
    meta: Arc<ModelMeta>,
    pks: Vec<Value>,
}

/// Finds the rows a delete reaches through reverse foreign keys.
pub struct Collector<'a> {
    db: &'a Database,
    force: bool,
    data: IndexMap<String, Collected>,
    field_updates: Vec<FieldUpdate>,
    restricted: Vec<Restricted>,
}

fn pk_chunks(pks: &[Value]) -> impl Iterator<Item = &[Value]> {
    pks.chunks(IN_CONDITION_LIMIT)
}

fn pks_to_str(pks: &[Value]) -> String {
    pks.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl<'a> Collector<'a> {
    pub fn new(db: &'a Database, force: bool) -> Collector<'a> {
        Collector {
            db,
            force,
            data: IndexMap::new(),
            field_updates: Vec::new(),
            restricted: Vec::new(),
        }
    }

    /// Primary keys collected for a table so far.
    pub fn instances(&self, table: &str) -> &[Value] {
        self.data
            .get(table)
            .map(|c| c.pks.as_slice())
            .unwrap_or(&[])
    }

    /// Adds new primary keys of a model; returns the ones not seen before.
    fn add(&mut self, meta: &Arc<ModelMeta>, pks: Vec<Value>) -> Vec<Value> {
        let collected = self
            .data
            .entry(meta.table.clone())
            .or_insert_with(|| Collected {
                meta: meta.clone(),
                pks: Vec::new(),
                seen: FxHashSet::default(),
            });
        let mut added = Vec::new();
        for pk in pks {
            if collected.seen.insert(pk.key()) {
                collected.pks.push(pk.clone());
                added.push(pk);
            }
        }
        added
    }

    fn is_collected(&self, table: &str, pk: &Value) -> bool {
        self.data
            .get(table)
            .map_or(false, |c| c.seen.contains(&pk.key()))
    }

    async fn select_pks(&self, meta: &ModelMeta, query: &Query) -> Result<Vec<Value>> {
        let rows = self.db.backend().select(meta, query).await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut r| r.swap_remove(&meta.primary_key))
            .filter(|v| !v.is_null())
            .collect())
    }

    /// Collects the rows matching `query` and, breadth-first, every row depending on them.
    pub async fn collect(&mut self, meta: Arc<ModelMeta>, query: &Query) -> Result<()> {
        let pks = self.select_pks(&meta, query).await?;
        let added = self.add(&meta, pks);
        let mut queue = VecDeque::new();
        queue.push_back((meta, added));

        while let Some((meta, pks)) = queue.pop_front() {
            if pks.is_empty() {
                continue;
            }
            let soft = meta.is_permanent() && !self.force;
            for (dep, fk) in self.db.registry().dependents(&meta.table) {
                let kind = if soft && dep.is_permanent() {
                    ViewKind::Active
                } else {
                    ViewKind::All
                };
                let mut found = Vec::new();
                for chunk in pk_chunks(&pks) {
                    let mut q = apply_view(Query::new(), kind, dep.marker.as_ref());
                    q.add_cond(Cond::In(fk.column.clone(), chunk.to_vec()));
                    found.extend(self.select_pks(&dep, &q).await?);
                }
                if found.is_empty() {
                    continue;
                }
                match fk.on_delete {
                    ReferenceOption::Cascade => {
                        let added = self.add(&dep, found);
                        queue.push_back((dep, added));
                    }
                    ReferenceOption::SetNull | ReferenceOption::SetZero => {
                        let value = if fk.on_delete == ReferenceOption::SetNull {
                            Value::Null
                        } else {
                            Value::Int(0)
                        };
                        self.field_updates.push(FieldUpdate {
                            meta: dep,
                            column: fk.column.clone(),
                            value,
                            pks: found,
                        });
                    }
                    ReferenceOption::Restrict => {
                        self.restricted.push(Restricted {
                            table: meta.table.clone(),
                            meta: dep,
                            pks: found,
                        });
                    }
                }
            }
        }

        for r in &self.restricted {
            let count = r
                .pks
                .iter()
                .filter(|pk| !self.is_collected(&r.meta.table, pk))
                .count();
            anyhow::ensure!(
                count == 0,
                ProtectedError {
                    table: r.table.clone(),
                    referenced_by: r.meta.table.clone(),
                    count,
                }
            );
        }
        Ok(())
    }

    /// Applies the collected deletes, dependents first.
    pub async fn delete(self) -> Result<DeleteResult> {
        let backend = self.db.backend();
        for update in &self.field_updates {
            for chunk in pk_chunks(&update.pks) {
                let mut q = Query::new();
                q.add_cond(Cond::In(update.meta.primary_key.clone(), chunk.to_vec()));
                let values = vec![(update.column.clone(), update.value.clone())];
                backend.update(&update.meta, &q, &values).await?;
            }
            debug!(
                "UPDATE {} SET {} = {} {}",
                update.meta.table,
                update.column,
                update.value,
                pks_to_str(&update.pks)
            );
        }

        let mut total = 0u64;
        let mut counts = BTreeMap::new();
        for (table, collected) in self.data.iter().rev() {
            let meta = &collected.meta;
            let mut rows_affected = 0u64;
            let marker = meta.marker.as_ref().filter(|_| !self.force);
            for chunk in pk_chunks(&collected.pks) {
                let mut q = Query::new();
                q.add_cond(Cond::In(meta.primary_key.clone(), chunk.to_vec()));
                rows_affected += match marker {
                    Some(marker) => {
                        let values = vec![(marker.field.clone(), marker.deleted_value())];
                        backend.update(meta, &q, &values).await?
                    }
                    None => backend.delete(meta, &q).await?,
                };
            }
            if marker.is_some() {
                debug!("DELETE {} {}", table, pks_to_str(&collected.pks));
            } else {
                debug!("FORCE DELETE {} {}", table, pks_to_str(&collected.pks));
            }
            total += rows_affected;
            *counts.entry(meta.label.clone()).or_insert(0) += rows_affected;
        }
        Ok((total, counts))
    }
}

/// Collects and deletes in one transaction, rolled back on any error.
pub async fn delete_atomic(
    db: &Database,
    meta: &ModelMeta,
    query: &Query,
    force: bool,
) -> Result<DeleteResult> {
    let meta = db.registry().resolve(meta);
    let backend = db.backend();
    backend.begin().await?;
    let result = async {
        let mut collector = Collector::new(db, force);
        collector.collect(meta.clone(), query).await?;
        collector.delete().await
    }
    .await;
    match result {
        Ok(result) => {
            backend.commit().await?;
            Ok(result)
        }
        Err(e) => {
            warn!("delete on {} rolled back: {}", meta.table, e);
            if let Err(re) = backend.rollback().await {
                warn!("rollback failed: {}", re);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::SoftDelete;
    use crate::cond;
    use crate::model::{ColumnType, Marker, Registry};
    use crate::value::Row;

    fn authors() -> ModelMeta {
        ModelMeta::new("authors")
            .label("Author")
            .column("id", ColumnType::Int)
            .column("name", ColumnType::Text)
            .marker(Marker::new("removed", SoftDelete::Time))
    }

    fn books() -> ModelMeta {
        ModelMeta::new("books")
            .label("Book")
            .column("id", ColumnType::Int)
            .column("author_id", ColumnType::Int)
            .foreign_key("author_id", "authors", ReferenceOption::Cascade)
            .marker(Marker::new("removed", SoftDelete::Time))
    }

    fn reviews(on_delete: ReferenceOption) -> ModelMeta {
        ModelMeta::new("reviews")
            .label("Review")
            .column("id", ColumnType::Int)
            .column("book_id", ColumnType::Int)
            .foreign_key("book_id", "books", on_delete)
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    async fn setup(on_delete: ReferenceOption) -> Result<Database> {
        let registry = Registry::new()
            .register_meta(authors())
            .register_meta(books())
            .register_meta(reviews(on_delete));
        let db = Database::new(MemoryBackend::new()).with_registry(registry);
        let b = db.backend();
        b.insert(&authors(), &row(&[("name", "a".into())])).await?;
        b.insert(&books(), &row(&[("author_id", 1.into())])).await?;
        b.insert(&books(), &row(&[("author_id", 1.into())])).await?;
        b.insert(&reviews(on_delete), &row(&[("book_id", 2.into())])).await?;
        Ok(db)
    }

    fn by_id(id: i64) -> Query {
        let mut q = Query::new();
        q.add_cond(cond!(id = id));
        q
    }

    #[tokio::test]
    async fn test_cascade() -> Result<()> {
        let db = setup(ReferenceOption::Cascade).await?;
        let (total, counts) = delete_atomic(&db, &authors(), &by_id(1), false).await?;
        assert_eq!(total, 4);
        assert_eq!(counts.get("Author"), Some(&1));
        assert_eq!(counts.get("Book"), Some(&2));
        assert_eq!(counts.get("Review"), Some(&1));

        let b = db.backend();
        let alive = apply_view(Query::new(), ViewKind::Active, books().marker.as_ref());
        assert_eq!(b.count(&books(), &alive).await?, 0);
        assert_eq!(b.count(&books(), &Query::new()).await?, 2);
        assert_eq!(b.count(&reviews(ReferenceOption::Cascade), &Query::new()).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_restrict() -> Result<()> {
        let db = setup(ReferenceOption::Restrict).await?;
        let err = delete_atomic(&db, &authors(), &by_id(1), false)
            .await
            .unwrap_err();
        let err = err.downcast_ref::<ProtectedError>().unwrap();
        assert_eq!(err.table, "books");
        assert_eq!(err.referenced_by, "reviews");
        assert_eq!(err.count, 1);
        let alive = apply_view(Query::new(), ViewKind::Active, books().marker.as_ref());
        assert_eq!(db.backend().count(&books(), &alive).await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_set_null() -> Result<()> {
        let db = setup(ReferenceOption::SetNull).await?;
        let mut collector = Collector::new(&db, false);
        collector
            .collect(Arc::new(books()), &by_id(2))
            .await?;
        assert_eq!(collector.instances("books"), &[Value::Int(2)]);
        assert!(collector.instances("reviews").is_empty());
        let (total, _) = collector.delete().await?;
        assert_eq!(total, 1);
        let meta = reviews(ReferenceOption::SetNull);
        let rows = db.backend().select(&meta, &Query::new()).await?;
        assert_eq!(rows[0]["book_id"], Value::Null);
        Ok(())
    }

    #[tokio::test]
    async fn test_set_zero() -> Result<()> {
        let db = setup(ReferenceOption::SetZero).await?;
        let (total, counts) = delete_atomic(&db, &authors(), &by_id(1), false).await?;
        assert_eq!(total, 3);
        assert_eq!(counts.get("Review"), None);
        let meta = reviews(ReferenceOption::SetZero);
        let rows = db.backend().select(&meta, &Query::new()).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["book_id"], Value::Int(0));
        Ok(())
    }

    #[tokio::test]
    async fn test_force() -> Result<()> {
        let db = setup(ReferenceOption::Cascade).await?;
        let (total, _) = delete_atomic(&db, &authors(), &by_id(1), true).await?;
        assert_eq!(total, 4);
        assert_eq!(db.backend().count(&books(), &Query::new()).await?, 0);
        assert_eq!(db.backend().count(&authors(), &Query::new()).await?, 0);
        Ok(())
    }
}
