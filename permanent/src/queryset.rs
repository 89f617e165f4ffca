use anyhow::{ensure, Result};
use log::{debug, warn};
use std::fmt;

use crate::backend::Aggregate;
use crate::cond::{Cond, OrderBy};
use crate::db::Database;
use crate::deletion::{delete_atomic, DeleteResult};
use crate::err::{MultipleRowsReturned, PreconditionError, RowNotFound};
use crate::model::{Model, ModelMeta};
use crate::query::{apply_view, Query, ViewKind};
use crate::value::{Row, Value};

const MAX_GET_RESULTS: u64 = 21;

/// A lazily evaluated query over one model, seen through a view.
///
/// Builder methods return new query sets; the result cache of the source set
/// is never shared. Once unpatched, a query set and every clone derived from
/// it ignore the view predicate.
pub struct QuerySet<M: Model> {
    db: Database,
    query: Query,
    view: ViewKind,
    unpatched: bool,
    result_cache: Option<Vec<M>>,
}

impl<M: Model> Clone for QuerySet<M> {
    fn clone(&self) -> Self {
        let mut qs = QuerySet {
            db: self.db.clone(),
            query: self.query.clone(),
            view: self.view,
            unpatched: false,
            result_cache: None,
        };
        if self.unpatched {
            qs.unpatch();
        }
        qs
    }
}

impl<M: Model> fmt::Debug for QuerySet<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySet")
            .field("table", &M::meta().table)
            .field("view", &self.view)
            .field("unpatched", &self.unpatched)
            .field("query", &self.query)
            .finish()
    }
}

fn to_owned_values(values: &[(&str, Value)]) -> Vec<(String, Value)> {
    values
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn lookup_cond(lookup: &[(String, Value)]) -> Cond {
    Cond::And(lookup.iter().map(|(k, v)| Cond::eq(k, v)).collect())
}

/// Splits a row into the columns identifying an existing row and the rest.
///
/// Unique columns identify the row when the model declares any; otherwise
/// every supplied column does. The primary key and the marker are left out.
fn split_natural_key(meta: &ModelMeta, row: Row) -> (Vec<(String, Value)>, Vec<(String, Value)>) {
    let marker = meta.marker.as_ref().map(|m| m.field.as_str());
    let has_unique = meta.unique_columns().any(|c| row.contains_key(&c.name));
    let mut lookup = Vec::new();
    let mut defaults = Vec::new();
    for (k, v) in row {
        if Some(k.as_str()) == marker || (k == meta.primary_key && v.is_null()) {
            continue;
        }
        let is_key = !has_unique || meta.column_meta(&k).map_or(false, |c| c.unique);
        if is_key {
            lookup.push((k, v));
        } else {
            defaults.push((k, v));
        }
    }
    (lookup, defaults)
}

impl<M: Model> QuerySet<M> {
    pub fn new(db: &Database, view: ViewKind) -> QuerySet<M> {
        Self::from_query(db, view, Query::new())
    }

    pub fn from_query(db: &Database, view: ViewKind, query: Query) -> QuerySet<M> {
        QuerySet {
            db: db.clone(),
            query: apply_view(query, view, M::meta().marker.as_ref()),
            view,
            unpatched: false,
            result_cache: None,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn view(&self) -> ViewKind {
        self.view
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn is_unpatched(&self) -> bool {
        self.unpatched
    }

    /// ANDs a condition into the query.
    pub fn patch(&mut self, cond: Cond) {
        self.query.add_cond(cond);
    }

    /// Drops the view predicate. Does nothing more when there is none.
    pub fn unpatch(&mut self) {
        self.unpatched = true;
        self.query.remove_view_cond();
    }

    pub fn unpatched(&self) -> QuerySet<M> {
        let mut qs = self.clone();
        qs.unpatch();
        qs
    }

    pub fn all(&self) -> QuerySet<M> {
        self.clone()
    }

    pub fn filter(&self, cond: Cond) -> QuerySet<M> {
        let mut qs = self.clone();
        qs.patch(cond);
        qs
    }

    pub fn exclude(&self, cond: Cond) -> QuerySet<M> {
        self.filter(Cond::Not(Box::new(cond)))
    }

    pub fn order_by(&self, order_by: Vec<OrderBy>) -> QuerySet<M> {
        let mut qs = self.clone();
        qs.query.set_order_by(order_by);
        qs
    }

    pub fn limit(&self, limit: u64) -> QuerySet<M> {
        let mut qs = self.clone();
        qs.query.set_limit(Some(limit));
        qs
    }

    pub fn offset(&self, offset: u64) -> QuerySet<M> {
        let mut qs = self.clone();
        qs.query.set_offset(Some(offset));
        qs
    }

    fn check_query(&self) -> Result<()> {
        let meta = M::meta();
        for cond in self.query.conditions() {
            meta.check_columns(cond.columns())?;
        }
        meta.check_columns(self.query.order_by().iter().map(|o| o.column()))
    }

    async fn select_rows(&self) -> Result<Vec<M>> {
        self.check_query()?;
        let rows = self.db.backend().select(M::meta(), &self.query).await?;
        rows.iter().map(M::from_row).collect()
    }

    /// Evaluates the query once and keeps the rows for later reads.
    pub async fn fetch(&mut self) -> Result<&[M]> {
        if self.result_cache.is_none() {
            let list = self.select_rows().await?;
            self.result_cache = Some(list);
        }
        Ok(self.result_cache.as_deref().unwrap_or_default())
    }

    pub fn cached(&self) -> Option<&[M]> {
        self.result_cache.as_deref()
    }

    pub async fn select(&self) -> Result<Vec<M>> {
        match &self.result_cache {
            Some(list) => Ok(list.clone()),
            None => self.select_rows().await,
        }
    }

    /// The first row, by primary key unless an ordering is set.
    pub async fn first(&self) -> Result<Option<M>> {
        let mut qs = self.limit(1);
        if qs.query.order_by().is_empty() {
            qs.query
                .set_order_by(vec![OrderBy::asc(&M::meta().primary_key)]);
        }
        Ok(qs.select_rows().await?.into_iter().next())
    }

    pub async fn get_optional(&self, cond: Cond) -> Result<Option<M>> {
        let qs = self.filter(cond).limit(MAX_GET_RESULTS);
        let mut list = qs.select_rows().await?;
        ensure!(
            list.len() <= 1,
            MultipleRowsReturned {
                table: M::meta().table.clone(),
                count: list.len(),
            }
        );
        Ok(list.pop())
    }

    pub async fn get(&self, cond: Cond) -> Result<M> {
        let filter = format!("{:?}", cond);
        match self.get_optional(cond).await? {
            Some(obj) => Ok(obj),
            None => Err(RowNotFound::new(&M::meta().table, filter).into()),
        }
    }

    pub async fn count(&self) -> Result<u64> {
        if let Some(list) = &self.result_cache {
            return Ok(list.len() as u64);
        }
        self.check_query()?;
        self.db.backend().count(M::meta(), &self.query).await
    }

    pub async fn exists(&self) -> Result<bool> {
        Ok(self.count().await? > 0)
    }

    pub async fn aggregate(&self, aggregate: Aggregate) -> Result<Value> {
        self.check_query()?;
        M::meta().check_columns([aggregate.column()])?;
        self.db
            .backend()
            .aggregate(M::meta(), &self.query, &aggregate)
            .await
    }

    /// Bulk update. An update touching the marker runs against the whole table.
    pub async fn update(&mut self, values: &[(&str, Value)]) -> Result<u64> {
        ensure!(self.query.can_filter(), PreconditionError::SlicedUpdate);
        let meta = M::meta();
        meta.check_columns(values.iter().map(|(k, _)| *k))?;
        self.check_query()?;
        let mut query = self.query.clone();
        let touches_marker = meta
            .marker
            .as_ref()
            .map_or(false, |m| values.iter().any(|(k, _)| *k == m.field));
        if touches_marker && !self.unpatched {
            query.remove_view_cond();
        }
        query.clear_ordering();
        let rows = self
            .db
            .backend()
            .update(meta, &query, &to_owned_values(values))
            .await?;
        self.result_cache = None;
        Ok(rows)
    }

    async fn delete_with(&mut self, force: bool) -> Result<DeleteResult> {
        ensure!(self.query.can_filter(), PreconditionError::LimitedDelete);
        self.check_query()?;
        let mut del_query = self.clone();
        del_query.query.clear_ordering();
        let result = delete_atomic(&self.db, M::meta(), &del_query.query, force).await;
        self.result_cache = None;
        result
    }

    /// Soft deletes the matching rows and their dependents.
    pub async fn delete(&mut self) -> Result<DeleteResult> {
        self.delete_with(false).await
    }

    /// Physically deletes the matching rows and their dependents.
    pub async fn force_delete(&mut self) -> Result<DeleteResult> {
        self.delete_with(true).await
    }

    /// Sets the marker of every matching row back to alive, without signals.
    pub async fn restore(&mut self) -> Result<u64> {
        let meta = M::meta();
        let marker = meta.marker.as_ref().ok_or_else(|| PreconditionError::NotPermanent {
            table: meta.table.clone(),
        })?;
        let rows = self
            .update(&[(marker.field.as_str(), marker.alive.clone())])
            .await?;
        debug!("RESTORE {} {} rows", meta.table, rows);
        Ok(rows)
    }

    async fn insert_row(&self, mut row: Row) -> Result<M> {
        let meta = M::meta();
        meta.check_columns(row.keys().map(|k| k.as_str()))?;
        if row.get(&meta.primary_key).map_or(false, |v| v.is_null()) {
            row.shift_remove(&meta.primary_key);
        }
        if let Some(marker) = &meta.marker {
            let unset = row.get(&marker.field).map_or(true, |v| v.is_null());
            if unset {
                row.insert(marker.field.clone(), marker.alive.clone());
            }
        }
        let stored = self.db.backend().insert(meta, &row).await?;
        M::from_row(&stored)
    }

    /// Inserts `obj`; with `restore_on_create` a soft deleted row sharing its
    /// natural key is restored instead.
    pub async fn create(&self, obj: &M) -> Result<M> {
        let meta = M::meta();
        let row = obj.to_row();
        if let Some(marker) = &meta.marker {
            let supplied = row
                .get(&marker.field)
                .map_or(false, |v| !marker.is_alive(v));
            if meta.restore_on_create && !self.unpatched && !supplied {
                let (lookup, defaults) = split_natural_key(meta, row);
                let (obj, _) = self
                    .unpatched()
                    .get_restore_or_create_row(lookup, defaults)
                    .await?;
                return Ok(obj);
            }
        }
        self.insert_row(row).await
    }

    pub async fn get_or_create(
        &self,
        lookup: &[(&str, Value)],
        defaults: &[(&str, Value)],
    ) -> Result<(M, bool)> {
        self.get_or_create_row(to_owned_values(lookup), to_owned_values(defaults))
            .await
    }

    async fn get_or_create_row(
        &self,
        lookup: Vec<(String, Value)>,
        defaults: Vec<(String, Value)>,
    ) -> Result<(M, bool)> {
        let cond = lookup_cond(&lookup);
        if let Some(obj) = self.get_optional(cond.clone()).await? {
            return Ok((obj, false));
        }
        let row: Row = lookup.into_iter().chain(defaults).collect();
        let backend = self.db.backend();
        backend.begin().await?;
        match self.insert_row(row).await {
            Ok(obj) => {
                backend.commit().await?;
                Ok((obj, true))
            }
            Err(e) => {
                warn!("get_or_create on {} rolled back: {}", M::meta().table, e);
                backend.rollback().await?;
                match self.get_optional(cond).await? {
                    Some(obj) => Ok((obj, false)),
                    None => Err(e),
                }
            }
        }
    }

    /// get_or_create over the whole table; a soft deleted match is restored.
    pub async fn get_restore_or_create(
        &self,
        lookup: &[(&str, Value)],
        defaults: &[(&str, Value)],
    ) -> Result<(M, bool)> {
        self.get_restore_or_create_row(to_owned_values(lookup), to_owned_values(defaults))
            .await
    }

    async fn get_restore_or_create_row(
        &self,
        lookup: Vec<(String, Value)>,
        defaults: Vec<(String, Value)>,
    ) -> Result<(M, bool)> {
        let meta = M::meta();
        let (obj, created) = self.unpatched().get_or_create_row(lookup, defaults).await?;
        let Some(marker) = meta.marker.as_ref().filter(|_| !created) else {
            return Ok((obj, created));
        };
        let mut row = obj.to_row();
        let deleted = row
            .get(&marker.field)
            .map_or(true, |v| !marker.is_alive(v));
        if !deleted {
            return Ok((obj, false));
        }
        let signals = self.db.signals();
        signals.pre_restore.send(&meta.label, &row).await?;
        row.insert(marker.field.clone(), marker.alive.clone());
        let obj = M::from_row(&row)?;
        let pk = row.get(&meta.primary_key).cloned().unwrap_or_default();
        QuerySet::<M>::new(&self.db, ViewKind::All)
            .filter(Cond::eq(&meta.primary_key, pk.clone()))
            .update(&[(marker.field.as_str(), marker.alive.clone())])
            .await?;
        debug!("RESTORE {} {}", meta.table, pk);
        signals.post_restore.send(&meta.label, &row).await?;
        Ok((obj, false))
    }
}
