use anyhow::Result;
use std::marker::PhantomData;

use crate::cond::{Cond, OrderBy};
use crate::db::Database;
use crate::model::Model;
use crate::query::ViewKind;
use crate::queryset::QuerySet;
use crate::value::Value;

/// Entry point to one view of a model's table.
pub struct Manager<M: Model> {
    db: Database,
    view: ViewKind,
    _phantom: PhantomData<fn() -> M>,
}

impl<M: Model> Clone for Manager<M> {
    fn clone(&self) -> Self {
        Manager {
            db: self.db.clone(),
            view: self.view,
            _phantom: PhantomData,
        }
    }
}

impl<M: Model> Manager<M> {
    pub fn new(db: &Database, view: ViewKind) -> Manager<M> {
        Manager {
            db: db.clone(),
            view,
            _phantom: PhantomData,
        }
    }

    pub fn view(&self) -> ViewKind {
        self.view
    }

    pub fn get_queryset(&self) -> QuerySet<M> {
        QuerySet::new(&self.db, self.view)
    }

    pub fn all(&self) -> QuerySet<M> {
        self.get_queryset()
    }

    pub fn filter(&self, cond: Cond) -> QuerySet<M> {
        self.get_queryset().filter(cond)
    }

    pub fn exclude(&self, cond: Cond) -> QuerySet<M> {
        self.get_queryset().exclude(cond)
    }

    pub fn order_by(&self, order_by: Vec<OrderBy>) -> QuerySet<M> {
        self.get_queryset().order_by(order_by)
    }

    pub async fn get(&self, cond: Cond) -> Result<M> {
        self.get_queryset().get(cond).await
    }

    pub async fn count(&self) -> Result<u64> {
        self.get_queryset().count().await
    }

    pub async fn create(&self, obj: &M) -> Result<M> {
        self.get_queryset().create(obj).await
    }

    pub async fn get_or_create(
        &self,
        lookup: &[(&str, Value)],
        defaults: &[(&str, Value)],
    ) -> Result<(M, bool)> {
        self.get_queryset().get_or_create(lookup, defaults).await
    }

    pub async fn restore(&self) -> Result<u64> {
        self.get_queryset().restore().await
    }

    pub async fn get_restore_or_create(
        &self,
        lookup: &[(&str, Value)],
        defaults: &[(&str, Value)],
    ) -> Result<(M, bool)> {
        self.get_queryset()
            .get_restore_or_create(lookup, defaults)
            .await
    }
}
