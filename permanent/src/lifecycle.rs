use anyhow::{ensure, Result};
use async_trait::async_trait;
use log::debug;

use crate::cond::Cond;
use crate::db::Database;
use crate::deletion::{delete_atomic, DeleteResult};
use crate::err::PreconditionError;
use crate::model::Model;
use crate::query::Query;
use crate::value::Value;

/// Operations on a single loaded entity.
#[async_trait]
pub trait PermanentModel: Model {
    fn pk_value(&self) -> Value;

    fn is_deleted(&self) -> bool;

    /// Soft deletes the entity and its dependents, or physically deletes them with `force`.
    async fn delete(&self, db: &Database, force: bool) -> Result<DeleteResult>;

    /// Brings the entity back to life; returns false when it already was alive.
    async fn restore(&mut self, db: &Database) -> Result<bool>;

    /// Writes every column but the primary key.
    async fn save(&self, db: &Database) -> Result<u64>;
}

fn ensure_pk<M: Model>(pk: &Value) -> Result<()> {
    ensure!(
        !pk.is_null(),
        PreconditionError::MissingPrimaryKey {
            table: M::meta().table.clone(),
        }
    );
    Ok(())
}

#[async_trait]
impl<M: Model> PermanentModel for M {
    fn pk_value(&self) -> Value {
        self.to_row()
            .swap_remove(&M::meta().primary_key)
            .unwrap_or_default()
    }

    fn is_deleted(&self) -> bool {
        match &M::meta().marker {
            Some(marker) => {
                let row = self.to_row();
                !marker.is_alive(row.get(&marker.field).unwrap_or(&Value::Null))
            }
            None => false,
        }
    }

    async fn delete(&self, db: &Database, force: bool) -> Result<DeleteResult> {
        let meta = M::meta();
        let pk = self.pk_value();
        ensure_pk::<M>(&pk)?;
        let mut query = Query::new();
        query.add_cond(Cond::eq(&meta.primary_key, pk));
        delete_atomic(db, meta, &query, force).await
    }

    async fn restore(&mut self, db: &Database) -> Result<bool> {
        let meta = M::meta();
        let marker = meta
            .marker
            .as_ref()
            .ok_or_else(|| PreconditionError::NotPermanent {
                table: meta.table.clone(),
            })?;
        let mut row = self.to_row();
        let pk = row.get(&meta.primary_key).cloned().unwrap_or_default();
        ensure_pk::<M>(&pk)?;
        if marker.is_alive(row.get(&marker.field).unwrap_or(&Value::Null)) {
            return Ok(false);
        }
        let signals = db.signals();
        signals.pre_restore.send(&meta.label, &row).await?;
        row.insert(marker.field.clone(), marker.alive.clone());
        let restored = M::from_row(&row)?;
        M::all_objects(db)
            .filter(Cond::eq(&meta.primary_key, pk.clone()))
            .update(&[(marker.field.as_str(), marker.alive.clone())])
            .await?;
        *self = restored;
        debug!("RESTORE {} {}", meta.table, pk);
        signals.post_restore.send(&meta.label, &row).await?;
        Ok(true)
    }

    async fn save(&self, db: &Database) -> Result<u64> {
        let meta = M::meta();
        let mut row = self.to_row();
        let pk = row.shift_remove(&meta.primary_key).unwrap_or_default();
        ensure_pk::<M>(&pk)?;
        let values: Vec<(&str, Value)> =
            row.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        M::all_objects(db)
            .filter(Cond::eq(&meta.primary_key, pk))
            .update(&values)
            .await
    }
}
