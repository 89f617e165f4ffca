use anyhow::{Context as _, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum_macros::{AsRefStr, EnumString};

use crate::config::{Settings, SoftDelete};
use crate::cond::Cond;
use crate::db::Database;
use crate::err::PreconditionError;
use crate::manager::Manager;
use crate::query::ViewKind;
use crate::value::{FromValue, Row, Value};

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Copy, Clone, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ColumnType {
    Bool,
    Int,
    Float,
    Text,
    DateTime,
}

/// Column type of a Rust field type.
pub trait HasColumnType {
    const COLUMN_TYPE: ColumnType;
}

macro_rules! impl_column_type {
    ($T:ty, $U:ident) => {
        impl HasColumnType for $T {
            const COLUMN_TYPE: ColumnType = ColumnType::$U;
        }
    };
}
impl_column_type!(bool, Bool);
impl_column_type!(i64, Int);
impl_column_type!(i32, Int);
impl_column_type!(i16, Int);
impl_column_type!(u32, Int);
impl_column_type!(u16, Int);
impl_column_type!(f64, Float);
impl_column_type!(f32, Float);
impl_column_type!(String, Text);
impl_column_type!(NaiveDateTime, DateTime);
impl_column_type!(DateTime<Utc>, DateTime);

impl<T: HasColumnType> HasColumnType for Option<T> {
    const COLUMN_TYPE: ColumnType = T::COLUMN_TYPE;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub ty: ColumnType,
    pub unique: bool,
}

/// The soft delete marker column of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub field: String,
    pub kind: SoftDelete,
    pub alive: Value,
}

impl Marker {
    pub fn new(field: &str, kind: SoftDelete) -> Marker {
        Marker {
            field: field.to_owned(),
            kind,
            alive: kind.alive(),
        }
    }

    pub fn with_alive(mut self, alive: Value) -> Marker {
        self.alive = alive;
        self
    }

    pub fn is_alive(&self, value: &Value) -> bool {
        if self.alive.is_null() || value.is_null() {
            return self.alive.is_null() && value.is_null();
        }
        value.sql_eq(&self.alive) == Some(true)
    }

    pub fn deleted_value(&self) -> Value {
        self.kind.deleted_value(Utc::now())
    }

    /// `marker = alive`
    pub fn alive_cond(&self) -> Cond {
        Cond::eq(&self.field, self.alive.clone())
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Copy, Clone, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReferenceOption {
    Restrict,
    Cascade,
    SetNull,
    SetZero,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub column: String,
    pub references: String,
    pub on_delete: ReferenceOption,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelMeta {
    pub label: String,
    pub table: String,
    pub primary_key: String,
    pub columns: Vec<ColumnMeta>,
    pub marker: Option<Marker>,
    pub foreign_keys: Vec<ForeignKey>,
    pub restore_on_create: bool,
}

impl ModelMeta {
    pub fn new(table: &str) -> ModelMeta {
        ModelMeta {
            label: table.to_owned(),
            table: table.to_owned(),
            primary_key: "id".to_owned(),
            columns: Vec::new(),
            marker: None,
            foreign_keys: Vec::new(),
            restore_on_create: false,
        }
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = label.to_owned();
        self
    }

    pub fn primary_key(mut self, name: &str) -> Self {
        self.primary_key = name.to_owned();
        self
    }

    pub fn column(self, name: &str, ty: ColumnType) -> Self {
        self.add_column(name, ty, false)
    }

    pub fn unique_column(self, name: &str, ty: ColumnType) -> Self {
        self.add_column(name, ty, true)
    }

    fn add_column(mut self, name: &str, ty: ColumnType, unique: bool) -> Self {
        let column = ColumnMeta {
            name: name.to_owned(),
            ty,
            unique,
        };
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(c) => *c = column,
            None => self.columns.push(column),
        }
        self
    }

    /// Makes the model permanent; adds the marker column when it is not declared yet.
    pub fn marker(mut self, marker: Marker) -> Self {
        if !self.has_column(&marker.field) {
            self = self.column(&marker.field, marker.kind.column_type());
        }
        self.marker = Some(marker);
        self
    }

    /// Makes the model permanent with the process-wide settings.
    pub fn permanent(self) -> Self {
        self.marker(Settings::global().marker())
    }

    pub fn foreign_key(
        mut self,
        column: &str,
        references: &str,
        on_delete: ReferenceOption,
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.to_owned(),
            references: references.to_owned(),
            on_delete,
        });
        self
    }

    pub fn restore_on_create(mut self, flag: bool) -> Self {
        self.restore_on_create = flag;
        self
    }

    pub fn is_permanent(&self) -> bool {
        self.marker.is_some()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column_meta(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn unique_columns(&self) -> impl Iterator<Item = &ColumnMeta> {
        self.columns.iter().filter(|c| c.unique)
    }

    pub fn check_columns<'a, I>(&self, columns: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for column in columns {
            anyhow::ensure!(
                self.has_column(column),
                PreconditionError::UnknownColumn {
                    table: self.table.clone(),
                    column: column.to_owned(),
                }
            );
        }
        Ok(())
    }
}

/// A struct persisted in one table.
///
/// Implemented by `#[derive(Permanent)]`; the three manager accessors give
/// the active, deleted and unfiltered views of the table.
pub trait Model: Clone + Send + Sync + Sized + 'static {
    fn meta() -> &'static ModelMeta;
    fn to_row(&self) -> Row;
    fn from_row(row: &Row) -> Result<Self>;

    fn objects(db: &Database) -> Manager<Self> {
        Manager::new(db, ViewKind::Active)
    }
    fn deleted_objects(db: &Database) -> Manager<Self> {
        Manager::new(db, ViewKind::Deleted)
    }
    fn all_objects(db: &Database) -> Manager<Self> {
        Manager::new(db, ViewKind::All)
    }
}

static NULL: Value = Value::Null;

/// Reads one column of a row; a missing column reads as NULL.
pub fn column<T: FromValue>(row: &Row, name: &str) -> Result<T> {
    T::from_value(row.get(name).unwrap_or(&NULL)).with_context(|| format!("column {}", name))
}

/// Models known to the dependency collector, keyed by table.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    models: IndexMap<String, Arc<ModelMeta>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    pub fn register<M: Model>(self) -> Self {
        self.register_meta(M::meta().clone())
    }

    pub fn register_meta(mut self, meta: ModelMeta) -> Self {
        self.models.insert(meta.table.clone(), Arc::new(meta));
        self
    }

    pub fn get(&self, table: &str) -> Option<&Arc<ModelMeta>> {
        self.models.get(table)
    }

    /// The registered meta for the table, or a copy of the given one.
    pub fn resolve(&self, meta: &ModelMeta) -> Arc<ModelMeta> {
        self.get(&meta.table)
            .cloned()
            .unwrap_or_else(|| Arc::new(meta.clone()))
    }

    /// Models holding a foreign key to `table`.
    pub fn dependents(&self, table: &str) -> Vec<(Arc<ModelMeta>, ForeignKey)> {
        let mut list = Vec::new();
        for meta in self.models.values() {
            for fk in meta.foreign_keys.iter().filter(|fk| fk.references == table) {
                list.push((meta.clone(), fk.clone()));
            }
        }
        list
    }
}
