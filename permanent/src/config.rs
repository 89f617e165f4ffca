use anyhow::{ensure, Context as _, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::cmp;
use std::env;
use std::str::FromStr;
use strum_macros::{AsRefStr, EnumString};

use crate::model::{ColumnType, Marker};
use crate::value::Value;

pub const DEFAULT_FIELD: &str = "removed";
const ENV_PREFIX: &str = "PERMANENT";

static SETTINGS: OnceCell<Settings> = OnceCell::new();

/// Storage type of the marker column and the constructor of its deleted value.
#[derive(
    Debug, PartialEq, Eq, Serialize, Deserialize, Copy, Clone, Default, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SoftDelete {
    /// Nullable timestamp; NULL while alive.
    #[default]
    Time,
    /// Boolean flag; false while alive.
    Flag,
    /// Unix seconds; 0 while alive. Usable in unique indexes.
    UnixTime,
}

impl SoftDelete {
    pub fn alive(&self) -> Value {
        match self {
            SoftDelete::Time => Value::Null,
            SoftDelete::Flag => Value::Bool(false),
            SoftDelete::UnixTime => Value::Int(0),
        }
    }

    pub fn deleted_value(&self, now: DateTime<Utc>) -> Value {
        match self {
            SoftDelete::Time => Value::DateTime(now.naive_utc()),
            SoftDelete::Flag => Value::Bool(true),
            SoftDelete::UnixTime => Value::Int(cmp::max(1, now.timestamp())),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            SoftDelete::Time => ColumnType::DateTime,
            SoftDelete::Flag => ColumnType::Bool,
            SoftDelete::UnixTime => ColumnType::Int,
        }
    }
}

/// Marker settings applied when a model is defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Marker column name.
    #[serde(default = "default_field")]
    pub field: String,
    #[serde(default)]
    pub field_type: SoftDelete,
    /// Alive sentinel; the field type's own sentinel when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_default: Option<Value>,
}

fn env_lookup(name: &str) -> Option<String> {
    env::var(format!("{}_{}", ENV_PREFIX, name)).ok()
}

fn default_field() -> String {
    DEFAULT_FIELD.to_owned()
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            field: default_field(),
            field_type: SoftDelete::default(),
            field_default: None,
        }
    }
}

impl Settings {
    /// Reads `PERMANENT_FIELD`, `PERMANENT_FIELD_TYPE` and `PERMANENT_FIELD_DEFAULT`.
    pub fn from_env() -> Result<Settings> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Settings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let field = lookup("FIELD").unwrap_or_else(default_field);
        ensure!(!field.is_empty(), "{}_FIELD must not be empty", ENV_PREFIX);
        let field_type = match lookup("FIELD_TYPE") {
            Some(v) => SoftDelete::from_str(&v)
                .with_context(|| format!("{}_FIELD_TYPE parse error: {}", ENV_PREFIX, v))?,
            None => SoftDelete::default(),
        };
        let field_default = match lookup("FIELD_DEFAULT") {
            Some(v) => Some(
                serde_json::from_str(&v)
                    .with_context(|| format!("{}_FIELD_DEFAULT parse error: {}", ENV_PREFIX, v))?,
            ),
            None => None,
        };
        Ok(Settings {
            field,
            field_type,
            field_default,
        })
    }

    /// Installs the process-wide settings. Fails once they have been read or set.
    pub fn init(settings: Settings) -> Result<()> {
        SETTINGS
            .set(settings)
            .map_err(|_| anyhow::anyhow!("permanent settings are already initialized"))
    }

    /// The process-wide settings, read from the environment on first use.
    ///
    /// Panics when the environment holds malformed settings.
    pub fn global() -> &'static Settings {
        SETTINGS.get_or_init(|| {
            Self::load(env_lookup)
        })
    }

    fn load<F>(lookup: F) -> Settings
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_lookup(lookup).unwrap_or_else(|e| panic!("{:#}", e))
    }

    pub fn alive(&self) -> Value {
        self.field_default
            .clone()
            .unwrap_or_else(|| self.field_type.alive())
    }

    pub fn marker(&self) -> Marker {
        self.marker_for(&self.field)
    }

    /// Marker on a differently named column with these settings' type and sentinel.
    pub fn marker_for(&self, field: &str) -> Marker {
        Marker::new(field, self.field_type).with_alive(self.alive())
    }
}
