use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Column name to value, in column order.
pub type Row = IndexMap<String, Value>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    DateTime(NaiveDateTime),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(v) => *v,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::DateTime(_) => true,
            Value::Text(v) => !v.is_empty(),
        }
    }

    /// Stable string form used to de-duplicate primary keys.
    pub fn key(&self) -> String {
        match self {
            Value::Null => "null".to_owned(),
            Value::Bool(v) => format!("b:{}", v),
            Value::Int(v) => format!("i:{}", v),
            Value::Float(v) => format!("f:{}", v),
            Value::DateTime(v) => format!("d:{}", v),
            Value::Text(v) => format!("s:{}", v),
        }
    }

    /// SQL comparison; `None` when either side is NULL or the types are unrelated.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Int(b)) => Some((*a as i64).cmp(b)),
            (Value::Int(a), Value::Bool(b)) => Some(a.cmp(&(*b as i64))),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn sql_eq(&self, other: &Value) -> Option<bool> {
        self.compare(other).map(|o| o == Ordering::Equal)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::DateTime(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{:?}", v),
        }
    }
}

macro_rules! impl_value {
    ($T:ty, $U:ident) => {
        impl core::convert::From<$T> for Value {
            fn from(t: $T) -> Self {
                Self::$U(t.into())
            }
        }
        impl core::convert::From<Option<$T>> for Value {
            fn from(t: Option<$T>) -> Self {
                match t {
                    Some(t) => Self::$U(t.into()),
                    None => Self::Null,
                }
            }
        }
    };
}
impl_value!(bool, Bool);
impl_value!(i64, Int);
impl_value!(i32, Int);
impl_value!(i16, Int);
impl_value!(u32, Int);
impl_value!(u16, Int);
impl_value!(f64, Float);
impl_value!(f32, Float);
impl_value!(String, Text);
impl_value!(&str, Text);
impl_value!(NaiveDateTime, DateTime);

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::DateTime(t.naive_utc())
    }
}
impl From<Option<DateTime<Utc>>> for Value {
    fn from(t: Option<DateTime<Utc>>) -> Self {
        t.map(Value::from).unwrap_or(Value::Null)
    }
}
impl From<&Value> for Value {
    fn from(t: &Value) -> Self {
        t.clone()
    }
}

pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

fn type_error<T>(value: &Value) -> anyhow::Error {
    anyhow::anyhow!(
        "Cannot convert {:?} into {}",
        value,
        std::any::type_name::<T>()
    )
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(v) => Ok(*v),
            Value::Int(v) => Ok(*v != 0),
            _ => Err(type_error::<Self>(value)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int(v) => Ok(*v),
            Value::Bool(v) => Ok(*v as i64),
            _ => Err(type_error::<Self>(value)),
        }
    }
}

macro_rules! impl_from_value_int {
    ($T:ty) => {
        impl FromValue for $T {
            fn from_value(value: &Value) -> Result<Self> {
                let v = i64::from_value(value)?;
                Ok(<$T>::try_from(v)?)
            }
        }
    };
}
impl_from_value_int!(i32);
impl_from_value_int!(i16);
impl_from_value_int!(u32);
impl_from_value_int!(u16);

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            _ => Err(type_error::<Self>(value)),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(f64::from_value(value)? as f32)
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(v) => Ok(v.clone()),
            _ => Err(type_error::<Self>(value)),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::DateTime(v) => Ok(*v),
            Value::Text(v) => match v.parse() {
                Ok(v) => Ok(v),
                Err(_) => bail!("Illegal datetime: {}", v),
            },
            _ => Err(type_error::<Self>(value)),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(NaiveDateTime::from_value(value)?.and_utc())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            v => Ok(Some(T::from_value(v)?)),
        }
    }
}
