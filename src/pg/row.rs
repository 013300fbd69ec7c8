//! Typed result rows
//!
//! Query results are normalised into ordered column-name/value pairs so
//! that callers never deal with driver specific row types. Accessors fail
//! with [`QueryError::UnexpectedShape`] instead of coercing between types.

use std::fmt;

use bytes::BytesMut;
use serde::Serialize;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};

use super::executor::QueryError;

/// A single column value, also used for query arguments
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => b.to_sql(ty, out),
            Value::Int(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                _ => i.to_sql(ty, out),
            },
            Value::Float(x) => match *ty {
                Type::FLOAT4 => (*x as f32).to_sql(ty, out),
                _ => x.to_sql(ty, out),
            },
            Value::Text(s) => s.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// One result row: column names in select order with their values
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder style column append, mostly used for canned results
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.columns.push((name.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// First column with the given name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    fn require(&self, name: &str) -> Result<&Value, QueryError> {
        self.get(name)
            .ok_or_else(|| QueryError::UnexpectedShape(format!("column {} not in result", name)))
    }

    fn mismatch(name: &str, expected: &str, found: &Value) -> QueryError {
        QueryError::UnexpectedShape(format!(
            "column {} is {}, expected {}",
            name,
            found.kind(),
            expected
        ))
    }

    pub fn get_f64(&self, name: &str) -> Result<f64, QueryError> {
        match self.require(name)? {
            Value::Float(x) => Ok(*x),
            other => Err(Self::mismatch(name, "float", other)),
        }
    }

    pub fn get_i64(&self, name: &str) -> Result<i64, QueryError> {
        match self.require(name)? {
            Value::Int(i) => Ok(*i),
            other => Err(Self::mismatch(name, "int", other)),
        }
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, QueryError> {
        match self.require(name)? {
            Value::Bool(b) => Ok(*b),
            other => Err(Self::mismatch(name, "bool", other)),
        }
    }

    pub fn get_str(&self, name: &str) -> Result<&str, QueryError> {
        match self.require(name)? {
            Value::Text(s) => Ok(s),
            other => Err(Self::mismatch(name, "text", other)),
        }
    }

    /// Convert a driver row, failing on column types we do not map
    pub fn from_pg(row: &tokio_postgres::Row) -> Result<Self, QueryError> {
        let mut out = Row::new();
        for (idx, column) in row.columns().iter().enumerate() {
            let value = Self::pg_value(row, idx, column.type_())
                .map_err(|e| QueryError::Driver(e.to_string()))?;
            let value = value.ok_or_else(|| {
                QueryError::UnexpectedShape(format!(
                    "column {} has unsupported type {}",
                    column.name(),
                    column.type_()
                ))
            })?;
            out.push(column.name(), value);
        }
        Ok(out)
    }

    fn pg_value(
        row: &tokio_postgres::Row,
        idx: usize,
        ty: &Type,
    ) -> Result<Option<Value>, tokio_postgres::Error> {
        let value = match *ty {
            Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
            Type::INT2 => row.try_get::<_, Option<i16>>(idx)?.map(|v| Value::Int(v.into())),
            Type::INT4 => row.try_get::<_, Option<i32>>(idx)?.map(|v| Value::Int(v.into())),
            Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::Int),
            Type::FLOAT4 => row
                .try_get::<_, Option<f32>>(idx)?
                .map(|v| Value::Float(v.into())),
            Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(Value::Float),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
                row.try_get::<_, Option<String>>(idx)?.map(Value::Text)
            }
            _ => return Ok(None),
        };
        Ok(Some(value.unwrap_or(Value::Null)))
    }
}
