//! Core identifier types.

use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::ToSql;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a tenant (a farm).
///
/// Every stored row carries exactly one tenant; ingestion and extraction never
/// cross tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TenantId(Uuid);

impl TenantId {
    /// Wraps a UUID.
    #[must_use]
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generates a random tenant id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl ToSql for TenantId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(SqlValue::Text(self.0.to_string())))
    }
}

/// Durable identifier of a stored row.
///
/// Sections and pens use server-assigned integers; everything else uses a
/// UUID chosen by the client that created the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowId {
    /// Server-assigned sequential id.
    Serial(i64),
    /// Client-assigned UUID.
    Uuid(Uuid),
}

impl RowId {
    /// Renders the id the way it appears in wire rows.
    pub fn to_json(&self) -> Value {
        match self {
            RowId::Serial(id) => Value::from(*id),
            RowId::Uuid(id) => Value::String(id.to_string()),
        }
    }

    /// Reads an id column back from SQLite.
    pub fn from_sql(value: ValueRef<'_>) -> Option<Self> {
        match value {
            ValueRef::Integer(id) => Some(RowId::Serial(id)),
            ValueRef::Text(text) => std::str::from_utf8(text)
                .ok()
                .and_then(|text| Uuid::parse_str(text).ok())
                .map(RowId::Uuid),
            _ => None,
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Serial(id) => write!(f, "{id}"),
            RowId::Uuid(id) => write!(f, "{id}"),
        }
    }
}

impl ToSql for RowId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            RowId::Serial(id) => ToSqlOutput::Owned(SqlValue::Integer(*id)),
            RowId::Uuid(id) => ToSqlOutput::Owned(SqlValue::Text(id.to_string())),
        })
    }
}

impl From<RowId> for SqlValue {
    fn from(id: RowId) -> Self {
        match id {
            RowId::Serial(id) => SqlValue::Integer(id),
            RowId::Uuid(id) => SqlValue::Text(id.to_string()),
        }
    }
}
