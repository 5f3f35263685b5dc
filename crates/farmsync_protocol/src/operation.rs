//! Legacy flat change operations.

use crate::error::{ProtocolError, ProtocolResult};
use crate::messages::Row;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Type of a legacy change operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegacyOperation {
    /// Row was created on the client.
    Create,
    /// Row was modified on the client.
    Update,
    /// Row was deleted on the client; becomes a tombstone on the server.
    Delete,
}

impl LegacyOperation {
    /// Returns the wire name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            LegacyOperation::Create => "create",
            LegacyOperation::Update => "update",
            LegacyOperation::Delete => "delete",
        }
    }

    /// Returns true if the operation writes the full row.
    pub fn is_upsert(&self) -> bool {
        matches!(self, LegacyOperation::Create | LegacyOperation::Update)
    }
}

impl FromStr for LegacyOperation {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        match s {
            "create" => Ok(LegacyOperation::Create),
            "update" => Ok(LegacyOperation::Update),
            "delete" => Ok(LegacyOperation::Delete),
            other => Err(ProtocolError::UnknownOperation(other.to_string())),
        }
    }
}

/// A single change in the legacy push-only shape.
///
/// `table` is the entity kind's wire name (for example `pigs`), `data` the row
/// as the client stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyChange {
    /// Entity kind wire name.
    pub table: String,
    /// What happened to the row.
    pub operation: LegacyOperation,
    /// The row payload.
    #[serde(default)]
    pub data: Row,
}

impl LegacyChange {
    /// Creates a new legacy change.
    pub fn new(table: impl Into<String>, operation: LegacyOperation, data: Row) -> Self {
        Self {
            table: table.into(),
            operation,
            data,
        }
    }

    /// Creates a create operation.
    pub fn create(table: impl Into<String>, data: Row) -> Self {
        Self::new(table, LegacyOperation::Create, data)
    }

    /// Creates an update operation.
    pub fn update(table: impl Into<String>, data: Row) -> Self {
        Self::new(table, LegacyOperation::Update, data)
    }

    /// Creates a delete operation.
    pub fn delete(table: impl Into<String>, data: Row) -> Self {
        Self::new(table, LegacyOperation::Delete, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operation_names() {
        assert_eq!(LegacyOperation::Create.as_str(), "create");
        assert_eq!("delete".parse::<LegacyOperation>().unwrap(), LegacyOperation::Delete);
        assert!("merge".parse::<LegacyOperation>().is_err());

        assert!(LegacyOperation::Update.is_upsert());
        assert!(!LegacyOperation::Delete.is_upsert());
    }

    #[test]
    fn decode_from_wire() {
        let change: LegacyChange = serde_json::from_value(json!({
            "table": "pigs",
            "operation": "delete",
            "data": { "id": "7b0c1e0e-3c5a-4d7e-9a59-0d8f5d2f6c11" }
        }))
        .unwrap();

        assert_eq!(change.table, "pigs");
        assert_eq!(change.operation, LegacyOperation::Delete);
        assert!(change.data.contains_key("id"));
    }

    #[test]
    fn missing_data_defaults_to_empty() {
        let change: LegacyChange =
            serde_json::from_value(json!({ "table": "sections", "operation": "create" })).unwrap();
        assert!(change.data.is_empty());
    }
}
