//! Row builders for sync payloads.
//!
//! Rows are plain JSON values shaped the way mobile clients send them.

use farmsync_protocol::{LegacyChange, Row, SyncRequest};
use serde_json::{json, Value};
use uuid::Uuid;

/// A fresh client-side UUID as text.
pub fn client_id() -> String {
    Uuid::new_v4().to_string()
}

/// A section carrying a provisional id.
pub fn section(token: &str, name: &str) -> Value {
    json!({"id": token, "name": name})
}

/// A pen that names its section instead of referencing its id.
pub fn pen_in(token: &str, name: &str, section_name: &str, capacity: i64) -> Value {
    json!({"id": token, "name": name, "section_name": section_name, "capacity": capacity})
}

/// An animal with a client UUID.
pub fn pig(id: &str, tag: &str, sex: &str) -> Value {
    json!({"id": id, "tag_number": tag, "sex": sex, "stage": "Ceba"})
}

/// A weight log for an animal.
pub fn weight_log(id: &str, pig_id: &str, weight: f64) -> Value {
    json!({"id": id, "pig_id": pig_id, "weight": weight, "date": "2024-06-01"})
}

/// A health event that names its medication.
pub fn health_event(id: &str, pig_id: &str, medication_name: &str) -> Value {
    json!({
        "id": id,
        "pig_id": pig_id,
        "type": "Tratamiento",
        "medication_name": medication_name,
        "date": "2024-06-02"
    })
}

/// The request from the "Gestación" walkthrough: one section and one pen
/// linked to it by name, both with provisional ids.
pub fn gestation_request() -> SyncRequest {
    SyncRequest::new()
        .with_rows("sections", vec![section("tmp-1", "Gestación")])
        .with_rows("pens", vec![pen_in("tmp-2", "Pen A", "Gestación", 10)])
}

/// Wraps a JSON object as a legacy `create` entry.
pub fn legacy_create(table: &str, row: Value) -> LegacyChange {
    LegacyChange::create(table, as_row(row))
}

/// Wraps a JSON object as a legacy `delete` entry.
pub fn legacy_delete(table: &str, row: Value) -> LegacyChange {
    LegacyChange::delete(table, as_row(row))
}

fn as_row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}
