//! Property-based test generators using proptest.
//!
//! Generated payloads respect the store's integrity rules (unique natural
//! keys, positive weights), so any failure they provoke is a real bug.

use farmsync_protocol::SyncRequest;
use proptest::prelude::*;
use serde_json::{json, Value};
use uuid::Uuid;

/// Strategy for animal tags such as `B-0412`.
pub fn tag_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z]-[0-9]{1,4}").expect("Invalid regex")
}

/// Strategy for section, pen or medication names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-zñ]{2,12}").expect("Invalid regex")
}

/// Strategy for the animal sex codes used by clients.
pub fn sex_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("H"), Just("M")]
}

/// Strategy for client-assigned ids.
pub fn client_id_strategy() -> impl Strategy<Value = String> {
    any::<u128>().prop_map(|bits| Uuid::from_u128(bits).to_string())
}

/// Strategy for animal rows with unique tags and ids.
pub fn pig_rows_strategy(max: usize) -> impl Strategy<Value = Vec<Value>> {
    prop::collection::btree_map(
        tag_strategy(),
        (client_id_strategy(), sex_strategy(), 1.0f64..400.0),
        1..=max,
    )
    .prop_map(|pigs| {
        pigs.into_iter()
            .map(|(tag, (id, sex, weight))| {
                json!({"id": id, "tag_number": tag, "sex": sex, "weight": weight})
            })
            .collect()
    })
}

/// Strategy for sections (by provisional id) with pens naming them.
pub fn section_and_pen_rows_strategy(max: usize) -> impl Strategy<Value = (Vec<Value>, Vec<Value>)> {
    prop::collection::btree_set(name_strategy(), 1..=max).prop_map(|names| {
        let sections = names
            .iter()
            .enumerate()
            .map(|(i, name)| json!({"id": format!("tmp-s{i}"), "name": name}))
            .collect();
        let pens = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                json!({
                    "id": format!("tmp-p{i}"),
                    "name": format!("{name} corral"),
                    "section_name": name,
                    "capacity": i * 5
                })
            })
            .collect();
        (sections, pens)
    })
}

/// Strategy for a full sync request mixing several kinds.
pub fn sync_request_strategy() -> impl Strategy<Value = SyncRequest> {
    (section_and_pen_rows_strategy(4), pig_rows_strategy(6)).prop_map(
        |((sections, pens), pigs)| {
            SyncRequest::new()
                .with_rows("sections", sections)
                .with_rows("pens", pens)
                .with_rows("pigs", pigs)
        },
    )
}
