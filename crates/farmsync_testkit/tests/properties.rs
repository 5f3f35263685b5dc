//! Property tests of the sync contract.

use farmsync_protocol::{PullRequest, SyncRequest};
use farmsync_testkit::prelude::*;
use proptest::prelude::*;
use serde_json::Value;

/// Stored state without the columns a resend is allowed to move.
fn stable_rows(fixture: &TestSync, kind: &str) -> Vec<Value> {
    let mut rows: Vec<Value> = fixture
        .snapshot(fixture.tenant)
        .rows(kind)
        .iter()
        .map(|row| {
            let mut row = row.clone();
            row.remove("updated_at");
            Value::Object(row)
        })
        .collect();
    rows.sort_by_key(|row| row["id"].to_string());
    rows
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn resending_a_payload_converges(request in sync_request_strategy()) {
        let fixture = TestSync::memory();

        fixture.sync(&request).unwrap();
        let once: Vec<_> = ["sections", "pens", "pigs"]
            .iter()
            .map(|kind| stable_rows(&fixture, kind))
            .collect();

        fixture.sync(&request).unwrap();
        let twice: Vec<_> = ["sections", "pens", "pigs"]
            .iter()
            .map(|kind| stable_rows(&fixture, kind))
            .collect();

        prop_assert_eq!(once, twice);
    }

    #[test]
    fn tenants_are_isolated(request in sync_request_strategy()) {
        let fixture = TestSync::memory();
        let ids = tenants(2);
        let (intruder, bystander) = (ids[0], ids[1]);

        fixture.sync(&request).unwrap();
        let before = fixture.snapshot(fixture.tenant);

        // Same payload, same client ids, different tenant.
        fixture.sync_as(intruder, &request).unwrap();

        let after = fixture.snapshot(fixture.tenant);
        prop_assert_eq!(before.rows("pigs"), after.rows("pigs"));
        prop_assert_eq!(before.rows("sections"), after.rows("sections"));
        prop_assert_eq!(before.rows("pens"), after.rows("pens"));

        let intruder_view = fixture.snapshot(intruder);
        prop_assert!(intruder_view.rows("pigs").is_empty());
        for row in intruder_view.changes.values().flat_map(|delta| delta.rows.iter()) {
            prop_assert_eq!(&row["tenant_id"], &Value::from(intruder.to_string()));
        }
        prop_assert!(fixture.snapshot(bystander).is_empty());
    }

    #[test]
    fn watermark_splits_calls(
        first in pig_rows_strategy(4),
        second in section_and_pen_rows_strategy(3),
    ) {
        let fixture = TestSync::memory();

        let a = fixture.sync(&SyncRequest::new().with_rows("pigs", first.clone())).unwrap();
        let (sections, pens) = second;
        let b = fixture
            .sync(
                &SyncRequest::new()
                    .since(a.new_watermark)
                    .with_rows("sections", sections.clone())
                    .with_rows("pens", pens.clone()),
            )
            .unwrap();

        prop_assert!(b.rows("pigs").is_empty());
        prop_assert_eq!(b.rows("sections").len(), sections.len());
        prop_assert_eq!(b.rows("pens").len(), pens.len());

        let after_b = fixture
            .pull(fixture.tenant, &PullRequest::new(Some(b.new_watermark)))
            .unwrap();
        prop_assert!(after_b.is_empty());

        let everything = fixture.pull(fixture.tenant, &PullRequest::new(None)).unwrap();
        prop_assert_eq!(everything.rows("pigs").len(), first.len());
    }
}

#[test]
fn gestation_walkthrough() {
    with_sync(|fixture| {
        let response = fixture.sync(&payloads::gestation_request()).unwrap();

        let section_id = &response.rows("sections")[0]["id"];
        assert_eq!(&response.rows("pens")[0]["section_id"], section_id);

        let next = fixture
            .sync(&SyncRequest::new().since(response.new_watermark))
            .unwrap();
        assert!(next.is_empty());
    });
}

#[test]
fn health_event_links_named_medication() {
    with_sync(|fixture| {
        let pig = payloads::client_id();
        let event = payloads::client_id();
        let request = SyncRequest::new()
            .with_rows("pigs", vec![payloads::pig(&pig, "H-9", "H")])
            .with_rows(
                "health_events",
                vec![payloads::health_event(&event, &pig, "Penicilina")],
            );

        let response = fixture.sync(&request).unwrap();
        let medication = &response.rows("medications")[0];
        assert_eq!(medication["name"], Value::from("Penicilina"));
        assert_eq!(response.rows("health_events")[0]["medication_id"], medication["id"]);
        assert_eq!(response.rows("health_events")[0]["cost"], Value::from(0.0));
    });
}
