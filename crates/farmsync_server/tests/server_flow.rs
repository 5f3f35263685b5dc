//! Integration tests for the sync server.

use farmsync_core::{StoreConfig, TenantId};
use farmsync_protocol::{
    ErrorBody, ErrorKind, PullRequest, PushRequest, SyncRequest, SyncResponse, WireMessage,
};
use farmsync_server::{AuthConfig, Caller, Endpoint, ServerConfig, SyncServer, TokenValidator};
use farmsync_testkit::payloads;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

const SECRET: &[u8] = b"integration-secret-32-bytes-long";

fn authed_server() -> (SyncServer, TokenValidator) {
    let server = SyncServer::new(ServerConfig::default().with_auth(SECRET.to_vec())).unwrap();
    let validator = TokenValidator::new(AuthConfig::new(SECRET.to_vec()));
    (server, validator)
}

#[test]
fn token_decides_the_tenant() {
    let (server, validator) = authed_server();
    let farm_a = TenantId::random();
    let farm_b = TenantId::random();
    let token_a = Caller::Token(validator.create_token(farm_a, Uuid::new_v4()).unwrap());
    let token_b = Caller::Token(validator.create_token(farm_b, Uuid::new_v4()).unwrap());

    let pushed = server
        .handle_sync(&token_a, &payloads::gestation_request())
        .unwrap();
    assert_eq!(pushed.rows("pens").len(), 1);

    let seen_by_b = server
        .handle_pull(&token_b, &PullRequest::new(None))
        .unwrap();
    assert!(seen_by_b.is_empty());

    let forged = Caller::Token("AAAA".repeat(24));
    let err = server
        .handle_pull(&forged, &PullRequest::new(None))
        .unwrap_err();
    assert_eq!(err.status_code(), 401);
}

#[test]
fn legacy_endpoints_over_bytes() {
    let server = SyncServer::new(ServerConfig::default()).unwrap();
    let caller = Caller::Trusted(TenantId::random());
    let pig = payloads::client_id();

    let push = PushRequest::new(vec![payloads::legacy_create(
        "pigs",
        payloads::pig(&pig, "L-1", "M"),
    )]);
    let (status, _) = server.handle_bytes(
        &caller,
        Endpoint::from_path("/api/sync/push").unwrap(),
        &push.encode().unwrap(),
    );
    assert_eq!(status, 200);

    let delete = PushRequest::new(vec![payloads::legacy_delete(
        "pigs",
        serde_json::json!({ "id": pig }),
    )]);
    let (status, _) = server.handle_bytes(&caller, Endpoint::Push, &delete.encode().unwrap());
    assert_eq!(status, 200);

    let (status, body) =
        server.handle_bytes(&caller, Endpoint::Pull, br#"{"sinceWatermark":null}"#);
    assert_eq!(status, 200);
    let response = SyncResponse::decode(&body).unwrap();
    let row = &response.rows("pigs")[0];
    assert_eq!(row["tag_number"], serde_json::json!("L-1"));
    assert!(row["deleted_at"].is_string());
}

#[test]
fn integrity_failures_map_to_status_codes() {
    let server = SyncServer::new(ServerConfig::default()).unwrap();
    let caller = Caller::Trusted(TenantId::random());
    let pig = payloads::client_id();

    server
        .handle_sync(
            &caller,
            &SyncRequest::new().with_rows("pigs", vec![payloads::pig(&pig, "S-1", "H")]),
        )
        .unwrap();

    let changed_sex = SyncRequest::new().with_rows("pigs", vec![payloads::pig(&pig, "S-1", "M")]);
    let (status, body) =
        server.handle_bytes(&caller, Endpoint::Sync, &changed_sex.encode().unwrap());
    assert_eq!(status, 400);
    assert_eq!(ErrorBody::decode(&body).unwrap().kind, ErrorKind::Validation);

    let duplicate_tag = SyncRequest::new().with_rows(
        "pigs",
        vec![payloads::pig(&payloads::client_id(), "S-1", "H")],
    );
    let (status, body) =
        server.handle_bytes(&caller, Endpoint::Sync, &duplicate_tag.encode().unwrap());
    assert_eq!(status, 409);
    assert_eq!(
        ErrorBody::decode(&body).unwrap().kind,
        ErrorKind::UniquenessConflict
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_tenants_stay_isolated() {
    let dir = TempDir::new().unwrap();
    let config = ServerConfig::new(StoreConfig::file(dir.path().join("farms.db")));
    let server = Arc::new(SyncServer::new(config).unwrap());

    let mut tasks = Vec::new();
    for farm in 0..6 {
        let server = Arc::clone(&server);
        tasks.push(tokio::spawn(async move {
            let tenant = TenantId::random();
            let caller = Caller::Trusted(tenant);
            let mut since = None;
            for round in 0..4 {
                let mut request = SyncRequest::new().with_rows(
                    "pigs",
                    vec![payloads::pig(
                        &payloads::client_id(),
                        &format!("T{farm}-{round}"),
                        "H",
                    )],
                );
                request.since_watermark = since;
                let response = server.sync(caller.clone(), request).await.unwrap();
                assert_eq!(response.rows("pigs").len(), 1);
                since = Some(response.new_watermark);
            }
            tenant
        }));
    }

    for task in tasks {
        let tenant = task.await.unwrap();
        let snapshot = server
            .pull(Caller::Trusted(tenant), PullRequest::new(None))
            .await
            .unwrap();
        let pigs = snapshot.rows("pigs");
        assert_eq!(pigs.len(), 4);
        assert!(pigs
            .iter()
            .all(|row| row["tenant_id"] == serde_json::json!(tenant.to_string())));
    }
    assert_eq!(server.stats().commits(), 24);
}

#[tokio::test]
async fn serve_bytes_reports_bad_bodies() {
    let server = Arc::new(SyncServer::new(ServerConfig::default()).unwrap());
    let (status, body) = server
        .serve_bytes(
            Caller::Trusted(TenantId::random()),
            Endpoint::Sync,
            b"{\"sinceWatermark\": \"someday\"}".to_vec(),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(ErrorBody::decode(&body).unwrap().kind, ErrorKind::BadRequest);
}
