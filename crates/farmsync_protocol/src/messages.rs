//! Protocol messages for sync.

use crate::error::ProtocolResult;
use crate::operation::LegacyChange;
use crate::watermark::Watermark;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A row as exchanged on the wire: a JSON object keyed by column name.
pub type Row = Map<String, Value>;

/// Pushed changes, keyed by entity kind wire name.
///
/// Entries are kept as raw JSON values so that one malformed row can be
/// skipped without rejecting the whole request.
pub type ChangeSet = BTreeMap<String, Vec<Value>>;

/// Provisional identifiers reconciled during a call, per entity kind.
///
/// Maps the client's provisional token to the durable server identifier.
pub type IdMappings = BTreeMap<String, BTreeMap<String, Value>>;

/// JSON encoding shared by every protocol message.
pub trait WireMessage: Serialize + DeserializeOwned {
    /// Encodes to JSON bytes.
    fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A sync protocol message.
#[derive(Debug, Clone)]
pub enum SyncMessage {
    /// Combined push-then-pull request.
    SyncRequest(SyncRequest),
    /// Combined push-then-pull response.
    SyncResponse(SyncResponse),
    /// Legacy push-only request.
    PushRequest(PushRequest),
    /// Legacy push-only response.
    PushResponse(PushResponse),
    /// Legacy pull-only request.
    PullRequest(PullRequest),
    /// Structured failure.
    Error(ErrorBody),
}

impl SyncMessage {
    /// Returns the message type code.
    pub fn type_code(&self) -> u8 {
        match self {
            SyncMessage::SyncRequest(_) => 1,
            SyncMessage::SyncResponse(_) => 2,
            SyncMessage::PushRequest(_) => 3,
            SyncMessage::PushResponse(_) => 4,
            SyncMessage::PullRequest(_) => 5,
            SyncMessage::Error(_) => 6,
        }
    }

    /// Encodes the inner message to JSON bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        match self {
            SyncMessage::SyncRequest(m) => m.encode(),
            SyncMessage::SyncResponse(m) => m.encode(),
            SyncMessage::PushRequest(m) => m.encode(),
            SyncMessage::PushResponse(m) => m.encode(),
            SyncMessage::PullRequest(m) => m.encode(),
            SyncMessage::Error(m) => m.encode(),
        }
    }
}

/// Combined request: push local changes, then pull everything missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawSyncRequest")]
pub struct SyncRequest {
    /// Changes to apply, keyed by entity kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<ChangeSet>,
    /// Watermark returned by the client's previous sync; `None` for a full snapshot.
    pub since_watermark: Option<Watermark>,
    /// Kinds whose entry was not a list; their changes are dropped.
    #[serde(skip)]
    pub malformed_kinds: Vec<String>,
}

/// Wire shape of [`SyncRequest`] before non-list entries are split off.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSyncRequest {
    #[serde(default)]
    changes: Option<BTreeMap<String, Value>>,
    #[serde(default, alias = "lastPulledAt", alias = "last_pulled_at")]
    since_watermark: Option<Watermark>,
}

impl From<RawSyncRequest> for SyncRequest {
    fn from(raw: RawSyncRequest) -> Self {
        let mut malformed_kinds = Vec::new();
        let changes = raw.changes.map(|entries| {
            entries
                .into_iter()
                .filter_map(|(kind, rows)| match rows {
                    Value::Array(rows) => Some((kind, rows)),
                    _ => {
                        malformed_kinds.push(kind);
                        None
                    }
                })
                .collect::<ChangeSet>()
        });
        Self {
            changes,
            since_watermark: raw.since_watermark,
            malformed_kinds,
        }
    }
}

impl SyncRequest {
    /// Creates an empty request (full snapshot, nothing pushed).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pull cutoff.
    pub fn since(mut self, watermark: Watermark) -> Self {
        self.since_watermark = Some(watermark);
        self
    }

    /// Adds rows for one entity kind.
    pub fn with_rows(mut self, kind: impl Into<String>, rows: Vec<Value>) -> Self {
        self.changes
            .get_or_insert_with(ChangeSet::new)
            .entry(kind.into())
            .or_default()
            .extend(rows);
        self
    }

    /// Returns the total number of pushed rows.
    pub fn row_count(&self) -> usize {
        self.changes
            .as_ref()
            .map(|changes| changes.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

impl WireMessage for SyncRequest {}

/// Rows of one entity kind changed since the requested watermark.
///
/// Inserts, updates and tombstones are not distinguished; a row with a
/// non-null `deleted_at` is a tombstone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KindDelta {
    /// Changed rows.
    pub rows: Vec<Row>,
}

impl KindDelta {
    /// Creates a delta from rows.
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if no rows changed.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Response to a sync or pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    /// Always `"success"`; failures are reported as [`ErrorBody`].
    pub status: String,
    /// Watermark to send as `sinceWatermark` on the next call.
    pub new_watermark: Watermark,
    /// `new_watermark` rendered as RFC 3339, for clients that store timestamps.
    pub timestamp: String,
    /// Changed rows per entity kind; every registered kind is present.
    pub changes: BTreeMap<String, KindDelta>,
    /// Provisional identifiers reconciled during the push phase.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub id_mappings: IdMappings,
}

impl SyncResponse {
    /// Creates a successful response.
    pub fn new(new_watermark: Watermark, changes: BTreeMap<String, KindDelta>) -> Self {
        Self {
            status: "success".into(),
            new_watermark,
            timestamp: new_watermark.to_rfc3339(),
            changes,
            id_mappings: IdMappings::new(),
        }
    }

    /// Attaches the id remapping table.
    pub fn with_id_mappings(mut self, id_mappings: IdMappings) -> Self {
        self.id_mappings = id_mappings;
        self
    }

    /// Returns the rows for one kind, or an empty slice.
    pub fn rows(&self, kind: &str) -> &[Row] {
        self.changes
            .get(kind)
            .map(|delta| delta.rows.as_slice())
            .unwrap_or(&[])
    }

    /// Returns true if no kind has any changed row.
    pub fn is_empty(&self) -> bool {
        self.changes.values().all(KindDelta::is_empty)
    }
}

impl WireMessage for SyncResponse {}

/// Legacy push-only request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Flat list of changes in client order.
    #[serde(default)]
    pub changes: Vec<LegacyChange>,
}

impl PushRequest {
    /// Creates a push request.
    pub fn new(changes: Vec<LegacyChange>) -> Self {
        Self { changes }
    }
}

impl WireMessage for PushRequest {}

/// Legacy push-only response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    /// Always `"success"`.
    pub status: String,
    /// Server watermark after the push committed.
    pub new_watermark: Watermark,
    /// Rows written.
    pub applied: u64,
    /// Rows dropped because a reference or identifier could not be resolved.
    pub skipped: u64,
    /// Provisional identifiers reconciled during the push.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub id_mappings: IdMappings,
}

impl PushResponse {
    /// Creates a successful push response.
    pub fn new(new_watermark: Watermark, applied: u64, skipped: u64) -> Self {
        Self {
            status: "success".into(),
            new_watermark,
            applied,
            skipped,
            id_mappings: IdMappings::new(),
        }
    }

    /// Attaches the id remapping table.
    pub fn with_id_mappings(mut self, id_mappings: IdMappings) -> Self {
        self.id_mappings = id_mappings;
        self
    }
}

impl WireMessage for PushResponse {}

/// Legacy pull-only request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Pull cutoff; `None` for a full snapshot.
    #[serde(default, alias = "lastPulledAt", alias = "last_pulled_at")]
    pub since_watermark: Option<Watermark>,
}

impl PullRequest {
    /// Creates a pull request.
    pub fn new(since_watermark: Option<Watermark>) -> Self {
        Self { since_watermark }
    }
}

impl WireMessage for PullRequest {}

/// Category of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// An integrity rule was violated (immutable field, check constraint).
    Validation,
    /// A natural key is already taken within the tenant.
    UniquenessConflict,
    /// Caller identity could not be established.
    Unauthorized,
    /// The request could not be decoded.
    BadRequest,
    /// The request carries more rows than the server accepts.
    PayloadTooLarge,
    /// Storage or internal failure; safe to retry.
    Internal,
}

impl ErrorKind {
    /// HTTP-equivalent status code.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::Validation | ErrorKind::BadRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::UniquenessConflict => 409,
            ErrorKind::PayloadTooLarge => 413,
            ErrorKind::Internal => 500,
        }
    }

    /// Returns true if resubmitting the identical payload may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Internal)
    }
}

/// Structured error returned instead of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error category.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl ErrorBody {
    /// Creates an error body.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// HTTP-equivalent status code.
    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }
}

impl WireMessage for ErrorBody {}
