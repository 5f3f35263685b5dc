//! Identifier reconciliation.
//!
//! Clients reference parents in several ways: a durable server id, a
//! provisional token minted offline, or only the parent's human-readable
//! name. [`Reference`] captures which of these a payload carried, and the
//! [`Reconciler`] turns it into a durable [`RowId`] inside the ingest
//! transaction, creating placeholder parents when the policy allows.
//!
//! Lookups never cross tenants: an id owned by another tenant is treated as
//! if it did not exist.

use crate::error::CoreResult;
use crate::registry::{EntityDescriptor, EntityKind, IdPolicy};
use crate::statement::RowWrite;
use crate::store::ident;
use crate::types::{RowId, TenantId};
use crate::value::{column_to_sql, is_blank};
use farmsync_protocol::{IdMappings, Watermark};
use rusqlite::types::Value as SqlValue;
use rusqlite::{OptionalExtension, Transaction};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// How a payload points at another row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// A well-formed durable id, possibly with a natural-key fallback.
    ServerId {
        /// The id as sent.
        id: RowId,
        /// Natural key of the target, if the payload carried one.
        hint: Option<String>,
    },
    /// A client-minted token that is not a durable id.
    Provisional {
        /// The token as sent.
        token: String,
        /// Natural key of the target, if the payload carried one.
        hint: Option<String>,
    },
    /// Only the target's natural key is known.
    NaturalKey(String),
}

impl Reference {
    /// Classifies a raw reference value pointing at `target`.
    ///
    /// `raw` may be a scalar id, or an object `{ "id": .., "name": .. }`.
    /// Returns `None` when neither an id nor a hint is present.
    pub fn parse(target: EntityKind, raw: Option<&Value>, hint: Option<&str>) -> Option<Self> {
        let hint = hint
            .map(str::trim)
            .filter(|hint| !hint.is_empty())
            .map(str::to_string);

        match raw.filter(|value| !is_blank(value)) {
            Some(Value::Object(object)) => {
                let inner_hint = object
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or(hint);
                Self::parse(target, object.get("id"), inner_hint.as_deref())
            }
            Some(value) => match parse_row_id(target.descriptor().id_policy, value) {
                Some(id) => Some(Reference::ServerId { id, hint }),
                None => token_text(value).map(|token| Reference::Provisional { token, hint }),
            },
            None => hint.map(Reference::NaturalKey),
        }
    }

    /// The id or token as text, as a client would have sent it.
    pub fn token(&self) -> Option<String> {
        match self {
            Reference::ServerId { id, .. } => Some(id.to_string()),
            Reference::Provisional { token, .. } => Some(token.clone()),
            Reference::NaturalKey(_) => None,
        }
    }

    /// The natural-key hint, if any.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Reference::ServerId { hint, .. } | Reference::Provisional { hint, .. } => {
                hint.as_deref()
            }
            Reference::NaturalKey(key) => Some(key),
        }
    }
}

/// Parses `value` as a durable id under `policy`.
pub fn parse_row_id(policy: IdPolicy, value: &Value) -> Option<RowId> {
    match policy {
        IdPolicy::ServerAssigned => match value {
            Value::Number(number) => number.as_i64().map(RowId::Serial),
            Value::String(text) => text.trim().parse::<i64>().ok().map(RowId::Serial),
            _ => None,
        },
        IdPolicy::ClientAssigned => value
            .as_str()
            .and_then(|text| Uuid::parse_str(text.trim()).ok())
            .map(RowId::Uuid),
        IdPolicy::Composite => None,
    }
}

/// Renders a scalar id value as a token string.
pub fn token_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Who owns a row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// No row has this id.
    Missing,
    /// The row belongs to the calling tenant.
    Own,
    /// The row belongs to another tenant.
    Foreign,
}

/// Provisional tokens resolved during one batch, per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMap {
    entries: BTreeMap<EntityKind, BTreeMap<String, RowId>>,
}

impl IdMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `token` stands for `id`.
    pub fn record(&mut self, kind: EntityKind, token: impl Into<String>, id: RowId) {
        self.entries.entry(kind).or_default().insert(token.into(), id);
    }

    /// Looks up a token.
    pub fn get(&self, kind: EntityKind, token: &str) -> Option<RowId> {
        self.entries.get(&kind).and_then(|map| map.get(token)).copied()
    }

    /// Number of recorded tokens.
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Converts to the wire form keyed by kind wire name.
    pub fn to_wire(&self) -> IdMappings {
        self.entries
            .iter()
            .map(|(kind, map)| {
                let ids = map
                    .iter()
                    .map(|(token, id)| (token.clone(), id.to_json()))
                    .collect();
                (kind.wire_name().to_string(), ids)
            })
            .collect()
    }
}

/// Resolves references for one tenant within one write transaction.
#[derive(Debug)]
pub struct Reconciler {
    tenant: TenantId,
    stamp: Watermark,
    synthesize: bool,
    ids: IdMap,
    synthesized: BTreeMap<EntityKind, u64>,
}

impl Reconciler {
    /// Creates a reconciler for one batch.
    pub fn new(tenant: TenantId, stamp: Watermark, synthesize: bool) -> Self {
        Self {
            tenant,
            stamp,
            synthesize,
            ids: IdMap::new(),
            synthesized: BTreeMap::new(),
        }
    }

    /// The tenant this reconciler is scoped to.
    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    /// The write stamp of the batch.
    pub fn stamp(&self) -> Watermark {
        self.stamp
    }

    /// Records a provisional token for later references in the batch.
    pub fn record(&mut self, kind: EntityKind, token: impl Into<String>, id: RowId) {
        self.ids.record(kind, token, id);
    }

    /// Returns the tokens recorded so far.
    pub fn id_map(&self) -> &IdMap {
        &self.ids
    }

    /// Placeholder parents created so far, per kind.
    pub fn synthesized(&self) -> &BTreeMap<EntityKind, u64> {
        &self.synthesized
    }

    /// Consumes the reconciler, returning the batch id map and synthesis counts.
    pub fn finish(self) -> (IdMap, BTreeMap<EntityKind, u64>) {
        (self.ids, self.synthesized)
    }

    /// Resolves a reference to a durable id of `target`, or `None`.
    pub fn resolve(
        &mut self,
        tx: &Transaction<'_>,
        target: EntityKind,
        reference: &Reference,
    ) -> CoreResult<Option<RowId>> {
        let descriptor = target.descriptor();
        match reference {
            Reference::ServerId { id, hint } => {
                match self.ownership(tx, descriptor, id)? {
                    Ownership::Own => return Ok(Some(*id)),
                    Ownership::Foreign => {
                        warn!(kind = descriptor.wire_name, %id, "reference to foreign tenant ignored");
                    }
                    Ownership::Missing => {}
                }
                if let Some(mapped) = self.ids.get(target, &id.to_string()) {
                    return Ok(Some(mapped));
                }
                self.resolve_hint(tx, target, Some(&id.to_string()), hint.as_deref())
            }
            Reference::Provisional { token, hint } => {
                if let Some(mapped) = self.ids.get(target, token) {
                    return Ok(Some(mapped));
                }
                self.resolve_hint(tx, target, Some(token), hint.as_deref())
            }
            Reference::NaturalKey(key) => self.find_or_create(tx, target, key),
        }
    }

    fn resolve_hint(
        &mut self,
        tx: &Transaction<'_>,
        target: EntityKind,
        token: Option<&str>,
        hint: Option<&str>,
    ) -> CoreResult<Option<RowId>> {
        let Some(hint) = hint else {
            return Ok(None);
        };
        let resolved = self.find_or_create(tx, target, hint)?;
        if let (Some(token), Some(id)) = (token, resolved) {
            self.ids.record(target, token, id);
        }
        Ok(resolved)
    }

    /// Reports who owns `id` in the table of `descriptor`.
    pub fn ownership(
        &self,
        tx: &Transaction<'_>,
        descriptor: &EntityDescriptor,
        id: &RowId,
    ) -> CoreResult<Ownership> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            ident("tenant_id"),
            ident(descriptor.table),
            ident("id")
        );
        let owner: Option<String> = tx
            .prepare_cached(&sql)?
            .query_row([id], |row| row.get(0))
            .optional()?;
        Ok(match owner {
            None => Ownership::Missing,
            Some(owner) if owner == self.tenant.to_string() => Ownership::Own,
            Some(_) => Ownership::Foreign,
        })
    }

    /// Finds a row of `kind` by natural key within the tenant.
    ///
    /// Live rows win over tombstoned ones.
    pub fn find_by_natural_key(
        &self,
        tx: &Transaction<'_>,
        kind: EntityKind,
        key: &str,
    ) -> CoreResult<Option<RowId>> {
        let descriptor = kind.descriptor();
        let Some(natural) = descriptor.natural_key else {
            return Ok(None);
        };
        let sql = format!(
            "SELECT {id} FROM {table} WHERE {tenant} = ?1 AND {key} = ?2 \
             ORDER BY {deleted} IS NOT NULL, rowid LIMIT 1",
            id = ident("id"),
            table = ident(descriptor.table),
            tenant = ident("tenant_id"),
            key = ident(natural.column),
            deleted = ident("deleted_at"),
        );
        let found = tx
            .prepare_cached(&sql)?
            .query_row(rusqlite::params![self.tenant, key], |row| {
                Ok(RowId::from_sql(row.get_ref(0)?))
            })
            .optional()?;
        Ok(found.flatten())
    }

    /// Finds a row by natural key, creating a placeholder if allowed.
    pub fn find_or_create(
        &mut self,
        tx: &Transaction<'_>,
        kind: EntityKind,
        key: &str,
    ) -> CoreResult<Option<RowId>> {
        if let Some(id) = self.find_by_natural_key(tx, kind, key)? {
            return Ok(Some(id));
        }

        let descriptor = kind.descriptor();
        let Some(natural) = descriptor.natural_key else {
            return Ok(None);
        };
        if !(self.synthesize && descriptor.synthesizable) {
            return Ok(None);
        }

        let mut write = RowWrite::new(descriptor.table);
        if descriptor.id_policy == IdPolicy::ClientAssigned {
            write.set("id", RowId::Uuid(Uuid::new_v4()));
        }
        write.set("tenant_id", self.tenant.to_string());
        for column in descriptor.columns {
            let value = if column.name == natural.column {
                SqlValue::Text(key.to_string())
            } else {
                column_to_sql(column, None, self.stamp)?
            };
            write.set(column.name, value);
        }
        write.set("created_at", self.stamp.as_millis());
        write.set("updated_at", self.stamp.as_millis());
        write.insert_or_ignore(tx)?;

        let created = self.find_by_natural_key(tx, kind, key)?;
        if let Some(id) = created {
            *self.synthesized.entry(kind).or_default() += 1;
            debug!(kind = descriptor.wire_name, %id, key, "synthesized placeholder parent");
        }
        Ok(created)
    }
}
