//! Entity registry.
//!
//! Every synchronized kind is described by a static [`EntityDescriptor`]:
//! its table, how rows are identified, which columns it carries, which other
//! kinds it references and which fields may never change. Ingestion,
//! extraction and the schema migration are all driven from these
//! descriptors, so adding a kind means adding a descriptor and nothing else.

use crate::error::{CoreError, CoreResult};

/// A synchronized entity kind.
///
/// Declaration order is the tie-break for ingestion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    /// Farm section (server-assigned id).
    Section,
    /// Pen inside a section (server-assigned id).
    Pen,
    /// Individual animal.
    Animal,
    /// Medication catalogue entry.
    Medication,
    /// Feed stock item.
    FeedInventoryItem,
    /// Weight measurement of an animal.
    WeightLog,
    /// Breeding event of an animal.
    BreedingEvent,
    /// Health event of an animal.
    HealthEvent,
    /// Feed consumption record.
    FeedUsageRecord,
    /// Visitor access log entry.
    AccessLogEntry,
    /// Gamification points entry.
    UserPointEntry,
    /// Access-control role.
    Role,
    /// Role to permission link.
    RolePermissionLink,
}

impl EntityKind {
    /// All kinds in declaration order.
    pub const ALL: [EntityKind; 13] = [
        EntityKind::Section,
        EntityKind::Pen,
        EntityKind::Animal,
        EntityKind::Medication,
        EntityKind::FeedInventoryItem,
        EntityKind::WeightLog,
        EntityKind::BreedingEvent,
        EntityKind::HealthEvent,
        EntityKind::FeedUsageRecord,
        EntityKind::AccessLogEntry,
        EntityKind::UserPointEntry,
        EntityKind::Role,
        EntityKind::RolePermissionLink,
    ];

    /// Returns the name used for this kind on the wire.
    pub fn wire_name(&self) -> &'static str {
        self.descriptor().wire_name
    }

    /// Looks a kind up by wire name.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.wire_name() == name)
    }

    /// Returns the static descriptor of this kind.
    pub fn descriptor(&self) -> &'static EntityDescriptor {
        match self {
            EntityKind::Section => &SECTION,
            EntityKind::Pen => &PEN,
            EntityKind::Animal => &ANIMAL,
            EntityKind::Medication => &MEDICATION,
            EntityKind::FeedInventoryItem => &FEED_INVENTORY_ITEM,
            EntityKind::WeightLog => &WEIGHT_LOG,
            EntityKind::BreedingEvent => &BREEDING_EVENT,
            EntityKind::HealthEvent => &HEALTH_EVENT,
            EntityKind::FeedUsageRecord => &FEED_USAGE_RECORD,
            EntityKind::AccessLogEntry => &ACCESS_LOG_ENTRY,
            EntityKind::UserPointEntry => &USER_POINT_ENTRY,
            EntityKind::Role => &ROLE,
            EntityKind::RolePermissionLink => &ROLE_PERMISSION_LINK,
        }
    }
}

/// How rows of a kind are identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPolicy {
    /// The store assigns a sequential integer; clients may only hold a
    /// provisional token until the first sync.
    ServerAssigned,
    /// The client picks a UUID when it creates the row.
    ClientAssigned,
    /// Identity is the pair of referenced ids (pivot rows).
    Composite,
}

impl IdPolicy {
    /// SQL type of a column holding an id under this policy.
    pub fn sql_type(&self) -> &'static str {
        match self {
            IdPolicy::ServerAssigned => "INTEGER",
            IdPolicy::ClientAssigned | IdPolicy::Composite => "TEXT",
        }
    }
}

/// Storage type of a data column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Free text.
    Text,
    /// 64-bit integer.
    Integer,
    /// Floating point number.
    Real,
    /// Boolean stored as 0/1.
    Bool,
    /// Calendar date or date-time, stored as text.
    Date,
    /// Instant stored as Unix milliseconds, emitted as RFC 3339.
    Timestamp,
}

impl ColumnType {
    /// SQL type affinity used in the schema.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text | ColumnType::Date => "TEXT",
            ColumnType::Integer | ColumnType::Bool | ColumnType::Timestamp => "INTEGER",
            ColumnType::Real => "REAL",
        }
    }
}

/// Value written when an incoming row leaves a column empty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnDefault {
    /// Fixed text.
    Text(&'static str),
    /// Fixed integer.
    Integer(i64),
    /// Fixed number.
    Real(f64),
    /// Fixed boolean.
    Bool(bool),
    /// The write stamp of the current transaction.
    Now,
}

/// A data column of an entity kind.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    /// Column name, identical on the wire and in storage.
    pub name: &'static str,
    /// Storage type.
    pub ty: ColumnType,
    /// Alternative input names, checked in order after `name`.
    pub aliases: &'static [&'static str],
    /// Whether the column is NOT NULL.
    pub required: bool,
    /// Whether the value may never change once the row exists.
    pub immutable: bool,
    /// Value used when input is absent or empty.
    pub default: Option<ColumnDefault>,
    /// SQL CHECK expression.
    pub check: Option<&'static str>,
}

impl ColumnSpec {
    const fn of(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            aliases: &[],
            required: false,
            immutable: false,
            default: None,
            check: None,
        }
    }

    /// A text column.
    pub const fn text(name: &'static str) -> Self {
        Self::of(name, ColumnType::Text)
    }

    /// An integer column.
    pub const fn integer(name: &'static str) -> Self {
        Self::of(name, ColumnType::Integer)
    }

    /// A real column.
    pub const fn real(name: &'static str) -> Self {
        Self::of(name, ColumnType::Real)
    }

    /// A boolean column.
    pub const fn boolean(name: &'static str) -> Self {
        Self::of(name, ColumnType::Bool)
    }

    /// A date column.
    pub const fn date(name: &'static str) -> Self {
        Self::of(name, ColumnType::Date)
    }

    /// A timestamp column.
    pub const fn timestamp(name: &'static str) -> Self {
        Self::of(name, ColumnType::Timestamp)
    }

    /// Sets input aliases.
    #[must_use]
    pub const fn aliases(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    /// Marks the column NOT NULL.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the column immutable.
    #[must_use]
    pub const fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub const fn defaults_to(mut self, default: ColumnDefault) -> Self {
        self.default = Some(default);
        self
    }

    /// Sets the CHECK expression.
    #[must_use]
    pub const fn check(mut self, expr: &'static str) -> Self {
        self.check = Some(expr);
        self
    }
}

/// A reference from one kind to another.
#[derive(Debug, Clone, Copy)]
pub struct ForeignKey {
    /// Referencing column.
    pub column: &'static str,
    /// Referenced kind.
    pub target: EntityKind,
    /// Alternative input names for the id.
    pub aliases: &'static [&'static str],
    /// Input fields carrying the target's natural key, used when the id is
    /// missing or provisional.
    pub hints: &'static [&'static str],
    /// Whether a row without a resolvable target is dropped.
    pub required: bool,
}

impl ForeignKey {
    const fn of(column: &'static str, target: EntityKind, required: bool) -> Self {
        Self {
            column,
            target,
            aliases: &[],
            hints: &[],
            required,
        }
    }

    /// A reference the row cannot exist without.
    pub const fn required(column: &'static str, target: EntityKind) -> Self {
        Self::of(column, target, true)
    }

    /// A reference that becomes null when unresolved.
    pub const fn optional(column: &'static str, target: EntityKind) -> Self {
        Self::of(column, target, false)
    }

    /// Sets input aliases for the id.
    #[must_use]
    pub const fn aliases(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    /// Sets natural-key hint fields.
    #[must_use]
    pub const fn hints(mut self, hints: &'static [&'static str]) -> Self {
        self.hints = hints;
        self
    }
}

/// Natural key of a kind: a human-meaningful column unique per tenant.
#[derive(Debug, Clone, Copy)]
pub struct NaturalKey {
    /// Column holding the key.
    pub column: &'static str,
    /// Uniqueness only applies to non-tombstoned rows.
    pub live_only: bool,
}

/// Static description of one entity kind.
#[derive(Debug)]
pub struct EntityDescriptor {
    /// The kind described.
    pub kind: EntityKind,
    /// Name on the wire.
    pub wire_name: &'static str,
    /// Storage table.
    pub table: &'static str,
    /// Row identification.
    pub id_policy: IdPolicy,
    /// Natural key, if rows can be found by one.
    pub natural_key: Option<NaturalKey>,
    /// References to other kinds.
    pub references: &'static [ForeignKey],
    /// Data columns.
    pub columns: &'static [ColumnSpec],
    /// Whether rows carry `created_at` / `updated_at`.
    pub tracks_timestamps: bool,
    /// Whether a placeholder row may be created from the natural key alone.
    pub synthesizable: bool,
}

impl EntityDescriptor {
    /// Finds a data column by name.
    pub fn column(&self, name: &str) -> Option<&'static ColumnSpec> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Finds a reference by its column name.
    pub fn reference(&self, column: &str) -> Option<&'static ForeignKey> {
        self.references.iter().find(|fk| fk.column == column)
    }

    /// Data columns that may never change.
    pub fn immutable_columns(&self) -> impl Iterator<Item = &'static ColumnSpec> {
        self.columns.iter().filter(|column| column.immutable)
    }

    /// Returns true if some reference points back at this kind.
    pub fn is_self_referencing(&self) -> bool {
        self.references.iter().any(|fk| fk.target == self.kind)
    }

    /// Kinds this kind depends on, excluding itself.
    pub fn dependencies(&self) -> impl Iterator<Item = EntityKind> + '_ {
        self.references
            .iter()
            .map(|fk| fk.target)
            .filter(move |target| *target != self.kind)
    }

    /// Columns forming the identity of a composite-key kind: the references
    /// followed by the required data columns.
    pub fn composite_key(&self) -> Vec<&'static str> {
        self.references
            .iter()
            .map(|fk| fk.column)
            .chain(
                self.columns
                    .iter()
                    .filter(|column| column.required)
                    .map(|column| column.name),
            )
            .collect()
    }

    /// Every stored column in table order.
    pub fn stored_columns(&self) -> Vec<&'static str> {
        let mut columns = Vec::with_capacity(self.columns.len() + self.references.len() + 5);
        if self.id_policy != IdPolicy::Composite {
            columns.push("id");
        }
        columns.push("tenant_id");
        columns.extend(self.references.iter().map(|fk| fk.column));
        columns.extend(self.columns.iter().map(|column| column.name));
        if self.tracks_timestamps {
            columns.push("created_at");
            columns.push("updated_at");
        }
        columns.push("deleted_at");
        columns
    }
}

static SECTION: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Section,
    wire_name: "sections",
    table: "sections",
    id_policy: IdPolicy::ServerAssigned,
    natural_key: Some(NaturalKey {
        column: "name",
        live_only: false,
    }),
    references: &[],
    columns: &[ColumnSpec::text("name").required()],
    tracks_timestamps: true,
    synthesizable: true,
};

static PEN: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Pen,
    wire_name: "pens",
    table: "pens",
    id_policy: IdPolicy::ServerAssigned,
    natural_key: Some(NaturalKey {
        column: "name",
        live_only: false,
    }),
    references: &[ForeignKey::optional("section_id", EntityKind::Section)
        .aliases(&["sectionId"])
        .hints(&["section_name", "sectionName"])],
    columns: &[
        ColumnSpec::text("name").required(),
        ColumnSpec::integer("capacity")
            .required()
            .defaults_to(ColumnDefault::Integer(0))
            .check("capacity >= 0"),
    ],
    tracks_timestamps: true,
    synthesizable: true,
};

static ANIMAL: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Animal,
    wire_name: "pigs",
    table: "animals",
    id_policy: IdPolicy::ClientAssigned,
    natural_key: Some(NaturalKey {
        column: "tag_number",
        live_only: true,
    }),
    references: &[
        ForeignKey::optional("pen_id", EntityKind::Pen)
            .aliases(&["penId"])
            .hints(&["pen_name", "penName"]),
        ForeignKey::optional("father_id", EntityKind::Animal).hints(&["father_tag"]),
        ForeignKey::optional("mother_id", EntityKind::Animal).hints(&["mother_tag"]),
    ],
    columns: &[
        ColumnSpec::text("tag_number").aliases(&["numero_arete"]),
        ColumnSpec::text("sex").aliases(&["sexo"]).immutable(),
        ColumnSpec::text("stage").aliases(&["etapa"]),
        ColumnSpec::date("birth_date").aliases(&["fecha_nacimiento"]),
        ColumnSpec::date("entry_date"),
        ColumnSpec::real("weight")
            .aliases(&["peso"])
            .check("weight IS NULL OR weight > 0"),
        ColumnSpec::text("status")
            .required()
            .defaults_to(ColumnDefault::Text("Activo")),
        ColumnSpec::real("genetics_score"),
    ],
    tracks_timestamps: true,
    synthesizable: false,
};

static MEDICATION: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Medication,
    wire_name: "medications",
    table: "medications",
    id_policy: IdPolicy::ClientAssigned,
    natural_key: Some(NaturalKey {
        column: "name",
        live_only: false,
    }),
    references: &[],
    columns: &[
        ColumnSpec::text("name").required(),
        ColumnSpec::integer("withdrawal_days")
            .required()
            .defaults_to(ColumnDefault::Integer(0))
            .check("withdrawal_days >= 0"),
    ],
    tracks_timestamps: true,
    synthesizable: true,
};

static FEED_INVENTORY_ITEM: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::FeedInventoryItem,
    wire_name: "feed_inventory",
    table: "feed_inventory",
    id_policy: IdPolicy::ClientAssigned,
    natural_key: Some(NaturalKey {
        column: "name",
        live_only: false,
    }),
    references: &[],
    columns: &[
        ColumnSpec::text("name").required(),
        ColumnSpec::real("cost_per_kg").check("cost_per_kg IS NULL OR cost_per_kg >= 0"),
        ColumnSpec::real("current_stock").check("current_stock IS NULL OR current_stock >= 0"),
        ColumnSpec::text("batch_code"),
    ],
    tracks_timestamps: true,
    synthesizable: true,
};

static WEIGHT_LOG: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::WeightLog,
    wire_name: "weight_logs",
    table: "weight_logs",
    id_policy: IdPolicy::ClientAssigned,
    natural_key: None,
    references: &[ForeignKey::required("pig_id", EntityKind::Animal)
        .aliases(&["pigId"])
        .hints(&["tag_number"])],
    columns: &[
        ColumnSpec::real("weight").required().check("weight > 0"),
        ColumnSpec::date("date"),
    ],
    tracks_timestamps: true,
    synthesizable: false,
};

static BREEDING_EVENT: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::BreedingEvent,
    wire_name: "breeding_events",
    table: "breeding_events",
    id_policy: IdPolicy::ClientAssigned,
    natural_key: None,
    references: &[ForeignKey::required("pig_id", EntityKind::Animal)
        .aliases(&["pigId"])
        .hints(&["tag_number"])],
    columns: &[
        ColumnSpec::text("event_type"),
        ColumnSpec::date("date"),
        ColumnSpec::text("details"),
    ],
    tracks_timestamps: true,
    synthesizable: false,
};

static HEALTH_EVENT: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::HealthEvent,
    wire_name: "health_events",
    table: "health_events",
    id_policy: IdPolicy::ClientAssigned,
    natural_key: None,
    references: &[
        ForeignKey::required("pig_id", EntityKind::Animal)
            .aliases(&["pigId"])
            .hints(&["tag_number"]),
        ForeignKey::optional("medication_id", EntityKind::Medication)
            .hints(&["medication_name"]),
    ],
    columns: &[
        ColumnSpec::text("type"),
        ColumnSpec::text("description"),
        ColumnSpec::date("date"),
        ColumnSpec::real("cost")
            .required()
            .defaults_to(ColumnDefault::Real(0.0))
            .check("cost >= 0"),
        ColumnSpec::date("withdrawal_end_date"),
    ],
    tracks_timestamps: true,
    synthesizable: false,
};

static FEED_USAGE_RECORD: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::FeedUsageRecord,
    wire_name: "feed_usage",
    table: "feed_usage",
    id_policy: IdPolicy::ClientAssigned,
    natural_key: None,
    references: &[
        ForeignKey::required("feed_id", EntityKind::FeedInventoryItem).hints(&["feed_name"]),
        ForeignKey::optional("pen_id", EntityKind::Pen)
            .aliases(&["penId"])
            .hints(&["pen_name"]),
        ForeignKey::optional("pig_id", EntityKind::Animal).aliases(&["pigId"]),
    ],
    columns: &[
        ColumnSpec::real("amount_kg").check("amount_kg IS NULL OR amount_kg > 0"),
        ColumnSpec::date("date"),
    ],
    tracks_timestamps: true,
    synthesizable: false,
};

static ACCESS_LOG_ENTRY: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::AccessLogEntry,
    wire_name: "access_logs",
    table: "access_logs",
    id_policy: IdPolicy::ClientAssigned,
    natural_key: None,
    references: &[],
    columns: &[
        ColumnSpec::text("visitor_name"),
        ColumnSpec::text("origin"),
        ColumnSpec::boolean("is_safe_origin")
            .required()
            .defaults_to(ColumnDefault::Bool(false)),
        ColumnSpec::timestamp("entry_time")
            .required()
            .defaults_to(ColumnDefault::Now),
    ],
    tracks_timestamps: true,
    synthesizable: false,
};

static USER_POINT_ENTRY: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::UserPointEntry,
    wire_name: "user_points",
    table: "user_points",
    id_policy: IdPolicy::ClientAssigned,
    natural_key: None,
    references: &[],
    columns: &[
        ColumnSpec::text("user_id"),
        ColumnSpec::integer("points")
            .required()
            .defaults_to(ColumnDefault::Integer(0)),
        ColumnSpec::text("reason"),
    ],
    tracks_timestamps: true,
    synthesizable: false,
};

static ROLE: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Role,
    wire_name: "roles",
    table: "roles",
    id_policy: IdPolicy::ClientAssigned,
    natural_key: Some(NaturalKey {
        column: "name",
        live_only: false,
    }),
    references: &[],
    columns: &[
        ColumnSpec::text("name").required(),
        ColumnSpec::text("description"),
    ],
    tracks_timestamps: true,
    synthesizable: true,
};

static ROLE_PERMISSION_LINK: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::RolePermissionLink,
    wire_name: "role_permissions",
    table: "role_permissions",
    id_policy: IdPolicy::Composite,
    natural_key: None,
    references: &[ForeignKey::required("role_id", EntityKind::Role).hints(&["role_name"])],
    columns: &[ColumnSpec::integer("permission_id").required()],
    tracks_timestamps: false,
    synthesizable: false,
};

/// The set of registered kinds and their ingestion order.
#[derive(Debug, Clone)]
pub struct Registry {
    order: Vec<EntityKind>,
}

impl Registry {
    /// Builds the registry, computing a dependency-respecting ingestion order.
    ///
    /// Fails if the reference graph (ignoring self references) has a cycle.
    pub fn new() -> CoreResult<Self> {
        let order = topological_order(&EntityKind::ALL, |kind| {
            kind.descriptor().dependencies().collect()
        })
        .ok_or_else(|| CoreError::invalid_operation("entity reference graph has a cycle"))?;
        Ok(Self { order })
    }

    /// Kinds in the order their changes must be applied.
    pub fn ingestion_order(&self) -> &[EntityKind] {
        &self.order
    }

    /// Returns the descriptor of a kind.
    pub fn descriptor(&self, kind: EntityKind) -> &'static EntityDescriptor {
        kind.descriptor()
    }

    /// Iterates over every descriptor in ingestion order.
    pub fn descriptors(&self) -> impl Iterator<Item = &'static EntityDescriptor> + '_ {
        self.order.iter().map(|kind| kind.descriptor())
    }

    /// Looks a kind up by wire name.
    pub fn kind_for(&self, wire_name: &str) -> Option<EntityKind> {
        EntityKind::from_wire_name(wire_name)
    }
}

/// Kahn's algorithm with ties broken by position in `nodes`.
///
/// Returns `None` if the dependency graph has a cycle.
fn topological_order<T, F>(nodes: &[T], dependencies: F) -> Option<Vec<T>>
where
    T: Copy + Eq,
    F: Fn(T) -> Vec<T>,
{
    let deps: Vec<Vec<T>> = nodes
        .iter()
        .map(|node| {
            dependencies(*node)
                .into_iter()
                .filter(|dep| nodes.contains(dep))
                .collect()
        })
        .collect();

    let mut placed: Vec<T> = Vec::with_capacity(nodes.len());
    while placed.len() < nodes.len() {
        let next = nodes.iter().enumerate().find(|&(index, node)| {
            !placed.contains(node) && deps[index].iter().all(|dep| placed.contains(dep))
        });
        match next {
            Some((_, node)) => placed.push(*node),
            None => return None,
        }
    }
    Some(placed)
}
