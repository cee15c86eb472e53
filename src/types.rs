//! Core types for the tick database.

use crate::error::{Result, TickDbError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const MIN: Timestamp = Timestamp(i64::MIN);
    pub const MAX: Timestamp = Timestamp(i64::MAX);

    const NANOS_PER_MILLI: i64 = 1_000_000;

    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_nanos() as i64)
    }

    /// Build from a millisecond value (saturating).
    pub fn from_millis(ms: i64) -> Self {
        Timestamp(ms.saturating_mul(Self::NANOS_PER_MILLI))
    }

    /// Whole milliseconds, rounded towards negative infinity.
    pub fn as_millis(self) -> i64 {
        self.0.div_euclid(Self::NANOS_PER_MILLI)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric id of a message type, stable for the lifetime of a stream.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypeId(pub u32);

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({})", self.0)
    }
}

/// Numeric id of an entity (instrument), stable for the lifetime of a stream.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

/// Database-wide stream identifier. Also the first tie-breaker when
/// messages from different streams share a timestamp.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamId(pub u64);

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({})", self.0)
    }
}

/// Kind of a payload field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Bool,
    Int,
    Float,
    Text,
    Timestamp,
    Binary,
}

/// One field of a type descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
}

impl FieldDef {
    /// A mandatory field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
        }
    }

    /// Mark the field as nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Schema of one message type.
///
/// Strict descriptors come from a stream schema and validate every payload.
/// Open descriptors are created when a polymorphic stream meets an unknown
/// type name and accept any fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub strict: bool,
}

impl TypeDescriptor {
    /// A strict descriptor with no fields yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            strict: true,
        }
    }

    /// An open descriptor accepting any payload.
    pub fn open(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            strict: false,
        }
    }

    /// Add a field definition.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Look up a field definition by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check a payload against this descriptor.
    pub fn validate(&self, fields: &[(String, FieldValue)]) -> Result<()> {
        if !self.strict {
            return Ok(());
        }

        for (name, value) in fields {
            let def = self.field(name).ok_or_else(|| {
                TickDbError::SchemaViolation(format!(
                    "Field '{}' is not defined by type '{}'",
                    name, self.name
                ))
            })?;

            match value.field_type() {
                None if !def.nullable => {
                    return Err(TickDbError::SchemaViolation(format!(
                        "Field '{}' of type '{}' is not nullable",
                        name, self.name
                    )));
                }
                Some(kind) if kind != def.field_type => {
                    return Err(TickDbError::SchemaViolation(format!(
                        "Field '{}' of type '{}' expects {:?}, got {:?}",
                        name, self.name, def.field_type, kind
                    )));
                }
                _ => {}
            }
        }

        for def in self.fields.iter().filter(|f| !f.nullable) {
            if !fields.iter().any(|(name, _)| name == &def.name) {
                return Err(TickDbError::SchemaViolation(format!(
                    "Missing mandatory field '{}' of type '{}'",
                    def.name, self.name
                )));
            }
        }

        Ok(())
    }
}

/// Value of a payload field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(Timestamp),
    Binary(Vec<u8>),
}

impl FieldValue {
    /// Kind of this value, `None` for null.
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            FieldValue::Null => None,
            FieldValue::Bool(_) => Some(FieldType::Bool),
            FieldValue::Int(_) => Some(FieldType::Int),
            FieldValue::Float(_) => Some(FieldType::Float),
            FieldValue::Text(_) => Some(FieldType::Text),
            FieldValue::Timestamp(_) => Some(FieldType::Timestamp),
            FieldValue::Binary(_) => Some(FieldType::Binary),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// A committed message, as returned by cursors.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Event time.
    pub timestamp: Timestamp,

    pub type_id: TypeId,
    pub type_name: Arc<str>,

    pub entity_id: EntityId,
    pub symbol: Arc<str>,

    /// Sub-partition the message was written to (`None` = default space).
    pub space: Option<Arc<str>>,

    /// Position in the stream's commit order (assigned on flush).
    pub sequence: u64,

    /// Type-specific payload.
    pub fields: Vec<(String, FieldValue)>,
}

impl Message {
    /// Look up a payload field by name.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }
}

/// How a message input names its type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeRef {
    Id(TypeId),
    Name(String),
}

/// How a message input names its entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntityRef {
    Id(EntityId),
    Symbol(String),
}

/// Input for sending a message through a loader (before ids are resolved).
#[derive(Clone, Debug)]
pub struct MessageInput {
    /// `None` stamps the message with the current time on send.
    pub timestamp: Option<Timestamp>,
    pub message_type: TypeRef,
    pub entity: EntityRef,
    pub fields: Vec<(String, FieldValue)>,
}

impl MessageInput {
    /// Input addressed by type name and symbol.
    pub fn new(type_name: impl Into<String>, symbol: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            timestamp: Some(timestamp),
            message_type: TypeRef::Name(type_name.into()),
            entity: EntityRef::Symbol(symbol.into()),
            fields: Vec::new(),
        }
    }

    /// Input addressed by registered ids.
    pub fn with_ids(type_id: TypeId, entity_id: EntityId, timestamp: Timestamp) -> Self {
        Self {
            timestamp: Some(timestamp),
            message_type: TypeRef::Id(type_id),
            entity: EntityRef::Id(entity_id),
            fields: Vec::new(),
        }
    }

    /// Add a payload field.
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.push((name.into(), value));
        self
    }

    /// Clear the timestamp so the loader stamps it on send.
    pub fn without_timestamp(mut self) -> Self {
        self.timestamp = None;
        self
    }
}

/// Options for creating a stream.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StreamOptions {
    pub name: Option<String>,
    pub description: Option<String>,

    /// Polymorphic streams accept type names outside the schema.
    pub polymorphic: bool,

    /// Permissible message types.
    pub schema: Vec<TypeDescriptor>,
}

impl StreamOptions {
    /// Stream with a fixed schema.
    pub fn fixed(schema: Vec<TypeDescriptor>) -> Self {
        Self {
            schema,
            ..Default::default()
        }
    }

    /// Stream with an extensible schema.
    pub fn polymorphic(schema: Vec<TypeDescriptor>) -> Self {
        Self {
            polymorphic: true,
            schema,
            ..Default::default()
        }
    }
}

/// Options for opening a cursor.
#[derive(Clone, Debug, Default)]
pub struct SelectionOptions {
    /// Inclusive lower time bound.
    pub from: Option<Timestamp>,

    /// Inclusive upper time bound (ignored by live cursors).
    pub to: Option<Timestamp>,

    /// Iterate from newest to oldest.
    pub reverse: bool,

    /// Keep tailing new data once history is consumed.
    pub live: bool,

    /// Restrict to a single space (`None` = every space).
    pub space: Option<String>,
}

impl SelectionOptions {
    /// Where a fresh cursor starts.
    pub fn start_time(&self) -> Timestamp {
        if self.reverse {
            self.to.unwrap_or(Timestamp::MAX)
        } else {
            self.from.unwrap_or(Timestamp::MIN)
        }
    }

    /// Whether live tailing is in effect (never for reverse reads).
    pub fn is_live(&self) -> bool {
        self.live && !self.reverse
    }
}

/// Options for opening a loader.
#[derive(Clone, Debug, Default)]
pub struct LoadingOptions {
    /// Space to write into (`None` = default space).
    pub space: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar_descriptor() -> TypeDescriptor {
        TypeDescriptor::new("bar")
            .with_field(FieldDef::new("close", FieldType::Float))
            .with_field(FieldDef::new("volume", FieldType::Int).nullable())
    }

    #[test]
    fn test_timestamp_millis() {
        assert_eq!(Timestamp::from_millis(5000), Timestamp(5_000_000_000));
        assert_eq!(Timestamp(5_000_999_999).as_millis(), 5000);
        assert_eq!(Timestamp(-1).as_millis(), -1);
        assert_eq!(Timestamp::from_millis(i64::MAX), Timestamp::MAX);
    }

    #[test]
    fn test_validate_accepts_matching_payload() {
        let descriptor = bar_descriptor();
        let fields = vec![
            ("close".to_string(), FieldValue::Float(10.5)),
            ("volume".to_string(), FieldValue::Null),
        ];
        assert!(descriptor.validate(&fields).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_payloads() {
        let descriptor = bar_descriptor();

        let unknown = vec![
            ("close".to_string(), FieldValue::Float(1.0)),
            ("open".to_string(), FieldValue::Float(1.0)),
        ];
        assert!(matches!(
            descriptor.validate(&unknown),
            Err(TickDbError::SchemaViolation(_))
        ));

        let wrong_kind = vec![("close".to_string(), FieldValue::Text("x".into()))];
        assert!(matches!(
            descriptor.validate(&wrong_kind),
            Err(TickDbError::SchemaViolation(_))
        ));

        let missing = vec![("volume".to_string(), FieldValue::Int(3))];
        assert!(matches!(
            descriptor.validate(&missing),
            Err(TickDbError::SchemaViolation(_))
        ));

        let null_mandatory = vec![("close".to_string(), FieldValue::Null)];
        assert!(matches!(
            descriptor.validate(&null_mandatory),
            Err(TickDbError::SchemaViolation(_))
        ));
    }

    #[test]
    fn test_open_descriptor_accepts_anything() {
        let descriptor = TypeDescriptor::open("custom");
        let fields = vec![("anything".to_string(), FieldValue::Bool(true))];
        assert!(descriptor.validate(&fields).is_ok());
    }

    #[test]
    fn test_selection_start_time() {
        let forward = SelectionOptions {
            from: Some(Timestamp(5)),
            to: Some(Timestamp(9)),
            ..Default::default()
        };
        assert_eq!(forward.start_time(), Timestamp(5));

        let reverse = SelectionOptions {
            reverse: true,
            live: true,
            ..forward
        };
        assert_eq!(reverse.start_time(), Timestamp(9));
        assert!(!reverse.is_live());
    }
}
