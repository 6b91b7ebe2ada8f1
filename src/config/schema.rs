//! Declarative collection schema
//!
//! Collections are consumed as static configuration: required fields,
//! per-field type constraints, secondary indexes and the shard key. The
//! validator document handed to the cluster is derived from these
//! declarations in `$jsonSchema` form.

use crate::core::{BootstrapError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Primitive value types understood by the validator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    String,
    Int,
    Long,
    Double,
    Decimal,
    Bool,
    Date,
    Timestamp,
    Object,
    #[serde(rename = "objectId")]
    ObjectId,
}

impl PrimitiveType {
    pub fn bson_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Long => "long",
            Self::Double => "double",
            Self::Decimal => "decimal",
            Self::Bool => "bool",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::Object => "object",
            Self::ObjectId => "objectId",
        }
    }
}

/// Type constraint for a single field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldConstraint {
    Type(PrimitiveType),
    Enum(Vec<String>),
    ArrayOf(Box<FieldConstraint>),
}

impl FieldConstraint {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Type(primitive) => json!({ "bsonType": primitive.bson_name() }),
            Self::Enum(values) => json!({ "bsonType": "string", "enum": values }),
            Self::ArrayOf(inner) => json!({ "bsonType": "array", "items": inner.to_json() }),
        }
    }

    fn validate(&self, collection: &str, field: &str) -> Result<()> {
        match self {
            Self::Type(_) => Ok(()),
            Self::Enum(values) => {
                if values.is_empty() {
                    return Err(BootstrapError::InvalidConfig(format!(
                        "Field '{}' in '{}' declares an empty enum",
                        field, collection
                    )));
                }
                let mut seen = HashSet::new();
                if let Some(dup) = values.iter().find(|v| !seen.insert(v.as_str())) {
                    return Err(BootstrapError::InvalidConfig(format!(
                        "Field '{}' in '{}' lists enum value '{}' more than once",
                        field, collection, dup
                    )));
                }
                Ok(())
            }
            Self::ArrayOf(inner) => inner.validate(collection, field),
        }
    }
}

/// Direction or strategy of a key component.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyOrder {
    #[default]
    Asc,
    Desc,
    Hashed,
}

impl KeyOrder {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Asc => json!(1),
            Self::Desc => json!(-1),
            Self::Hashed => json!("hashed"),
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            Self::Asc => "1",
            Self::Desc => "-1",
            Self::Hashed => "hashed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyPart {
    pub field: String,
    #[serde(default)]
    pub order: KeyOrder,
}

impl KeyPart {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: KeyOrder::Asc,
        }
    }

    pub fn hashed(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: KeyOrder::Hashed,
        }
    }
}

fn key_document(parts: &[KeyPart]) -> Value {
    let mut doc = Map::new();
    for part in parts {
        doc.insert(part.field.clone(), part.order.to_json());
    }
    Value::Object(doc)
}

/// Ordered partitioning key of a collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct ShardKey(pub Vec<KeyPart>);

impl ShardKey {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|p| p.field.as_str())
    }

    pub fn to_document(&self) -> Value {
        key_document(&self.0)
    }

    /// True when an index on `keys` can back this shard key.
    pub fn is_prefix_of(&self, keys: &[KeyPart]) -> bool {
        !self.0.is_empty() && keys.len() >= self.0.len() && keys[..self.0.len()] == self.0[..]
    }
}

/// A secondary index declaration. Identity is the key shape, not the name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexSpec {
    #[serde(default)]
    pub name: Option<String>,
    pub keys: Vec<KeyPart>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn on(keys: Vec<KeyPart>) -> Self {
        Self {
            name: None,
            keys,
            unique: false,
        }
    }

    /// Declared name, or the conventional `field_1_other_-1` name.
    pub fn effective_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.keys
            .iter()
            .map(|k| format!("{}_{}", k.field, k.order.suffix()))
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn key_document(&self) -> Value {
        key_document(&self.keys)
    }

    pub fn same_shape(&self, keys: &[KeyPart]) -> bool {
        self.keys == keys
    }
}

/// A collection to create, validate, index and shard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionSchema {
    pub database: String,
    pub name: String,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldConstraint>,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
    pub shard_key: ShardKey,
    /// Shard key fields that may be absent from documents but are still indexed.
    #[serde(default)]
    pub indexed_optional: Vec<String>,
}

impl CollectionSchema {
    pub fn new(database: impl Into<String>, name: impl Into<String>, shard_key: ShardKey) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
            required: Vec::new(),
            fields: BTreeMap::new(),
            indexes: Vec::new(),
            shard_key,
            indexed_optional: Vec::new(),
        }
    }

    pub fn require(mut self, field: impl Into<String>, constraint: FieldConstraint) -> Self {
        let field = field.into();
        if !self.required.contains(&field) {
            self.required.push(field.clone());
        }
        self.fields.insert(field, constraint);
        self
    }

    pub fn optional(mut self, field: impl Into<String>, constraint: FieldConstraint) -> Self {
        self.fields.insert(field.into(), constraint);
        self
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.name)
    }

    /// Validator document in `$jsonSchema` form.
    pub fn validator(&self) -> Value {
        let mut properties = Map::new();
        for (field, constraint) in &self.fields {
            properties.insert(field.clone(), constraint.to_json());
        }
        json!({
            "$jsonSchema": {
                "bsonType": "object",
                "required": self.required,
                "properties": Value::Object(properties),
            }
        })
    }

    /// Declared indexes plus a shard-key index when none of them can back the shard key.
    ///
    /// The shard-key index is listed last; partitioning needs it to exist first.
    pub fn required_indexes(&self) -> Vec<IndexSpec> {
        let mut indexes = self.indexes.clone();
        if !indexes
            .iter()
            .any(|index| self.shard_key.is_prefix_of(&index.keys))
        {
            indexes.push(IndexSpec::on(self.shard_key.0.clone()));
        }
        indexes
    }

    pub fn validate(&self) -> Result<()> {
        let ns = self.namespace();
        if self.database.trim().is_empty() || self.database.contains(['.', ' ', '/', '\\', '$']) {
            return Err(BootstrapError::InvalidConfig(format!(
                "Invalid database name '{}'",
                self.database
            )));
        }
        if self.name.trim().is_empty() || self.name.starts_with("system.") || self.name.contains('$')
        {
            return Err(BootstrapError::InvalidConfig(format!(
                "Invalid collection name '{}'",
                self.name
            )));
        }

        let mut required = HashSet::new();
        for field in &self.required {
            if !required.insert(field.as_str()) {
                return Err(BootstrapError::InvalidConfig(format!(
                    "Required field '{}' listed more than once in '{}'",
                    field, ns
                )));
            }
        }
        for (field, constraint) in &self.fields {
            if field.trim().is_empty() || field.starts_with('$') {
                return Err(BootstrapError::InvalidConfig(format!(
                    "Invalid field name '{}' in '{}'",
                    field, ns
                )));
            }
            constraint.validate(&ns, field)?;
        }

        if self.shard_key.0.is_empty() {
            return Err(BootstrapError::InvalidConfig(format!(
                "Collection '{}' must declare a shard key",
                ns
            )));
        }
        let mut key_fields = HashSet::new();
        for part in self.shard_key.parts() {
            if !key_fields.insert(part.field.as_str()) {
                return Err(BootstrapError::InvalidConfig(format!(
                    "Shard key field '{}' appears more than once in '{}'",
                    part.field, ns
                )));
            }
            let optional_ok = self.indexed_optional.contains(&part.field)
                && self.fields.contains_key(&part.field);
            if !required.contains(part.field.as_str()) && !optional_ok {
                return Err(BootstrapError::InvalidConfig(format!(
                    "Shard key field '{}' of '{}' must be required or declared in indexed_optional",
                    part.field, ns
                )));
            }
        }
        let hashed = self
            .shard_key
            .parts()
            .iter()
            .filter(|p| p.order == KeyOrder::Hashed)
            .count();
        if hashed > 1 {
            return Err(BootstrapError::InvalidConfig(format!(
                "Shard key of '{}' may contain at most one hashed field",
                ns
            )));
        }

        let mut shapes = Vec::new();
        for index in &self.indexes {
            if index.keys.is_empty() {
                return Err(BootstrapError::InvalidConfig(format!(
                    "Index '{}' on '{}' has no keys",
                    index.effective_name(),
                    ns
                )));
            }
            if shapes.contains(&&index.keys) {
                return Err(BootstrapError::InvalidConfig(format!(
                    "Index shape '{}' declared more than once on '{}'",
                    index.effective_name(),
                    ns
                )));
            }
            shapes.push(&index.keys);
        }
        Ok(())
    }
}

/// All collections declared for the bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SchemaConfig {
    #[serde(default)]
    pub collections: Vec<CollectionSchema>,
}

impl SchemaConfig {
    /// Distinct databases in declaration order.
    pub fn databases(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.collections
            .iter()
            .filter(|c| seen.insert(c.database.clone()))
            .map(|c| c.database.clone())
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        let mut namespaces = HashSet::new();
        for collection in &self.collections {
            collection.validate()?;
            if !namespaces.insert(collection.namespace()) {
                return Err(BootstrapError::InvalidConfig(format!(
                    "Collection '{}' is declared more than once",
                    collection.namespace()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn organizations() -> CollectionSchema {
        CollectionSchema::new(
            "businessdb",
            "organizations",
            ShardKey::new(vec![KeyPart::asc("industry"), KeyPart::asc("country")]),
        )
        .require("organizationId", FieldConstraint::Type(PrimitiveType::String))
        .require("industry", FieldConstraint::Type(PrimitiveType::String))
        .require("country", FieldConstraint::Type(PrimitiveType::String))
        .optional("founded", FieldConstraint::Type(PrimitiveType::Int))
    }

    #[test]
    fn test_validator_document_shape() {
        let schema = organizations()
            .optional(
                "tags",
                FieldConstraint::ArrayOf(Box::new(FieldConstraint::Type(PrimitiveType::String))),
            )
            .optional(
                "size",
                FieldConstraint::Enum(vec!["small".into(), "large".into()]),
            );
        let validator = schema.validator();
        let body = &validator["$jsonSchema"];
        assert_eq!(body["bsonType"], "object");
        assert_eq!(body["required"][0], "organizationId");
        assert_eq!(body["properties"]["founded"]["bsonType"], "int");
        assert_eq!(body["properties"]["tags"]["bsonType"], "array");
        assert_eq!(body["properties"]["tags"]["items"]["bsonType"], "string");
        assert_eq!(body["properties"]["size"]["enum"][1], "large");
    }

    #[test]
    fn test_shard_key_index_added_when_missing() {
        let schema = organizations();
        let indexes = schema.required_indexes();
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].effective_name(), "industry_1_country_1");
    }

    #[test]
    fn test_declared_prefix_index_backs_shard_key() {
        let schema = organizations().index(IndexSpec::on(vec![
            KeyPart::asc("industry"),
            KeyPart::asc("country"),
            KeyPart::asc("organizationId"),
        ]));
        assert_eq!(schema.required_indexes().len(), 1);
    }

    #[test]
    fn test_shard_key_must_be_required_or_indexed_optional() {
        let mut schema = CollectionSchema::new(
            "businessdb",
            "people",
            ShardKey::new(vec![KeyPart::asc("jobTitle")]),
        )
        .optional("jobTitle", FieldConstraint::Type(PrimitiveType::String));
        assert!(schema.validate().is_err());

        schema.indexed_optional.push("jobTitle".to_string());
        schema.validate().unwrap();
    }

    #[test]
    fn test_multiple_hashed_fields_rejected() {
        let schema = CollectionSchema::new(
            "db",
            "events",
            ShardKey::new(vec![KeyPart::hashed("a"), KeyPart::hashed("b")]),
        )
        .require("a", FieldConstraint::Type(PrimitiveType::String))
        .require("b", FieldConstraint::Type(PrimitiveType::String));
        let err = schema.validate().unwrap_err();
        assert!(err.to_string().contains("at most one hashed"));
    }

    #[test]
    fn test_duplicate_namespace_rejected() {
        let config = SchemaConfig {
            collections: vec![organizations(), organizations()],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_key_document_preserves_order() {
        let key = ShardKey::new(vec![KeyPart::asc("zeta"), KeyPart::asc("alpha")]);
        let rendered = serde_json::to_string(&key.to_document()).unwrap();
        assert_eq!(rendered, r#"{"zeta":1,"alpha":1}"#);
    }

    #[test]
    fn test_constraint_deserializes_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            fields: BTreeMap<String, FieldConstraint>,
        }
        let parsed: Wrapper = toml::from_str(
            r#"
            [fields]
            name = { type = "string" }
            sex = { enum = ["f", "m"] }
            phones = { array_of = { type = "string" } }
            "#,
        )
        .unwrap();
        assert_eq!(
            parsed.fields["name"],
            FieldConstraint::Type(PrimitiveType::String)
        );
        assert!(matches!(parsed.fields["sex"], FieldConstraint::Enum(_)));
        assert!(matches!(parsed.fields["phones"], FieldConstraint::ArrayOf(_)));
    }
}
