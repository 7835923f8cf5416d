//! Typed view of a JSON-Schema-like document.
//!
//! A [`Schema`] is loaded once and never mutated afterwards. Every node sits
//! behind an `Arc`, so any number of data locations can resolve to the same
//! node during a traversal without copying it.
//!
//! Only the keywords that drive traversal are kept: `type`, `$ref`, `oneOf`,
//! `anyOf`, `allOf`, `properties`, `patternProperties`,
//! `additionalProperties`, `items`, `enum`/`const` and `required`. Everything
//! else (descriptions, numeric bounds, string patterns) is the validator's
//! business and is ignored here.
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("schema is malformed {0}")]
    Shape(String),
}

/// Primitive type tags (`"type": ...`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    Null,
    Boolean,
    Object,
    Array,
    Number,
    Integer,
    String,
}

/// What an object schema says about keys it does not name.
#[derive(Debug, Clone, Default)]
pub enum AdditionalProperties {
    /// keyword absent or `true`
    #[default]
    Any,
    /// `false`
    Forbidden,
    Schema(Arc<SchemaNode>),
}

#[derive(Debug, Clone)]
pub struct PatternProperty {
    pub pattern: Regex,
    pub schema: Arc<SchemaNode>,
}

#[derive(Debug, Clone, Default)]
pub struct SchemaNode {
    pub types: Vec<PrimitiveType>,
    pub reference: Option<String>,
    pub one_of: Vec<Arc<SchemaNode>>,
    pub any_of: Vec<Arc<SchemaNode>>,
    pub all_of: Vec<Arc<SchemaNode>>,
    /// declaration order is kept, lookups are by exact name
    pub properties: IndexMap<String, Arc<SchemaNode>>,
    pub pattern_properties: Vec<PatternProperty>,
    pub additional_properties: AdditionalProperties,
    /// `None` means elements may be anything
    pub items: Option<Arc<SchemaNode>>,
    pub enum_values: Option<Vec<Value>>,
    pub required: Vec<String>,
    /// the boolean schema `false`: nothing conforms
    pub never: bool,
}

/// Identity of a loaded schema document: SHA-256 of its JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaId(String);

#[derive(Debug, Clone)]
pub struct Schema {
    id: SchemaId,
    root: Arc<SchemaNode>,
    /// keyed by the reference string that names them (`#/definitions/job`)
    definitions: IndexMap<String, Arc<SchemaNode>>,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

static ANY: Lazy<Arc<SchemaNode>> = Lazy::new(|| Arc::new(SchemaNode::default()));

impl PrimitiveType {
    pub fn matches(self, value: &Value) -> bool {
        match (self, value) {
            (Self::Null, Value::Null) => true,
            (Self::Boolean, Value::Bool(_)) => true,
            (Self::Object, Value::Object(_)) => true,
            (Self::Array, Value::Array(_)) => true,
            (Self::Number, Value::Number(_)) => true,
            (Self::Integer, Value::Number(n)) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            (Self::String, Value::String(_)) => true,
            _ => false,
        }
    }

    /// Scalars that can stand in for a collection or a wrapper object.
    pub fn is_promotable_scalar(self) -> bool {
        matches!(self, Self::Boolean | Self::Number | Self::Integer | Self::String)
    }

    /// `integer` is a refinement of `number`; everything else must match exactly.
    pub fn compatible_with(self, other: Self) -> bool {
        match (self, other) {
            (Self::Number, Self::Integer) | (Self::Integer, Self::Number) => true,
            (a, b) => a == b,
        }
    }
}

impl SchemaNode {
    /// The empty schema: accepts anything.
    pub fn any() -> Arc<SchemaNode> {
        ANY.clone()
    }

    pub fn is_union(&self) -> bool {
        !self.one_of.is_empty() || !self.any_of.is_empty()
    }

    /// Union alternatives in declared order. Both `oneOf` and `anyOf` are
    /// decided by the same first-match policy, so they are interchangeable here.
    pub fn alternatives(&self) -> &[Arc<SchemaNode>] {
        if !self.one_of.is_empty() { &self.one_of } else { &self.any_of }
    }

    pub fn declares(&self, ty: PrimitiveType) -> bool {
        self.types.contains(&ty)
    }

    pub fn is_object_like(&self) -> bool {
        self.declares(PrimitiveType::Object) || !self.properties.is_empty()
    }

    /// Does the declared `type` (if any) admit this value?
    pub fn accepts_type(&self, value: &Value) -> bool {
        if self.never {
            return false;
        }
        self.types.is_empty() || self.types.iter().any(|ty| ty.matches(value))
    }

    /// The single scalar type of a node that declares nothing else structural.
    pub fn bare_scalar_type(&self) -> Option<PrimitiveType> {
        match self.types.as_slice() {
            [ty] if ty.is_promotable_scalar()
                && self.properties.is_empty()
                && self.items.is_none()
                && !self.is_union()
                && self.all_of.is_empty() => Some(*ty),
            _ => None,
        }
    }

    /// Child schema for an object key: exact property, then the first matching
    /// pattern property, then `additionalProperties`. `None` when the key is
    /// forbidden.
    pub fn property_schema(&self, key: &str) -> Option<Arc<SchemaNode>> {
        if let Some(schema) = self.properties.get(key) {
            return Some(schema.clone());
        }
        if let Some(pp) = self.pattern_properties.iter().find(|pp| pp.pattern.is_match(key)) {
            return Some(pp.schema.clone());
        }
        match &self.additional_properties {
            AdditionalProperties::Any => Some(SchemaNode::any()),
            AdditionalProperties::Forbidden => None,
            AdditionalProperties::Schema(schema) => Some(schema.clone()),
        }
    }

    pub fn item_schema(&self) -> Arc<SchemaNode> {
        self.items.clone().unwrap_or_else(SchemaNode::any)
    }

    /// Structural merge used for `allOf` and for overlaying a chosen union
    /// branch onto its base. Properties from `other` replace same-named ones
    /// (last write wins, position kept); `required` accumulates.
    pub fn overlay(&self, other: &SchemaNode) -> SchemaNode {
        let mut out = self.clone();
        out.reference = None;
        out.one_of.clear();
        out.any_of.clear();
        out.all_of.clear();
        if !other.types.is_empty() {
            out.types = other.types.clone();
        }
        for (name, schema) in &other.properties {
            out.properties.insert(name.clone(), schema.clone());
        }
        out.pattern_properties.extend(other.pattern_properties.iter().cloned());
        if !matches!(other.additional_properties, AdditionalProperties::Any) {
            out.additional_properties = other.additional_properties.clone();
        }
        if other.items.is_some() {
            out.items = other.items.clone();
        }
        if other.enum_values.is_some() {
            out.enum_values = other.enum_values.clone();
        }
        for name in &other.required {
            if !out.required.contains(name) {
                out.required.push(name.clone());
            }
        }
        out.never |= other.never;
        out
    }

    /// Copy of this node without its composition keywords.
    pub fn base(&self) -> SchemaNode {
        self.overlay(&SchemaNode::default())
    }
}

impl SchemaId {
    fn of(source: &Value) -> Self {
        let digest = Sha256::digest(source.to_string().as_bytes());
        SchemaId(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SchemaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Schema {
    type Err = SchemaError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        let value = serde_json::from_str::<Value>(source)?;
        Self::from_value(value)
    }
}

impl Schema {
    pub fn from_value(source: Value) -> Result<Self, SchemaError> {
        let id = SchemaId::of(&source);
        let raw = crate::path_de::from_value_with_path::<RawSchema>(source)
            .map_err(SchemaError::Shape)?;
        let (root, sections) = match raw {
            RawSchema::Bool(flag) => (RawSchema::Bool(flag), Vec::new()),
            RawSchema::Node(mut node) => {
                let sections = vec![
                    ("definitions", std::mem::take(&mut node.definitions)),
                    ("$defs", std::mem::take(&mut node.defs)),
                ];
                (RawSchema::Node(node), sections)
            }
        };

        let mut definitions = IndexMap::new();
        for (section, entries) in sections {
            for (name, raw) in entries {
                let reference = format!("#/{section}/{}", escape_pointer(&name));
                definitions.insert(reference, lower(raw)?);
            }
        }
        let root = lower(root)?;
        Ok(Schema { id, root, definitions })
    }

    pub fn id(&self) -> &SchemaId {
        &self.id
    }

    pub fn root(&self) -> &Arc<SchemaNode> {
        &self.root
    }

    /// Look up a reference string. `#` names the document root.
    pub fn definition(&self, reference: &str) -> Option<&Arc<SchemaNode>> {
        if reference == "#" {
            return Some(&self.root);
        }
        self.definitions.get(reference)
    }

    pub fn definitions(&self) -> impl Iterator<Item = (&str, &Arc<SchemaNode>)> + '_ {
        self.definitions.iter().map(|(k, v)| (k.as_str(), v))
    }
}

// ————————————————————————————————————————————————————————————————————————————
// RAW (SERDE) FORM
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSchema {
    Bool(bool),
    Node(Box<RawNode>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTypes {
    One(PrimitiveType),
    Many(Vec<PrimitiveType>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawItems {
    One(RawSchema),
    /// tuple form; positions are not tracked, elements become "anything"
    Tuple(Vec<RawSchema>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawNode {
    #[serde(rename = "type")]
    types: Option<RawTypes>,
    #[serde(rename = "$ref")]
    reference: Option<String>,
    #[serde(rename = "oneOf")]
    one_of: Vec<RawSchema>,
    #[serde(rename = "anyOf")]
    any_of: Vec<RawSchema>,
    #[serde(rename = "allOf")]
    all_of: Vec<RawSchema>,
    properties: IndexMap<String, RawSchema>,
    #[serde(rename = "patternProperties")]
    pattern_properties: IndexMap<String, RawSchema>,
    #[serde(rename = "additionalProperties")]
    additional_properties: Option<RawSchema>,
    items: Option<RawItems>,
    #[serde(rename = "enum")]
    enum_values: Option<Vec<Value>>,
    /// `"const": null` is a real constraint, so presence is kept even for `null`
    #[serde(rename = "const", deserialize_with = "present")]
    const_value: Option<Value>,
    required: Vec<String>,
    definitions: IndexMap<String, RawSchema>,
    #[serde(rename = "$defs")]
    defs: IndexMap<String, RawSchema>,
}

fn lower(raw: RawSchema) -> Result<Arc<SchemaNode>, SchemaError> {
    let node = match raw {
        RawSchema::Bool(true) => return Ok(SchemaNode::any()),
        RawSchema::Bool(false) => SchemaNode { never: true, ..SchemaNode::default() },
        RawSchema::Node(raw) => lower_node(*raw)?,
    };
    Ok(Arc::new(node))
}

fn lower_all(raws: Vec<RawSchema>) -> Result<Vec<Arc<SchemaNode>>, SchemaError> {
    raws.into_iter().map(lower).collect()
}

fn lower_node(raw: RawNode) -> Result<SchemaNode, SchemaError> {
    let types = match raw.types {
        None => Vec::new(),
        Some(RawTypes::One(ty)) => vec![ty],
        Some(RawTypes::Many(tys)) => tys,
    };

    let mut properties = IndexMap::with_capacity(raw.properties.len());
    for (name, schema) in raw.properties {
        properties.insert(name, lower(schema)?);
    }

    let mut pattern_properties = Vec::with_capacity(raw.pattern_properties.len());
    for (pattern, schema) in raw.pattern_properties {
        match Regex::new(&pattern) {
            Ok(compiled) => pattern_properties.push(PatternProperty { pattern: compiled, schema: lower(schema)? }),
            // e.g. ECMA lookaround; such keys fall through to additionalProperties
            Err(err) => tracing::warn!(%pattern, %err, "unsupported patternProperties regex; skipped"),
        }
    }

    let additional_properties = match raw.additional_properties {
        None | Some(RawSchema::Bool(true)) => AdditionalProperties::Any,
        Some(RawSchema::Bool(false)) => AdditionalProperties::Forbidden,
        Some(schema) => AdditionalProperties::Schema(lower(schema)?),
    };

    let items = match raw.items {
        Some(RawItems::One(schema)) => Some(lower(schema)?),
        Some(RawItems::Tuple(_)) | None => None,
    };

    let enum_values = match (raw.enum_values, raw.const_value) {
        (Some(values), _) => Some(values),
        (None, Some(value)) => Some(vec![value]),
        (None, None) => None,
    };

    Ok(SchemaNode {
        types,
        reference: raw.reference,
        one_of: lower_all(raw.one_of)?,
        any_of: lower_all(raw.any_of)?,
        all_of: lower_all(raw.all_of)?,
        properties,
        pattern_properties,
        additional_properties,
        items,
        enum_values,
        required: raw.required,
        never: false,
    })
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// JSON Pointer token escaping (RFC 6901).
fn escape_pointer(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loads_definitions_from_both_sections() {
        let schema = Schema::from_value(json!({
            "type": "object",
            "definitions": { "step": { "type": "object" } },
            "$defs": { "a/b": { "type": "string" } }
        })).unwrap();
        assert!(schema.definition("#/definitions/step").is_some());
        assert!(schema.definition("#/$defs/a~1b").is_some());
        assert!(schema.definition("#/definitions/missing").is_none());
        assert!(schema.definition("#").is_some());
    }

    #[test]
    fn type_may_be_a_list_and_const_is_an_enum() {
        let schema = Schema::from_value(json!({
            "properties": {
                "needs": { "type": ["string", "array"], "items": { "type": "string" } },
                "kind": { "const": "job" }
            }
        })).unwrap();
        let needs = &schema.root().properties["needs"];
        assert_eq!(needs.types, vec![PrimitiveType::String, PrimitiveType::Array]);
        assert_eq!(schema.root().properties["kind"].enum_values, Some(vec![json!("job")]));
    }

    #[test]
    fn property_lookup_order() {
        let schema = Schema::from_value(json!({
            "properties": { "env": { "type": "object" } },
            "patternProperties": { "^x-": { "type": "string" } },
            "additionalProperties": false
        })).unwrap();
        let root = schema.root();
        assert!(root.property_schema("env").unwrap().declares(PrimitiveType::Object));
        assert!(root.property_schema("x-custom").unwrap().declares(PrimitiveType::String));
        assert!(root.property_schema("other").is_none());
    }

    #[test]
    fn identity_follows_content() {
        let a = Schema::from_value(json!({ "type": "object" })).unwrap();
        let b = Schema::from_value(json!({ "type": "object" })).unwrap();
        let c = Schema::from_value(json!({ "type": "array" })).unwrap();
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(a.id().as_str().len(), 64);
    }

    #[test]
    fn unsupported_pattern_is_skipped() {
        let schema = Schema::from_value(json!({
            "patternProperties": { "^(?!x-)": { "type": "string" }, "^x-": { "type": "number" } },
            "additionalProperties": false
        })).unwrap();
        let root = schema.root();
        assert_eq!(root.pattern_properties.len(), 1);
        assert!(root.property_schema("x-port").unwrap().declares(PrimitiveType::Number));
        assert!(root.property_schema("name").is_none());
    }

    #[test]
    fn const_null_is_a_constraint() {
        let schema = Schema::from_value(json!({ "oneOf": [{ "const": null }, { "type": "string" }] })).unwrap();
        assert_eq!(schema.root().one_of[0].enum_values, Some(vec![Value::Null]));
        assert_eq!(schema.root().one_of[1].enum_values, None);
    }

    #[test]
    fn overlay_is_last_write_wins() {
        let a = SchemaNode {
            properties: IndexMap::from([("x".to_string(), SchemaNode::any())]),
            required: vec!["x".into()],
            ..SchemaNode::default()
        };
        let replacement = Arc::new(SchemaNode { types: vec![PrimitiveType::String], ..SchemaNode::default() });
        let b = SchemaNode {
            properties: IndexMap::from([("x".to_string(), replacement.clone())]),
            required: vec!["x".into(), "y".into()],
            ..SchemaNode::default()
        };
        let merged = a.overlay(&b);
        assert!(Arc::ptr_eq(&merged.properties["x"], &replacement));
        assert_eq!(merged.required, vec!["x".to_string(), "y".to_string()]);
    }
}
