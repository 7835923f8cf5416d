//! Shape-equivalence rules derived from a schema.
//!
//! A property whose schema lets authors write either a lone scalar or a
//! richer form (an array of that scalar, or an object carrying the scalar
//! under a wrapper field) gets a rule saying how to lift the scalar into the
//! richer form. Rules depend on the schema alone, never on a document, and
//! are memoized per schema identity.
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::resolver::Resolver;
use crate::schema::{AdditionalProperties, PrimitiveType, Schema, SchemaId, SchemaNode};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Rule {
    /// `"x"` ≡ `["x"]`
    PromoteToArray,
    /// `"x"` ≡ `{ field: "x" }`
    WrapInObject { field: String },
}

/// Property name → rule. Serializes as a plain JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RuleTable {
    rules: IndexMap<String, Rule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleConfig {
    /// candidate wrapper fields, in preference order
    pub wrapper_fields: Vec<String>,
}

type CacheKey = (SchemaId, Vec<String>);

static RULE_CACHE: Lazy<RwLock<HashMap<CacheKey, Arc<RuleTable>>>> = Lazy::new(|| RwLock::new(HashMap::new()));

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl Default for RuleConfig {
    fn default() -> Self {
        Self { wrapper_fields: vec!["name".to_string(), "group".to_string()] }
    }
}

impl RuleTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, property: &str) -> Option<&Rule> {
        self.rules.get(property)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Rule)> + '_ {
        self.rules.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Derive the rule table for `schema`. References are resolved only to
/// classify union alternatives; the walk itself covers every node written
/// in the document (root first, then definitions in declared order).
pub fn build_rules(schema: &Schema, config: &RuleConfig) -> RuleTable {
    let mut builder = RuleBuilder { resolver: Resolver::new(schema), config, table: RuleTable::default() };
    builder.scan(schema.root());
    for (_, definition) in schema.definitions() {
        builder.scan(definition);
    }
    builder.break_wrap_cycles();
    builder.table
}

/// Cached rule table for `schema` with the default [`RuleConfig`].
pub fn rules_for(schema: &Schema) -> Arc<RuleTable> {
    rules_for_with(schema, &RuleConfig::default())
}

pub fn rules_for_with(schema: &Schema, config: &RuleConfig) -> Arc<RuleTable> {
    let key = (schema.id().clone(), config.wrapper_fields.clone());
    {
        let cache = RULE_CACHE.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(table) = cache.get(&key) {
            tracing::debug!(schema = %schema.id(), "rule cache hit");
            return table.clone();
        }
    }
    let table = Arc::new(build_rules(schema, config));
    tracing::debug!(schema = %schema.id(), rules = table.len(), "rule cache filled");
    let mut cache = RULE_CACHE.write().unwrap_or_else(PoisonError::into_inner);
    cache.entry(key).or_insert(table).clone()
}

/// Drop every memoized table. Needed if a schema is ever reloaded in place.
pub fn clear_rule_cache() {
    RULE_CACHE.write().unwrap_or_else(PoisonError::into_inner).clear();
    tracing::debug!("rule cache cleared");
}

pub fn cached_rule_tables() -> usize {
    RULE_CACHE.read().unwrap_or_else(PoisonError::into_inner).len()
}

struct RuleBuilder<'s, 'c> {
    resolver: Resolver<'s>,
    config: &'c RuleConfig,
    table: RuleTable,
}

impl RuleBuilder<'_, '_> {
    fn scan(&mut self, node: &Arc<SchemaNode>) {
        for (name, property) in &node.properties {
            if let Some(rule) = self.rule_for(property) {
                self.record(name, rule);
            }
        }
        for child in node.properties.values() {
            self.scan(child);
        }
        for pp in &node.pattern_properties {
            self.scan(&pp.schema);
        }
        if let AdditionalProperties::Schema(child) = &node.additional_properties {
            self.scan(child);
        }
        if let Some(items) = &node.items {
            self.scan(items);
        }
        for child in node.one_of.iter().chain(&node.any_of).chain(&node.all_of) {
            self.scan(child);
        }
    }

    fn record(&mut self, name: &str, rule: Rule) {
        match self.table.rules.get(name) {
            None => {
                tracing::debug!(property = name, ?rule, "derived shape rule");
                self.table.rules.insert(name.to_string(), rule);
            }
            Some(existing) if *existing != rule => {
                tracing::debug!(property = name, kept = ?existing, dropped = ?rule, "conflicting shape rules");
            }
            Some(_) => {}
        }
    }

    /// A wrapped scalar lands under its wrapper field, where that field's own
    /// rule applies next. Following `field` links must end, so the link that
    /// closes a loop (`name` → `name`, `environment` → `name` → `environment`)
    /// is dropped.
    fn break_wrap_cycles(&mut self) {
        let names: Vec<String> = self.table.rules.keys().cloned().collect();
        for start in names {
            let mut visited = vec![start.clone()];
            let mut current = start;
            while let Some(Rule::WrapInObject { field }) = self.table.rules.get(&current).cloned() {
                if visited.contains(&field) {
                    tracing::debug!(property = %current, %field, "dropping wrap rule that loops back");
                    self.table.rules.shift_remove(&current);
                    break;
                }
                visited.push(field.clone());
                current = field;
            }
        }
    }

    fn resolved(&self, node: &Arc<SchemaNode>) -> Option<Arc<SchemaNode>> {
        match self.resolver.resolve(node) {
            Ok(node) => node,
            Err(err) => {
                tracing::debug!(%err, "skipping unresolvable node during rule derivation");
                None
            }
        }
    }

    fn rule_for(&self, property: &Arc<SchemaNode>) -> Option<Rule> {
        let property = self.resolved(property)?;
        if property.is_union() {
            let alternatives: Vec<_> = property.alternatives().iter().filter_map(|alt| self.resolved(alt)).collect();
            let scalars: Vec<_> = alternatives.iter().filter_map(|alt| alt.bare_scalar_type()).collect();
            let [scalar] = scalars.as_slice() else { return None };
            return self.promotion(*scalar, &alternatives);
        }
        // `"type": ["string", "array"]` is the same union spelled as a type list
        let scalars: Vec<_> = property.types.iter().copied().filter(|ty| ty.is_promotable_scalar()).collect();
        let [scalar] = scalars.as_slice() else { return None };
        if property.declares(PrimitiveType::Array) && self.items_are(&property, *scalar) {
            return Some(Rule::PromoteToArray);
        }
        if property.declares(PrimitiveType::Object) {
            return self.wrapper_field(&property).map(|field| Rule::WrapInObject { field });
        }
        None
    }

    fn promotion(&self, scalar: PrimitiveType, alternatives: &[Arc<SchemaNode>]) -> Option<Rule> {
        let is_array = |alt: &Arc<SchemaNode>| alt.types.as_slice() == [PrimitiveType::Array];
        if alternatives.iter().any(|alt| is_array(alt) && self.items_are(alt, scalar)) {
            return Some(Rule::PromoteToArray);
        }
        alternatives
            .iter()
            .filter(|alt| alt.is_object_like() && alt.bare_scalar_type().is_none())
            .find_map(|alt| self.wrapper_field(alt))
            .map(|field| Rule::WrapInObject { field })
    }

    fn items_are(&self, array: &SchemaNode, scalar: PrimitiveType) -> bool {
        let Some(items) = &array.items else { return false };
        self.resolved(items)
            .and_then(|items| items.bare_scalar_type())
            .is_some_and(|ty| ty.compatible_with(scalar))
    }

    fn wrapper_field(&self, object: &SchemaNode) -> Option<String> {
        self.config
            .wrapper_fields
            .iter()
            .find(|field| object.properties.contains_key(field.as_str()))
            .cloned()
    }
}

// ------------------------------- Tests ------------------------------------ //
