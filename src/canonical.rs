//! Canonical documents.
//!
//! Two documents that mean the same thing under a schema normalize to the
//! same tree: scalar shorthands are lifted by the schema's shape rules,
//! object keys are sorted at every level, arrays keep their order and the
//! whitespace inside embedded expressions is collapsed.
pub mod rules;

use std::borrow::Cow;

use serde_json::{Map, Value};

use crate::expr;
use crate::resolver::ResolveError;
use crate::schema::Schema;
use crate::walker;
use rules::{Rule, RuleConfig, RuleTable};

/// Normalize `document` with an already derived rule table. Never fails and
/// never touches its input.
pub fn normalize(document: &Value, rules: &RuleTable) -> Value {
    match document {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut out = Map::with_capacity(entries.len());
            for (key, value) in entries {
                let lifted = match rules.get(key) {
                    Some(rule) => apply(rule, value),
                    None => Cow::Borrowed(value),
                };
                out.insert(key.clone(), normalize(&lifted, rules));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|item| normalize(item, rules)).collect()),
        Value::String(s) => Value::String(expr::normalize_whitespace(s).into_owned()),
        other => other.clone(),
    }
}

/// Canonical form of `document` under `schema`, using the cached rules.
pub fn canonicalize(document: &Value, schema: &Schema) -> Result<Value, ResolveError> {
    canonicalize_with(document, schema, &RuleConfig::default())
}

pub fn canonicalize_with(document: &Value, schema: &Schema, config: &RuleConfig) -> Result<Value, ResolveError> {
    // identity pass: a schema that cannot be walked cannot be trusted for rules either
    walker::walk(document, schema, &mut ())?;
    let rules = rules::rules_for_with(schema, config);
    Ok(normalize(document, &rules))
}

/// Lift a scalar into the richer form its rule names. Non-scalars and
/// `null` are left alone.
fn apply<'v>(rule: &Rule, value: &'v Value) -> Cow<'v, Value> {
    if !matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_)) {
        return Cow::Borrowed(value);
    }
    match rule {
        Rule::PromoteToArray => Cow::Owned(Value::Array(vec![value.clone()])),
        Rule::WrapInObject { field } => {
            let mut map = Map::new();
            map.insert(field.clone(), value.clone());
            Cow::Owned(Value::Object(map))
        }
    }
}

// ------------------------------- Tests ------------------------------------ //
