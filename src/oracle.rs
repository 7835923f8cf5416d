//! Black-box document equivalence.
//!
//! Both sides are canonicalized, serialized compactly and hashed; equal
//! digests mean equivalent documents. On a mismatch both canonical forms are
//! handed back so the caller can diff them however it likes.
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::canonical::{self, rules::RuleTable};
use crate::resolver::ResolveError;
use crate::schema::Schema;
use crate::walker;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comparison {
    pub equivalent: bool,
    /// lowercase hex SHA-256 of the canonical serialization
    pub digest_a: String,
    pub digest_b: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<CanonicalPair>,
}

/// Pretty-printed canonical forms of both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalPair {
    pub left: String,
    pub right: String,
}

pub struct Oracle<'s> {
    schema: Option<&'s Schema>,
    rules: Arc<RuleTable>,
}

impl<'s> Oracle<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        Self { schema: Some(schema), rules: canonical::rules::rules_for(schema) }
    }

    /// Only key order and expression whitespace are normalized.
    pub fn without_schema() -> Self {
        Self { schema: None, rules: Arc::new(RuleTable::empty()) }
    }

    pub fn with_rules(mut self, rules: Arc<RuleTable>) -> Self {
        self.rules = rules;
        self
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn compare(&self, a: &Value, b: &Value) -> Result<Comparison, ResolveError> {
        let left = self.canonical(a)?;
        let right = self.canonical(b)?;
        let digest_a = digest(&left);
        let digest_b = digest(&right);
        let equivalent = digest_a == digest_b;
        let diff = (!equivalent).then(|| CanonicalPair { left: format!("{left:#}"), right: format!("{right:#}") });
        if !equivalent {
            tracing::debug!(%digest_a, %digest_b, "documents differ after canonicalization");
        }
        Ok(Comparison { equivalent, digest_a, digest_b, diff })
    }

    fn canonical(&self, document: &Value) -> Result<Value, ResolveError> {
        if let Some(schema) = self.schema {
            walker::walk(document, schema, &mut ())?;
        }
        Ok(canonical::normalize(document, &self.rules))
    }
}

/// SHA-256 of the compact serialization. Keys are already sorted, so the
/// serialization is unique per canonical document.
pub fn digest(canonical: &Value) -> String {
    hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
}

// ------------------------------- Tests ------------------------------------ //
