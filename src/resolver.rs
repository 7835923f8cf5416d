//! Reference following and union branch selection.
//!
//! Every data node must end up with exactly one effective schema node before
//! an observer sees it. [`Resolver::effective`] gets there in three steps:
//! follow `$ref` chains, fold `allOf` branches into one node, then pick the
//! union branch that applies to the concrete value.
//!
//! Branch selection is *first match*: alternatives are tried in declared
//! order and the first one whose declared checks all pass wins, so schema
//! authors control precedence by ordering. No match is not an error; the
//! caller gets `None` and treats the value as opaque.
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::schema::{Schema, SchemaNode};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("cyclic schema reference: {}", chain.join(" -> "))]
    CyclicReference { chain: Vec<String> },
}

pub struct Resolver<'s> {
    schema: &'s Schema,
}

impl<'s> Resolver<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &'s Schema {
        self.schema
    }

    /// Follow a reference chain to a node that is not itself a reference.
    /// `Ok(None)` for a dangling reference.
    pub fn resolve(&self, node: &Arc<SchemaNode>) -> Result<Option<Arc<SchemaNode>>, ResolveError> {
        self.follow(node, &mut Vec::new())
    }

    /// First alternative (in declared order) that admits `data`, already
    /// resolved through references.
    pub fn select_branch(
        &self,
        data: &Value,
        alternatives: &[Arc<SchemaNode>],
    ) -> Result<Option<Arc<SchemaNode>>, ResolveError> {
        Ok(self.select_in(data, alternatives, &mut Vec::new())?.map(|(_, resolved)| resolved))
    }

    /// The single effective schema for `data` at a location described by
    /// `node`, or `None` when nothing applies.
    pub fn effective(&self, node: &Arc<SchemaNode>, data: &Value) -> Result<Option<Arc<SchemaNode>>, ResolveError> {
        self.effective_in(node, data, &mut Vec::new())
    }

    // -------------------------------------------------------------------- //

    /// `chain` holds the references entered while resolving one data node.
    /// It grows and shrinks like a stack so sibling branches that share a
    /// definition are not mistaken for a cycle.
    fn follow(&self, node: &Arc<SchemaNode>, chain: &mut Vec<String>) -> Result<Option<Arc<SchemaNode>>, ResolveError> {
        let mut current = node.clone();
        while let Some(reference) = current.reference.clone() {
            if chain.contains(&reference) {
                chain.push(reference);
                return Err(ResolveError::CyclicReference { chain: chain.clone() });
            }
            match self.schema.definition(&reference) {
                Some(target) => {
                    chain.push(reference);
                    current = target.clone();
                }
                None => {
                    tracing::warn!(%reference, "dangling schema reference");
                    return Ok(None);
                }
            }
        }
        Ok(Some(current))
    }

    fn effective_in(&self, node: &Arc<SchemaNode>, data: &Value, chain: &mut Vec<String>) -> Result<Option<Arc<SchemaNode>>, ResolveError> {
        let mark = chain.len();
        let out = self.effective_step(node, data, chain);
        chain.truncate(mark);
        out
    }

    fn effective_step(&self, node: &Arc<SchemaNode>, data: &Value, chain: &mut Vec<String>) -> Result<Option<Arc<SchemaNode>>, ResolveError> {
        let Some(mut node) = self.follow(node, chain)? else {
            return Ok(None);
        };

        if !node.all_of.is_empty() {
            node = Arc::new(self.merge_all_of(&node, data, chain)?);
        }

        if node.is_union() {
            let Some((index, _)) = self.select_in(data, node.alternatives(), chain)? else {
                return Ok(None);
            };
            // re-enter through the declared alternative so its reference is back on the chain
            let Some(branch) = self.effective_in(&node.alternatives()[index], data, chain)? else {
                return Ok(None);
            };
            node = Arc::new(node.base().overlay(&branch));
        }

        if !node.accepts_type(data) {
            return Ok(None);
        }
        Ok(Some(node))
    }

    /// Fold `allOf` branches onto the node in declaration order. Branches
    /// that do not apply to `data` are skipped rather than failing the node.
    fn merge_all_of(&self, node: &SchemaNode, data: &Value, chain: &mut Vec<String>) -> Result<SchemaNode, ResolveError> {
        let mut merged = node.base();
        for branch in &node.all_of {
            match self.effective_in(branch, data, chain)? {
                Some(branch) => merged = merged.overlay(&branch),
                None => tracing::debug!("allOf branch does not apply; skipped"),
            }
        }
        // unions of the node itself are decided after the merge
        merged.one_of = node.one_of.clone();
        merged.any_of = node.any_of.clone();
        Ok(merged)
    }

    /// Index and resolved form of the first admitted alternative.
    fn select_in(
        &self,
        data: &Value,
        alternatives: &[Arc<SchemaNode>],
        chain: &mut Vec<String>,
    ) -> Result<Option<(usize, Arc<SchemaNode>)>, ResolveError> {
        for (index, alternative) in alternatives.iter().enumerate() {
            let mark = chain.len();
            let resolved = self.follow(alternative, chain);
            let admitted = match resolved {
                Ok(Some(resolved)) => match self.admits(&resolved, data, chain) {
                    Ok(true) => Ok(Some(resolved)),
                    Ok(false) => Ok(None),
                    Err(err) => Err(err),
                },
                Ok(None) => Ok(None),
                Err(err) => Err(err),
            };
            chain.truncate(mark);
            if let Some(resolved) = admitted? {
                return Ok(Some((index, resolved)));
            }
        }
        Ok(None)
    }

    /// The ordered checks of branch selection:
    /// 1. declared primitive type must match the value's runtime type,
    /// 2. declared enumeration must contain the value,
    /// 3. declared required properties must all be present,
    /// 4. a declared property set must overlap the value's keys.
    ///
    /// A nested union admits the value when one of its own branches does.
    fn admits(&self, node: &Arc<SchemaNode>, data: &Value, chain: &mut Vec<String>) -> Result<bool, ResolveError> {
        if !node.accepts_type(data) {
            return Ok(false);
        }
        if let Some(values) = &node.enum_values {
            if !values.contains(data) {
                return Ok(false);
            }
        }
        if !node.required.is_empty() {
            let Some(map) = data.as_object() else { return Ok(false) };
            if !node.required.iter().all(|name| map.contains_key(name)) {
                return Ok(false);
            }
        }
        if !node.properties.is_empty() {
            let Some(map) = data.as_object() else { return Ok(false) };
            // an empty object carries no evidence either way
            if !map.is_empty() && !map.keys().any(|key| node.properties.contains_key(key)) {
                return Ok(false);
            }
        }
        if node.is_union() {
            return Ok(self.select_in(data, node.alternatives(), chain)?.is_some());
        }
        Ok(true)
    }
}

// ------------------------------- Tests ------------------------------------ //
