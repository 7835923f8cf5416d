//! Schema-guided conversion between CI pipeline documents and a fluent
//! builder DSL, plus canonicalization and an equivalence oracle to prove a
//! round trip preserved meaning.
pub mod canonical;
pub mod codegen;
pub mod expr;
pub mod oracle;
pub mod path_de;
pub mod resolver;
pub mod schema;
pub mod walker;

pub use canonical::{canonicalize, normalize};
pub use codegen::{Codegen, EmitterConfig};
pub use oracle::{Comparison, Oracle};
pub use resolver::{ResolveError, Resolver};
pub use schema::{Schema, SchemaError};
pub use walker::{walk, Context, Flow, Observer};
