//! Reverse-engineer a document into fluent builder source.
//!
//! [`Codegen`] is an [`Observer`]: the walker drives it over the document and
//! it writes one builder call per property, choosing the textual form from
//! the *data* that was authored rather than from the schema:
//!
//! - string holding `${{ … }}` → `expr("…")`, or a template literal when
//!   expressions are mixed with text
//! - string / number / boolean / null → the literal
//! - array of scalars → inline array literal; other arrays one element per line
//! - object → nested `node()` chain
//!
//! Anything the schema could not place is written as a verbatim JSON literal
//! instead of failing the whole generation.
pub mod fragment;
pub mod naming;

use serde_json::Value;

use crate::expr::{self, Segment};
use crate::resolver::ResolveError;
use crate::schema::Schema;
use crate::walker::{self, Context, Flow, Observer, Shape};
use fragment::SourceFragment;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitterConfig {
    /// module the helpers are imported from
    pub module: String,
    pub root_factory: String,
    pub node_factory: String,
    pub expr_helper: String,
    pub indent_width: usize,
}

/// What `leave` has to write for the node it closes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Closer {
    Root,
    /// `.prop(node()` … `)`
    Call,
    /// `.prop([` … `])`
    ArrayCall,
    /// `node()` … `,` inside an array
    Element,
    /// `[` … `],` inside an array
    NestedArray,
    /// a one-line array of scalars, written once all elements are in
    Inline { prefix: String, suffix: &'static str, parts: Vec<String> },
    /// already written in full; nothing below it is emitted
    Emitted,
}

#[derive(Debug)]
pub struct Codegen {
    config: EmitterConfig,
    out: SourceFragment,
    closers: Vec<Closer>,
    used_node: bool,
    used_expr: bool,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            module: "@pipeline-dsl/builder".to_string(),
            root_factory: "pipeline".to_string(),
            node_factory: "node".to_string(),
            expr_helper: "expr".to_string(),
            indent_width: 2,
        }
    }
}

impl Default for Codegen {
    fn default() -> Self {
        Self::new()
    }
}

impl Codegen {
    pub fn new() -> Self {
        Self::with_config(EmitterConfig::default())
    }

    pub fn with_config(config: EmitterConfig) -> Self {
        let out = SourceFragment::new(config.indent_width);
        Self { config, out, closers: Vec::new(), used_node: false, used_expr: false }
    }

    /// Walk one document into this emitter.
    pub fn emit(&mut self, document: &Value, schema: &Schema) -> Result<(), ResolveError> {
        walker::walk(document, schema, self)
    }

    pub fn into_string(self) -> String {
        let mut helpers = vec![self.config.root_factory.as_str()];
        if self.used_node {
            helpers.push(&self.config.node_factory);
        }
        if self.used_expr {
            helpers.push(&self.config.expr_helper);
        }
        let header = format!("import {{ {} }} from {};", helpers.join(", "), quote(&self.config.module));
        if self.out.is_empty() {
            return format!("{header}\n");
        }
        format!("{header}\n\n{}", self.out.into_string())
    }

    // ---------------------------- rendering ----------------------------- //

    fn call_prefix(key: &str) -> String {
        match naming::method_for(key) {
            Some(method) => format!(".{method}("),
            None => format!(".set({}, ", quote(key)),
        }
    }

    fn scalar(&mut self, value: &Value) -> String {
        match value {
            Value::String(s) => self.string(s),
            other => other.to_string(),
        }
    }

    fn string(&mut self, s: &str) -> String {
        if !expr::contains_expression(s) {
            return quote(s);
        }
        self.used_expr = true;
        if let Some(body) = expr::whole_expression(s) {
            return format!("{}({})", self.config.expr_helper, quote(body));
        }
        let mut out = String::from("`");
        for segment in expr::segments(s) {
            match segment {
                Segment::Text(text) => out.push_str(&escape_template(text)),
                Segment::Expression(body) => {
                    out.push_str(&format!("${{{}({})}}", self.config.expr_helper, quote(body)));
                }
            }
        }
        out.push('`');
        out
    }

    fn open_node(&mut self, line: &str, closer: Closer) {
        self.used_node = true;
        self.out.push_line(line);
        self.out.indent();
        self.closers.push(closer);
    }
}

impl Observer for Codegen {
    fn enter(&mut self, ctx: &Context<'_>) -> Flow {
        if ctx.is_root() {
            self.closers.push(Closer::Root);
            let root = &self.config.root_factory;
            let (line, flow) = match ctx.shape {
                Shape::Object => (format!("export default {root}()"), Flow::Continue),
                _ => {
                    tracing::debug!("document root is not an object; emitting it as a literal");
                    (format!("export default {root}({})", ctx.value), Flow::Stop)
                }
            };
            self.out.push_line(&line);
            self.out.indent();
            return flow;
        }
        match self.closers.last() {
            Some(Closer::Emitted) => Flow::Stop,
            _ => Flow::Continue,
        }
    }

    fn leave(&mut self, _ctx: &Context<'_>) {
        match self.closers.pop() {
            Some(Closer::Root) => {
                self.out.push_line(".build();");
                self.out.dedent();
            }
            Some(Closer::Call) => {
                self.out.dedent();
                self.out.append(")");
            }
            Some(Closer::ArrayCall) => {
                self.out.dedent();
                self.out.push_line("])");
            }
            Some(Closer::Element) => {
                self.out.dedent();
                self.out.append(",");
            }
            Some(Closer::NestedArray) => {
                self.out.dedent();
                self.out.push_line("],");
            }
            Some(Closer::Inline { prefix, suffix, parts }) => {
                self.out.push_line(&format!("{prefix}[{}]{suffix}", parts.join(", ")));
            }
            Some(Closer::Emitted) | None => {}
        }
    }

    fn visit_property(&mut self, ctx: &Context<'_>) -> Flow {
        let Some(key) = ctx.property_name() else {
            return Flow::Stop;
        };
        let call = Self::call_prefix(key);
        match (ctx.shape, ctx.value) {
            (Shape::Opaque, value) => {
                tracing::debug!(path = %ctx.pointer(), "emitting unplaced value as a literal");
                self.out.push_line(&format!("{call}{value})"));
                Flow::Stop
            }
            (_, Value::Object(_)) => {
                let line = format!("{call}{}()", self.config.node_factory);
                self.open_node(&line, Closer::Call);
                Flow::Continue
            }
            (_, Value::Array(items)) if items.iter().all(is_inline) => {
                self.closers.push(Closer::Inline { prefix: call, suffix: ")", parts: Vec::with_capacity(items.len()) });
                Flow::Continue
            }
            (_, Value::Array(_)) => {
                self.out.push_line(&format!("{call}["));
                self.out.indent();
                self.closers.push(Closer::ArrayCall);
                Flow::Continue
            }
            (_, value) => {
                let literal = self.scalar(value);
                self.out.push_line(&format!("{call}{literal})"));
                Flow::Stop
            }
        }
    }

    fn visit_array_item(&mut self, ctx: &Context<'_>, _index: usize) {
        if let Some(Closer::Inline { .. }) = self.closers.last() {
            let part = match ctx.shape {
                Shape::Opaque => ctx.value.to_string(),
                _ => self.scalar(ctx.value),
            };
            if let Some(Closer::Inline { parts, .. }) = self.closers.last_mut() {
                parts.push(part);
            }
            self.closers.push(Closer::Emitted);
            return;
        }
        match (ctx.shape, ctx.value) {
            (Shape::Opaque, value) => {
                tracing::debug!(path = %ctx.pointer(), "emitting unplaced element as a literal");
                self.out.push_line(&format!("{value},"));
                self.closers.push(Closer::Emitted);
            }
            (_, Value::Object(_)) => {
                let line = format!("{}()", self.config.node_factory);
                self.open_node(&line, Closer::Element);
            }
            (_, Value::Array(items)) if items.iter().all(is_inline) => {
                self.closers.push(Closer::Inline { prefix: String::new(), suffix: ",", parts: Vec::with_capacity(items.len()) });
            }
            (_, Value::Array(_)) => {
                self.out.push_line("[");
                self.out.indent();
                self.closers.push(Closer::NestedArray);
            }
            (_, value) => {
                let literal = self.scalar(value);
                self.out.push_line(&format!("{literal},"));
                self.closers.push(Closer::Emitted);
            }
        }
    }
}

/// Generate builder source for `document`.
pub fn generate(document: &Value, schema: &Schema, config: EmitterConfig) -> Result<String, ResolveError> {
    let mut cg = Codegen::with_config(config);
    cg.emit(document, schema)?;
    Ok(cg.into_string())
}

fn is_inline(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}

/// A double-quoted string literal (JSON escaping is valid in the DSL).
fn quote(s: &str) -> String {
    Value::from(s).to_string()
}

fn escape_template(text: &str) -> String {
    text.replace('\\', "\\\\").replace('`', "\\`").replace("${", "\\${")
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ci_schema() -> Schema {
        Schema::from_value(json!({
            "type": "object",
            "definitions": {
                "step": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "run": { "type": "string" },
                        "uses": { "type": "string" },
                        "if": { "type": "string" },
                        "with": { "type": "object" }
                    }
                },
                "job": {
                    "type": "object",
                    "properties": {
                        "runs-on": { "type": "string" },
                        "timeout-minutes": { "type": "number" },
                        "steps": { "type": "array", "items": { "$ref": "#/definitions/step" } }
                    }
                }
            },
            "properties": {
                "name": { "type": "string" },
                "on": { "oneOf": [
                    { "type": "string" },
                    { "type": "array", "items": { "type": "string" } },
                    { "type": "object" }
                ] },
                "env": { "type": "object", "additionalProperties": { "type": "string" } },
                "jobs": {
                    "type": "object",
                    "patternProperties": { "^[A-Za-z_][A-Za-z0-9_-]*$": { "$ref": "#/definitions/job" } },
                    "additionalProperties": false
                }
            }
        })).unwrap()
    }

    fn emit(document: Value) -> String {
        generate(&document, &ci_schema(), EmitterConfig::default()).unwrap()
    }

    #[test]
    fn full_pipeline() {
        let document = json!({
            "name": "CI",
            "on": { "push": { "branches": ["main"] } },
            "env": { "CARGO_TERM_COLOR": "always" },
            "jobs": {
                "test": {
                    "runs-on": "${{ matrix.os }}",
                    "timeout-minutes": 30,
                    "steps": [
                        { "uses": "actions/checkout@v4" },
                        { "name": "Test ${{ matrix.os }}", "run": "cargo test", "if": "${{ github.event_name == 'push' }}" }
                    ]
                }
            }
        });
        let expected = r#"import { pipeline, node, expr } from "@pipeline-dsl/builder";

export default pipeline()
  .name("CI")
  .on(node()
    .push(node()
      .branches(["main"])))
  .env(node()
    .set("CARGO_TERM_COLOR", "always"))
  .jobs(node()
    .test(node()
      .runsOn(expr("matrix.os"))
      .timeoutMinutes(30)
      .steps([
        node()
          .uses("actions/checkout@v4"),
        node()
          .name(`Test ${expr("matrix.os")}`)
          .run("cargo test")
          .if(expr("github.event_name == 'push'")),
      ])))
  .build();
"#;
        assert_eq!(emit(document), expected);
    }

    #[test]
    fn expression_helper_is_imported_only_when_used() {
        let out = emit(json!({ "name": "CI", "on": ["push", "pull_request"] }));
        assert_eq!(out, r#"import { pipeline } from "@pipeline-dsl/builder";

export default pipeline()
  .name("CI")
  .on(["push", "pull_request"])
  .build();
"#);
    }

    #[test]
    fn properties_follow_document_order() {
        let out = emit(json!({ "on": "push", "name": "CI" }));
        let on = out.find(".on(").unwrap();
        let name = out.find(".name(").unwrap();
        assert!(on < name);
    }

    #[test]
    fn same_schema_different_authored_shapes() {
        let scalar = emit(json!({ "on": "push" }));
        let list = emit(json!({ "on": ["push"] }));
        assert!(scalar.contains(r#".on("push")"#));
        assert!(list.contains(r#".on(["push"])"#));
    }

    #[test]
    fn unplaced_values_become_literals() {
        let out = emit(json!({
            "name": 42,
            "jobs": { "bad key!": { "x": 1 } },
            "on": "push"
        }));
        assert!(out.contains(".name(42)"), "{out}");
        assert!(out.contains(r#".set("bad key!", {"x":1}))"#), "{out}");
        assert!(out.contains(r#".on("push")"#), "{out}");
    }

    #[test]
    fn nested_arrays_and_scalar_elements() {
        let out = emit(json!({ "matrix": [["a", "b"], [{ "os": "linux" }], "c"] }));
        assert_eq!(out, r#"import { pipeline, node } from "@pipeline-dsl/builder";

export default pipeline()
  .matrix([
    ["a", "b"],
    [
      node()
        .os("linux"),
    ],
    "c",
  ])
  .build();
"#);
    }

    #[test]
    fn unplaced_elements_of_inline_arrays_stay_verbatim() {
        let schema = Schema::from_value(json!({
            "properties": { "ports": { "type": "array", "items": { "type": "number" } } }
        }))
        .unwrap();
        let out = generate(&json!({ "ports": ["${{ x }}", 1] }), &schema, EmitterConfig::default()).unwrap();
        assert!(out.contains(r#".ports(["${{ x }}", 1])"#), "{out}");
        assert!(out.starts_with("import { pipeline } from"), "{out}");

        let nested = emit(json!({ "matrix": [["${{ a }}", 2]] }));
        assert!(nested.contains(r#"[expr("a"), 2],"#), "{nested}");
    }

    #[test]
    fn empty_containers() {
        let out = emit(json!({ "on": { "workflow_dispatch": {} }, "env": {}, "x": [] }));
        assert!(out.contains(".workflow_dispatch(node()))"), "{out}");
        assert!(out.contains(".env(node())"), "{out}");
        assert!(out.contains(".x([])"), "{out}");
    }

    #[test]
    fn template_literal_text_is_escaped() {
        let out = emit(json!({ "name": "a`b ${x} \\ ${{ y }}" }));
        assert!(out.contains(r#".name(`a\`b \${x} \\ ${expr("y")}`)"#), "{out}");
    }

    #[test]
    fn non_object_root_is_a_literal() {
        let schema = Schema::from_value(json!({})).unwrap();
        let out = generate(&json!(["a", 1]), &schema, EmitterConfig::default()).unwrap();
        assert_eq!(out, "import { pipeline } from \"@pipeline-dsl/builder\";\n\nexport default pipeline([\"a\",1])\n  .build();\n");
    }

    #[test]
    fn config_changes_names_and_indentation() {
        let config = EmitterConfig {
            module: "./dsl".into(),
            root_factory: "workflow".into(),
            node_factory: "obj".into(),
            expr_helper: "e".into(),
            indent_width: 4,
        };
        let out = generate(&json!({ "env": { "a": "${{ b }}" } }), &ci_schema(), config).unwrap();
        assert_eq!(out, r#"import { workflow, obj, e } from "./dsl";

export default workflow()
    .env(obj()
        .a(e("b")))
    .build();
"#);
    }
}
