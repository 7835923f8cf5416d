//! Emit builder source, replay it through a small interpreter of the DSL and
//! check the rebuilt document is equivalent to the original.
use pipeline_dsl::codegen::{self, naming, EmitterConfig};
use pipeline_dsl::oracle::Oracle;
use pipeline_dsl::schema::Schema;
use serde_json::{json, Map, Value};

/// Just enough of the builder library to evaluate generated programs.
struct Replay<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Replay<'a> {
    fn run(src: &'a str) -> Value {
        let mut replay = Replay { src, pos: 0 };
        replay.expect("import");
        let end = replay.rest().find(';').expect("import statement");
        replay.pos += end + 1;
        replay.expect("export default");
        let root = replay.chain("pipeline");
        replay.expect(".build()");
        replay.expect(";");
        replay.skip_ws();
        assert_eq!(replay.rest(), "", "trailing source");
        root
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn peek(&mut self, token: &str) -> bool {
        self.skip_ws();
        self.rest().starts_with(token)
    }

    fn eat(&mut self, token: &str) -> bool {
        let found = self.peek(token);
        if found {
            self.pos += token.len();
        }
        found
    }

    fn expect(&mut self, token: &str) {
        assert!(self.eat(token), "expected {token:?} at {:?}", self.rest());
    }

    fn ident(&mut self) -> String {
        self.skip_ws();
        let len = self
            .rest()
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
            .unwrap_or(self.rest().len());
        let ident = self.rest()[..len].to_string();
        self.pos += len;
        ident
    }

    fn chain(&mut self, factory: &str) -> Value {
        self.expect(factory);
        self.expect("(");
        if !self.eat(")") {
            let value = self.value();
            self.expect(")");
            return value;
        }
        let mut object = Map::new();
        while !self.peek(".build(") && self.eat(".") {
            let method = self.ident();
            self.expect("(");
            let key = if method == "set" {
                let key = self.json().as_str().expect("set key").to_string();
                self.expect(",");
                key
            } else {
                naming::to_document_key(&method)
            };
            let value = self.value();
            self.expect(")");
            object.insert(key, value);
        }
        Value::Object(object)
    }

    fn value(&mut self) -> Value {
        if self.peek("node(") {
            return self.chain("node");
        }
        if self.eat("expr(") {
            let body = self.json();
            self.expect(")");
            return Value::String(format!("${{{{ {} }}}}", body.as_str().expect("expr body")));
        }
        if self.eat("`") {
            return self.template();
        }
        if self.eat("[") {
            let mut items = Vec::new();
            while !self.eat("]") {
                items.push(self.value());
                self.eat(",");
            }
            return Value::Array(items);
        }
        self.json()
    }

    fn template(&mut self) -> Value {
        let mut out = String::new();
        loop {
            let rest = self.rest();
            if rest.starts_with("${") {
                self.pos += 2;
                self.expect("expr(");
                let body = self.json();
                self.expect(")");
                self.expect("}");
                out.push_str(&format!("${{{{ {} }}}}", body.as_str().expect("expr body")));
                continue;
            }
            let mut chars = rest.chars();
            match chars.next().expect("unterminated template") {
                '`' => {
                    self.pos += 1;
                    return Value::String(out);
                }
                '\\' => {
                    let escaped = chars.next().expect("dangling escape");
                    out.push(escaped);
                    self.pos += 1 + escaped.len_utf8();
                }
                c => {
                    out.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
    }

    /// A JSON literal: strings and containers delimit themselves, bare
    /// scalars run up to the next separator.
    fn json(&mut self) -> Value {
        self.skip_ws();
        let rest = self.rest();
        if rest.starts_with(['"', '[', '{']) {
            let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
            let value = stream.next().expect("json literal").expect("valid json");
            self.pos += stream.byte_offset();
            return value;
        }
        let len = rest.find([',', ')', ']', ' ', '\n']).unwrap_or(rest.len());
        let value = serde_json::from_str(&rest[..len]).expect("json scalar");
        self.pos += len;
        value
    }
}

fn schema() -> Schema {
    Schema::from_value(json!({
        "type": "object",
        "definitions": {
            "needs": { "oneOf": [{ "type": "string" }, { "type": "array", "items": { "type": "string" } }] },
            "step": {
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "uses": { "type": "string" },
                    "run": { "type": "string" },
                    "with": { "type": "object", "additionalProperties": { "type": ["string", "number", "boolean"] } },
                    "if": { "type": "string" }
                }
            },
            "job": {
                "type": "object",
                "properties": {
                    "runs-on": { "type": "string" },
                    "needs": { "$ref": "#/definitions/needs" },
                    "environment": { "oneOf": [
                        { "type": "string" },
                        { "type": "object", "properties": { "name": { "type": "string" }, "url": { "type": "string" } } }
                    ] },
                    "strategy": { "type": "object", "properties": { "matrix": { "type": "object" } } },
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
    }))
    .unwrap()
}

fn assert_round_trip(document: Value) {
    let schema = schema();
    let source = codegen::generate(&document, &schema, EmitterConfig::default()).unwrap();
    let rebuilt = Replay::run(&source);
    let result = Oracle::new(&schema).compare(&document, &rebuilt).unwrap();
    assert!(result.equivalent, "{source}\n{:#?}", result.diff);
}

#[test]
fn full_workflow_round_trips() {
    assert_round_trip(json!({
        "name": "CI",
        "on": { "push": { "branches": ["main", "release/*"] }, "workflow_dispatch": {} },
        "env": { "CARGO_TERM_COLOR": "always", "RUST_LOG": "${{ vars.log }}" },
        "jobs": {
            "build": {
                "runs-on": "${{ matrix.os }}",
                "strategy": { "matrix": { "os": ["ubuntu-latest", "macos-latest"], "include": [{ "os": "windows-latest", "experimental": true }] } },
                "steps": [
                    { "uses": "actions/checkout@v4" },
                    { "uses": "actions/cache@v4", "with": { "path": "~/.cargo", "key": "cargo-${{ hashFiles('**/Cargo.lock') }}" } },
                    { "name": "Test `${{ matrix.os }}`", "run": "cargo test -- --test-threads=${{ env.THREADS }}" }
                ]
            },
            "deploy": {
                "needs": "build",
                "runs-on": "ubuntu-latest",
                "environment": { "name": "prod", "url": "https://example.com" },
                "steps": [{ "run": "echo \"done\" \\ ok", "if": "${{ github.ref == 'refs/heads/main' }}" }]
            }
        }
    }));
}

#[test]
fn scalar_shorthands_round_trip() {
    assert_round_trip(json!({
        "on": ["push", "pull_request"],
        "jobs": { "lint": { "needs": ["build", "test"], "environment": "staging", "runs-on": "ubuntu-latest" } }
    }));
}

#[test]
fn unplaced_and_awkward_keys_round_trip() {
    assert_round_trip(json!({
        "name": 7,
        "jobs": { "not a job id": { "anything": [1, { "x": null }] } },
        "build": "reserved",
        "set": { "a-b": 1, "A": 2.5, "with.dot": false },
        "x-": null
    }));
}

#[test]
fn expression_spacing_is_not_a_difference() {
    assert_round_trip(json!({ "jobs": { "t": { "runs-on": "${{matrix.os}}", "steps": [{ "if": "${{  a   &&  b }}" }] } } }));
}

#[test]
fn nested_arrays_round_trip() {
    assert_round_trip(json!({ "matrix": [["a", "b"], [{ "os": "linux", "tags": [] }], [], "c", 3] }));
}

#[test]
fn non_object_root_round_trips() {
    assert_round_trip(json!(["push", { "a": 1 }]));
}

#[test]
fn replay_rebuilds_the_exact_document() {
    let document = json!({ "jobs": { "t": { "runs-on": "${{ matrix.os }}", "timeout-minutes": 30 } } });
    let source = codegen::generate(&document, &schema(), EmitterConfig::default()).unwrap();
    assert_eq!(Replay::run(&source), document);
}
