//! CLI: schema + documents → (DSL source | canonical form | equivalence verdict | rule table)
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context as _, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use rayon::prelude::*;
use serde_json::Value;

use pipeline_dsl::canonical::{self, rules::RuleConfig};
use pipeline_dsl::codegen::{self, EmitterConfig};
use pipeline_dsl::oracle::Oracle;
use pipeline_dsl::schema::Schema;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// convert CI pipeline documents to builder DSL source, and check that two documents mean the same thing
#[derive(Parser, Debug)]
#[command(name = "pipeline-dsl", version)]
pub struct CommandLineInterface {
    /// debug logging on stderr (otherwise `RUST_LOG`, default `warn`)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// generate builder source for each input document
    Emit(EmitOut),
    /// print the canonical form of each input document
    Canonicalize(CanonicalizeOut),
    /// compare two documents for canonical equivalence (exit status 1 when they differ)
    Compare(CompareArgs),
    /// print the shape-equivalence rules derived from a schema
    Rules(RulesOut),
}

#[derive(Args, Debug, Clone)]
struct SchemaSettings {
    /// schema document (JSON)
    #[arg(long, short)]
    schema: PathBuf,
}

#[derive(Args, Debug, Clone)]
struct RuleSettings {
    /// wrapper field considered by scalar-to-object rules; repeatable (default: name, group)
    #[arg(long = "wrapper-field")]
    wrapper_fields: Vec<String>,
}

#[derive(Args, Debug, Clone)]
struct InputSettings {
    /// JSON Pointer to select a subnode in each document (e.g. /workflow)
    #[arg(long)]
    json_pointer: Option<String>,

    /// One or more inputs (JSON, or YAML by `.yml`/`.yaml` extension). May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

#[derive(clap::Parser, Debug)]
struct EmitOut {
    #[command(flatten)]
    schema_settings: SchemaSettings,

    #[command(flatten)]
    input_settings: InputSettings,

    /// write `<input stem>.ts` files here (stdout if omitted)
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// module the builder helpers are imported from
    #[arg(long)]
    module: Option<String>,

    /// spaces per indentation level
    #[arg(long)]
    indent: Option<usize>,
}

#[derive(clap::Parser, Debug)]
struct CanonicalizeOut {
    #[command(flatten)]
    schema_settings: SchemaSettings,

    #[command(flatten)]
    rule_settings: RuleSettings,

    #[command(flatten)]
    input_settings: InputSettings,
}

#[derive(clap::Parser, Debug)]
struct CompareArgs {
    /// schema document; without it only key order and expression whitespace are normalized
    #[arg(long, short)]
    schema: Option<PathBuf>,

    #[command(flatten)]
    rule_settings: RuleSettings,

    /// JSON Pointer applied to both documents
    #[arg(long)]
    json_pointer: Option<String>,

    /// print the comparison as JSON
    #[arg(long)]
    json: bool,

    left: PathBuf,
    right: PathBuf,
}

#[derive(clap::Parser, Debug)]
struct RulesOut {
    #[command(flatten)]
    schema_settings: SchemaSettings,

    #[command(flatten)]
    rule_settings: RuleSettings,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl SchemaSettings {
    fn load(&self) -> Result<Schema> {
        load_schema(&self.schema)
    }
}

impl RuleSettings {
    fn rule_config(&self) -> RuleConfig {
        if self.wrapper_fields.is_empty() {
            RuleConfig::default()
        } else {
            RuleConfig { wrapper_fields: self.wrapper_fields.clone() }
        }
    }
}

impl InputSettings {
    fn paths(&self) -> Result<Vec<PathBuf>> {
        resolve_file_path_patterns(&self.input).context("failed to resolve input file paths")
    }

    fn load(&self, path: &Path) -> Result<Value> {
        load_document(path, self.json_pointer.as_deref())
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn init_logging(&self) {
        let filter = if self.verbose {
            tracing_subscriber::EnvFilter::new("debug")
        } else {
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
        };
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    pub fn run(&self) -> Result<ExitCode> {
        match &self.cmd {
            Command::Emit(target) => target.run(),
            Command::Canonicalize(target) => target.run(),
            Command::Compare(target) => target.run(),
            Command::Rules(target) => target.run(),
        }
    }
}

impl EmitOut {
    fn config(&self) -> EmitterConfig {
        let mut config = EmitterConfig::default();
        if let Some(module) = &self.module {
            config.module = module.clone();
        }
        if let Some(indent) = self.indent {
            config.indent_width = indent;
        }
        config
    }

    fn run(&self) -> Result<ExitCode> {
        let schema = self.schema_settings.load()?;
        let paths = self.input_settings.paths()?;
        let config = self.config();

        // one emitter per document; only the schema is shared
        let outputs = paths
            .par_iter()
            .map(|path| -> Result<(PathBuf, String)> {
                let document = self.input_settings.load(path)?;
                let source = codegen::generate(&document, &schema, config.clone())
                    .with_context(|| format!("failed to generate source for {}", path.display()))?;
                Ok((path.clone(), source))
            })
            .collect::<Result<Vec<_>>>()?;

        match self.out_dir.as_ref() {
            Some(out_dir) => {
                std::fs::create_dir_all(out_dir)
                    .with_context(|| format!("failed to create {}", out_dir.display()))?;
                for (path, source) in outputs {
                    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "pipeline".into());
                    let out = out_dir.join(format!("{stem}.ts"));
                    std::fs::write(&out, source).with_context(|| format!("failed to write {}", out.display()))?;
                    tracing::info!(input = %path.display(), output = %out.display(), "wrote builder source");
                }
            }
            None => {
                let several = outputs.len() > 1;
                for (path, source) in outputs {
                    if several {
                        println!("// {}", path.display());
                    }
                    print!("{source}");
                }
            }
        }
        Ok(ExitCode::SUCCESS)
    }
}

impl CanonicalizeOut {
    fn run(&self) -> Result<ExitCode> {
        let schema = self.schema_settings.load()?;
        let config = self.rule_settings.rule_config();
        for path in self.input_settings.paths()? {
            let document = self.input_settings.load(&path)?;
            let canonical = canonical::canonicalize_with(&document, &schema, &config)
                .with_context(|| format!("failed to canonicalize {}", path.display()))?;
            println!("{}", serde_json::to_string_pretty(&canonical)?);
        }
        Ok(ExitCode::SUCCESS)
    }
}

impl CompareArgs {
    fn run(&self) -> Result<ExitCode> {
        let schema = self.schema.as_deref().map(load_schema).transpose()?;
        let oracle = match schema.as_ref() {
            Some(schema) => {
                let rules = canonical::rules::rules_for_with(schema, &self.rule_settings.rule_config());
                Oracle::new(schema).with_rules(rules)
            }
            None => Oracle::without_schema(),
        };
        let left = load_document(&self.left, self.json_pointer.as_deref())?;
        let right = load_document(&self.right, self.json_pointer.as_deref())?;
        let result = oracle.compare(&left, &right)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            let verdict = if result.equivalent { "equivalent".green().bold() } else { "different".red().bold() };
            println!("{verdict}");
            println!("  {} {}", self.left.display(), result.digest_a.dimmed());
            println!("  {} {}", self.right.display(), result.digest_b.dimmed());
            if let Some(diff) = &result.diff {
                println!("{}", format!("--- {}", self.left.display()).red());
                println!("{}", diff.left);
                println!("{}", format!("+++ {}", self.right.display()).green());
                println!("{}", diff.right);
            }
        }
        Ok(if result.equivalent { ExitCode::SUCCESS } else { ExitCode::from(1) })
    }
}

impl RulesOut {
    fn run(&self) -> Result<ExitCode> {
        let schema = self.schema_settings.load()?;
        let table = canonical::rules::rules_for_with(&schema, &self.rule_settings.rule_config());
        println!("{}", serde_json::to_string_pretty(&*table)?);
        Ok(ExitCode::SUCCESS)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn load_schema(path: &Path) -> Result<Schema> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read schema file {}", path.display()))?;
    source
        .parse::<Schema>()
        .with_context(|| format!("failed to load schema {}", path.display()))
}

/// Read one document, YAML or JSON by extension, and apply the optional pointer.
fn load_document(path: &Path, json_pointer: Option<&str>) -> Result<Value> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read source file {}", path.display()))?;
    let is_yaml = matches!(path.extension().and_then(|ext| ext.to_str()), Some("yml" | "yaml"));
    let value = if is_yaml {
        serde_yaml::from_str::<Value>(&source)
            .with_context(|| format!("failed to parse YAML source file {}", path.display()))?
    } else {
        serde_json::from_str::<Value>(&source)
            .with_context(|| format!("failed to parse JSON source file {}", path.display()))?
    };
    match json_pointer {
        None => Ok(value),
        Some(pointer) => value
            .pointer(pointer)
            .cloned()
            .ok_or_else(|| anyhow!("JSON pointer {pointer} selects nothing in {}", path.display())),
    }
}

fn resolve_file_path_patterns<I>(patterns: I) -> Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'['))
    }

    let mut out = Vec::<PathBuf>::new();
    for raw in patterns {
        let pattern = raw.as_ref();
        if !has_glob_chars(pattern) {
            out.push(PathBuf::from(pattern));
            continue;
        }
        let before = out.len();
        for entry in glob::glob(pattern).with_context(|| format!("invalid glob pattern {pattern}"))? {
            out.push(entry?);
        }
        if out.len() == before {
            bail!("glob pattern matched no files: {pattern}");
        }
    }
    Ok(out)
}

// ------------------------------- Tests ------------------------------------ //
