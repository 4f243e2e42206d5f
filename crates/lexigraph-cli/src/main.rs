//! Lexigraph CLI
//!
//! - `check`: compile a schema and print each class with its ancestors and
//!   effective fields
//! - `query`: commit data files and run a structured query request
//! - `path`: print the instances a path expression reaches

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use lexigraph_pathdb::{DbConfig, Schema, DEFAULT_BASE_IRI};
use lexigraph_storage::{GraphStore, StorageConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lexigraph")]
#[command(author, version, about = "Lexigraph: schema-typed property graph queries")]
struct Cli {
    /// Log more (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Prefix that turns relative ids into `_id` IRIs
    #[arg(long, global = true, default_value = DEFAULT_BASE_IRI)]
    base_iri: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Inputs {
    /// Schema documents (JSON array of Class / Enum documents)
    #[arg(long)]
    schema: PathBuf,

    /// Instance documents; each file is committed as one batch, in order
    #[arg(long = "data")]
    data: Vec<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a schema and print its classes.
    Check {
        #[arg(long)]
        schema: PathBuf,
    },

    /// Run a structured query request and print the JSON response.
    Query {
        #[command(flatten)]
        inputs: Inputs,

        /// Query request file
        #[arg(long, conflicts_with = "query_json", required_unless_present = "query_json")]
        query: Option<PathBuf>,

        /// Query request given inline
        #[arg(long)]
        query_json: Option<String>,

        /// Single-line JSON output
        #[arg(long)]
        compact: bool,
    },

    /// Print the ids a path expression reaches from one instance.
    Path {
        #[command(flatten)]
        inputs: Inputs,

        /// Start instance (relative or expanded id)
        #[arg(long)]
        from: String,

        /// Path expression, e.g. `(<friend)*,cat`
        #[arg(long)]
        expr: String,

        /// Keep only instances of this class or its subclasses
        #[arg(long)]
        class: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = StorageConfig {
        db: DbConfig {
            base_iri: cli.base_iri,
        },
        ..StorageConfig::default()
    };

    match cli.command {
        Commands::Check { schema } => cmd_check(&schema),
        Commands::Query {
            inputs,
            query,
            query_json,
            compact,
        } => cmd_query(&inputs, config, query.as_deref(), query_json, compact),
        Commands::Path {
            inputs,
            from,
            expr,
            class,
        } => cmd_path(&inputs, config, &from, &expr, class.as_deref()),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn open_store(inputs: &Inputs, config: StorageConfig) -> Result<GraphStore> {
    let store = GraphStore::from_schema_json(&read(&inputs.schema)?, config)
        .with_context(|| format!("in schema {}", inputs.schema.display()))?;
    for path in &inputs.data {
        let summary = store.import_file(path)?;
        info!(
            file = %path.display(),
            documents = summary.ids.len(),
            instances = summary.instances,
            "data loaded"
        );
    }
    Ok(store)
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_check(path: &Path) -> Result<()> {
    let schema = Schema::from_json_str(&read(path)?)
        .with_context(|| format!("in schema {}", path.display()))?;

    for class in schema.classes() {
        let ancestors: Vec<&str> = schema
            .supertypes_including_self(&class.name)
            .into_iter()
            .filter(|c| *c != class.name)
            .collect();
        let mut header = format!("class {}", class.name.bold());
        if class.is_abstract {
            header.push_str(&format!(" {}", "(abstract)".dimmed()));
        }
        if !ancestors.is_empty() {
            header.push_str(&format!(" <: {}", ancestors.join(", ")));
        }
        println!("{header}");
        for field in class.fields() {
            println!("  {}: {:?} {}", field.name, field.cardinality, field.ty);
        }
    }
    for def in schema.enums() {
        println!("enum {}: {}", def.name.bold(), def.values.join(", "));
    }

    eprintln!(
        "{} {} classes, {} enums",
        "ok".green().bold(),
        schema.classes().count(),
        schema.enums().count()
    );
    Ok(())
}

fn cmd_query(
    inputs: &Inputs,
    config: StorageConfig,
    query: Option<&Path>,
    query_json: Option<String>,
    compact: bool,
) -> Result<()> {
    let text = match (query, query_json) {
        (Some(path), _) => read(path)?,
        (None, Some(text)) => text,
        (None, None) => bail!("either --query or --query-json is required"),
    };

    let store = open_store(inputs, config)?;
    let response = store.query_json(&text)?;

    for err in &response.errors {
        eprintln!(
            "{} {} on {}: {}",
            "warning:".yellow().bold(),
            err.field,
            err.row,
            err.error
        );
    }
    let out = if compact {
        serde_json::to_string(&response)?
    } else {
        serde_json::to_string_pretty(&response)?
    };
    println!("{out}");
    Ok(())
}

fn cmd_path(
    inputs: &Inputs,
    config: StorageConfig,
    from: &str,
    expr: &str,
    class: Option<&str>,
) -> Result<()> {
    let store = open_store(inputs, config)?;
    let snapshot = store.snapshot();
    if let Some(class) = class {
        if snapshot.schema().class(class).is_none() {
            bail!("unknown class `{class}`");
        }
    }

    let reached = store.evaluate_path(from, expr)?;
    let mut shown = 0usize;
    for id in &reached {
        let keep = match class {
            Some(class) => snapshot
                .class_of(id)
                .map_or(false, |c| snapshot.schema().is_subtype(c, class)),
            None => true,
        };
        if keep {
            println!("{}", snapshot.config().expand_id(id));
            shown += 1;
        }
    }
    eprintln!("{} {} reached", "ok".green().bold(), shown);
    Ok(())
}
