//! teamsync CLI - Command line interface for the offline team store

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

use teamsync_operator::{ConnectionHandle, ConnectionManager, DataOperator, OperatorConfig};
use teamsync_schema::{RecordKey, RecordType, SchemaRegistry};

mod snapshot;
mod tracing_setup;

#[derive(Parser)]
#[command(name = "teamsync")]
#[command(about = "Offline-first persistence for synced team data", long_about = None)]
struct Cli {
    /// Namespace (server or account context) to operate on
    #[arg(short, long, global = true, default_value = "default")]
    namespace: String,

    /// Config file
    #[arg(short, long, global = true, default_value = "teamsync.toml")]
    config: PathBuf,

    /// Directory holding namespace databases (overrides config)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upsert raw server payloads of one record type
    Ingest {
        /// Record type (Team, MyTeam, TeamMembership, ...)
        #[arg(short = 't', long = "type")]
        record_type: String,
        /// JSON files holding one payload object or an array of them
        files: Vec<PathBuf>,
    },
    /// Import every snapshot file (`{"Team": [...], ...}`) under a directory
    Import {
        dir: PathBuf,
    },
    /// Print one record as JSON
    Show {
        record_type: String,
        /// Identity key; composite keys are joined with ':'
        key: String,
    },
    /// List the keys of all records of a type
    List {
        record_type: String,
    },
    /// Show record counts
    Stats,
    /// Check relational invariants
    Verify,
    /// Compact the namespace's storage
    Compact,
    /// Describe the schema of one or all record types
    Schema {
        record_type: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = tracing_setup::init_tracing(cli.debug) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = OperatorConfig::load(&cli.config)?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    match cli.command {
        Commands::Schema { record_type } => cmd_schema(&config.registry(), record_type.as_deref()),
        Commands::Ingest { record_type, files } => {
            let op = open_operator(&config, &cli.namespace)?;
            cmd_ingest(&op, &record_type, &files)
        }
        Commands::Import { dir } => {
            let op = open_operator(&config, &cli.namespace)?;
            cmd_import(&op, &dir)
        }
        Commands::Show { record_type, key } => {
            let op = open_operator(&config, &cli.namespace)?;
            cmd_show(&op, &record_type, &key)
        }
        Commands::List { record_type } => {
            let op = open_operator(&config, &cli.namespace)?;
            cmd_list(&op, &record_type)
        }
        Commands::Stats => cmd_stats(open_operator(&config, &cli.namespace)?.handle()),
        Commands::Verify => cmd_verify(open_operator(&config, &cli.namespace)?.handle()),
        Commands::Compact => cmd_compact(open_operator(&config, &cli.namespace)?.handle()),
    }
}

fn open_operator(config: &OperatorConfig, namespace: &str) -> Result<DataOperator> {
    let manager = ConnectionManager::new(config.clone());
    let handle = manager.open(namespace, &config.registry())?;
    Ok(DataOperator::new(handle, config))
}

fn cmd_ingest(op: &DataOperator, record_type: &str, files: &[PathBuf]) -> Result<()> {
    if files.is_empty() {
        bail!("no input files given");
    }

    let mut raws = Vec::new();
    for file in files {
        raws.extend(snapshot::read_payloads(file)?);
    }

    let committed = op.handle_records(record_type, &raws)?;
    println!(
        "✓ {} - {} payloads, {} records committed",
        record_type,
        raws.len(),
        committed.len()
    );
    Ok(())
}

fn cmd_import(op: &DataOperator, dir: &Path) -> Result<()> {
    let files = snapshot::snapshot_files(dir);
    if files.is_empty() {
        bail!("no snapshot files found under {}", dir.display());
    }

    // Each file commits as one batch; a bad section leaves the file's records out
    for file in files {
        let sections = snapshot::read_snapshot(&file)?;
        let total = op
            .handle_snapshot(&sections)
            .with_context(|| format!("importing {}", file.display()))?
            .len();
        info!(file = %file.display(), records = total, "imported snapshot");
        println!("✓ {} - {} records committed", file.display(), total);
    }
    Ok(())
}

fn cmd_show(op: &DataOperator, record_type: &str, key: &str) -> Result<()> {
    let schema = op.registry().lookup(record_type)?;
    let Some(key) = RecordKey::parse(key, schema.identity.len()) else {
        bail!(
            "{} keys have {} parts ({}), joined with ':'",
            record_type,
            schema.identity.len(),
            schema.identity.join(", ")
        );
    };

    match op.get(schema.record_type, &key)? {
        Some(record) => {
            let out = json!({
                "type": record.record_type.name(),
                "key": record.key.to_string(),
                "version": record.version,
                "deleted": record.is_deleted(),
                "fields": record.to_json(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
        None => bail!("{} {} not found", record_type, key),
    }
}

fn cmd_list(op: &DataOperator, record_type: &str) -> Result<()> {
    let record_type: RecordType = record_type.parse()?;
    for record in op.records(record_type)? {
        let marker = if record.is_deleted() { " (deleted)" } else { "" };
        println!("{}  v{}{}", record.key, record.version, marker);
    }
    Ok(())
}

fn cmd_stats(handle: &ConnectionHandle) -> Result<()> {
    let stats = handle.with_storage(|storage| Ok(storage.stats()?))?;
    println!("Namespace: {}", handle.namespace());
    print!("{}", stats);
    Ok(())
}

fn cmd_verify(handle: &ConnectionHandle) -> Result<()> {
    let violations = handle.with_storage(|storage| Ok(storage.verify_invariants()?))?;
    if violations.is_empty() {
        println!("✓ {} - no invariant violations", handle.namespace());
        return Ok(());
    }

    eprintln!("✗ {} - {} violations:", handle.namespace(), violations.len());
    for violation in &violations {
        eprintln!("  {}", violation);
    }
    bail!("{} invariant violations", violations.len())
}

fn cmd_compact(handle: &ConnectionHandle) -> Result<()> {
    handle.with_storage(|storage| Ok(storage.compact()?))?;
    println!("Compacted {}", handle.namespace());
    Ok(())
}

fn cmd_schema(registry: &SchemaRegistry, record_type: Option<&str>) -> Result<()> {
    let schemas = match record_type {
        Some(name) => vec![registry.lookup(name)?],
        None => registry.iter().collect(),
    };

    println!("Schema version {}", registry.version());
    for schema in schemas {
        println!();
        println!("{} (identity: {})", schema.record_type, schema.identity.join(", "));
        for field in &schema.fields {
            let mut flags = Vec::new();
            if field.required {
                flags.push("required");
            }
            if schema.is_identity(field.name) {
                flags.push("identity");
            }
            if schema
                .record_type
                .reference_fields()
                .iter()
                .any(|(name, _)| *name == field.name)
            {
                flags.push("references Team");
            }
            println!(
                "  {:<24} {:<14} {}",
                field.name,
                field.kind.describe(),
                flags.join(", ")
            );
        }
    }
    Ok(())
}
