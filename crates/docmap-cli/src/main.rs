//! 🚀 docmap-cli, the front door of docmap.
//!
//! 🎬 *[narrator voice]* "It all started with a TOML file and a mapping nobody had installed yet..."
//! 📦 Loads config, sets up logging, builds a [`DocMapper`], then does one thing and exits. 🦆

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL};
use docmap::DocMapper;
use docmap::common::EntityKey;
use docmap::marshall::{DocumentEntity, marshall};
use docmap::queue::FlushReport;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "docmap", about = "🗺️ Map records to search documents, and back")]
struct Cli {
    /// 🔧 TOML config. Without one, only DOCMAP_* env vars are read.
    #[arg(short, long, default_value = "docmap.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 📐 Print every index definition and a summary of the mapped types.
    Mappings,
    /// 🏗️ Create every index a root type lives in.
    Install,
    /// 🔍 Fetch one record and print it, rebuilt and flattened again.
    Get { type_name: String, id: String },
    /// 📥 Queue NDJSON writes (`{"op":"index"|"delete","type":..,"id":..,"doc":{..}}`) and flush them.
    Ingest { file: PathBuf },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Op {
    Index,
    Delete,
}

#[derive(Debug, Deserialize)]
struct IngestLine {
    op: Op,
    #[serde(rename = "type")]
    type_name: String,
    id: Value,
    #[serde(default)]
    doc: serde_json::Map<String, Value>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = run(cli).await;

    if let Err(err) = result {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }
        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: the store isn't reachable. Is Elasticsearch actually running, \
                and does [store.Elasticsearch] url point at it? `docker ps` knows the truth. ☕"
            );
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config_file = cli
        .config
        .try_exists()
        .with_context(|| format!("💀 Could not check whether '{}' exists", cli.config.display()))?
        .then_some(cli.config.as_path());
    if config_file.is_none() {
        info!("🔧 '{}' not found, going with env vars only", cli.config.display());
    }
    let app_config = docmap::load_config(config_file)
        .context("💀 In docmap-cli we couldn't load the config. Take a look at the file and the DOCMAP_* vars.")?;
    let mapper = DocMapper::from_config(&app_config)?;

    match cli.command {
        Command::Mappings => print_mappings(&mapper),
        Command::Install => {
            for index in mapper.install_indices().await? {
                println!("✅ {index}");
            }
            Ok(())
        }
        Command::Get { type_name, id } => {
            let Some(graph) = mapper.load(&type_name, &id).await? else {
                bail!("💀 {} was not found in the store", EntityKey::new(type_name, id));
            };
            let document = marshall(mapper.schema(), &graph)?;
            println!("{}", serde_json::to_string_pretty(&document)?);
            Ok(())
        }
        Command::Ingest { file } => ingest(&mapper, &file).await,
    }
}

fn print_mappings(mapper: &DocMapper) -> Result<()> {
    for (index, definition) in mapper.index_definitions()? {
        println!("📐 {index}\n{}", serde_json::to_string_pretty(&definition)?);
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Type", "Root", "Index", "Store type", "Identity", "Fields"]);
    for type_mapping in mapper.schema().types() {
        let fields: Vec<&str> = type_mapping.fields.keys().map(String::as_str).collect();
        table.add_row(vec![
            Cell::new(&type_mapping.name),
            Cell::new(if type_mapping.root { "yes" } else { "no" }),
            Cell::new(&type_mapping.index_name),
            Cell::new(&type_mapping.store_type_name),
            Cell::new(format!("{} ({:?})", type_mapping.identity_field, type_mapping.identity_type)),
            Cell::new(fields.join(", ")),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn ingest(mapper: &DocMapper, file: &Path) -> Result<()> {
    let contents = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("💀 Failed to read '{}'", file.display()))?;
    let lines: Vec<&str> = contents.lines().filter(|line| !line.trim().is_empty()).collect();

    let progress_bar = ProgressBar::new(lines.len() as u64);
    progress_bar.set_style(ProgressStyle::default_bar().template("{msg}\n| [{bar:40.cyan/blue}] {pos}/{len}")?);
    progress_bar.set_message("📥 queueing");

    for (line_number, line) in lines.iter().enumerate() {
        let parsed: IngestLine = serde_json::from_str(line)
            .with_context(|| format!("💀 Line {} is not a valid ingest line", line_number + 1))?;
        let id = match &parsed.id {
            Value::String(id) => id.clone(),
            other => other.to_string(),
        };
        match parsed.op {
            Op::Index => {
                mapper.index(&DocumentEntity {
                    type_name: parsed.type_name,
                    id: parsed.id,
                    document: parsed.doc,
                })?;
            }
            Op::Delete => {
                mapper.queue().enqueue_delete_key(EntityKey::new(parsed.type_name, id))?;
            }
        }
        progress_bar.inc(1);
    }

    progress_bar.set_message("🚽 flushing");
    let report = mapper.queue().flush_with_retries().await;
    progress_bar.finish_with_message("✅ done");
    print_report(&report);
    Ok(())
}

fn print_report(report: &FlushReport) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Flush", "Count"]);
    table.add_row(vec![Cell::new("rounds"), Cell::new(report.rounds)]);
    table.add_row(vec![Cell::new("submitted"), Cell::new(report.submitted)]);
    table.add_row(vec![Cell::new("succeeded"), Cell::new(report.succeeded)]);
    table.add_row(vec![Cell::new("superseded by a delete"), Cell::new(report.superseded)]);
    table.add_row(vec![Cell::new("transport failures"), Cell::new(report.transport_failures)]);
    table.add_row(vec![Cell::new("abandoned"), Cell::new(report.abandoned.len())]);
    println!("{table}");
    for key in &report.abandoned {
        error!("🪦 abandoned {}", key);
    }
}
