//! # crud-context command line
//!
//! Mounts a list context over a JSON fixture file and prints the page the
//! context commits, which makes pagination and filter settings easy to try
//! out without a host application.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use tracing::info;

use crud_context::{
    ConfigLoader, ContextConfig, ListContext, MemoryStore,
    memory_source::{MemorySource, json_field_filter, json_key},
    notify::TracingNotifier,
    telemetry,
};

#[derive(Parser)]
#[command(name = "crud-context")]
#[command(version)]
#[command(about = "Paginated list/CRUD context manager playground")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch one page of a JSON array and print it with its pagination view
    List(ListArgs),
}

#[derive(Args)]
struct ListArgs {
    /// JSON file holding an array of records
    #[arg(short, long, value_name = "FILE")]
    items: PathBuf,

    /// Page to request
    #[arg(short, long)]
    page: Option<u32>,

    /// Page size (overrides CRUD_CONTEXT_DEFAULT_LIMIT); 0 disables pagination
    #[arg(short, long)]
    limit: Option<u32>,

    /// Store key holding the page number
    #[arg(long, value_name = "NAME")]
    page_param: Option<String>,

    /// Field filter, repeatable
    #[arg(short, long = "filter", value_name = "KEY=VALUE")]
    filters: Vec<String>,

    /// Record field used as the entity id
    #[arg(long, default_value = "id")]
    id_field: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let app = ConfigLoader::new().load().context("loading configuration")?;
    telemetry::init_tracing(&app).context("initializing tracing")?;
    info!(profile = %app.profile, "Configuration loaded");

    match cli.command {
        Command::List(args) => run_list(&app, args).await,
    }
}

async fn run_list(app: &crud_context::AppConfig, args: ListArgs) -> Result<()> {
    let filters = args
        .filters
        .iter()
        .map(|raw| parse_filter(raw))
        .collect::<Result<Vec<_>>>()?;

    let mut config = ContextConfig::from_app(app)
        .with_url_params(filters.iter().map(|(key, _)| key.clone()));
    if let Some(limit) = args.limit {
        config = config.with_limit(limit);
    }
    if let Some(page_param) = args.page_param {
        config = config.with_page_param(page_param);
    }

    let raw = std::fs::read_to_string(&args.items)
        .with_context(|| format!("reading {}", args.items.display()))?;
    let records = match serde_json::from_str::<Value>(&raw)
        .with_context(|| format!("parsing {}", args.items.display()))?
    {
        Value::Array(records) => records,
        other => bail!("expected a JSON array of records, got {}", kind_of(&other)),
    };
    info!(records = records.len(), "Fixture loaded");

    let source = MemorySource::new(records, json_key(args.id_field))
        .with_filter(json_field_filter(config.page_param.clone()))
        .with_page_param(config.page_param.clone());

    let mut entries = filters;
    if let Some(page) = args.page {
        entries.push((config.page_param.clone(), page.to_string()));
    }
    let store = Arc::new(MemoryStore::with_entries(entries));

    let context = ListContext::new(
        Arc::new(source).into_data_source(),
        store,
        config,
        Arc::new(TracingNotifier),
    )?;

    let page = context
        .sync_with_store()
        .await
        .ok_or_else(|| anyhow!("list fetch failed"))?;

    let output = json!({
        "list": page.list,
        "pagination": context.pagination(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    context.close();
    Ok(())
}

fn parse_filter(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("filter '{raw}' must look like KEY=VALUE"))?;
    let key = key.trim();
    if key.is_empty() {
        bail!("filter '{raw}' has an empty key");
    }
    Ok((key.to_string(), value.to_string()))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
