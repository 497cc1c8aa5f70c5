use chartsmith::engine::EngineKind;
use chartsmith::interpret::KeywordInterpreter;
use chartsmith::orchestrator::{Orchestrator, TurnInput, UserIdentity};
use chartsmith::storage::{ConversationStore, JsonlConversationStore};
use chartsmith::tools::ToolCatalog;
use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;

fn setup_logging(level: &str) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chartsmith")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("chartsmith.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::List { category } => handle_list_command(category.as_deref(), config),
        Commands::Show { path } => handle_show_command(path, config),
        Commands::Categories => handle_categories_command(config),
        Commands::Check => handle_check_command(config),
        Commands::Ask {
            conversation,
            message,
            params,
            engine,
            chart_type,
            user,
        } => handle_ask_command(
            conversation,
            message,
            params,
            engine.as_deref(),
            chart_type.as_deref(),
            user,
            config,
        ),
        Commands::History { conversation } => handle_history_command(conversation, config),
    }
}

/// An unreadable storage root is fatal
fn load_catalog(config: &Config) -> Result<ToolCatalog> {
    ToolCatalog::load(&config.catalog.root)
        .context(format!("Failed to load tool catalog from {}", config.catalog.root.display()))
}

fn handle_list_command(category: Option<&str>, config: &Config) -> Result<()> {
    info!("Listing tools - category: {:?}", category);
    let catalog = load_catalog(config)?;
    let tools = catalog.list(category);
    if tools.is_empty() {
        println!("{}", "No tools found".yellow());
        return Ok(());
    }
    for tool in tools {
        let engines: Vec<&str> = tool.engines.iter().map(|e| e.as_str()).collect();
        println!(
            "{:<32} {} {}",
            tool.key().green(),
            tool.description,
            format!("[{}]", engines.join(", ")).dimmed()
        );
    }
    Ok(())
}

fn handle_show_command(path: &str, config: &Config) -> Result<()> {
    info!("Showing tool: {}", path);
    let catalog = load_catalog(config)?;
    let tool = catalog.lookup(path)?;

    println!("{} {}", "Tool:".green(), tool.key());
    println!("  Name:        {}", tool.display_name);
    println!("  Description: {}", tool.description);
    let engines: Vec<&str> = tool.engines.iter().map(|e| e.as_str()).collect();
    println!("  Engines:     {}", engines.join(", "));
    if !tool.tags.is_empty() {
        println!("  Tags:        {}", tool.tags.join(", "));
    }
    if !tool.params.is_empty() {
        println!("  {}", "Parameters:".cyan());
        for (name, spec) in &tool.params {
            let marker = if spec.required { "*".red().to_string() } else { " ".to_string() };
            let default = tool
                .defaults
                .get(name)
                .map(|v| format!(" (default {})", v))
                .unwrap_or_default();
            println!("   {}{}{}", marker, spec.hint(name), default.dimmed());
        }
    }
    if let Some(sample) = &tool.sample_data {
        println!("  Sample data:   {}", sample.display());
    }
    if let Some(sample) = &tool.sample_output {
        println!("  Sample output: {}", sample.display());
    }
    if let Some(doc) = &tool.documentation {
        println!();
        println!("{}", doc);
    }
    Ok(())
}

fn handle_categories_command(config: &Config) -> Result<()> {
    info!("Listing categories");
    let catalog = load_catalog(config)?;
    let index = catalog.snapshot();
    for category in index.categories() {
        let count = index.list(Some(&category)).len();
        println!("{} ({})", category.green(), count);
    }
    Ok(())
}

fn handle_check_command(config: &Config) -> Result<()> {
    info!("Checking catalog at {}", config.catalog.root.display());
    let catalog = load_catalog(config)?;
    let index = catalog.snapshot();
    let report = index.report();

    println!("{} {} tools loaded", "Catalog:".green(), report.loaded);
    for skipped in &report.skipped {
        println!("  {} {}: {}", "skipped".red(), skipped.path, skipped.reason);
    }
    println!("{} {}", "Fingerprint:".cyan(), index.fingerprint());
    Ok(())
}

fn handle_ask_command(
    conversation: &str,
    message: &str,
    raw_params: &[String],
    engine: Option<&str>,
    chart_type: Option<&str>,
    user: &str,
    config: &Config,
) -> Result<()> {
    info!("Asking in conversation {}: {}", conversation, message);

    let mut input = TurnInput::new(conversation, UserIdentity::new(user), message).with_params(parse_params(raw_params)?);
    if let Some(engine) = engine {
        let kind = EngineKind::from_str(engine).ok_or_else(|| eyre!("Unknown engine '{}' (expected script or markup)", engine))?;
        input = input.with_engine(kind);
    }
    if let Some(chart_type) = chart_type {
        input = input.with_chart_type(chart_type);
    }

    let catalog = Arc::new(load_catalog(config)?);
    let dispatcher = Arc::new(config.dispatcher());
    let store = JsonlConversationStore::new(&config.storage.conversations_dir)
        .context("Failed to open conversation store")?;
    let orchestrator = Orchestrator::new(catalog, dispatcher, KeywordInterpreter::new(), store);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
    let response = runtime
        .block_on(orchestrator.handle_turn(input))
        .context("Turn failed")?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn handle_history_command(conversation: &str, config: &Config) -> Result<()> {
    info!("Printing history for {}", conversation);
    let store = JsonlConversationStore::new(&config.storage.conversations_dir)
        .context("Failed to open conversation store")?;
    let history = store.read_history(conversation)?;
    if history.is_empty() {
        println!("{}", "No messages".yellow());
        return Ok(());
    }
    for message in history {
        let role = match message.role.as_str() {
            "user" => message.role.as_str().cyan(),
            _ => message.role.as_str().green(),
        };
        let pending = if message.is_complete { "" } else { " (pending)" };
        println!(
            "{} {}{}: {}",
            message.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            role,
            pending.yellow(),
            message.content
        );
    }
    Ok(())
}

/// Parse repeated `key=value` arguments; values are JSON when they parse, else strings
fn parse_params(raw: &[String]) -> Result<Map<String, Value>> {
    let mut params = Map::new();
    for pair in raw {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| eyre!("Parameter '{}' is not in key=value form", pair))?;
        if key.is_empty() {
            return Err(eyre!("Parameter '{}' has an empty name", pair));
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        params.insert(key.to_string(), value);
    }
    Ok(params)
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging at the configured level; RUST_LOG still wins
    let level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    setup_logging(&level).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).context("Application failed")?;

    Ok(())
}
