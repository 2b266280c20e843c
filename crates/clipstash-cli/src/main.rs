//! clipstash CLI
//!
//! Command-line interface for clipstash - clipboard history management.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use clipstash_core::{Config, EntryStore, StorageError};

mod commands;
mod editor;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "clipstash")]
#[command(about = "clipstash - Clipboard history with local and cloud storage")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log debug output (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List entries, oldest first
    #[command(alias = "ls")]
    List {
        /// Only entries with this tag
        #[arg(short, long)]
        tag: Option<String>,
        /// Only favorites
        #[arg(short, long)]
        favorites: bool,
    },
    /// Show one entry in full
    Show {
        /// Entry ID (full id or prefix)
        id: String,
    },
    /// Store copied text
    Add {
        /// Content to store (read from stdin if omitted)
        content: Option<String>,
        /// Store in the cloud when signed in
        #[arg(long)]
        cloud: bool,
    },
    /// Delete entries (favorites are kept)
    #[command(alias = "rm")]
    Delete {
        /// Entry IDs (full ids or prefixes)
        #[arg(required = true)]
        ids: Vec<String>,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Change an entry's content
    Edit {
        /// Entry ID (full id or prefix)
        id: String,
        /// New content (opens editor if not provided)
        #[arg(short, long)]
        content: Option<String>,
    },
    /// Move an entry between local storage and the cloud
    Toggle {
        /// Entry ID (full id, cloud record id, or prefix)
        id: String,
    },
    /// Manage favorites
    Favorite {
        #[command(subcommand)]
        command: Option<FavoriteCommands>,
    },
    /// Manage tags
    Tag {
        #[command(subcommand)]
        command: Option<TagCommands>,
    },
    /// Print the entry list whenever it changes
    Watch,
    /// Delete local entries older than local_ttl
    Prune,
    /// Move legacy entries into the sharded layout
    Migrate,
    /// Show status (backend, counts, limits)
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum FavoriteCommands {
    /// Mark entries as favorites
    Add {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Unmark favorites
    #[command(alias = "rm")]
    Remove {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// List favorite ids
    #[command(alias = "ls")]
    List,
}

#[derive(Subcommand)]
enum TagCommands {
    /// List all tags with counts
    #[command(alias = "ls")]
    List,
    /// Replace the tags on an entry
    Set {
        /// Entry ID (full id or prefix)
        id: String,
        /// Tags (comma-separated or repeated; none clears)
        tags: Vec<String>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, backend, local_item_limit, local_ttl, cloud_settle_ms, log_file)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if let Some(hint) = recovery_hint(&e) {
                eprintln!("Hint: {}", hint);
            }
            ExitCode::FAILURE
        }
    }
}

/// Recovery advice from the first storage error in the chain
fn recovery_hint(error: &anyhow::Error) -> Option<&'static str> {
    error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<StorageError>())
        .find_map(StorageError::recovery_suggestion)
}

async fn run(cli: Cli) -> Result<()> {
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Config commands don't need the store
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), config_path, &output);
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    init_logging(cli.verbose, &config);

    let store = EntryStore::open_with_config(config)?;
    debug!("Store opened");

    match cli.command {
        Commands::List { tag, favorites } => {
            commands::entry::list(&store, tag, favorites, &output).await
        }
        Commands::Show { id } => commands::entry::show(&store, id, &output).await,
        Commands::Add { content, cloud } => {
            commands::entry::add(&store, content, cloud, &output).await
        }
        Commands::Delete { ids, yes } => commands::entry::delete(&store, ids, yes, &output).await,
        Commands::Edit { id, content } => {
            commands::entry::edit(&store, id, content, &output).await
        }
        Commands::Toggle { id } => commands::entry::toggle(&store, id, &output).await,
        Commands::Favorite { command } => handle_favorite_command(command, &store, &output).await,
        Commands::Tag { command } => handle_tag_command(command, &store, &output).await,
        Commands::Watch => commands::entry::watch(&store, &output).await,
        Commands::Prune => commands::entry::prune(&store, &output).await,
        Commands::Migrate => commands::entry::migrate(&store, &output).await,
        Commands::Status => commands::status::show(&store, &output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

async fn handle_favorite_command(
    command: Option<FavoriteCommands>,
    store: &EntryStore,
    output: &Output,
) -> Result<()> {
    match command {
        Some(FavoriteCommands::Add { ids }) => commands::favorite::add(store, ids, output).await,
        Some(FavoriteCommands::Remove { ids }) => {
            commands::favorite::remove(store, ids, output).await
        }
        Some(FavoriteCommands::List) | None => commands::favorite::list(store, output).await,
    }
}

async fn handle_tag_command(
    command: Option<TagCommands>,
    store: &EntryStore,
    output: &Output,
) -> Result<()> {
    match command {
        Some(TagCommands::Set { id, tags }) => commands::tag::set(store, id, tags, output).await,
        Some(TagCommands::List) | None => commands::tag::list(store, output).await,
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Filter directives when RUST_LOG is not set
fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "clipstash_core=debug,clipstash_cli=debug"
    } else {
        "clipstash_core=warn,clipstash_cli=warn"
    }
}

/// Initialize logging to stderr, or to `log_file` when configured
fn init_logging(verbose: bool, config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    if let Some(ref log_path) = config.log_file {
        let log_file = match OpenOptions::new().create(true).append(true).open(log_path) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
                return;
            }
        };

        // Ignore error if already initialized
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(log_file)
            .try_init();
        return;
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
