//! Profile Memory - operator tool
//!
//! Inspect, merge into and clean up stored user profiles and conversation
//! logs, and score extraction output against a reference profile.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use profile_memory::{
    config::ProfileMemoryConfig,
    eval::evaluate_json,
    profile::merge_candidate,
    store::{Lookup, ProfileStore, Tier},
    Profile,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "profile-memory")]
#[command(version)]
#[command(about = "Confidence-scored user profiles with dual-tier storage")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "PROFILE_MEMORY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a user's profile
    Show {
        user_id: String,

        /// Only print fields that hold a value
        #[arg(long)]
        filled: bool,
    },

    /// Print a user's conversation log
    History {
        user_id: String,

        /// Maximum number of messages (defaults to conversation.default_limit)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Show the newest messages instead of the oldest
        #[arg(long)]
        recent: bool,
    },

    /// Merge a candidate profile fragment (JSON file) into a user's profile
    Merge {
        user_id: String,

        /// Candidate fragment
        candidate: PathBuf,

        /// Print the merged profile without saving it
        #[arg(long)]
        dry_run: bool,
    },

    /// Score an extracted profile against a reference profile
    Evaluate {
        /// Reference profile (JSON)
        reference: PathBuf,

        /// Extracted profile (JSON)
        extracted: PathBuf,
    },

    /// Delete a user's profile and conversation from the local cache
    Delete { user_id: String },

    /// Run diagnostics
    Doctor,

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("profile_memory={}", log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    // Load configuration
    let config = match &cli.config {
        Some(path) => ProfileMemoryConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ProfileMemoryConfig::default(),
    };

    match cli.command {
        Commands::Show { user_id, filled } => show_profile(&config, &user_id, filled).await?,
        Commands::History {
            user_id,
            limit,
            recent,
        } => show_history(&config, &user_id, limit, recent).await?,
        Commands::Merge {
            user_id,
            candidate,
            dry_run,
        } => run_merge(&config, &user_id, &candidate, dry_run).await?,
        Commands::Evaluate {
            reference,
            extracted,
        } => run_evaluate(&reference, &extracted)?,
        Commands::Delete { user_id } => run_delete(&config, &user_id).await?,
        Commands::Doctor => run_doctor(&config, cli.config.as_deref()).await?,
        Commands::Config { default } => show_config(if default { None } else { Some(&config) })?,
    }

    Ok(())
}

fn tier_label(tier: Tier) -> &'static str {
    match tier {
        Tier::Primary => "primary backend",
        Tier::Local => "local cache",
    }
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

async fn show_profile(config: &ProfileMemoryConfig, user_id: &str, filled: bool) -> Result<()> {
    let store = ProfileStore::from_config(config)?;
    match store.load_profile(user_id).await {
        Lookup::Found {
            value,
            tier,
            degraded,
        } => {
            eprintln!(
                "Profile for {} from {}{}",
                user_id,
                tier_label(tier),
                if degraded { " (primary unavailable)" } else { "" }
            );
            if filled {
                for (dimension, field, fv) in value.fields().filter(|(_, _, fv)| !fv.is_empty()) {
                    println!(
                        "{}.{} = {} ({:.2})",
                        dimension,
                        field,
                        serde_json::to_string(&fv.value)?,
                        fv.confidence
                    );
                }
            } else {
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
        }
        Lookup::NotFound { .. } => println!("No profile stored for {}", user_id),
        Lookup::Unavailable { reason } => bail!("profile for {} unavailable: {}", user_id, reason),
    }
    Ok(())
}

async fn show_history(
    config: &ProfileMemoryConfig,
    user_id: &str,
    limit: Option<usize>,
    recent: bool,
) -> Result<()> {
    let store = ProfileStore::from_config(config)?;
    let limit = limit.unwrap_or(store.default_limit());
    let lookup = if recent {
        store.recent_messages(user_id, limit).await
    } else {
        store.load_conversation(user_id, limit).await
    };
    match lookup {
        Lookup::Found { value, .. } => {
            for message in value {
                println!(
                    "{} [{}] {}",
                    message.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    message.role,
                    message.content
                );
            }
        }
        Lookup::NotFound { .. } => println!("No conversation stored for {}", user_id),
        Lookup::Unavailable { reason } => {
            bail!("conversation for {} unavailable: {}", user_id, reason)
        }
    }
    Ok(())
}

async fn run_merge(
    config: &ProfileMemoryConfig,
    user_id: &str,
    candidate: &Path,
    dry_run: bool,
) -> Result<()> {
    let candidate = read_json(candidate)?;
    let store = ProfileStore::from_config(config)?;

    let current = match store.load_profile(user_id).await {
        Lookup::Found { value, .. } => value,
        Lookup::NotFound { .. } => Profile::empty(),
        Lookup::Unavailable { reason } => {
            bail!("refusing to merge: profile for {} unavailable: {}", user_id, reason)
        }
    };

    let outcome = merge_candidate(&current, &candidate, Some(Utc::now()));
    for rejection in &outcome.rejected {
        eprintln!(
            "Rejected {}.{}: {}",
            rejection.dimension, rejection.field, rejection.reason
        );
    }
    eprintln!("{} field(s) changed", outcome.changed);

    if dry_run {
        println!("{}", serde_json::to_string_pretty(&outcome.profile)?);
        return Ok(());
    }

    let report = store.save_profile(user_id, &outcome.profile).await?;
    println!(
        "Saved profile for {} (primary: {}, local: {})",
        user_id, report.primary, report.local
    );
    Ok(())
}

fn run_evaluate(reference: &Path, extracted: &Path) -> Result<()> {
    let result = evaluate_json(&read_json(reference)?, &read_json(extracted)?);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn run_delete(config: &ProfileMemoryConfig, user_id: &str) -> Result<()> {
    let store = ProfileStore::from_config(config)?;
    if store.delete_user_data(user_id).await? {
        println!("Deleted local data for {}", user_id);
        if store.primary_name().is_some() {
            println!("Note: the primary backend keeps its own copy");
        }
    } else {
        println!("No local data for {}", user_id);
    }
    Ok(())
}

async fn run_doctor(config: &ProfileMemoryConfig, config_path: Option<&Path>) -> Result<()> {
    println!("Profile Memory Doctor");
    println!();

    println!("Checking configuration...");
    match config_path {
        Some(path) => println!("  ✓ Loaded {}", path.display()),
        None => println!("  ℹ No configuration file given (using defaults)"),
    }
    if let Err(e) = config.validate() {
        println!("  ✗ {}", e);
        return Ok(());
    }

    let store = ProfileStore::from_config(config)?;

    println!();
    println!("Checking local cache...");
    match store.cache() {
        Some(cache) => {
            let dir = cache.base_dir();
            match std::fs::create_dir_all(dir) {
                Ok(()) => println!("  ✓ Cache directory {}", dir.display()),
                Err(e) => println!("  ✗ Cache directory {}: {}", dir.display(), e),
            }
        }
        None => println!("  ℹ Local cache disabled"),
    }

    println!();
    println!("Checking primary backend...");
    match store.primary_name() {
        Some(name) => {
            if store.check_backend().await {
                println!("  ✓ {} backend at {} is ready", name, config.backend.base_url);
            } else {
                println!("  ✗ {} backend at {} is not reachable", name, config.backend.base_url);
            }
        }
        None => println!("  ℹ Primary backend disabled"),
    }

    println!();
    println!("Doctor check complete!");
    Ok(())
}

fn show_config(config: Option<&ProfileMemoryConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
