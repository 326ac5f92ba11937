//! # Reelforge CLI (`reel`)
//!
//! ## Usage
//!
//! ```bash
//! reel --config ./config/reel.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `reel init` | Create the cache database and run schema migrations |
//! | `reel providers` | List configured providers and whether they can run |
//! | `reel queries <plan>` | Validate and repair a plan's queries offline |
//! | `reel resolve <plan>` | Search, gate, rank and write the manifest |
//! | `reel compile <manifest>` | Quality-check candidates and render the video |
//! | `reel cache stats` | Cache rows per provider and version, recent runs |
//! | `reel cache purge` | Delete cache rows from older versions |
//! | `reel gate` | Show the active gate policy |
//! | `reel completions <shell>` | Print shell completions |
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `info`).

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use reelforge::progress::ProgressMode;
use reelforge::{compile, config, migrate, policy_info, providers, queries, resolve, stats};

/// Reelforge: resolve shot plans into archival media manifests and compile
/// them into video.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/reel.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "reel",
    about = "Reelforge: resolve narrative shot plans into archival media manifests and compile them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/reel.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProgressArg {
    Auto,
    Off,
    Human,
    Json,
}

impl ProgressArg {
    fn mode(self) -> ProgressMode {
        match self {
            ProgressArg::Auto => ProgressMode::default_for_tty(),
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the cache database.
    ///
    /// Creates the SQLite file and tables. Safe to run repeatedly.
    Init,

    /// List configured providers and their status.
    Providers {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Check a shot plan's queries without searching.
    ///
    /// Shows, per beat, which queries are kept, repaired, synthesized or
    /// rejected, and flags beats below the minimum valid-query count.
    Queries {
        /// Shot plan JSON file.
        plan: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// Resolve a shot plan into a manifest.
    ///
    /// Exits non-zero if any beat ends with no usable candidates; the
    /// manifest is still written with per-beat diagnostics.
    Resolve {
        /// Shot plan JSON file.
        plan: PathBuf,

        /// Directory for the manifest (default: `[resolve].manifest_dir`).
        #[arg(long)]
        out_dir: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "auto")]
        progress: ProgressArg,
    },

    /// Compile a manifest into a video.
    Compile {
        /// Manifest JSON written by `reel resolve`.
        manifest: PathBuf,

        /// Output video path (default: `<output_dir>/<episode_id>.mp4`).
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Force a beat to use a specific manifest asset: `beat=provider:id`.
        #[arg(long = "pin")]
        pins: Vec<String>,

        /// Prefer a different asset than the previous beat's when possible.
        #[arg(long)]
        avoid_reuse: bool,

        #[arg(long, value_enum, default_value = "auto")]
        progress: ProgressArg,
    },

    /// Inspect or maintain the search cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show the active gate policy.
    Gate {
        #[arg(long)]
        json: bool,

        /// List every rule pattern.
        #[arg(long, short)]
        verbose: bool,
    },

    /// Print shell completions to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Entry counts per provider and cache version.
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Delete entries whose version is not the configured one.
    Purge,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "reel", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Cache initialized at {}", cfg.cache.path.display());
        }
        Commands::Providers { json } => {
            providers::list_providers(&cfg, json)?;
        }
        Commands::Queries { plan, json } => {
            queries::run_queries(&cfg, &plan, json)?;
        }
        Commands::Resolve {
            plan,
            out_dir,
            progress,
        } => {
            resolve::run_resolve(&cfg, &plan, out_dir.as_deref(), progress.mode()).await?;
        }
        Commands::Compile {
            manifest,
            output,
            pins,
            avoid_reuse,
            progress,
        } => {
            compile::run_compile(&cfg, &manifest, output, &pins, avoid_reuse, progress.mode()).await?;
        }
        Commands::Cache { action } => match action {
            CacheAction::Stats { json } => stats::show_cache_stats(&cfg, json).await?,
            CacheAction::Purge => stats::purge_cache(&cfg).await?,
        },
        Commands::Gate { json, verbose } => {
            policy_info::show_policy(&cfg, json, verbose)?;
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
