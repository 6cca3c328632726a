// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::path::{Path, PathBuf};

use anyhow::Context;
use tat_config::Config;
use tat_logging::CliLoggingArgs;

pub use clap::Parser;
use clap::Subcommand;

pub mod ingest;
pub mod init;
pub mod record;
pub mod search;
pub mod start;
pub mod status;
pub mod toggle;

#[derive(clap::Parser)]
#[command(
    name = "tat",
    about = "Terminal activity tracker",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file (default: ~/.tat/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(flatten)]
    pub logging: CliLoggingArgs,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the configuration file and database
    Init(init::InitArgs),
    /// Turn recording on
    Enable,
    /// Turn recording off
    Disable,
    Status(status::StatusArgs),
    Record(record::RecordArgs),
    Ingest(ingest::IngestArgs),
    Start(start::StartArgs),
    Search(search::SearchArgs),
}

impl Commands {
    /// Commands that run inside the user's interactive terminal.
    pub fn is_terminal_attached(&self) -> bool {
        matches!(
            self,
            Commands::Record(_) | Commands::Ingest(_) | Commands::Start(_)
        )
    }
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let ctx = CliContext::new(self.config);
        match self.command {
            Commands::Init(args) => args.run(&ctx),
            Commands::Enable => toggle::set_enabled(&ctx, true),
            Commands::Disable => toggle::set_enabled(&ctx, false),
            Commands::Status(args) => args.run(&ctx),
            Commands::Record(args) => args.run(&ctx).await,
            Commands::Ingest(args) => args.run(&ctx).await,
            Commands::Start(args) => args.run(&ctx).await,
            Commands::Search(args) => args.run(&ctx),
        }
    }
}

/// Options shared by every subcommand
#[derive(Debug, Clone, Default)]
pub struct CliContext {
    config_path: Option<PathBuf>,
}

impl CliContext {
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self { config_path }
    }

    /// The file `init`, `enable` and `disable` write to.
    pub fn config_file(&self) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(tat_config::paths::default_config_path)
    }

    pub fn load_config(&self) -> anyhow::Result<Config> {
        let explicit = self.config_path.as_deref();
        Config::load(explicit).with_context(|| match explicit {
            Some(path) => format!("Failed to load configuration from {}", path.display()),
            None => "Failed to load configuration".to_string(),
        })
    }
}

pub(crate) fn open_existing_database(path: &Path) -> anyhow::Result<tat_local_db::Database> {
    if !path.exists() {
        anyhow::bail!(
            "No database at {}. Run `tat init` first.",
            path.display()
        );
    }
    tat_local_db::Database::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))
}
