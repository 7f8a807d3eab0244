use std::path::PathBuf;

use madmin_types::VerificationStatus;

#[derive(clap::Parser, Debug)]
#[clap(name = "madmin-registry", about = "Build and inspect the MADMIN module registry")]
pub struct Cli {
    /// Use this configuration file instead of the default one
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the modules directory
    #[clap(long, global = true)]
    pub modules_dir: Option<PathBuf>,

    /// Override the state directory
    #[clap(long, global = true)]
    pub state_dir: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Check manifests without building (defaults to every file in the modules directory)
    Validate {
        files: Vec<PathBuf>,
        /// Print results as JSON
        #[clap(long)]
        json: bool,
    },
    /// Run one build cycle and publish the result
    Build {
        /// Print the full build report as JSON
        #[clap(long)]
        json: bool,
    },
    /// Move a module to a new verification status
    Review {
        /// Module identifier
        id: String,
        /// Target status: pending, verified or rejected
        #[clap(long)]
        status: VerificationStatus,
        /// Reviewer name (falls back to the configured reviewer)
        #[clap(long)]
        reviewer: Option<String>,
        #[clap(long, default_value = "")]
        note: String,
        /// Only apply if the record is still at this revision
        #[clap(long)]
        expected_revision: Option<u64>,
    },
    /// Show the live snapshot and verification summary
    Status,
    /// Show one module as a client would see it
    Show {
        id: String,
        #[clap(long)]
        client_version: Option<String>,
        #[clap(long)]
        os: Option<String>,
    },
    /// Write the flat modules.json export
    Export {
        /// Write here instead of the state directory
        #[clap(long, short)]
        output: Option<PathBuf>,
    },
    /// Manage configuration
    Config {
        #[clap(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigCommands {
    /// Set a configuration value
    Set { key: String, value: String },
    /// Get a configuration value
    Get { key: String },
    /// Show all configuration
    Show,
    /// Reset configuration to defaults
    Reset {
        #[clap(long)]
        force: bool,
    },
}
