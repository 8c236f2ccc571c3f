//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod crd;
mod execution;
mod pipeline;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start a pipeline execution against a repository branch
    Run {
        /// Pipeline to execute
        #[arg(short, long)]
        pipeline: String,

        /// Git repository to clone
        #[arg(short, long)]
        repo: String,

        /// Branch to check out
        #[arg(short, long)]
        branch: String,

        /// Directory inside the volume to clone into (defaults to the execution name)
        #[arg(long)]
        clone_dir: Option<String>,

        /// Execution name (defaults to the pipeline name plus a random suffix)
        #[arg(long)]
        name: Option<String>,
    },
    /// Show the progress of an execution
    Status {
        /// Execution name, or namespace/name
        name: String,
    },
    /// List executions
    List {
        /// List executions in every namespace
        #[arg(short = 'A', long)]
        all_namespaces: bool,

        /// Print as JSON instead of a human-readable listing
        #[arg(long)]
        json: bool,
    },
    /// List pipelines and their tasks
    Pipelines,
    /// Print the custom resource definitions for `kubectl apply -f -`
    Crds,
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    if let Commands::Crds = command {
        return crd::print();
    }

    let client = config.client().await?;

    match command {
        Commands::Run {
            pipeline,
            repo,
            branch,
            clone_dir,
            name,
        } => {
            let request = execution::RunRequest {
                pipeline,
                repo,
                branch,
                clone_dir: clone_dir.unwrap_or_default(),
                name,
            };
            execution::run(&client, config, request).await
        }
        Commands::Status { name } => execution::status(&client, config, &name).await,
        Commands::List {
            all_namespaces,
            json,
        } => execution::list(&client, config, all_namespaces, json).await,
        Commands::Pipelines => pipeline::list(&client, config).await,
        Commands::Crds => crd::print(),
    }
}
