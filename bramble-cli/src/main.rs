//! Bramble CLI
//!
//! Command-line interface for starting and inspecting pipeline executions.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "bramble")]
#[command(about = "Bramble pipeline execution CLI", long_about = None)]
struct Cli {
    /// Cluster API URL (defaults to the in-cluster service)
    #[arg(long, env = "BRAMBLE_API_URL")]
    api_url: Option<String>,

    /// Bearer token for the cluster API
    #[arg(long, env = "BRAMBLE_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Namespace to act on
    #[arg(short, long, env = "BRAMBLE_NAMESPACE", default_value = "default")]
    namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        namespace: cli.namespace,
        api_url: cli.api_url,
        token: cli.token,
    };

    handle_command(cli.command, &config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "bramble", "-n", "ci", "run", "--pipeline", "p1", "--repo", "git://x/y", "--branch",
            "main",
        ])
        .unwrap();
        assert_eq!(cli.namespace, "ci");
        assert!(matches!(cli.command, Commands::Run { .. }));
    }
}
