mod migrate;

pub use migrate::MigrateCommand;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// DUNA - database schema migrations
#[derive(Parser)]
#[command(name = "duna")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run database migrations.
    Migrate(MigrateCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        init_tracing(self.verbose);

        match self.command {
            Commands::Migrate(cmd) => cmd.execute().await,
        }
    }
}

fn init_tracing(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string()))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_migrate() {
        let cli = Cli::try_parse_from(["duna", "migrate"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_parse_status() {
        let cli = Cli::try_parse_from(["duna", "-v", "migrate", "status"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_rejects_unknown_command() {
        assert!(Cli::try_parse_from(["duna", "serve"]).is_err());
    }
}
