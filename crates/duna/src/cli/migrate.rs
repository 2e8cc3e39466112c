use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use duna_core::config::DunaConfig;
use duna_runtime::migrations::MigrationRunner;
use duna_runtime::PgDatabase;

/// Manage database migrations.
#[derive(Parser)]
pub struct MigrateCommand {
    #[command(subcommand)]
    pub action: Option<MigrateAction>,

    /// Configuration file path. Without it, connection settings are read
    /// from the PG_* environment variables.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Migrations directory path (overrides config).
    #[arg(short = 'd', long, global = true)]
    pub migrations_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateAction {
    /// Run all pending migrations (default behavior).
    Up,

    /// Show applied and pending migrations.
    Status,
}

impl MigrateCommand {
    fn load_config(&self) -> Result<DunaConfig> {
        let mut config = match &self.config {
            Some(path) => {
                if !Path::new(path).exists() {
                    anyhow::bail!("Configuration file not found: {}", path);
                }
                info!("Loading configuration from {}", path);
                DunaConfig::from_file(path)?
            }
            None => DunaConfig::from_env()?,
        };

        if let Some(dir) = &self.migrations_dir {
            config.migrations.dir = dir.clone();
        }
        Ok(config)
    }

    pub async fn execute(self) -> Result<()> {
        // Load .env if present
        dotenvy::dotenv().ok();

        let config = self.load_config()?;

        let db = Arc::new(PgDatabase::from_config(&config.database).await?);
        let runner = MigrationRunner::from_config(db.clone(), &config.migrations)?;

        println!();
        println!(
            "  {}  {} Migrations",
            style("⚒️").bold(),
            style("DUNA").bold().cyan()
        );
        println!();

        let result = match self.action.unwrap_or(MigrateAction::Up) {
            MigrateAction::Up => run_up(&runner, &config).await,
            MigrateAction::Status => show_status(&runner).await,
        };

        db.close().await;
        result
    }
}

async fn run_up(runner: &MigrationRunner, config: &DunaConfig) -> Result<()> {
    println!(
        "  {} Running pending migrations from {}...",
        style("→").dim(),
        config.migrations.dir.display()
    );

    let report = match runner.run().await {
        Ok(report) => report,
        Err(e) => {
            if let Some(phase) = e.phase() {
                println!(
                    "  {} Stopped during {} of {}",
                    style("✗").red(),
                    phase,
                    style(e.migration().unwrap_or("-")).yellow()
                );
                println!(
                    "  {} Inspect the {} table before retrying",
                    style("ℹ").blue(),
                    runner.ledger().table()
                );
            }
            return Err(e.into());
        }
    };

    if report.applied.is_empty() {
        println!(
            "  {} Nothing to apply ({} already applied)",
            style("ℹ").blue(),
            report.previously_applied
        );
    } else {
        for unit in &report.applied {
            println!("  {} Applied: {}", style("✓").green(), style(unit).cyan());
        }
        println!();
        println!(
            "  {} Applied {} migration(s)",
            style("✓").green(),
            report.applied.len()
        );
    }
    println!();
    Ok(())
}

async fn show_status(runner: &MigrationRunner) -> Result<()> {
    let status = runner.status().await?;

    if status.applied.is_empty() && status.pending.is_empty() {
        println!("  {} No migrations found", style("ℹ").blue());
        return Ok(());
    }

    if !status.applied.is_empty() {
        println!("  {} Applied:", style("✓").green());
        for unit in &status.applied {
            println!("    {} {}", style("-").dim(), style(unit).cyan());
        }
    }

    if !status.pending.is_empty() {
        if !status.applied.is_empty() {
            println!();
        }
        println!("  {} Pending:", style("○").yellow());
        for unit in &status.pending {
            println!("    {} {}", style("→").dim(), style(unit).yellow());
        }
    }

    println!();
    println!(
        "  {} {} applied, {} pending",
        style("ℹ").blue(),
        status.applied.len(),
        status.pending.len()
    );
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        cmd: MigrateCommand,
    }

    #[test]
    fn test_default_action_is_none() {
        let h = Harness::try_parse_from(["migrate"]).unwrap();
        assert!(h.cmd.action.is_none());
        assert!(h.cmd.config.is_none());
    }

    #[test]
    fn test_parse_status_with_dir() {
        let h = Harness::try_parse_from(["migrate", "status", "-d", "db/migrations"]).unwrap();
        assert_eq!(h.cmd.action, Some(MigrateAction::Status));
        assert_eq!(h.cmd.migrations_dir, Some(PathBuf::from("db/migrations")));
    }

    #[test]
    fn test_load_config_file_with_dir_override() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("duna.toml");
        fs::write(
            &path,
            r#"
            [database]
            url = "postgres://localhost/duna"

            [migrations]
            dir = "from-file"
            "#,
        )
        .unwrap();

        let cmd = MigrateCommand {
            action: None,
            config: Some(path.to_string_lossy().into_owned()),
            migrations_dir: Some(PathBuf::from("from-flag")),
        };
        let config = cmd.load_config().unwrap();
        assert_eq!(config.migrations.dir, PathBuf::from("from-flag"));
        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/duna"));
    }

    #[test]
    fn test_missing_config_file() {
        let cmd = MigrateCommand {
            action: None,
            config: Some("/nonexistent/duna.toml".into()),
            migrations_dir: None,
        };
        assert!(cmd.load_config().is_err());
    }
}
