//! Command-line surface for the appliance: `run` the full appliance loop,
//! or a handful of one-shot maintenance commands useful for scripting and
//! local development without a controller attached.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::app::Application;
use crate::config::Config;
use crate::error::Result;

#[derive(Parser, Debug)]
#[command(name = "cloze-minder", version, about = "Headless audio incremental-learning appliance")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the appliance loop: input dispatch, progress tracking, periodic GC.
    Run,
    /// Run one garbage-collection sweep and exit.
    Gc,
    /// Create the content store and apply migrations, then exit.
    InitDb,
    /// Register a newly-ingested recording as a Topic.
    ImportTopic {
        #[arg(long)]
        source_id: String,
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        title: String,
        #[arg(long)]
        duration: f64,
    },
    /// Print outstanding topic/extract/item counts.
    Status,
}

/// Handle the maintenance subcommands that don't need the full appliance
/// loop. Returns `Ok(true)` if `command` was one of these (the caller
/// should exit), `Ok(false)` for `None` or `Run` (the caller should build
/// an [`Application`] and enter the loop itself).
pub async fn run_command(cli: &Cli, config: &Config) -> Result<bool> {
    let command = match &cli.command {
        Some(command) => command,
        None => return Ok(false),
    };

    match command {
        Commands::Run => Ok(false),

        Commands::Gc => {
            let app = Application::build(config.clone()).await?;
            let report = crate::gc::sweep(&app.pool).await?;
            println!(
                "gc: {} items, {} extracts, {} topics removed",
                report.items, report.extracts, report.topics
            );
            Ok(true)
        }

        Commands::InitDb => {
            Application::build(config.clone()).await?;
            println!("database ready at {}", config.database_path.display());
            Ok(true)
        }

        Commands::ImportTopic {
            source_id,
            path,
            title,
            duration,
        } => {
            let app = Application::build(config.clone()).await?;
            let id = crate::db::register_topic(
                &app.pool,
                source_id,
                &path.to_string_lossy(),
                title,
                *duration,
                true,
            )
            .await?;
            println!("registered topic {id}");
            Ok(true)
        }

        Commands::Status => {
            let app = Application::build(config.clone()).await?;
            let topics = crate::db::topics_outstanding(&app.pool).await?;
            let extracts = crate::db::extracts_outstanding(&app.pool).await?;
            let items = crate::db::items_outstanding(&app.pool).await?;
            println!("outstanding topics:   {}", topics.len());
            println!("outstanding extracts: {}", extracts.len());
            println!("outstanding items:    {}", items.len());
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_import_topic() {
        let cli = Cli::parse_from([
            "cloze-minder",
            "import-topic",
            "--source-id",
            "yt1",
            "--path",
            "/media/topics/yt1.wav",
            "--title",
            "Intro",
            "--duration",
            "123.4",
        ]);
        match cli.command {
            Some(Commands::ImportTopic { source_id, duration, .. }) => {
                assert_eq!(source_id, "yt1");
                assert_eq!(duration, 123.4);
            }
            other => panic!("expected ImportTopic, got {other:?}"),
        }
    }

    #[test]
    fn test_no_subcommand_parses_to_none() {
        let cli = Cli::parse_from(["cloze-minder"]);
        assert!(cli.command.is_none());
    }
}
