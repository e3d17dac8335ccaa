//! Loch CLI tool.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::ApiClient;

#[derive(Parser)]
#[command(name = "loch")]
#[command(about = "Loch job platform CLI", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "LOCH_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Basic-Auth username
    #[arg(long, env = "LOCH_USERNAME", default_value = "loch")]
    username: String,

    /// Basic-Auth password
    #[arg(long, env = "LOCH_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a settings file
    Validate {
        /// Path to the settings file
        #[arg(default_value = "config/loch.kdl")]
        path: String,
    },
    /// Start a job by command name, e.g. `generate_all_tables`
    Dispatch {
        /// Job command
        command: String,
        /// Value bound as the `arg` option
        #[arg(long)]
        arg: Option<String>,
        /// JSON object of job options
        #[arg(long)]
        options: Option<String>,
    },
    /// Manage cron triggers
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommands,
    },
    /// List job runs started on a date
    Status {
        /// Date as YYYY-MM-DD; defaults to today
        #[arg(long)]
        date: Option<chrono::NaiveDate>,
    },
}

#[derive(Subcommand)]
enum ScheduleCommands {
    /// List every trigger
    List,
    /// Pause a trigger, keeping its cron fields
    Pause {
        /// Job id
        id: String,
    },
    /// Replace a trigger's cron fields
    Reschedule {
        /// Job id
        id: String,
        /// Cron fields such as `hour=4 minute=30`
        #[arg(required = true)]
        fields: Vec<String>,
    },
    /// Delete a trigger
    Remove {
        /// Job id
        id: String,
    },
    /// Merge options into a trigger's bound arguments
    Args {
        /// Job id
        id: String,
        /// JSON object of options
        options: String,
    },
    /// Reinstall every trigger from the server's configuration
    Reload,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = || ApiClient::new(&cli.api_url, &cli.username, cli.password.clone());

    match &cli.command {
        Commands::Validate { path } => {
            commands::validate(path)?;
        }
        Commands::Dispatch {
            command,
            arg,
            options,
        } => {
            commands::job::start(&client()?, command, arg.as_deref(), options.as_deref()).await?;
        }
        Commands::Schedule { command } => {
            let client = client()?;
            match command {
                ScheduleCommands::List => commands::schedule::list(&client).await?,
                ScheduleCommands::Pause { id } => commands::schedule::pause(&client, id).await?,
                ScheduleCommands::Reschedule { id, fields } => {
                    commands::schedule::reschedule(&client, id, fields).await?
                }
                ScheduleCommands::Remove { id } => commands::schedule::remove(&client, id).await?,
                ScheduleCommands::Args { id, options } => {
                    commands::schedule::args(&client, id, options).await?
                }
                ScheduleCommands::Reload => commands::schedule::reload(&client).await?,
            }
        }
        Commands::Status { date } => {
            commands::status::list(&client()?, *date).await?;
        }
    }

    Ok(())
}
