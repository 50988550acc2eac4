// flowkeep CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: Run entirely in-process against an ExecutionStore (Postgres or
// in-memory) rather than talking to the `flowkeep-api` HTTP surface — this binary is for
// operators with direct database access, not for driving the engine remotely.

mod commands;
mod output;
mod store;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "flowkeep")]
#[command(about = "flowkeep - durable workflow orchestration")]
#[command(version)]
pub struct Cli {
    /// Postgres connection string. Omit to use a process-local in-memory store.
    #[arg(long, env = "FLOWKEEP_DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"], global = true)]
    pub output: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage workflow definitions
    Workflow {
        #[command(subcommand)]
        command: commands::workflow::WorkflowCommand,
    },

    /// Start, inspect, and control executions
    Execution {
        #[command(subcommand)]
        command: commands::execution::ExecutionCommand,
    },

    /// Manage cron schedules
    Schedule {
        #[command(subcommand)]
        command: commands::schedule::ScheduleCommand,
    },

    /// Run the worker loop and schedule runner until interrupted
    Serve {
        #[command(flatten)]
        args: commands::serve::ServeArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let output_format = output::OutputFormat::from_str(&cli.output);
    let database_url = cli.database_url.as_deref();

    match cli.command {
        Commands::Workflow { command } => commands::workflow::run(command, database_url, output_format).await,
        Commands::Execution { command } => commands::execution::run(command, database_url, output_format).await,
        Commands::Schedule { command } => commands::schedule::run(command, database_url, output_format).await,
        Commands::Serve { args } => commands::serve::run(args, database_url).await,
    }
}
