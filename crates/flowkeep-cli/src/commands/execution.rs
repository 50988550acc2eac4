// Execution lifecycle: start, inspect, signal, pause/resume/terminate, replay.

use clap::Subcommand;
use uuid::Uuid;

use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};

#[derive(Subcommand)]
pub enum ExecutionCommand {
    /// Start a new execution of a workflow's current version
    Start {
        workflow_id: Uuid,

        /// JSON seed for the execution's initial variables
        #[arg(long, default_value = "null")]
        input: String,
    },

    Show { execution_id: Uuid },

    /// List recent executions of a workflow
    List {
        workflow_id: Uuid,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Deliver a signal to a waiting execution
    Signal {
        execution_id: Uuid,
        signal_type: String,

        #[arg(long, default_value = "null")]
        data: String,
    },

    Pause { execution_id: Uuid },
    Resume { execution_id: Uuid },

    Terminate {
        execution_id: Uuid,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Re-run a workflow from scratch, or from a given node reusing earlier results
    Replay {
        execution_id: Uuid,

        #[arg(long)]
        from_node: Option<String>,
    },

    /// Print the execution's append-only log
    Logs { execution_id: Uuid },
}

fn print_execution(execution: &flowkeep_engine::model::Execution, output: OutputFormat) {
    if output.is_text() {
        print_field("execution_id", &execution.execution_id.to_string());
        print_field("workflow_id", &execution.workflow_id.to_string());
        print_field("status", &format!("{:?}", execution.status));
        print_field("current_node", execution.state.current_node_id.as_deref().unwrap_or("-"));
        print_field("version", &execution.version.to_string());
        if let Some(err) = &execution.state.error_message {
            print_field("error", err);
        }
    } else {
        output.print_value(execution);
    }
}

pub async fn run(
    command: ExecutionCommand,
    database_url: Option<&str>,
    output: OutputFormat,
) -> anyhow::Result<()> {
    let engine = crate::store::build_engine(database_url).await?;

    match command {
        ExecutionCommand::Start { workflow_id, input } => {
            let input: serde_json::Value = serde_json::from_str(&input)?;
            let execution = engine.create_execution(workflow_id, input).await?;
            print_execution(&execution, output);
            Ok(())
        }

        ExecutionCommand::Show { execution_id } => {
            let execution = engine.store().get_execution(execution_id).await?;
            print_execution(&execution, output);
            Ok(())
        }

        ExecutionCommand::List { workflow_id, limit } => {
            let executions = engine.store().list_executions_for_workflow(workflow_id, limit).await?;
            if output.is_text() {
                print_table_header(&[("EXECUTION_ID", 36), ("STATUS", 15), ("CURRENT_NODE", 20)]);
                for execution in &executions {
                    print_table_row(&[
                        (&execution.execution_id.to_string(), 36),
                        (&format!("{:?}", execution.status), 15),
                        (execution.state.current_node_id.as_deref().unwrap_or("-"), 20),
                    ]);
                }
            } else {
                output.print_value(&executions);
            }
            Ok(())
        }

        ExecutionCommand::Signal {
            execution_id,
            signal_type,
            data,
        } => {
            let data: serde_json::Value = serde_json::from_str(&data)?;
            let execution = engine.process_signal(execution_id, &signal_type, data).await?;
            print_execution(&execution, output);
            Ok(())
        }

        ExecutionCommand::Pause { execution_id } => {
            let execution = engine.pause(execution_id).await?;
            print_execution(&execution, output);
            Ok(())
        }

        ExecutionCommand::Resume { execution_id } => {
            let execution = engine.resume(execution_id).await?;
            print_execution(&execution, output);
            Ok(())
        }

        ExecutionCommand::Terminate { execution_id, reason } => {
            let execution = engine.terminate(execution_id, reason).await?;
            print_execution(&execution, output);
            Ok(())
        }

        ExecutionCommand::Replay { execution_id, from_node } => {
            let execution = engine.replay_execution(execution_id, from_node.as_deref()).await?;
            print_execution(&execution, output);
            Ok(())
        }

        ExecutionCommand::Logs { execution_id } => {
            let logs = engine.store().list_logs(execution_id).await?;
            if output.is_text() {
                for log in &logs {
                    println!(
                        "{} [{:?}] {}: {}",
                        log.recorded_at,
                        log.level,
                        log.node_id.as_deref().unwrap_or("-"),
                        log.message
                    );
                }
            } else {
                output.print_value(&logs);
            }
            Ok(())
        }
    }
}
