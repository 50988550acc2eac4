// Workflow definition management

use clap::Subcommand;
use flowkeep_engine::model::{GraphConfig, Workflow};
use uuid::Uuid;

use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};

#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Register a new workflow version from a graph file (JSON or YAML)
    Create {
        /// Path to a file containing the graph's `nodes`/`edges`
        file: String,

        /// Reuse an existing workflow_id, registering the next version. Omit to create a
        /// brand new workflow.
        #[arg(long)]
        workflow_id: Option<Uuid>,

        #[arg(long)]
        owner: Option<String>,

        /// JSON value merged into new executions' initial variables.
        #[arg(long)]
        trigger_config: Option<String>,
    },

    /// List the current version of every workflow
    List,

    /// Show a workflow's current (or a specific) version
    Show {
        workflow_id: Uuid,

        #[arg(long)]
        version: Option<i32>,
    },

    Activate { workflow_id: Uuid },
    Deactivate { workflow_id: Uuid },
}

fn parse_graph(contents: &str) -> anyhow::Result<GraphConfig> {
    if let Ok(graph) = serde_json::from_str(contents) {
        return Ok(graph);
    }
    Ok(serde_yaml::from_str(contents)?)
}

fn print_workflow(workflow: &Workflow, output: OutputFormat) {
    if output.is_text() {
        print_field("workflow_id", &workflow.workflow_id.to_string());
        print_field("version", &workflow.version.to_string());
        print_field("is_active", &workflow.is_active.to_string());
        print_field("owner_id", workflow.owner_id.as_deref().unwrap_or("-"));
        print_field("nodes", &workflow.graph.nodes.len().to_string());
        print_field("edges", &workflow.graph.edges.len().to_string());
    } else {
        output.print_value(workflow);
    }
}

pub async fn run(
    command: WorkflowCommand,
    database_url: Option<&str>,
    output: OutputFormat,
) -> anyhow::Result<()> {
    let store = crate::store::build(database_url).await?;

    match command {
        WorkflowCommand::Create {
            file,
            workflow_id,
            owner,
            trigger_config,
        } => {
            let contents = std::fs::read_to_string(&file)?;
            let graph = parse_graph(&contents)?;
            graph.validate().map_err(|e| anyhow::anyhow!(e))?;

            let workflow_id = workflow_id.unwrap_or_else(Uuid::now_v7);
            let version = match store.get_workflow(workflow_id).await {
                Ok(existing) => existing.version + 1,
                Err(_) => 1,
            };
            let trigger_config = match trigger_config {
                Some(raw) => serde_json::from_str(&raw)?,
                None => serde_json::Value::Null,
            };

            let workflow = Workflow {
                workflow_id,
                version,
                graph,
                trigger_config,
                is_active: true,
                owner_id: owner,
            };
            store.create_workflow_version(workflow.clone()).await?;
            print_workflow(&workflow, output);
            Ok(())
        }

        WorkflowCommand::List => {
            let workflows = store.list_workflows().await?;
            if output.is_text() {
                print_table_header(&[("WORKFLOW_ID", 36), ("VERSION", 8), ("ACTIVE", 7), ("NODES", 6)]);
                for workflow in &workflows {
                    print_table_row(&[
                        (&workflow.workflow_id.to_string(), 36),
                        (&workflow.version.to_string(), 8),
                        (&workflow.is_active.to_string(), 7),
                        (&workflow.graph.nodes.len().to_string(), 6),
                    ]);
                }
            } else {
                output.print_value(&workflows);
            }
            Ok(())
        }

        WorkflowCommand::Show { workflow_id, version } => {
            let workflow = match version {
                Some(v) => store.get_workflow_version(workflow_id, v).await?,
                None => store.get_workflow(workflow_id).await?,
            };
            print_workflow(&workflow, output);
            Ok(())
        }

        WorkflowCommand::Activate { workflow_id } => {
            store.set_workflow_active(workflow_id, true).await?;
            println!("activated {workflow_id}");
            Ok(())
        }

        WorkflowCommand::Deactivate { workflow_id } => {
            store.set_workflow_active(workflow_id, false).await?;
            println!("deactivated {workflow_id}");
            Ok(())
        }
    }
}
