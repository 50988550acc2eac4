// Cron schedule management. Note: there is no `list` subcommand here — the
// `ExecutionStore` trait only exposes `due_schedules` (for the schedule runner's own
// claiming loop), not an unbounded listing; `show` by id covers the operational need.

use clap::Subcommand;
use flowkeep_engine::model::Schedule;
use uuid::Uuid;

use crate::output::{print_field, OutputFormat};

#[derive(Subcommand)]
pub enum ScheduleCommand {
    /// Register a cron schedule that creates executions of `workflow_id`
    Create {
        workflow_id: Uuid,

        /// Standard 5-field cron expression, evaluated in UTC
        cron_expr: String,

        /// JSON seed merged into each fired execution's initial variables
        #[arg(long, default_value = "null")]
        trigger_payload: String,
    },

    Show { schedule_id: Uuid },

    Activate { schedule_id: Uuid },
    Deactivate { schedule_id: Uuid },
}

fn print_schedule(schedule: &Schedule, output: OutputFormat) {
    if output.is_text() {
        print_field("schedule_id", &schedule.schedule_id.to_string());
        print_field("workflow_id", &schedule.workflow_id.to_string());
        print_field("cron_expr", &schedule.cron_expr);
        print_field("is_active", &schedule.is_active.to_string());
        print_field("next_fire_at", &schedule.next_fire_at.to_rfc3339());
    } else {
        output.print_value(schedule);
    }
}

pub async fn run(
    command: ScheduleCommand,
    database_url: Option<&str>,
    output: OutputFormat,
) -> anyhow::Result<()> {
    let store = crate::store::build(database_url).await?;

    match command {
        ScheduleCommand::Create {
            workflow_id,
            cron_expr,
            trigger_payload,
        } => {
            let trigger_payload: serde_json::Value = serde_json::from_str(&trigger_payload)?;
            let parsed: cron::Schedule = cron_expr
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid cron expression '{cron_expr}': {e}"))?;
            let next_fire_at = parsed
                .after(&chrono::Utc::now())
                .next()
                .ok_or_else(|| anyhow::anyhow!("cron expression '{cron_expr}' never fires"))?;

            let schedule = Schedule {
                schedule_id: Uuid::now_v7(),
                workflow_id,
                cron_expr,
                is_active: true,
                next_fire_at,
                last_fired_at: None,
                trigger_payload,
            };
            store.create_schedule(schedule.clone()).await?;
            print_schedule(&schedule, output);
            Ok(())
        }

        ScheduleCommand::Show { schedule_id } => {
            let schedule = store.get_schedule(schedule_id).await?;
            print_schedule(&schedule, output);
            Ok(())
        }

        ScheduleCommand::Activate { schedule_id } => {
            store.set_schedule_active(schedule_id, true).await?;
            println!("activated {schedule_id}");
            Ok(())
        }

        ScheduleCommand::Deactivate { schedule_id } => {
            store.set_schedule_active(schedule_id, false).await?;
            println!("deactivated {schedule_id}");
            Ok(())
        }
    }
}
