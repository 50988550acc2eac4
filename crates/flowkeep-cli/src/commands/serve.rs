// Runs the worker pool and schedule runner in-process until interrupted. There is no
// HTTP listener here: the `flowkeep-api` binary is the HTTP front door (Workflow API,
// webhook ingress, schedule management) and writes into the same store this process
// polls; this command only advances executions and fires due schedules.

use std::time::Duration;

use clap::Args;
use flowkeep_worker::{ScheduleRunner, ScheduleRunnerConfig, WorkerPool, WorkerPoolConfig};
use tracing::info;

#[derive(Args)]
pub struct ServeArgs {
    /// Stable worker identity recorded as `lease_owner`. Defaults to a random id.
    #[arg(long)]
    pub worker_id: Option<String>,

    #[arg(long, default_value_t = 20)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 20)]
    pub max_concurrency: usize,

    #[arg(long, default_value_t = 250)]
    pub poll_interval_ms: u64,

    #[arg(long, default_value_t = 30)]
    pub lease_duration_secs: u64,

    #[arg(long, default_value_t = 1)]
    pub schedule_poll_interval_secs: u64,
}

pub async fn run(args: ServeArgs, database_url: Option<&str>) -> anyhow::Result<()> {
    let engine = crate::store::build_engine(database_url).await?;

    let mut worker_config = WorkerPoolConfig {
        batch_size: args.batch_size,
        max_concurrency: args.max_concurrency,
        poll_interval: Duration::from_millis(args.poll_interval_ms),
        lease_duration: Duration::from_secs(args.lease_duration_secs),
        ..WorkerPoolConfig::default()
    };
    if let Some(worker_id) = args.worker_id {
        worker_config.worker_id = worker_id;
    }

    let pool = WorkerPool::new(engine.clone(), worker_config)?;
    let scheduler = ScheduleRunner::new(
        engine,
        ScheduleRunnerConfig {
            poll_interval: Duration::from_secs(args.schedule_poll_interval_secs),
            ..ScheduleRunnerConfig::default()
        },
    );

    let pool_token = pool.cancellation_token();
    let scheduler_token = scheduler.cancellation_token();

    let pool_handle = tokio::spawn(async move { pool.run().await });
    let scheduler_handle = tokio::spawn(async move { scheduler.run().await });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining in-flight work");
    pool_token.cancel();
    scheduler_token.cancel();

    pool_handle.await?;
    scheduler_handle.await?;
    Ok(())
}
