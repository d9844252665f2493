use anyhow::Result;
use std::sync::Arc;
use tokio_cron_scheduler::JobScheduler;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use nbflow::config::ConfigManager;
use nbflow::constants::cleanup;
use nbflow::queue::{CommandRunner, CronQueue, QueueDispatcher};
use nbflow::scheduler::{SchedulerExecutor, SyncOutcome};
use nbflow::services::{ExecutionReporter, HistoryRecorder, NotificationDispatcher, WebhookChannels};
use nbflow::Database;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with reduced verbosity
    let env_filter = EnvFilter::from_default_env()
        .add_directive("nbflow=info".parse()?)
        .add_directive("tokio_cron_scheduler=warn".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("sqlx=warn".parse()?);

    fmt().with_env_filter(env_filter).init();

    info!("Starting notebook workflow scheduler");

    // Load configuration
    let config_dir = std::env::args().nth(1).unwrap_or_else(|| "config".to_string());
    let config_manager = ConfigManager::new(config_dir).await?;
    let config = config_manager.get_current_config();
    info!(
        "Configuration loaded: {} projects, queue '{}' with {} workers",
        config.projects.len(),
        config.queue_name,
        config.max_workers
    );

    // Initialize database and the project directory
    let database = Arc::new(Database::new(&config.database_path).await?);
    for project in config.projects.values() {
        database
            .create_project(&project.project_id, &project.name, project.description.as_deref())
            .await?;
    }
    info!("Database initialized");

    // Results are recorded first, then notifications go out in the background
    let channels = Arc::new(WebhookChannels::new(config.channels.clone())?);
    let notifier = NotificationDispatcher::new(channels);
    let recorder = Arc::new(HistoryRecorder::new(database.clone()));
    let reporter = ExecutionReporter::new(recorder.clone(), notifier);

    let runner = Arc::new(CommandRunner::from_config(&config.runner));
    info!(
        "Notebook runner: {} ({} -> {})",
        config.runner.command, config.runner.notebooks_dir, config.runner.output_dir
    );

    let scheduler = JobScheduler::new().await?;
    let queue = Arc::new(CronQueue::with_scheduler(
        &config.queue_name,
        scheduler.clone(),
        config.max_workers,
        runner,
        Arc::new(reporter.clone()),
    ));
    let dispatcher = QueueDispatcher::new(queue.clone());

    let executor = Arc::new(SchedulerExecutor::new(
        database.clone(),
        dispatcher.clone(),
        recorder,
        reporter,
    ));

    // Stored schedules first, then reconcile with configuration
    let restored = executor.restore_schedules().await?;
    info!("Restored {} recurring entries", restored);

    for project in config.projects.values() {
        for (alias, workflow) in &project.workflows {
            match executor
                .sync_workflow(
                    &project.project_id,
                    alias,
                    workflow.task.clone(),
                    workflow.schedule.clone(),
                    workflow.enabled,
                )
                .await
            {
                Ok(SyncOutcome::Created(id)) => info!("✓ Registered {}/{} as {}", project.project_id, alias, id),
                Ok(SyncOutcome::Updated(id)) => info!("✓ Updated {}/{} ({})", project.project_id, alias, id),
                Ok(SyncOutcome::Unchanged(_)) => {}
                Ok(SyncOutcome::Stale(id)) => warn!("Stored {}/{} ({}) differs from configuration", project.project_id, alias, id),
                Ok(SyncOutcome::Disabled(_)) => info!("Workflow {}/{} is disabled", project.project_id, alias),
                Err(e) => error!("✗ Failed to register {}/{}: {}", project.project_id, alias, e),
            }
        }
    }

    queue.start().await?;
    info!("Queue '{}' started", config.queue_name);

    // Start periodic job record cleanup
    let cleanup_dispatcher = dispatcher.clone();
    let retention_hours = config.job_retention_hours;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            cleanup::CLEANUP_INTERVAL_SECONDS,
        ));
        loop {
            interval.tick().await;
            match cleanup_dispatcher.cleanup_finished(retention_hours).await {
                Ok(removed) if removed > 0 => {
                    info!("Cleaned up {} job records older than {}h", removed, retention_hours)
                }
                Ok(_) => {}
                Err(e) => error!("Job record cleanup failed: {}", e),
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    queue.close().await;
    let mut scheduler = scheduler;
    if let Err(e) = scheduler.shutdown().await {
        warn!("Scheduler shutdown failed: {}", e);
    }
    database.close().await;

    info!("Scheduler stopped");
    Ok(())
}
