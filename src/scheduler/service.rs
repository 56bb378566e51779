use std::sync::Arc;

use thiserror::Error;
use tokio_cron_scheduler::{Job, JobBuilder, JobScheduler};

use crate::config::AppConfig;
use crate::preferences::Preferences;
use crate::store::DurableStore;
use crate::tracking::{TrackingError, TrackingService};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

/// Check a cron expression and timezone before scheduling
pub fn validate_schedule(cron: &str, timezone: &str) -> Result<chrono_tz::Tz, SchedulerError> {
    if Job::new_async(cron, |_, _| Box::pin(async {})).is_err() {
        return Err(SchedulerError::InvalidCron(cron.to_string()));
    }

    timezone
        .parse()
        .map_err(|_| SchedulerError::InvalidTimezone(timezone.to_string()))
}

/// Bulk refresh with the stored preferences, as run by the schedule
pub async fn run_scheduled_refresh(
    tracking: &TrackingService,
    store: &DurableStore,
    config: &AppConfig,
) -> Result<(), TrackingError> {
    let preferences = Preferences::resolve(store.load_preferences(), config);

    match tracking
        .refresh_all(preferences.units, &preferences.language)
        .await
    {
        Ok(report) => {
            tracing::info!(
                total = report.total,
                updated = report.updated,
                failed = report.failed.len(),
                "Scheduled refresh finished"
            );
            Ok(())
        }
        Err(TrackingError::RefreshInProgress) => {
            tracing::debug!("Skipping scheduled refresh, one is already running");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Scheduled refresh could not start");
            Err(e)
        }
    }
}

/// Runs the bulk refresh of tracked cities on a cron schedule
pub struct RefreshScheduler {
    scheduler: JobScheduler,
    tracking: Arc<TrackingService>,
    store: DurableStore,
    config: Arc<AppConfig>,
}

impl RefreshScheduler {
    pub async fn new(
        tracking: Arc<TrackingService>,
        store: DurableStore,
        config: Arc<AppConfig>,
    ) -> Result<Self, SchedulerError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;

        Ok(Self {
            scheduler,
            tracking,
            store,
            config,
        })
    }

    /// Register the periodic refresh job
    pub async fn schedule(&self, cron: &str, timezone: &str) -> Result<(), SchedulerError> {
        let timezone = validate_schedule(cron, timezone)?;

        let tracking = Arc::clone(&self.tracking);
        let store = self.store.clone();
        let config = Arc::clone(&self.config);

        let job = JobBuilder::new()
            .with_timezone(timezone)
            .with_cron_job_type()
            .with_schedule(cron)
            .map_err(|e| SchedulerError::InvalidCron(e.to_string()))?
            .with_run_async(Box::new(move |_uuid, _lock| {
                let tracking = Arc::clone(&tracking);
                let store = store.clone();
                let config = Arc::clone(&config);

                Box::pin(async move {
                    tracing::info!("Running scheduled refresh");
                    let _ = run_scheduled_refresh(&tracking, &store, &config).await;
                })
            }))
            .build()
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;

        let job_id = self
            .scheduler
            .add(job)
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;

        tracing::info!(job_id = %job_id, cron = %cron, timezone = %timezone, "Scheduled bulk refresh");
        Ok(())
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        tracing::info!("Starting scheduler");
        self.scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))
    }

    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let mut scheduler = self.scheduler.clone();
        scheduler
            .shutdown()
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))
    }
}
