pub mod greetings;

use std::future::Future;
use std::pin::Pin;

use anyhow::{Context, Result};
use chrono::FixedOffset;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

/// A job registered with the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredJob {
    pub id: String,
    pub name: String,
    pub cron: String,
    /// Identifier assigned by tokio-cron-scheduler.
    pub guid: String,
}

/// Wrapper around tokio-cron-scheduler for background tasks.
/// Jobs live in memory only and are registered again on every start.
pub struct Scheduler {
    inner: JobScheduler,
    offset: FixedOffset,
    jobs: Mutex<Vec<RegisteredJob>>,
}

impl Scheduler {
    /// Create a new scheduler whose cron expressions are evaluated at `offset`.
    pub async fn new(offset: FixedOffset) -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        Ok(Self {
            inner,
            offset,
            jobs: Mutex::new(Vec::new()),
        })
    }

    /// Add a recurring cron job
    pub async fn add_cron_job<F>(
        &self,
        cron_expr: &str,
        id: &str,
        name: &str,
        task: F,
    ) -> Result<()>
    where
        F: Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static,
    {
        let job_name = name.to_string();
        let job = Job::new_async_tz(cron_expr, self.offset, move |_uuid, _lock| {
            let name = job_name.clone();
            let fut = task();
            Box::pin(async move {
                info!("Running scheduled task: {}", name);
                fut.await;
            })
        })
        .with_context(|| format!("Failed to create cron job: {}", name))?;

        let guid = self
            .inner
            .add(job)
            .await
            .with_context(|| format!("Failed to add job: {}", name))?;

        self.jobs.lock().await.push(RegisteredJob {
            id: id.to_string(),
            name: name.to_string(),
            cron: cron_expr.to_string(),
            guid: guid.to_string(),
        });

        info!(
            "Scheduled task '{}' with cron: {} ({})",
            name, cron_expr, self.offset
        );
        Ok(())
    }

    /// Jobs registered so far, in registration order.
    pub async fn jobs(&self) -> Vec<RegisteredJob> {
        self.jobs.lock().await.clone()
    }

    /// Start the scheduler
    pub async fn start(&self) -> Result<()> {
        self.inner
            .start()
            .await
            .context("Failed to start scheduler")?;
        info!("Scheduler started");
        Ok(())
    }

    /// Shutdown the scheduler
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .context("Failed to shutdown scheduler")?;
        info!("Scheduler stopped");
        Ok(())
    }
}
