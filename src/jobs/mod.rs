use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use crate::metrics;

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<crate::context::AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        tokio::spawn(Self::operation_retention_job(Arc::clone(&self)));
        tokio::spawn(Self::integrity_audit_job(Arc::clone(&self)));
        tokio::spawn(Self::health_check_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Forget finished scheduled operations past retention (runs every 10 minutes)
    async fn operation_retention_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(600));

        loop {
            interval.tick().await;
            let started = Instant::now();

            let pruned = tasks::prune_finished_operations(&scheduler.context);
            if pruned > 0 {
                info!("Pruned {} finished scheduled operations", pruned);
            }
            metrics::record_background_job(
                "operation_retention",
                "success",
                started.elapsed().as_secs_f64(),
            );
        }
    }

    /// Re-verify every confirmed chain (runs hourly)
    async fn integrity_audit_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(3600));

        loop {
            interval.tick().await;
            let started = Instant::now();
            info!("Running operation log integrity audit");

            let halted = tasks::audit_operation_log(&scheduler.context).await;
            let status = if halted.is_empty() {
                "success"
            } else {
                for did in &halted {
                    warn!(did = %did, "identifier halted by integrity audit");
                }
                "halted"
            };
            metrics::record_background_job(
                "integrity_audit",
                status,
                started.elapsed().as_secs_f64(),
            );
        }
    }

    /// Journal connectivity check (runs every 5 minutes)
    async fn health_check_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300));

        loop {
            interval.tick().await;
            let started = Instant::now();

            let status = match tasks::health_check(&scheduler.context).await {
                Ok(_) => "success",
                Err(e) => {
                    error!("Health check failed: {}", e);
                    "error"
                }
            };
            metrics::record_background_job("health_check", status, started.elapsed().as_secs_f64());
        }
    }
}
