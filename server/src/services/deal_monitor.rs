//! Background reconciliation sweep for deals stuck between proposal and
//! sealing.
//!
//! Runs on a fixed cadence, finds contents that are in flight against a
//! provider and have not been touched for a full period, and enqueues one
//! reconcile job per content. The staleness filter plus the conditional
//! status updates inside the job keep reconciles idempotent and at most
//! one per content.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::interval;
use tracing::{error, info};

use crate::db::DbPool;
use crate::dispatcher::Dispatcher;
use crate::jobs::Job;
use crate::models::content::Content;

pub struct DealStatusMonitor {
    pool: DbPool,
    dispatcher: Dispatcher,
    poll_interval_secs: u64,
    max_workers: usize,
}

impl DealStatusMonitor {
    pub fn new(
        pool: DbPool,
        dispatcher: Dispatcher,
        poll_interval_secs: u64,
        max_workers: usize,
    ) -> Self {
        info!(
            poll_interval_secs,
            "DealStatusMonitor initialized"
        );
        Self {
            pool,
            dispatcher,
            poll_interval_secs,
            max_workers,
        }
    }

    /// Run the sweep loop until the process shuts down.
    pub async fn start_monitoring(self: Arc<Self>) {
        let mut timer = interval(Duration::from_secs(self.poll_interval_secs.max(1)));

        info!("Starting deal status monitoring loop");
        loop {
            timer.tick().await;
            if let Err(e) = self.sweep().await {
                error!("Error sweeping for stale deals: {}", e);
            }
        }
    }

    /// One reconciliation pass; also callable directly from tests.
    pub async fn sweep(&self) -> Result<usize> {
        let pool = self.pool.clone();
        let stale_secs = self.poll_interval_secs as i64;
        let stale = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().context("Failed to get DB connection")?;
            Content::find_reconcilable(&mut conn, stale_secs)
        })
        .await
        .context("task join error")??;

        if stale.is_empty() {
            return Ok(0);
        }

        info!(count = stale.len(), "enqueueing deal status checks");
        for content in &stale {
            self.dispatcher.add_job(Job::DealStatusCheck {
                content_id: content.id,
            });
        }
        self.dispatcher.start(stale.len().min(self.max_workers));

        Ok(stale.len())
    }
}
