//! MaintenanceWorker - Periodic housekeeping for the webhook log and lock registry.
//!
//! ## Configuration
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `interval` | 1h | How often a pass runs |
//! | `webhook_retention` | 30 days | How long processed event ids are kept |
//!
//! A redelivery older than the retention window is no longer recognised as a
//! duplicate, so the window must exceed the provider's redelivery horizon
//! (three days for Stripe).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use crate::application::UserLocks;
use crate::domain::foundation::DomainError;
use crate::ports::WebhookEventRepository;

/// Configuration for the MaintenanceWorker.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub interval: Duration,
    pub webhook_retention: chrono::Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            webhook_retention: chrono::Duration::days(30),
        }
    }
}

impl MaintenanceConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_webhook_retention(mut self, retention: chrono::Duration) -> Self {
        self.webhook_retention = retention;
        self
    }
}

/// What a single maintenance pass removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaintenanceReport {
    pub webhook_events_deleted: u64,
    pub locks_pruned: usize,
}

/// Background service that trims the webhook log and idle user locks.
pub struct MaintenanceWorker {
    events: Arc<dyn WebhookEventRepository>,
    locks: Arc<UserLocks>,
    config: MaintenanceConfig,
}

impl MaintenanceWorker {
    pub fn new(
        events: Arc<dyn WebhookEventRepository>,
        locks: Arc<UserLocks>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            events,
            locks,
            config,
        }
    }

    /// Run passes until the shutdown signal is received.
    ///
    /// A failed pass is logged and retried on the next tick; it never stops
    /// the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::debug!("Maintenance worker stopping");
                        return;
                    }
                }

                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::warn!(error = %e, "Maintenance pass failed");
                    }
                }
            }
        }
    }

    /// Run exactly one pass.
    pub async fn run_once(&self) -> Result<MaintenanceReport, DomainError> {
        let cutoff = Utc::now() - self.config.webhook_retention;
        let webhook_events_deleted = self.events.delete_before(cutoff).await?;
        let locks_pruned = self.locks.prune();

        if webhook_events_deleted > 0 || locks_pruned > 0 {
            tracing::info!(
                webhook_events_deleted,
                locks_pruned,
                cutoff = %cutoff,
                "Maintenance pass completed"
            );
        }

        Ok(MaintenanceReport {
            webhook_events_deleted,
            locks_pruned,
        })
    }
}
