use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::state::AppState;
use crate::{diagnostics, processor, retention, rollup};

use super::ScheduledJob;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

pub struct DiagnosticsJob;

#[async_trait]
impl ScheduledJob for DiagnosticsJob {
    fn name(&self) -> &'static str {
        "diagnostics"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(15 * MINUTE)
    }

    async fn run(&self, state: &AppState) -> anyhow::Result<()> {
        diagnostics::run_for_all_pixels(state).await?;
        Ok(())
    }
}

pub struct RetryFailedEventsJob;

#[async_trait]
impl ScheduledJob for RetryFailedEventsJob {
    fn name(&self) -> &'static str {
        "retry_failed_events"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(30 * MINUTE)
    }

    async fn run(&self, state: &AppState) -> anyhow::Result<()> {
        processor::reprocess_failed_events(state, None, state.config.retry_batch_limit).await?;
        Ok(())
    }
}

pub struct AnalyticsJob;

#[async_trait]
impl ScheduledJob for AnalyticsJob {
    fn name(&self) -> &'static str {
        "analytics"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(HOUR)
    }

    async fn run(&self, state: &AppState) -> anyhow::Result<()> {
        rollup::generate_analytics(state).await?;
        Ok(())
    }
}

pub struct CleanupJob;

#[async_trait]
impl ScheduledJob for CleanupJob {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(24 * HOUR)
    }

    async fn run(&self, state: &AppState) -> anyhow::Result<()> {
        retention::run_cleanup(state, Utc::now()).await?;
        Ok(())
    }
}

pub fn default_jobs() -> Vec<Arc<dyn ScheduledJob>> {
    vec![
        Arc::new(DiagnosticsJob),
        Arc::new(RetryFailedEventsJob),
        Arc::new(AnalyticsJob),
        Arc::new(CleanupJob),
    ]
}
