//! Storage abstraction shared by the pipeline, the diagnostic engine and the
//! rollup job.
//!
//! Workspace scoping always goes through pixel ownership: a query "for a
//! workspace" means "for the pixels whose `workspace_id` matches".

use chrono::{DateTime, Utc};

use crate::analytics::{Conversion, ConversionSummary};
use crate::diagnostics::{Diagnostic, DiagnosticDraft, WindowCounts};
use crate::event::Event;
use crate::pixel::{CounterDelta, NewPixel, Pixel, PixelCounters};

#[async_trait::async_trait]
pub trait PixelStore: Send + Sync + 'static {
    async fn ping(&self) -> anyhow::Result<()>;

    async fn create_pixel(&self, pixel: &NewPixel) -> anyhow::Result<Pixel>;

    async fn get_pixel(&self, pixel_id: &str) -> anyhow::Result<Option<Pixel>>;

    /// All pixels, or those of one workspace.
    async fn list_pixels(&self, workspace_id: Option<&str>) -> anyhow::Result<Vec<Pixel>>;

    /// Overwrite the rollup counters with a full recompute over the pixel's
    /// processed events. The read and the write are one step with respect to
    /// `mark_event_processed`, so a concurrent increment is never lost.
    async fn recompute_pixel_counters(&self, pixel_id: &str) -> anyhow::Result<PixelCounters>;

    /// Park active pixels whose last activity is older than `idle_since` as
    /// `inactive` with reason `inactivity`. Returns the number parked.
    async fn park_idle_pixels(&self, idle_since: DateTime<Utc>) -> anyhow::Result<usize>;

    async fn insert_events(&self, events: &[Event]) -> anyhow::Result<()>;

    async fn get_event(&self, event_id: &str) -> anyhow::Result<Option<Event>>;

    /// Move a pending or failed event to `processed` and apply `delta` to its
    /// pixel in the same transaction.
    ///
    /// Returns `false`, touching nothing, when the event is already processed
    /// or does not exist. This is what makes counter updates exactly-once.
    async fn mark_event_processed(
        &self,
        event_id: &str,
        delta: CounterDelta,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// Record a delivery failure. Never downgrades a processed event.
    async fn mark_event_failed(&self, event_id: &str, reason: &str) -> anyhow::Result<bool>;

    async fn count_failed_events(&self, pixel_id: Option<&str>) -> anyhow::Result<i64>;

    /// Oldest failed events first.
    async fn failed_event_ids(
        &self,
        pixel_id: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<String>>;

    async fn events_for_pixel(
        &self,
        pixel_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<Event>>;

    async fn events_named(
        &self,
        pixel_id: &str,
        event_name: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Event>>;

    /// Events of a workspace since `since`, optionally narrowed to one pixel
    /// of that workspace.
    async fn events_in_scope(
        &self,
        workspace_id: &str,
        pixel_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Event>>;

    async fn window_counts(
        &self,
        pixel_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<WindowCounts>;

    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<usize>;

    async fn create_conversion(&self, conversion: &Conversion) -> anyhow::Result<()>;

    async fn list_conversions(&self, pixel_id: &str) -> anyhow::Result<Vec<Conversion>>;

    async fn list_workspace_conversions(
        &self,
        workspace_id: &str,
    ) -> anyhow::Result<Vec<Conversion>>;

    async fn set_conversion_summary(
        &self,
        conversion_id: &str,
        summary: &ConversionSummary,
    ) -> anyhow::Result<()>;

    /// Insert or refresh the diagnostic keyed by `(pixel_id, title)`,
    /// reopening it if it had been resolved.
    async fn upsert_diagnostic(
        &self,
        draft: &DiagnosticDraft,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Diagnostic>;

    /// Resolve the active diagnostic keyed by `(pixel_id, title)`, if any.
    async fn resolve_diagnostic(
        &self,
        pixel_id: &str,
        title: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    async fn list_diagnostics(&self, pixel_id: &str) -> anyhow::Result<Vec<Diagnostic>>;

    async fn list_workspace_diagnostics(
        &self,
        workspace_id: &str,
    ) -> anyhow::Result<Vec<Diagnostic>>;

    async fn delete_resolved_diagnostics_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<usize>;
}
