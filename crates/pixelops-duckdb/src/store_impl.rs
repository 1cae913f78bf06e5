use async_trait::async_trait;
use chrono::{DateTime, Utc};

use pixelops_core::analytics::{Conversion, ConversionSummary};
use pixelops_core::diagnostics::{Diagnostic, DiagnosticDraft, WindowCounts};
use pixelops_core::event::Event;
use pixelops_core::pixel::{CounterDelta, NewPixel, Pixel, PixelCounters};
use pixelops_core::store::PixelStore;

use crate::queries::{conversions, diagnostics, events, pixels};
use crate::DuckDbBackend;

#[async_trait]
impl PixelStore for DuckDbBackend {
    async fn ping(&self) -> anyhow::Result<()> {
        DuckDbBackend::ping(self).await
    }

    async fn create_pixel(&self, pixel: &NewPixel) -> anyhow::Result<Pixel> {
        pixels::create_pixel_inner(self, pixel).await
    }

    async fn get_pixel(&self, pixel_id: &str) -> anyhow::Result<Option<Pixel>> {
        pixels::get_pixel_inner(self, pixel_id).await
    }

    async fn list_pixels(&self, workspace_id: Option<&str>) -> anyhow::Result<Vec<Pixel>> {
        pixels::list_pixels_inner(self, workspace_id).await
    }

    async fn recompute_pixel_counters(&self, pixel_id: &str) -> anyhow::Result<PixelCounters> {
        events::recompute_pixel_counters_inner(self, pixel_id).await
    }

    async fn park_idle_pixels(&self, idle_since: DateTime<Utc>) -> anyhow::Result<usize> {
        pixels::park_idle_pixels_inner(self, idle_since).await
    }

    async fn insert_events(&self, batch: &[Event]) -> anyhow::Result<()> {
        events::insert_events_inner(self, batch).await
    }

    async fn get_event(&self, event_id: &str) -> anyhow::Result<Option<Event>> {
        events::get_event_inner(self, event_id).await
    }

    async fn mark_event_processed(
        &self,
        event_id: &str,
        delta: CounterDelta,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        events::mark_event_processed_inner(self, event_id, delta, now).await
    }

    async fn mark_event_failed(&self, event_id: &str, reason: &str) -> anyhow::Result<bool> {
        events::mark_event_failed_inner(self, event_id, reason).await
    }

    async fn count_failed_events(&self, pixel_id: Option<&str>) -> anyhow::Result<i64> {
        events::count_failed_events_inner(self, pixel_id).await
    }

    async fn failed_event_ids(
        &self,
        pixel_id: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<String>> {
        events::failed_event_ids_inner(self, pixel_id, limit).await
    }

    async fn events_for_pixel(
        &self,
        pixel_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<Event>> {
        events::events_for_pixel_inner(self, pixel_id, since).await
    }

    async fn events_named(
        &self,
        pixel_id: &str,
        event_name: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Event>> {
        events::events_named_inner(self, pixel_id, event_name, since).await
    }

    async fn events_in_scope(
        &self,
        workspace_id: &str,
        pixel_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Event>> {
        events::events_in_scope_inner(self, workspace_id, pixel_id, since).await
    }

    async fn window_counts(
        &self,
        pixel_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<WindowCounts> {
        events::window_counts_inner(self, pixel_id, since).await
    }

    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<usize> {
        events::delete_events_before_inner(self, cutoff).await
    }

    async fn create_conversion(&self, conversion: &Conversion) -> anyhow::Result<()> {
        conversions::create_conversion_inner(self, conversion).await
    }

    async fn list_conversions(&self, pixel_id: &str) -> anyhow::Result<Vec<Conversion>> {
        conversions::list_conversions_inner(self, pixel_id).await
    }

    async fn list_workspace_conversions(
        &self,
        workspace_id: &str,
    ) -> anyhow::Result<Vec<Conversion>> {
        conversions::list_workspace_conversions_inner(self, workspace_id).await
    }

    async fn set_conversion_summary(
        &self,
        conversion_id: &str,
        summary: &ConversionSummary,
    ) -> anyhow::Result<()> {
        conversions::set_conversion_summary_inner(self, conversion_id, summary).await
    }

    async fn upsert_diagnostic(
        &self,
        draft: &DiagnosticDraft,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Diagnostic> {
        diagnostics::upsert_diagnostic_inner(self, draft, now).await
    }

    async fn resolve_diagnostic(
        &self,
        pixel_id: &str,
        title: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        diagnostics::resolve_diagnostic_inner(self, pixel_id, title, now).await
    }

    async fn list_diagnostics(&self, pixel_id: &str) -> anyhow::Result<Vec<Diagnostic>> {
        diagnostics::list_diagnostics_inner(self, pixel_id).await
    }

    async fn list_workspace_diagnostics(
        &self,
        workspace_id: &str,
    ) -> anyhow::Result<Vec<Diagnostic>> {
        diagnostics::list_workspace_diagnostics_inner(self, workspace_id).await
    }

    async fn delete_resolved_diagnostics_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<usize> {
        diagnostics::delete_resolved_diagnostics_before_inner(self, cutoff).await
    }
}
