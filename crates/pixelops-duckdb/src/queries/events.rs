use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use pixelops_core::diagnostics::WindowCounts;
use pixelops_core::event::{Event, EventSource, EventType, ProcessingState};
use pixelops_core::analytics::pixel_counters;
use pixelops_core::pixel::{CounterDelta, PixelCounters, INACTIVITY_REASON};

use crate::backend::{format_ts, parse_optional_ts, parse_ts};
use crate::DuckDbBackend;

const EVENT_COLUMNS: &str = r#"
    e.id,
    e.pixel_id,
    e.event_name,
    e.event_type,
    e.parameters,
    e.source,
    CAST(e.created_at AS VARCHAR),
    e.processing_state,
    e.error_reason,
    CAST(e.processed_at AS VARCHAR)
"#;

struct EventRow {
    id: String,
    pixel_id: String,
    event_name: String,
    event_type: String,
    parameters: String,
    source: String,
    created_at: String,
    processing_state: String,
    error_reason: Option<String>,
    processed_at: Option<String>,
}

fn map_event_row(row: &duckdb::Row<'_>) -> Result<EventRow, duckdb::Error> {
    Ok(EventRow {
        id: row.get(0)?,
        pixel_id: row.get(1)?,
        event_name: row.get(2)?,
        event_type: row.get(3)?,
        parameters: row.get(4)?,
        source: row.get(5)?,
        created_at: row.get(6)?,
        processing_state: row.get(7)?,
        error_reason: row.get(8)?,
        processed_at: row.get(9)?,
    })
}

impl EventRow {
    fn into_event(self) -> Result<Event> {
        let parameters: Map<String, Value> = serde_json::from_str(&self.parameters)
            .map_err(|e| anyhow!("corrupt parameters for event {}: {e}", self.id))?;
        Ok(Event {
            event_type: EventType::parse(&self.event_type)?,
            source: EventSource::parse(&self.source)?,
            timestamp: parse_ts(&self.created_at)?,
            processing_state: ProcessingState::parse(&self.processing_state)?,
            processed_at: parse_optional_ts(self.processed_at)?,
            id: self.id,
            pixel_id: self.pixel_id,
            event_name: self.event_name,
            parameters,
            error_reason: self.error_reason,
        })
    }
}

fn collect_events(
    conn: &duckdb::Connection,
    sql: &str,
    params: &[&dyn duckdb::types::ToSql],
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows_out = Vec::new();
    for row in stmt.query_map(params, map_event_row)? {
        rows_out.push(row?);
    }
    rows_out.into_iter().map(EventRow::into_event).collect()
}

pub async fn insert_events_inner(db: &DuckDbBackend, events: &[Event]) -> Result<()> {
    if events.is_empty() {
        return Ok(());
    }

    let mut conn = db.conn.lock().await;

    // One transaction per batch: either every event of a bulk request is
    // stored or none is.
    let tx = conn.transaction()?;
    for event in events {
        let parameters = serde_json::to_string(&event.parameters)?;
        tx.execute(
            r#"INSERT INTO events (
                id, pixel_id, event_name, event_type, parameters, source,
                created_at, processing_state, error_reason, processed_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6,
                CAST(?7 AS TIMESTAMP), ?8, ?9, CAST(?10 AS TIMESTAMP)
            )"#,
            duckdb::params![
                event.id,
                event.pixel_id,
                event.event_name,
                event.event_type.as_str(),
                parameters,
                event.source.as_str(),
                format_ts(&event.timestamp),
                event.processing_state.as_str(),
                event.error_reason,
                event.processed_at.as_ref().map(format_ts),
            ],
        )?;
    }
    tx.commit()?;
    Ok(())
}

pub async fn get_event_inner(db: &DuckDbBackend, event_id: &str) -> Result<Option<Event>> {
    let conn = db.conn.lock().await;
    let sql = format!("SELECT {EVENT_COLUMNS} FROM events e WHERE e.id = ?1");
    let row = conn
        .prepare(&sql)?
        .query_row(duckdb::params![event_id], map_event_row);
    match row {
        Ok(row) => Ok(Some(row.into_event()?)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn mark_event_processed_inner(
    db: &DuckDbBackend,
    event_id: &str,
    delta: CounterDelta,
    now: DateTime<Utc>,
) -> Result<bool> {
    let now_str = format_ts(&now);
    let mut conn = db.conn.lock().await;
    let tx = conn.transaction()?;

    // The state guard is the exactly-once gate: a second caller finds the
    // event already processed and changes nothing.
    let transitioned = tx.execute(
        r#"
        UPDATE events
        SET processing_state = 'processed',
            error_reason = NULL,
            processed_at = CAST(?2 AS TIMESTAMP)
        WHERE id = ?1
          AND processing_state IN ('pending', 'failed')
        "#,
        duckdb::params![event_id, now_str],
    )?;
    if transitioned == 0 {
        tx.rollback()?;
        return Ok(false);
    }

    let pixel_id: String = tx
        .prepare("SELECT pixel_id FROM events WHERE id = ?1")?
        .query_row(duckdb::params![event_id], |row| row.get(0))?;

    tx.execute(
        r#"
        UPDATE pixels
        SET events_count = events_count + ?2,
            conversions_count = conversions_count + ?3,
            revenue_total = revenue_total + ?4,
            last_activity = CAST(?5 AS TIMESTAMP),
            status = CASE
                WHEN status <> 'active' AND status_reason = ?6 THEN 'active'
                ELSE status
            END,
            status_reason = CASE
                WHEN status <> 'active' AND status_reason = ?6 THEN NULL
                ELSE status_reason
            END
        WHERE id = ?1
        "#,
        duckdb::params![
            pixel_id,
            delta.events,
            delta.conversions,
            delta.revenue,
            now_str,
            INACTIVITY_REASON,
        ],
    )?;

    tx.commit()?;
    Ok(true)
}

/// Reduce the pixel's processed events and write the result while holding
/// the connection, so no `mark_event_processed` can land in between.
pub async fn recompute_pixel_counters_inner(
    db: &DuckDbBackend,
    pixel_id: &str,
) -> Result<PixelCounters> {
    let conn = db.conn.lock().await;
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM events e
         WHERE e.pixel_id = ?1 AND e.processing_state = 'processed'"
    );
    let processed = collect_events(&conn, &sql, duckdb::params![pixel_id])?;
    let counters = pixel_counters(&processed);

    let updated = conn.execute(
        r#"
        UPDATE pixels
        SET events_count = ?2,
            conversions_count = ?3,
            revenue_total = ?4
        WHERE id = ?1
        "#,
        duckdb::params![
            pixel_id,
            counters.events_count,
            counters.conversions_count,
            counters.revenue_total,
        ],
    )?;
    if updated == 0 {
        return Err(anyhow!("pixel_not_found"));
    }
    Ok(counters)
}

pub async fn mark_event_failed_inner(
    db: &DuckDbBackend,
    event_id: &str,
    reason: &str,
) -> Result<bool> {
    let conn = db.conn.lock().await;
    let updated = conn.execute(
        r#"
        UPDATE events
        SET processing_state = 'failed',
            error_reason = ?2
        WHERE id = ?1
          AND processing_state <> 'processed'
        "#,
        duckdb::params![event_id, reason],
    )?;
    Ok(updated > 0)
}

pub async fn count_failed_events_inner(
    db: &DuckDbBackend,
    pixel_id: Option<&str>,
) -> Result<i64> {
    let conn = db.conn.lock().await;
    let count = match pixel_id {
        Some(pixel_id) => conn
            .prepare(
                "SELECT COUNT(*) FROM events WHERE processing_state = 'failed' AND pixel_id = ?1",
            )?
            .query_row(duckdb::params![pixel_id], |row| row.get(0))?,
        None => conn
            .prepare("SELECT COUNT(*) FROM events WHERE processing_state = 'failed'")?
            .query_row([], |row| row.get(0))?,
    };
    Ok(count)
}

pub async fn failed_event_ids_inner(
    db: &DuckDbBackend,
    pixel_id: Option<&str>,
    limit: usize,
) -> Result<Vec<String>> {
    let conn = db.conn.lock().await;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut ids = Vec::new();
    match pixel_id {
        Some(pixel_id) => {
            let mut stmt = conn.prepare(
                r#"
                SELECT id FROM events
                WHERE processing_state = 'failed' AND pixel_id = ?1
                ORDER BY created_at ASC, id ASC
                LIMIT ?2
                "#,
            )?;
            for row in stmt.query_map(duckdb::params![pixel_id, limit], |row| row.get(0))? {
                ids.push(row?);
            }
        }
        None => {
            let mut stmt = conn.prepare(
                r#"
                SELECT id FROM events
                WHERE processing_state = 'failed'
                ORDER BY created_at ASC, id ASC
                LIMIT ?1
                "#,
            )?;
            for row in stmt.query_map(duckdb::params![limit], |row| row.get(0))? {
                ids.push(row?);
            }
        }
    }
    Ok(ids)
}

pub async fn events_for_pixel_inner(
    db: &DuckDbBackend,
    pixel_id: &str,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<Event>> {
    let conn = db.conn.lock().await;
    match since {
        Some(since) => {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} FROM events e
                 WHERE e.pixel_id = ?1 AND e.created_at >= CAST(?2 AS TIMESTAMP)
                 ORDER BY e.created_at ASC, e.id ASC"
            );
            let since = format_ts(&since);
            collect_events(&conn, &sql, duckdb::params![pixel_id, since])
        }
        None => {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} FROM events e
                 WHERE e.pixel_id = ?1
                 ORDER BY e.created_at ASC, e.id ASC"
            );
            collect_events(&conn, &sql, duckdb::params![pixel_id])
        }
    }
}

pub async fn events_named_inner(
    db: &DuckDbBackend,
    pixel_id: &str,
    event_name: &str,
    since: DateTime<Utc>,
) -> Result<Vec<Event>> {
    let conn = db.conn.lock().await;
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM events e
         WHERE e.pixel_id = ?1
           AND e.event_name = ?2
           AND e.created_at >= CAST(?3 AS TIMESTAMP)
         ORDER BY e.created_at ASC, e.id ASC"
    );
    let since = format_ts(&since);
    collect_events(&conn, &sql, duckdb::params![pixel_id, event_name, since])
}

pub async fn events_in_scope_inner(
    db: &DuckDbBackend,
    workspace_id: &str,
    pixel_id: Option<&str>,
    since: DateTime<Utc>,
) -> Result<Vec<Event>> {
    let conn = db.conn.lock().await;
    let since = format_ts(&since);
    match pixel_id {
        Some(pixel_id) => {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} FROM events e
                 JOIN pixels p ON p.id = e.pixel_id
                 WHERE p.workspace_id = ?1
                   AND e.pixel_id = ?2
                   AND e.created_at >= CAST(?3 AS TIMESTAMP)
                 ORDER BY e.created_at ASC, e.id ASC"
            );
            collect_events(&conn, &sql, duckdb::params![workspace_id, pixel_id, since])
        }
        None => {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} FROM events e
                 JOIN pixels p ON p.id = e.pixel_id
                 WHERE p.workspace_id = ?1
                   AND e.created_at >= CAST(?2 AS TIMESTAMP)
                 ORDER BY e.created_at ASC, e.id ASC"
            );
            collect_events(&conn, &sql, duckdb::params![workspace_id, since])
        }
    }
}

pub async fn window_counts_inner(
    db: &DuckDbBackend,
    pixel_id: &str,
    since: DateTime<Utc>,
) -> Result<WindowCounts> {
    let conn = db.conn.lock().await;
    let counts = conn
        .prepare(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE processing_state = 'failed')
            FROM events
            WHERE pixel_id = ?1
              AND created_at >= CAST(?2 AS TIMESTAMP)
            "#,
        )?
        .query_row(duckdb::params![pixel_id, format_ts(&since)], |row| {
            Ok(WindowCounts {
                total: row.get(0)?,
                failed: row.get(1)?,
            })
        })?;
    Ok(counts)
}

pub async fn delete_events_before_inner(
    db: &DuckDbBackend,
    cutoff: DateTime<Utc>,
) -> Result<usize> {
    let conn = db.conn.lock().await;
    let deleted = conn.execute(
        "DELETE FROM events WHERE created_at < CAST(?1 AS TIMESTAMP)",
        duckdb::params![format_ts(&cutoff)],
    )?;
    Ok(deleted)
}
