use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use pixelops_core::diagnostics::{
    Category, Diagnostic, DiagnosticDraft, DiagnosticStatus, Severity,
};

use crate::backend::{format_ts, parse_optional_ts, parse_ts};
use crate::DuckDbBackend;

const DIAGNOSTIC_COLUMNS: &str = r#"
    d.id,
    d.pixel_id,
    d.severity,
    d.category,
    d.title,
    d.description,
    d.status,
    CAST(d.last_checked_at AS VARCHAR),
    CAST(d.created_at AS VARCHAR),
    CAST(d.resolved_at AS VARCHAR)
"#;

struct DiagnosticRow {
    id: String,
    pixel_id: String,
    severity: String,
    category: String,
    title: String,
    description: String,
    status: String,
    last_checked_at: String,
    created_at: String,
    resolved_at: Option<String>,
}

fn map_diagnostic_row(row: &duckdb::Row<'_>) -> Result<DiagnosticRow, duckdb::Error> {
    Ok(DiagnosticRow {
        id: row.get(0)?,
        pixel_id: row.get(1)?,
        severity: row.get(2)?,
        category: row.get(3)?,
        title: row.get(4)?,
        description: row.get(5)?,
        status: row.get(6)?,
        last_checked_at: row.get(7)?,
        created_at: row.get(8)?,
        resolved_at: row.get(9)?,
    })
}

impl DiagnosticRow {
    fn into_diagnostic(self) -> Result<Diagnostic> {
        Ok(Diagnostic {
            severity: Severity::parse(&self.severity)?,
            category: Category::parse(&self.category)?,
            status: DiagnosticStatus::parse(&self.status)?,
            last_checked_at: parse_ts(&self.last_checked_at)?,
            created_at: parse_ts(&self.created_at)?,
            resolved_at: parse_optional_ts(self.resolved_at)?,
            id: self.id,
            pixel_id: self.pixel_id,
            title: self.title,
            description: self.description,
        })
    }
}

fn collect_diagnostics(
    conn: &duckdb::Connection,
    sql: &str,
    params: &[&dyn duckdb::types::ToSql],
) -> Result<Vec<Diagnostic>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows_out = Vec::new();
    for row in stmt.query_map(params, map_diagnostic_row)? {
        rows_out.push(row?);
    }
    rows_out
        .into_iter()
        .map(DiagnosticRow::into_diagnostic)
        .collect()
}

pub async fn upsert_diagnostic_inner(
    db: &DuckDbBackend,
    draft: &DiagnosticDraft,
    now: DateTime<Utc>,
) -> Result<Diagnostic> {
    let now_str = format_ts(&now);
    let id = uuid::Uuid::new_v4().to_string();
    let conn = db.conn.lock().await;

    // (pixel_id, title) is the natural key. A repeat finding refreshes the
    // existing row and keeps its id and created_at.
    conn.execute(
        r#"
        INSERT INTO diagnostics (
            id, pixel_id, severity, category, title, description,
            status, last_checked_at, created_at, resolved_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6,
            'active', CAST(?7 AS TIMESTAMP), CAST(?7 AS TIMESTAMP), NULL
        )
        ON CONFLICT (pixel_id, title) DO UPDATE SET
            severity = EXCLUDED.severity,
            category = EXCLUDED.category,
            description = EXCLUDED.description,
            status = 'active',
            last_checked_at = EXCLUDED.last_checked_at,
            resolved_at = NULL
        "#,
        duckdb::params![
            id,
            draft.pixel_id,
            draft.severity.as_str(),
            draft.category.as_str(),
            draft.title,
            draft.description,
            now_str,
        ],
    )?;

    let sql = format!(
        "SELECT {DIAGNOSTIC_COLUMNS} FROM diagnostics d WHERE d.pixel_id = ?1 AND d.title = ?2"
    );
    collect_diagnostics(&conn, &sql, duckdb::params![draft.pixel_id, draft.title])?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("diagnostic_not_found"))
}

pub async fn resolve_diagnostic_inner(
    db: &DuckDbBackend,
    pixel_id: &str,
    title: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let conn = db.conn.lock().await;
    let updated = conn.execute(
        r#"
        UPDATE diagnostics
        SET status = 'resolved',
            last_checked_at = CAST(?3 AS TIMESTAMP),
            resolved_at = CAST(?3 AS TIMESTAMP)
        WHERE pixel_id = ?1
          AND title = ?2
          AND status = 'active'
        "#,
        duckdb::params![pixel_id, title, format_ts(&now)],
    )?;
    Ok(updated > 0)
}

pub async fn list_diagnostics_inner(db: &DuckDbBackend, pixel_id: &str) -> Result<Vec<Diagnostic>> {
    let conn = db.conn.lock().await;
    let sql = format!(
        "SELECT {DIAGNOSTIC_COLUMNS} FROM diagnostics d
         WHERE d.pixel_id = ?1
         ORDER BY d.last_checked_at DESC, d.title ASC"
    );
    collect_diagnostics(&conn, &sql, duckdb::params![pixel_id])
}

pub async fn list_workspace_diagnostics_inner(
    db: &DuckDbBackend,
    workspace_id: &str,
) -> Result<Vec<Diagnostic>> {
    let conn = db.conn.lock().await;
    let sql = format!(
        "SELECT {DIAGNOSTIC_COLUMNS} FROM diagnostics d
         JOIN pixels p ON p.id = d.pixel_id
         WHERE p.workspace_id = ?1
         ORDER BY d.last_checked_at DESC, d.pixel_id ASC, d.title ASC"
    );
    collect_diagnostics(&conn, &sql, duckdb::params![workspace_id])
}

pub async fn delete_resolved_diagnostics_before_inner(
    db: &DuckDbBackend,
    cutoff: DateTime<Utc>,
) -> Result<usize> {
    let conn = db.conn.lock().await;
    let deleted = conn.execute(
        r#"
        DELETE FROM diagnostics
        WHERE status = 'resolved'
          AND resolved_at < CAST(?1 AS TIMESTAMP)
        "#,
        duckdb::params![format_ts(&cutoff)],
    )?;
    Ok(deleted)
}
