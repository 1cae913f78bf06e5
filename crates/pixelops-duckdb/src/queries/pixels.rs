use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use pixelops_core::pixel::{NewPixel, Pixel, PixelStatus, INACTIVITY_REASON};

use crate::backend::{format_ts, parse_optional_ts};
use crate::DuckDbBackend;

const PIXEL_COLUMNS: &str = r#"
    id,
    workspace_id,
    name,
    status,
    status_reason,
    events_count,
    conversions_count,
    revenue_total,
    CAST(last_activity AS VARCHAR)
"#;

struct PixelRow {
    id: String,
    workspace_id: String,
    name: String,
    status: String,
    status_reason: Option<String>,
    events_count: i64,
    conversions_count: i64,
    revenue_total: f64,
    last_activity: Option<String>,
}

fn map_pixel_row(row: &duckdb::Row<'_>) -> Result<PixelRow, duckdb::Error> {
    Ok(PixelRow {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        name: row.get(2)?,
        status: row.get(3)?,
        status_reason: row.get(4)?,
        events_count: row.get(5)?,
        conversions_count: row.get(6)?,
        revenue_total: row.get(7)?,
        last_activity: row.get(8)?,
    })
}

impl PixelRow {
    fn into_pixel(self) -> Result<Pixel> {
        Ok(Pixel {
            status: PixelStatus::parse(&self.status)?,
            last_activity: parse_optional_ts(self.last_activity)?,
            id: self.id,
            workspace_id: self.workspace_id,
            name: self.name,
            status_reason: self.status_reason,
            events_count: self.events_count,
            conversions_count: self.conversions_count,
            revenue_total: self.revenue_total,
        })
    }
}

fn get_pixel_locked(conn: &duckdb::Connection, pixel_id: &str) -> Result<Option<Pixel>> {
    let sql = format!("SELECT {PIXEL_COLUMNS} FROM pixels WHERE id = ?1");
    let row = conn
        .prepare(&sql)?
        .query_row(duckdb::params![pixel_id], map_pixel_row);
    match row {
        Ok(row) => Ok(Some(row.into_pixel()?)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn create_pixel_inner(db: &DuckDbBackend, pixel: &NewPixel) -> Result<Pixel> {
    let conn = db.conn.lock().await;
    let existing: i64 = conn
        .prepare("SELECT COUNT(*) FROM pixels WHERE id = ?1")?
        .query_row(duckdb::params![pixel.id], |row| row.get(0))?;
    if existing > 0 {
        return Err(anyhow!("duplicate_pixel"));
    }

    conn.execute(
        r#"
        INSERT INTO pixels (id, workspace_id, name, status, status_reason)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        duckdb::params![
            pixel.id,
            pixel.workspace_id,
            pixel.name,
            pixel.status.as_str(),
            pixel.status_reason,
        ],
    )?;

    get_pixel_locked(&conn, &pixel.id)?.ok_or_else(|| anyhow!("pixel_not_found"))
}

pub async fn get_pixel_inner(db: &DuckDbBackend, pixel_id: &str) -> Result<Option<Pixel>> {
    let conn = db.conn.lock().await;
    get_pixel_locked(&conn, pixel_id)
}

pub async fn list_pixels_inner(
    db: &DuckDbBackend,
    workspace_id: Option<&str>,
) -> Result<Vec<Pixel>> {
    let conn = db.conn.lock().await;
    let mut rows_out = Vec::new();
    match workspace_id {
        Some(workspace_id) => {
            let sql =
                format!("SELECT {PIXEL_COLUMNS} FROM pixels WHERE workspace_id = ?1 ORDER BY id");
            let mut stmt = conn.prepare(&sql)?;
            for row in stmt.query_map(duckdb::params![workspace_id], map_pixel_row)? {
                rows_out.push(row?);
            }
        }
        None => {
            let sql = format!("SELECT {PIXEL_COLUMNS} FROM pixels ORDER BY id");
            let mut stmt = conn.prepare(&sql)?;
            for row in stmt.query_map([], map_pixel_row)? {
                rows_out.push(row?);
            }
        }
    }
    rows_out.into_iter().map(PixelRow::into_pixel).collect()
}

pub async fn park_idle_pixels_inner(
    db: &DuckDbBackend,
    idle_since: DateTime<Utc>,
) -> Result<usize> {
    let conn = db.conn.lock().await;
    // Pixels that never reported are left alone: they have not gone idle, they
    // were never installed.
    let parked = conn.execute(
        r#"
        UPDATE pixels
        SET status = 'inactive',
            status_reason = ?2
        WHERE status = 'active'
          AND last_activity IS NOT NULL
          AND last_activity < CAST(?1 AS TIMESTAMP)
        "#,
        duckdb::params![format_ts(&idle_since), INACTIVITY_REASON],
    )?;
    Ok(parked)
}
