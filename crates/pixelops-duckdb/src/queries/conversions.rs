use anyhow::{anyhow, Result};

use pixelops_core::analytics::{Conversion, ConversionSummary};
use pixelops_core::rules::Rule;

use crate::DuckDbBackend;

const CONVERSION_COLUMNS: &str = r#"
    c.id,
    c.pixel_id,
    c.name,
    c.event_name,
    c.rules,
    c.conversion_rate,
    c.total_conversions,
    c.total_value,
    c.average_value
"#;

struct ConversionRow {
    id: String,
    pixel_id: String,
    name: String,
    event_name: String,
    rules: String,
    summary: ConversionSummary,
}

fn map_conversion_row(row: &duckdb::Row<'_>) -> Result<ConversionRow, duckdb::Error> {
    Ok(ConversionRow {
        id: row.get(0)?,
        pixel_id: row.get(1)?,
        name: row.get(2)?,
        event_name: row.get(3)?,
        rules: row.get(4)?,
        summary: ConversionSummary {
            conversion_rate: row.get(5)?,
            total_conversions: row.get(6)?,
            total_value: row.get(7)?,
            average_value: row.get(8)?,
        },
    })
}

impl ConversionRow {
    fn into_conversion(self) -> Result<Conversion> {
        let rules: Vec<Rule> = serde_json::from_str(&self.rules)
            .map_err(|e| anyhow!("corrupt rules for conversion {}: {e}", self.id))?;
        Ok(Conversion {
            id: self.id,
            pixel_id: self.pixel_id,
            name: self.name,
            event_name: self.event_name,
            rules,
            summary: self.summary,
        })
    }
}

pub async fn create_conversion_inner(db: &DuckDbBackend, conversion: &Conversion) -> Result<()> {
    let rules = serde_json::to_string(&conversion.rules)?;
    let conn = db.conn.lock().await;
    conn.execute(
        r#"
        INSERT INTO conversions (
            id, pixel_id, name, event_name, rules,
            conversion_rate, total_conversions, total_value, average_value,
            updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, CURRENT_TIMESTAMP)
        "#,
        duckdb::params![
            conversion.id,
            conversion.pixel_id,
            conversion.name,
            conversion.event_name,
            rules,
            conversion.summary.conversion_rate,
            conversion.summary.total_conversions,
            conversion.summary.total_value,
            conversion.summary.average_value,
        ],
    )?;
    Ok(())
}

pub async fn list_conversions_inner(db: &DuckDbBackend, pixel_id: &str) -> Result<Vec<Conversion>> {
    let conn = db.conn.lock().await;
    let sql = format!(
        "SELECT {CONVERSION_COLUMNS} FROM conversions c WHERE c.pixel_id = ?1 ORDER BY c.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows_out = Vec::new();
    for row in stmt.query_map(duckdb::params![pixel_id], map_conversion_row)? {
        rows_out.push(row?);
    }
    rows_out
        .into_iter()
        .map(ConversionRow::into_conversion)
        .collect()
}

pub async fn list_workspace_conversions_inner(
    db: &DuckDbBackend,
    workspace_id: &str,
) -> Result<Vec<Conversion>> {
    let conn = db.conn.lock().await;
    let sql = format!(
        "SELECT {CONVERSION_COLUMNS} FROM conversions c
         JOIN pixels p ON p.id = c.pixel_id
         WHERE p.workspace_id = ?1
         ORDER BY c.pixel_id, c.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows_out = Vec::new();
    for row in stmt.query_map(duckdb::params![workspace_id], map_conversion_row)? {
        rows_out.push(row?);
    }
    rows_out
        .into_iter()
        .map(ConversionRow::into_conversion)
        .collect()
}

pub async fn set_conversion_summary_inner(
    db: &DuckDbBackend,
    conversion_id: &str,
    summary: &ConversionSummary,
) -> Result<()> {
    let conn = db.conn.lock().await;
    let updated = conn.execute(
        r#"
        UPDATE conversions
        SET conversion_rate = ?2,
            total_conversions = ?3,
            total_value = ?4,
            average_value = ?5,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = ?1
        "#,
        duckdb::params![
            conversion_id,
            summary.conversion_rate,
            summary.total_conversions,
            summary.total_value,
            summary.average_value,
        ],
    )?;
    if updated == 0 {
        return Err(anyhow!("conversion_not_found"));
    }
    Ok(())
}
