use rusqlite::{Connection, OptionalExtension, Row};
use time::OffsetDateTime;

use crate::domain::{DowntimeCategory, DowntimeLog};
use crate::error::EngineError;

const COLUMNS: &str = r#"
  id, tenant_id, failure_occurrence_id, work_order_id, asset_id, started_at,
  ended_at, category, reason, production_impact, return_confirmed_by,
  return_confirmed_at, total_minutes
"#;

#[derive(Debug, Clone)]
pub struct NewDowntimeLog {
    pub tenant_id: i64,
    pub failure_occurrence_id: i64,
    pub work_order_id: Option<i64>,
    pub asset_id: i64,
    pub started_at: OffsetDateTime,
    pub category: DowntimeCategory,
    pub reason: Option<String>,
    pub production_impact: Option<String>,
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<DowntimeLog> {
    Ok(DowntimeLog {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        failure_occurrence_id: row.get(2)?,
        work_order_id: row.get(3)?,
        asset_id: row.get(4)?,
        started_at: row.get(5)?,
        ended_at: row.get(6)?,
        category: row.get(7)?,
        reason: row.get(8)?,
        production_impact: row.get(9)?,
        return_confirmed_by: row.get(10)?,
        return_confirmed_at: row.get(11)?,
        total_minutes: row.get(12)?,
    })
}

pub fn create(conn: &Connection, new: &NewDowntimeLog) -> Result<DowntimeLog, EngineError> {
    conn.execute(
        r#"
      INSERT INTO downtime_logs (
        tenant_id, failure_occurrence_id, work_order_id, asset_id, started_at,
        category, reason, production_impact
      ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
      "#,
        rusqlite::params![
            new.tenant_id,
            new.failure_occurrence_id,
            new.work_order_id,
            new.asset_id,
            new.started_at,
            new.category,
            new.reason,
            new.production_impact,
        ],
    )
    .map_err(|e| EngineError::store("insert downtime log", e))?;
    get(conn, conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: i64) -> Result<DowntimeLog, EngineError> {
    let sql = format!("SELECT {COLUMNS} FROM downtime_logs WHERE id = ?1");
    conn.query_row(&sql, [id], from_row)
        .optional()
        .map_err(|e| EngineError::store("read downtime log", e))?
        .ok_or_else(|| EngineError::not_found("DowntimeLog", id))
}

/// Close an open downtime window.
///
/// The update is conditional on `ended_at IS NULL`: of two concurrent
/// confirmations, exactly one sees a changed row and the other observes
/// `AlreadyClosed` without touching `total_minutes`.
pub fn close_if_open(
    conn: &Connection,
    id: i64,
    ended_at: OffsetDateTime,
    total_minutes: i64,
    confirmed_by: i64,
) -> Result<bool, EngineError> {
    let changed = conn
        .execute(
            r#"
      UPDATE downtime_logs
      SET ended_at = ?2, total_minutes = ?3, return_confirmed_by = ?4, return_confirmed_at = ?2
      WHERE id = ?1 AND ended_at IS NULL
      "#,
            rusqlite::params![id, ended_at, total_minutes, confirmed_by],
        )
        .map_err(|e| EngineError::store("close downtime log", e))?;
    Ok(changed == 1)
}

pub fn list_open(
    conn: &Connection,
    tenant_id: i64,
    asset_id: Option<i64>,
) -> Result<Vec<DowntimeLog>, EngineError> {
    let sql = format!(
        r#"
      SELECT {COLUMNS} FROM downtime_logs
      WHERE tenant_id = ?1 AND ended_at IS NULL
        AND (?2 IS NULL OR asset_id = ?2)
      ORDER BY started_at ASC, id ASC
      "#
    );
    collect(conn, &sql, rusqlite::params![tenant_id, asset_id])
}

pub fn list_all(
    conn: &Connection,
    tenant_id: i64,
    asset_id: Option<i64>,
    from: Option<OffsetDateTime>,
    to: Option<OffsetDateTime>,
) -> Result<Vec<DowntimeLog>, EngineError> {
    let sql = format!(
        r#"
      SELECT {COLUMNS} FROM downtime_logs
      WHERE tenant_id = ?1
        AND (?2 IS NULL OR asset_id = ?2)
        AND (?3 IS NULL OR started_at >= ?3)
        AND (?4 IS NULL OR started_at <= ?4)
      ORDER BY started_at DESC, id DESC
      "#
    );
    collect(conn, &sql, rusqlite::params![tenant_id, asset_id, from, to])
}

pub fn has_open_for_work_order(
    conn: &Connection,
    work_order_id: i64,
) -> Result<bool, EngineError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM downtime_logs WHERE work_order_id = ?1 AND ended_at IS NULL",
            [work_order_id],
            |row| row.get(0),
        )
        .map_err(|e| EngineError::store("count open downtime for work order", e))?;
    Ok(count > 0)
}

/// The open window for an asset, if any. At most one is expected; the most
/// recently started wins if the store holds more.
pub fn active_for_asset(
    conn: &Connection,
    tenant_id: i64,
    asset_id: i64,
) -> Result<Option<DowntimeLog>, EngineError> {
    let sql = format!(
        r#"
      SELECT {COLUMNS} FROM downtime_logs
      WHERE tenant_id = ?1 AND asset_id = ?2 AND ended_at IS NULL
      ORDER BY started_at DESC, id DESC
      LIMIT 1
      "#
    );
    conn.query_row(&sql, rusqlite::params![tenant_id, asset_id], from_row)
        .optional()
        .map_err(|e| EngineError::store("read active downtime", e))
}

fn collect(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<DowntimeLog>, EngineError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| EngineError::store("prepare downtime query", e))?;
    let rows = stmt
        .query_map(params, from_row)
        .map_err(|e| EngineError::store("query downtime logs", e))?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r.map_err(|e| EngineError::store("decode downtime row", e))?);
    }
    Ok(out)
}
