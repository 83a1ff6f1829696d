use rusqlite::{Connection, OptionalExtension};

use crate::domain::WorkOrder;
use crate::error::EngineError;

pub fn create(conn: &Connection, tenant_id: i64) -> Result<WorkOrder, EngineError> {
    conn.execute(
        "INSERT INTO work_orders (tenant_id) VALUES (?1)",
        [tenant_id],
    )
    .map_err(|e| EngineError::store("insert work order", e))?;
    get(conn, conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: i64) -> Result<WorkOrder, EngineError> {
    conn.query_row(
        r#"
      SELECT id, tenant_id, requires_return_to_production, return_to_production_confirmed
      FROM work_orders WHERE id = ?1
      "#,
        [id],
        |row| {
            Ok(WorkOrder {
                id: row.get(0)?,
                tenant_id: row.get(1)?,
                requires_return_to_production: row.get(2)?,
                return_to_production_confirmed: row.get(3)?,
            })
        },
    )
    .optional()
    .map_err(|e| EngineError::store("read work order", e))?
    .ok_or_else(|| EngineError::not_found("WorkOrder", id))
}

pub fn set_requires_return(
    conn: &Connection,
    id: i64,
    requires: bool,
) -> Result<(), EngineError> {
    let changed = conn
        .execute(
            "UPDATE work_orders SET requires_return_to_production = ?2 WHERE id = ?1",
            rusqlite::params![id, requires],
        )
        .map_err(|e| EngineError::store("flag work order return-to-production", e))?;
    if changed == 0 {
        return Err(EngineError::not_found("WorkOrder", id));
    }
    Ok(())
}

pub fn set_return_confirmed(
    conn: &Connection,
    id: i64,
    confirmed: bool,
) -> Result<(), EngineError> {
    let changed = conn
        .execute(
            "UPDATE work_orders SET return_to_production_confirmed = ?2 WHERE id = ?1",
            rusqlite::params![id, confirmed],
        )
        .map_err(|e| EngineError::store("confirm work order return-to-production", e))?;
    if changed == 0 {
        return Err(EngineError::not_found("WorkOrder", id));
    }
    Ok(())
}
