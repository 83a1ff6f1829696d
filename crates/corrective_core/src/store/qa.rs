use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use time::OffsetDateTime;

use crate::domain::{AttachmentList, EvidenceLevel, QaReason, QaStatus, QualityAssuranceRecord};
use crate::error::EngineError;

const COLUMNS: &str = r#"
  id, tenant_id, work_order_id, is_required, required_reason, evidence_required,
  status, evidence_provided, return_to_production_confirmed, confirmed_by, confirmed_at
"#;

fn from_row(row: &Row<'_>) -> rusqlite::Result<QualityAssuranceRecord> {
    let evidence_raw: Option<String> = row.get(7)?;
    let evidence_provided = match evidence_raw {
        Some(raw) => Some(AttachmentList::decode(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e))
        })?),
        None => None,
    };
    Ok(QualityAssuranceRecord {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        work_order_id: row.get(2)?,
        is_required: row.get(3)?,
        required_reason: row.get(4)?,
        evidence_required: row.get(5)?,
        status: row.get(6)?,
        evidence_provided,
        return_to_production_confirmed: row.get(8)?,
        confirmed_by: row.get(9)?,
        confirmed_at: row.get(10)?,
    })
}

pub fn get_by_work_order(
    conn: &Connection,
    work_order_id: i64,
) -> Result<Option<QualityAssuranceRecord>, EngineError> {
    let sql = format!("SELECT {COLUMNS} FROM qa_records WHERE work_order_id = ?1");
    conn.query_row(&sql, [work_order_id], from_row)
        .optional()
        .map_err(|e| EngineError::store("read QA record", e))
}

pub fn create(
    conn: &Connection,
    tenant_id: i64,
    work_order_id: i64,
    is_required: bool,
    required_reason: Option<QaReason>,
    evidence_required: EvidenceLevel,
    status: QaStatus,
) -> Result<QualityAssuranceRecord, EngineError> {
    conn.execute(
        r#"
      INSERT INTO qa_records (
        tenant_id, work_order_id, is_required, required_reason, evidence_required, status
      ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
      "#,
        rusqlite::params![
            tenant_id,
            work_order_id,
            is_required,
            required_reason,
            evidence_required,
            status
        ],
    )
    .map_err(|e| EngineError::store("insert QA record", e))?;

    get_by_work_order(conn, work_order_id)?
        .ok_or_else(|| EngineError::not_found("QualityAssuranceRecord", work_order_id))
}

/// Rewrite the requirement fields of an existing QA record. Evidence and
/// confirmation state are untouched; new information about the work order
/// never discards what a technician already recorded.
pub fn update_requirement(
    conn: &Connection,
    work_order_id: i64,
    is_required: bool,
    required_reason: Option<QaReason>,
    evidence_required: EvidenceLevel,
    status: QaStatus,
) -> Result<(), EngineError> {
    let changed = conn
        .execute(
            r#"
      UPDATE qa_records
      SET is_required = ?2, required_reason = ?3, evidence_required = ?4, status = ?5
      WHERE work_order_id = ?1
      "#,
            rusqlite::params![work_order_id, is_required, required_reason, evidence_required, status],
        )
        .map_err(|e| EngineError::store("update QA requirement", e))?;
    if changed == 0 {
        return Err(EngineError::not_found("QualityAssuranceRecord", work_order_id));
    }
    Ok(())
}

pub fn set_status(
    conn: &Connection,
    work_order_id: i64,
    status: QaStatus,
) -> Result<(), EngineError> {
    let changed = conn
        .execute(
            "UPDATE qa_records SET status = ?2 WHERE work_order_id = ?1",
            rusqlite::params![work_order_id, status],
        )
        .map_err(|e| EngineError::store("update QA status", e))?;
    if changed == 0 {
        return Err(EngineError::not_found("QualityAssuranceRecord", work_order_id));
    }
    Ok(())
}

pub fn set_evidence(
    conn: &Connection,
    work_order_id: i64,
    evidence: &AttachmentList,
) -> Result<(), EngineError> {
    let changed = conn
        .execute(
            "UPDATE qa_records SET evidence_provided = ?2 WHERE work_order_id = ?1",
            rusqlite::params![work_order_id, evidence.encode()?],
        )
        .map_err(|e| EngineError::store("record QA evidence", e))?;
    if changed == 0 {
        return Err(EngineError::not_found("QualityAssuranceRecord", work_order_id));
    }
    Ok(())
}

pub fn set_return_confirmed(
    conn: &Connection,
    work_order_id: i64,
    confirmed_by: i64,
    confirmed_at: OffsetDateTime,
) -> Result<(), EngineError> {
    let changed = conn
        .execute(
            r#"
      UPDATE qa_records
      SET return_to_production_confirmed = 1, confirmed_by = ?2, confirmed_at = ?3
      WHERE work_order_id = ?1
      "#,
            rusqlite::params![work_order_id, confirmed_by, confirmed_at],
        )
        .map_err(|e| EngineError::store("confirm QA return-to-production", e))?;
    if changed == 0 {
        return Err(EngineError::not_found("QualityAssuranceRecord", work_order_id));
    }
    Ok(())
}
