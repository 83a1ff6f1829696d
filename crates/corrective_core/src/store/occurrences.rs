use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};
use time::OffsetDateTime;

use crate::domain::{
    AttachmentList, FailureOccurrence, FailureStatus, Priority, SymptomList,
};
use crate::error::EngineError;

const COLUMNS: &str = r#"
  id, tenant_id, asset_id, component_id, sub_component_id, title, description,
  symptoms, reported_by, reported_at, status, priority, resolved_at,
  is_safety_related, work_order_id, attachments, is_linked_duplicate,
  linked_to_occurrence_id, linked_by, linked_at, linked_reason
"#;

/// Insert payload for a failure occurrence. `new` fills the fields a plain
/// inbound report leaves untouched; duplicate linking overrides them.
#[derive(Debug, Clone)]
pub struct NewFailureOccurrence {
    pub tenant_id: i64,
    pub asset_id: i64,
    pub component_id: Option<i64>,
    pub sub_component_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub symptoms: SymptomList,
    pub reported_by: i64,
    pub reported_at: OffsetDateTime,
    pub status: FailureStatus,
    pub priority: Option<Priority>,
    pub resolved_at: Option<OffsetDateTime>,
    pub is_safety_related: bool,
    pub work_order_id: Option<i64>,
    pub attachments: AttachmentList,
    pub is_linked_duplicate: bool,
    pub linked_to_occurrence_id: Option<i64>,
    pub linked_by: Option<i64>,
    pub linked_at: Option<OffsetDateTime>,
    pub linked_reason: Option<String>,
}

impl NewFailureOccurrence {
    pub fn new(
        tenant_id: i64,
        asset_id: i64,
        title: impl Into<String>,
        reported_by: i64,
        reported_at: OffsetDateTime,
    ) -> Self {
        NewFailureOccurrence {
            tenant_id,
            asset_id,
            component_id: None,
            sub_component_id: None,
            title: title.into(),
            description: None,
            symptoms: SymptomList::empty(),
            reported_by,
            reported_at,
            status: FailureStatus::Open,
            priority: None,
            resolved_at: None,
            is_safety_related: false,
            work_order_id: None,
            attachments: AttachmentList::empty(),
            is_linked_duplicate: false,
            linked_to_occurrence_id: None,
            linked_by: None,
            linked_at: None,
            linked_reason: None,
        }
    }
}

fn decode_col<T: serde::Serialize + serde::de::DeserializeOwned>(
    idx: usize,
    raw: &str,
) -> rusqlite::Result<crate::domain::VersionedList<T>> {
    crate::domain::VersionedList::decode(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<FailureOccurrence> {
    let symptoms_raw: String = row.get(7)?;
    let attachments_raw: String = row.get(15)?;
    Ok(FailureOccurrence {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        asset_id: row.get(2)?,
        component_id: row.get(3)?,
        sub_component_id: row.get(4)?,
        title: row.get(5)?,
        description: row.get(6)?,
        symptoms: decode_col(7, &symptoms_raw)?,
        reported_by: row.get(8)?,
        reported_at: row.get(9)?,
        status: row.get(10)?,
        priority: row.get(11)?,
        resolved_at: row.get(12)?,
        is_safety_related: row.get(13)?,
        work_order_id: row.get(14)?,
        attachments: decode_col(15, &attachments_raw)?,
        is_linked_duplicate: row.get(16)?,
        linked_to_occurrence_id: row.get(17)?,
        linked_by: row.get(18)?,
        linked_at: row.get(19)?,
        linked_reason: row.get(20)?,
    })
}

pub fn create(
    conn: &Connection,
    new: &NewFailureOccurrence,
) -> Result<FailureOccurrence, EngineError> {
    conn.execute(
        r#"
      INSERT INTO failure_occurrences (
        tenant_id, asset_id, component_id, sub_component_id, title, description,
        symptoms, reported_by, reported_at, status, priority, resolved_at,
        is_safety_related, work_order_id, attachments, is_linked_duplicate,
        linked_to_occurrence_id, linked_by, linked_at, linked_reason
      ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
      "#,
        rusqlite::params![
            new.tenant_id,
            new.asset_id,
            new.component_id,
            new.sub_component_id,
            new.title,
            new.description,
            new.symptoms.encode()?,
            new.reported_by,
            new.reported_at,
            new.status,
            new.priority,
            new.resolved_at,
            new.is_safety_related,
            new.work_order_id,
            new.attachments.encode()?,
            new.is_linked_duplicate,
            new.linked_to_occurrence_id,
            new.linked_by,
            new.linked_at,
            new.linked_reason,
        ],
    )
    .map_err(|e| EngineError::store("insert failure occurrence", e))?;

    get(conn, conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: i64) -> Result<FailureOccurrence, EngineError> {
    let sql = format!("SELECT {COLUMNS} FROM failure_occurrences WHERE id = ?1");
    conn.query_row(&sql, [id], from_row)
        .optional()
        .map_err(|e| EngineError::store("read failure occurrence", e))?
        .ok_or_else(|| EngineError::not_found("FailureOccurrence", id))
}

/// Open/in-progress/reported occurrences on the asset inside the duplicate
/// window, newest first. Linked duplicates never come back as candidates.
pub fn list_duplicate_candidates(
    conn: &Connection,
    tenant_id: i64,
    asset_id: i64,
    sub_component_id: Option<i64>,
    cutoff: OffsetDateTime,
) -> Result<Vec<FailureOccurrence>, EngineError> {
    let sql = format!(
        r#"
      SELECT {COLUMNS} FROM failure_occurrences
      WHERE tenant_id = ?1
        AND asset_id = ?2
        AND status IN ('OPEN', 'IN_PROGRESS', 'REPORTED')
        AND reported_at >= ?3
        AND is_linked_duplicate = 0
        AND (?4 IS NULL OR sub_component_id = ?4)
      ORDER BY reported_at DESC, id DESC
      "#
    );
    collect(conn, &sql, rusqlite::params![tenant_id, asset_id, cutoff, sub_component_id])
}

/// Resolved occurrences on the asset inside the recurrence window, most
/// recently resolved first.
pub fn list_resolved_candidates(
    conn: &Connection,
    tenant_id: i64,
    asset_id: i64,
    sub_component_id: Option<i64>,
    cutoff: OffsetDateTime,
) -> Result<Vec<FailureOccurrence>, EngineError> {
    let sql = format!(
        r#"
      SELECT {COLUMNS} FROM failure_occurrences
      WHERE tenant_id = ?1
        AND asset_id = ?2
        AND status IN ('RESOLVED', 'RESOLVED_IMMEDIATE')
        AND resolved_at IS NOT NULL
        AND resolved_at >= ?3
        AND is_linked_duplicate = 0
        AND (?4 IS NULL OR sub_component_id = ?4)
      ORDER BY resolved_at DESC, id DESC
      "#
    );
    collect(conn, &sql, rusqlite::params![tenant_id, asset_id, cutoff, sub_component_id])
}

fn collect(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<FailureOccurrence>, EngineError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| EngineError::store("prepare occurrence query", e))?;
    let rows = stmt
        .query_map(params, from_row)
        .map_err(|e| EngineError::store("query occurrences", e))?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r.map_err(|e| EngineError::store("decode occurrence row", e))?);
    }
    Ok(out)
}

pub fn update_status(
    conn: &Connection,
    id: i64,
    status: FailureStatus,
    resolved_at: Option<OffsetDateTime>,
) -> Result<(), EngineError> {
    let changed = conn
        .execute(
            "UPDATE failure_occurrences SET status = ?2, resolved_at = ?3 WHERE id = ?1",
            rusqlite::params![id, status, resolved_at],
        )
        .map_err(|e| EngineError::store("update occurrence status", e))?;
    if changed == 0 {
        return Err(EngineError::not_found("FailureOccurrence", id));
    }
    Ok(())
}

/// Append attachments to an occurrence's list.
///
/// The read-modify-write runs inside one immediate transaction, so two
/// concurrent duplicate links on the same main occurrence serialize instead
/// of losing an update.
pub fn append_attachments(
    conn: &mut Connection,
    id: i64,
    attachments: &[String],
) -> Result<AttachmentList, EngineError> {
    if attachments.is_empty() {
        return get(conn, id).map(|o| o.attachments);
    }

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| EngineError::store("start attachment-append transaction", e))?;

    let raw: Option<String> = tx
        .query_row(
            "SELECT attachments FROM failure_occurrences WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| EngineError::store("read attachments", e))?;
    let raw = raw.ok_or_else(|| EngineError::not_found("FailureOccurrence", id))?;

    let mut list = AttachmentList::decode(&raw)?;
    list.items.extend(attachments.iter().cloned());

    tx.execute(
        "UPDATE failure_occurrences SET attachments = ?2 WHERE id = ?1",
        rusqlite::params![id, list.encode()?],
    )
    .map_err(|e| EngineError::store("write attachments", e))?;

    tx.commit()
        .map_err(|e| EngineError::store("commit attachment append", e))?;
    Ok(list)
}
