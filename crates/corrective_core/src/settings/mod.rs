use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::domain::Priority;
use crate::error::EngineError;

/// Per-tenant thresholds for the corrective-maintenance engine.
///
/// Created with [`CorrectiveSettings::defaults`] the first time a tenant is
/// queried. Both similarity acceptance thresholds are configurable here; the
/// recurrence threshold defaults lower than the duplicate one because titles
/// drift after a failure has been resolved once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorrectiveSettings {
    pub tenant_id: i64,
    pub duplicate_window_hours: i64,
    pub recurrence_window_days: i64,
    pub downtime_qa_threshold_minutes: i64,
    pub duplicate_score_threshold: u8,
    pub recurrence_score_threshold: u8,
    pub sla_hours_p1: i64,
    pub sla_hours_p2: i64,
    pub sla_hours_p3: i64,
    pub sla_hours_p4: i64,
    pub evidence_required_p1: bool,
    pub evidence_required_p2: bool,
    pub evidence_required_p3: bool,
    pub evidence_required_p4: bool,
    pub require_return_confirmation: bool,
    pub require_return_confirmation_on_qa: bool,
}

impl CorrectiveSettings {
    pub fn defaults(tenant_id: i64) -> Self {
        CorrectiveSettings {
            tenant_id,
            duplicate_window_hours: 48,
            recurrence_window_days: 7,
            downtime_qa_threshold_minutes: 60,
            duplicate_score_threshold: 70,
            recurrence_score_threshold: 60,
            sla_hours_p1: 4,
            sla_hours_p2: 8,
            sla_hours_p3: 24,
            sla_hours_p4: 72,
            evidence_required_p1: true,
            evidence_required_p2: true,
            evidence_required_p3: true,
            evidence_required_p4: false,
            require_return_confirmation: true,
            require_return_confirmation_on_qa: true,
        }
    }

    pub fn sla_hours(&self, priority: Priority) -> i64 {
        match priority {
            Priority::P1 => self.sla_hours_p1,
            Priority::P2 => self.sla_hours_p2,
            Priority::P3 => self.sla_hours_p3,
            Priority::P4 => self.sla_hours_p4,
        }
    }

    pub fn evidence_required(&self, priority: Priority) -> bool {
        match priority {
            Priority::P1 => self.evidence_required_p1,
            Priority::P2 => self.evidence_required_p2,
            Priority::P3 => self.evidence_required_p3,
            Priority::P4 => self.evidence_required_p4,
        }
    }
}

/// Fetch a tenant's settings, creating the default row on first access.
///
/// The insert uses `INSERT OR IGNORE` against the tenant primary key, so two
/// concurrent first reads for a new tenant both land on the same row; the
/// uniqueness decision lives in the store, not in application code.
pub fn get_or_create(conn: &Connection, tenant_id: i64) -> Result<CorrectiveSettings, EngineError> {
    if tenant_id <= 0 {
        return Err(EngineError::validation("tenant id must be positive"));
    }

    let d = CorrectiveSettings::defaults(tenant_id);
    conn.execute(
        r#"
      INSERT OR IGNORE INTO corrective_settings (
        tenant_id, duplicate_window_hours, recurrence_window_days,
        downtime_qa_threshold_minutes, duplicate_score_threshold,
        recurrence_score_threshold,
        sla_hours_p1, sla_hours_p2, sla_hours_p3, sla_hours_p4,
        evidence_required_p1, evidence_required_p2, evidence_required_p3,
        evidence_required_p4, require_return_confirmation,
        require_return_confirmation_on_qa
      ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
      "#,
        rusqlite::params![
            d.tenant_id,
            d.duplicate_window_hours,
            d.recurrence_window_days,
            d.downtime_qa_threshold_minutes,
            d.duplicate_score_threshold,
            d.recurrence_score_threshold,
            d.sla_hours_p1,
            d.sla_hours_p2,
            d.sla_hours_p3,
            d.sla_hours_p4,
            d.evidence_required_p1,
            d.evidence_required_p2,
            d.evidence_required_p3,
            d.evidence_required_p4,
            d.require_return_confirmation,
            d.require_return_confirmation_on_qa,
        ],
    )
    .map_err(|e| EngineError::store("insert default tenant settings", e))?;

    conn.query_row(
        r#"
      SELECT
        tenant_id, duplicate_window_hours, recurrence_window_days,
        downtime_qa_threshold_minutes, duplicate_score_threshold,
        recurrence_score_threshold,
        sla_hours_p1, sla_hours_p2, sla_hours_p3, sla_hours_p4,
        evidence_required_p1, evidence_required_p2, evidence_required_p3,
        evidence_required_p4, require_return_confirmation,
        require_return_confirmation_on_qa
      FROM corrective_settings
      WHERE tenant_id = ?1
      "#,
        [tenant_id],
        |row| {
            Ok(CorrectiveSettings {
                tenant_id: row.get(0)?,
                duplicate_window_hours: row.get(1)?,
                recurrence_window_days: row.get(2)?,
                downtime_qa_threshold_minutes: row.get(3)?,
                duplicate_score_threshold: row.get(4)?,
                recurrence_score_threshold: row.get(5)?,
                sla_hours_p1: row.get(6)?,
                sla_hours_p2: row.get(7)?,
                sla_hours_p3: row.get(8)?,
                sla_hours_p4: row.get(9)?,
                evidence_required_p1: row.get(10)?,
                evidence_required_p2: row.get(11)?,
                evidence_required_p3: row.get(12)?,
                evidence_required_p4: row.get(13)?,
                require_return_confirmation: row.get(14)?,
                require_return_confirmation_on_qa: row.get(15)?,
            })
        },
    )
    .map_err(|e| EngineError::store("read tenant settings", e))
}

/// Persist modified thresholds for a tenant. The row must already exist.
pub fn update(conn: &Connection, settings: &CorrectiveSettings) -> Result<(), EngineError> {
    let changed = conn
        .execute(
            r#"
      UPDATE corrective_settings SET
        duplicate_window_hours = ?2, recurrence_window_days = ?3,
        downtime_qa_threshold_minutes = ?4, duplicate_score_threshold = ?5,
        recurrence_score_threshold = ?6,
        sla_hours_p1 = ?7, sla_hours_p2 = ?8, sla_hours_p3 = ?9, sla_hours_p4 = ?10,
        evidence_required_p1 = ?11, evidence_required_p2 = ?12,
        evidence_required_p3 = ?13, evidence_required_p4 = ?14,
        require_return_confirmation = ?15, require_return_confirmation_on_qa = ?16
      WHERE tenant_id = ?1
      "#,
            rusqlite::params![
                settings.tenant_id,
                settings.duplicate_window_hours,
                settings.recurrence_window_days,
                settings.downtime_qa_threshold_minutes,
                settings.duplicate_score_threshold,
                settings.recurrence_score_threshold,
                settings.sla_hours_p1,
                settings.sla_hours_p2,
                settings.sla_hours_p3,
                settings.sla_hours_p4,
                settings.evidence_required_p1,
                settings.evidence_required_p2,
                settings.evidence_required_p3,
                settings.evidence_required_p4,
                settings.require_return_confirmation,
                settings.require_return_confirmation_on_qa,
            ],
        )
        .map_err(|e| EngineError::store("update tenant settings", e))?;

    if changed == 0 {
        return Err(EngineError::not_found("CorrectiveSettings", settings.tenant_id));
    }
    Ok(())
}
