use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::domain::{
    AssetCriticality, EvidenceLevel, Priority, QaReason, QaStatus, QualityAssuranceRecord,
};
use crate::error::EngineError;
use crate::settings;
use crate::store::qa as qa_store;

/// Everything the rule chain looks at when deciding whether sign-off is
/// mandatory for a work order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QaSignals {
    pub is_safety_related: bool,
    pub priority: Priority,
    pub asset_criticality: Option<AssetCriticality>,
    pub caused_downtime: bool,
    pub downtime_minutes: Option<i64>,
    pub is_recurrence: bool,
    pub recurrence_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QaRequirement {
    pub required: bool,
    pub reason: Option<QaReason>,
    pub evidence_level: EvidenceLevel,
}

impl QaRequirement {
    fn required(reason: QaReason, evidence_level: EvidenceLevel) -> Self {
        QaRequirement {
            required: true,
            reason: Some(reason),
            evidence_level,
        }
    }

    fn not_required(evidence_level: EvidenceLevel) -> Self {
        QaRequirement {
            required: false,
            reason: None,
            evidence_level,
        }
    }
}

/// Ordered rule chain, first match wins.
///
/// Safety and priority dominate the criticality/downtime/recurrence signals
/// even though each could justify QA on its own; a safety failure on a
/// low-criticality asset still gets the strictest evidence level.
pub fn requires_qa(
    conn: &Connection,
    tenant_id: i64,
    signals: &QaSignals,
) -> Result<QaRequirement, EngineError> {
    let cfg = settings::get_or_create(conn, tenant_id)?;

    let requirement = if signals.is_safety_related {
        QaRequirement::required(QaReason::Safety, EvidenceLevel::Complete)
    } else if signals.priority == Priority::P1 {
        QaRequirement::required(QaReason::HighPriority, EvidenceLevel::Complete)
    } else if signals.priority == Priority::P2 {
        QaRequirement::required(QaReason::HighPriority, EvidenceLevel::Standard)
    } else if matches!(
        signals.asset_criticality,
        Some(AssetCriticality::Critical) | Some(AssetCriticality::High)
    ) && signals.caused_downtime
    {
        QaRequirement::required(QaReason::HighCriticality, EvidenceLevel::Standard)
    } else if signals
        .downtime_minutes
        .is_some_and(|m| m > cfg.downtime_qa_threshold_minutes)
    {
        QaRequirement::required(QaReason::HighDowntime, EvidenceLevel::Standard)
    } else if signals.is_recurrence
        && signals
            .recurrence_days
            .is_some_and(|d| d <= cfg.recurrence_window_days)
    {
        QaRequirement::required(QaReason::Recurrence, EvidenceLevel::Standard)
    } else if signals.priority == Priority::P3 && cfg.evidence_required(Priority::P3) {
        QaRequirement::not_required(EvidenceLevel::Basic)
    } else {
        QaRequirement::not_required(EvidenceLevel::Optional)
    };

    tracing::debug!(
        tenant_id,
        required = requirement.required,
        reason = ?requirement.reason,
        evidence = %requirement.evidence_level,
        "QA requirement evaluated"
    );
    Ok(requirement)
}

/// Persist a computed requirement for a work order.
///
/// Creates the QA record on first call, updates the requirement fields in
/// place thereafter; safe to call repeatedly as new information arrives.
/// Status resets to `PENDING` when required and `NOT_REQUIRED` otherwise.
pub fn create_or_update_qa(
    conn: &Connection,
    work_order_id: i64,
    tenant_id: i64,
    requirement: &QaRequirement,
) -> Result<QualityAssuranceRecord, EngineError> {
    if work_order_id <= 0 {
        return Err(EngineError::validation("work order id must be positive"));
    }
    if tenant_id <= 0 {
        return Err(EngineError::validation("tenant id must be positive"));
    }

    let status = if requirement.required {
        QaStatus::Pending
    } else {
        QaStatus::NotRequired
    };

    match qa_store::get_by_work_order(conn, work_order_id)? {
        Some(_) => {
            qa_store::update_requirement(
                conn,
                work_order_id,
                requirement.required,
                requirement.reason,
                requirement.evidence_level,
                status,
            )?;
            qa_store::get_by_work_order(conn, work_order_id)?
                .ok_or_else(|| EngineError::not_found("QualityAssuranceRecord", work_order_id))
        }
        None => qa_store::create(
            conn,
            tenant_id,
            work_order_id,
            requirement.required,
            requirement.reason,
            requirement.evidence_level,
            status,
        ),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionCheck {
    pub valid: bool,
    pub error: Option<String>,
}

impl CompletionCheck {
    fn ok() -> Self {
        CompletionCheck {
            valid: true,
            error: None,
        }
    }

    fn blocked(error: impl Into<String>) -> Self {
        CompletionCheck {
            valid: false,
            error: Some(error.into()),
        }
    }
}

/// Whether QA blocks closing the work order.
///
/// Valid when no QA record exists or sign-off is not required. Otherwise the
/// record must be approved, and any evidence level above `OPTIONAL` must have
/// evidence on file.
pub fn validate_qa_completion(
    conn: &Connection,
    work_order_id: i64,
) -> Result<CompletionCheck, EngineError> {
    let Some(record) = qa_store::get_by_work_order(conn, work_order_id)? else {
        return Ok(CompletionCheck::ok());
    };
    if !record.is_required {
        return Ok(CompletionCheck::ok());
    }

    if record.status != QaStatus::Approved {
        return Ok(CompletionCheck::blocked(format!(
            "QA sign-off is required but not approved (status: {})",
            record.status
        )));
    }

    let has_evidence = record
        .evidence_provided
        .as_ref()
        .is_some_and(|list| !list.is_empty());
    if record.evidence_required != EvidenceLevel::Optional && !has_evidence {
        return Ok(CompletionCheck::blocked(format!(
            "QA evidence level {} is required but no evidence has been recorded",
            record.evidence_required
        )));
    }

    Ok(CompletionCheck::ok())
}
