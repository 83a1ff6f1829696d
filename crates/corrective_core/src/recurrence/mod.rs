use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::domain::FailureOccurrence;
use crate::error::EngineError;
use crate::settings;
use crate::similarity;
use crate::store::occurrences;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecurrenceQuery {
    pub tenant_id: i64,
    pub asset_id: i64,
    pub component_id: Option<i64>,
    pub sub_component_id: Option<i64>,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecurrenceCheck {
    pub is_recurrence: bool,
    pub previous_occurrence: Option<FailureOccurrence>,
    pub days_since_resolved: Option<i64>,
}

impl RecurrenceCheck {
    fn none() -> Self {
        RecurrenceCheck {
            is_recurrence: false,
            previous_occurrence: None,
            days_since_resolved: None,
        }
    }
}

/// Find a previously resolved failure on the same asset that likely
/// reappeared.
///
/// Title-only scoring; symptom lists are not collected at this stage of a
/// report. The acceptance threshold defaults lower than the duplicate one
/// because titles drift after resolution.
pub fn detect_recurrence(
    conn: &Connection,
    query: &RecurrenceQuery,
) -> Result<RecurrenceCheck, EngineError> {
    if query.title.trim().chars().count() < 3 {
        return Err(EngineError::validation(
            "title must be at least 3 characters long",
        ));
    }
    if query.tenant_id <= 0 {
        return Err(EngineError::validation("tenant id must be positive"));
    }

    let cfg = settings::get_or_create(conn, query.tenant_id)?;
    let now = OffsetDateTime::now_utc();
    let cutoff = now - Duration::days(cfg.recurrence_window_days);

    let candidates = occurrences::list_resolved_candidates(
        conn,
        query.tenant_id,
        query.asset_id,
        query.sub_component_id,
        cutoff,
    )?;

    let best = candidates
        .into_iter()
        .filter_map(|occurrence| {
            let resolved_at = occurrence.resolved_at?;
            let score = similarity::similarity(&query.title, &occurrence.title, &[], &[]);
            Some((occurrence, resolved_at, score))
        })
        .filter(|(_, _, score)| *score >= cfg.recurrence_score_threshold)
        .max_by_key(|(_, resolved_at, score)| (*score, *resolved_at));

    let Some((previous, resolved_at, score)) = best else {
        return Ok(RecurrenceCheck::none());
    };

    let days_since_resolved = (now - resolved_at).whole_days();

    tracing::debug!(
        tenant_id = query.tenant_id,
        asset_id = query.asset_id,
        previous_id = previous.id,
        score,
        days_since_resolved,
        "recurrence detected"
    );
    Ok(RecurrenceCheck {
        is_recurrence: true,
        previous_occurrence: Some(previous),
        days_since_resolved: Some(days_since_resolved),
    })
}
