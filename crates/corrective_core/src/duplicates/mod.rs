use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::domain::{AttachmentList, FailureOccurrence, FailureStatus, SymptomList};
use crate::error::EngineError;
use crate::settings;
use crate::similarity;
use crate::store::occurrences::{self, NewFailureOccurrence};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DuplicateQuery {
    pub tenant_id: i64,
    pub asset_id: i64,
    pub component_id: Option<i64>,
    pub sub_component_id: Option<i64>,
    pub title: String,
    pub symptom_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DuplicateCandidate {
    pub occurrence: FailureOccurrence,
    pub score: u8,
}

/// Find open failures on the same asset that are likely the same event.
///
/// Read-only: candidates are scored against the tenant's duplicate threshold
/// and returned in descending score order. The store query already sorts
/// candidates newest first, so equal scores keep the most recent report
/// ahead.
pub fn detect_duplicates(
    conn: &Connection,
    query: &DuplicateQuery,
) -> Result<Vec<DuplicateCandidate>, EngineError> {
    if query.title.trim().chars().count() < 3 {
        return Err(EngineError::validation(
            "title must be at least 3 characters long",
        ));
    }
    if query.tenant_id <= 0 {
        return Err(EngineError::validation("tenant id must be positive"));
    }

    let cfg = settings::get_or_create(conn, query.tenant_id)?;
    let cutoff = OffsetDateTime::now_utc() - Duration::hours(cfg.duplicate_window_hours);

    let candidates = occurrences::list_duplicate_candidates(
        conn,
        query.tenant_id,
        query.asset_id,
        query.sub_component_id,
        cutoff,
    )?;

    let mut matches: Vec<DuplicateCandidate> = candidates
        .into_iter()
        .map(|occurrence| {
            let score = similarity::similarity(
                &query.title,
                &occurrence.title,
                &query.symptom_ids,
                &occurrence.symptoms.items,
            );
            DuplicateCandidate { occurrence, score }
        })
        .filter(|c| c.score >= cfg.duplicate_score_threshold)
        .collect();

    // Stable sort preserves the recency ordering within equal scores.
    matches.sort_by(|a, b| b.score.cmp(&a.score));

    tracing::debug!(
        tenant_id = query.tenant_id,
        asset_id = query.asset_id,
        matches = matches.len(),
        "duplicate detection finished"
    );
    Ok(matches)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkDuplicateRequest {
    pub tenant_id: i64,
    pub main_occurrence_id: i64,
    pub reported_by: i64,
    pub asset_id: i64,
    pub sub_component_id: Option<i64>,
    pub linked_reason: Option<String>,
    pub symptom_ids: Vec<i64>,
    pub attachments: Vec<String>,
    pub notes: Option<String>,
}

/// Record a new report as a duplicate of an existing open occurrence.
///
/// Creates a minimal linked occurrence inheriting the main occurrence's work
/// order, and appends any supplied attachments to the main occurrence's list
/// (atomically, at the store layer). The linked record is excluded from all
/// future candidate searches.
pub fn link_duplicate(
    conn: &mut Connection,
    request: &LinkDuplicateRequest,
) -> Result<FailureOccurrence, EngineError> {
    if request.main_occurrence_id <= 0 {
        return Err(EngineError::validation(
            "main occurrence id must be positive",
        ));
    }
    if request.tenant_id <= 0 {
        return Err(EngineError::validation("tenant id must be positive"));
    }

    let main = occurrences::get(conn, request.main_occurrence_id)?;
    if main.is_linked_duplicate {
        return Err(EngineError::conflict(
            "cannot link to an occurrence that is itself a duplicate",
        ));
    }

    let now = OffsetDateTime::now_utc();
    let duplicate = occurrences::create(
        conn,
        &NewFailureOccurrence {
            tenant_id: request.tenant_id,
            asset_id: request.asset_id,
            component_id: main.component_id,
            sub_component_id: request.sub_component_id,
            title: main.title.clone(),
            description: request.notes.clone(),
            symptoms: SymptomList::new(request.symptom_ids.clone()),
            reported_by: request.reported_by,
            reported_at: now,
            status: FailureStatus::Open,
            priority: None,
            resolved_at: None,
            is_safety_related: false,
            work_order_id: main.work_order_id,
            attachments: AttachmentList::empty(),
            is_linked_duplicate: true,
            linked_to_occurrence_id: Some(main.id),
            linked_by: Some(request.reported_by),
            linked_at: Some(now),
            linked_reason: request.linked_reason.clone(),
        },
    )?;

    if !request.attachments.is_empty() {
        occurrences::append_attachments(conn, main.id, &request.attachments)?;
    }

    Ok(duplicate)
}
