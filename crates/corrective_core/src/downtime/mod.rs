use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::{DowntimeCategory, DowntimeLog, QaStatus};
use crate::error::EngineError;
use crate::notify::{DowntimeEnded, DowntimeNotifier, DowntimeStarted};
use crate::settings;
use crate::store::downtime as downtime_store;
use crate::store::downtime::NewDowntimeLog;
use crate::store::occurrences;
use crate::store::qa as qa_store;
use crate::store::work_orders;

fn rounded_minutes(from: OffsetDateTime, to: OffsetDateTime) -> i64 {
    ((to - from).whole_seconds() as f64 / 60.0).round() as i64
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandleDowntimeRequest {
    pub tenant_id: i64,
    pub failure_occurrence_id: i64,
    pub work_order_id: Option<i64>,
    pub asset_id: i64,
    /// Display fields for the outbound alert; the surrounding platform owns
    /// the asset registry.
    pub asset_name: Option<String>,
    pub sector_id: Option<i64>,
    pub caused_downtime: bool,
    pub category: Option<DowntimeCategory>,
    pub reason: Option<String>,
    pub production_impact: Option<String>,
}

/// Open a production-downtime window for a failure, if it caused one.
///
/// No-op when `caused_downtime` is false. A linked work order gets
/// `requires_return_to_production`, which later gates its closure. The start
/// notification is fire-and-forget: a notifier failure is logged and the
/// window stays open.
pub fn handle_downtime(
    conn: &Connection,
    notifier: &dyn DowntimeNotifier,
    request: &HandleDowntimeRequest,
) -> Result<Option<DowntimeLog>, EngineError> {
    if request.tenant_id <= 0 {
        return Err(EngineError::validation("tenant id must be positive"));
    }
    if request.failure_occurrence_id <= 0 {
        return Err(EngineError::validation(
            "failure occurrence id must be positive",
        ));
    }
    if !request.caused_downtime {
        return Ok(None);
    }

    let occurrence = occurrences::get(conn, request.failure_occurrence_id)?;

    let log = downtime_store::create(
        conn,
        &NewDowntimeLog {
            tenant_id: request.tenant_id,
            failure_occurrence_id: request.failure_occurrence_id,
            work_order_id: request.work_order_id,
            asset_id: request.asset_id,
            started_at: OffsetDateTime::now_utc(),
            category: request.category.unwrap_or(DowntimeCategory::Unplanned),
            reason: request.reason.clone(),
            production_impact: request.production_impact.clone(),
        },
    )?;

    if let Some(work_order_id) = request.work_order_id {
        work_orders::set_requires_return(conn, work_order_id, true)?;
    }

    let event = DowntimeStarted {
        asset_id: request.asset_id,
        asset_name: request.asset_name.clone(),
        sector_id: request.sector_id,
        failure_id: Some(occurrence.id),
        failure_title: Some(occurrence.title),
        started_at: log.started_at,
        cause: request.reason.clone(),
    };
    if let Err(e) = notifier.notify_downtime_start(&event) {
        tracing::warn!(downtime_log_id = log.id, error = %e, "downtime start notification failed");
    }

    Ok(Some(log))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfirmReturnRequest {
    pub tenant_id: i64,
    pub downtime_log_id: i64,
    pub work_order_id: Option<i64>,
    pub returned_by: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReturnConfirmation {
    pub downtime_log_id: i64,
    pub total_minutes: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub ended_at: OffsetDateTime,
}

/// Close a downtime window: the one-way OPEN -> CLOSED transition.
///
/// The store-side conditional update guarantees a second confirmation fails
/// with `AlreadyClosed` instead of recomputing `total_minutes`. On success
/// the linked work order is marked returned-to-production, and when the
/// tenant requires it, the work order's QA record as well. The end
/// notification is fire-and-forget.
pub fn confirm_return_to_production(
    conn: &Connection,
    notifier: &dyn DowntimeNotifier,
    request: &ConfirmReturnRequest,
) -> Result<ReturnConfirmation, EngineError> {
    if request.tenant_id <= 0 {
        return Err(EngineError::validation("tenant id must be positive"));
    }
    if request.downtime_log_id <= 0 {
        return Err(EngineError::validation("downtime log id must be positive"));
    }

    let log = downtime_store::get(conn, request.downtime_log_id)?;
    if log.ended_at.is_some() {
        return Err(EngineError::already_closed("DowntimeLog", log.id));
    }

    let ended_at = OffsetDateTime::now_utc();
    let total_minutes = rounded_minutes(log.started_at, ended_at);
    let closed = downtime_store::close_if_open(
        conn,
        log.id,
        ended_at,
        total_minutes,
        request.returned_by,
    )?;
    if !closed {
        // Lost the race against a concurrent confirmation.
        return Err(EngineError::already_closed("DowntimeLog", log.id));
    }

    let work_order_id = request.work_order_id.or(log.work_order_id);
    if let Some(work_order_id) = work_order_id {
        work_orders::set_return_confirmed(conn, work_order_id, true)?;

        let cfg = settings::get_or_create(conn, request.tenant_id)?;
        if cfg.require_return_confirmation_on_qa {
            if let Some(qa) = qa_store::get_by_work_order(conn, work_order_id)? {
                if qa.is_required {
                    qa_store::set_return_confirmed(
                        conn,
                        work_order_id,
                        request.returned_by,
                        ended_at,
                    )?;
                }
            }
        }
    }

    let failure_title = occurrences::get(conn, log.failure_occurrence_id)
        .ok()
        .map(|o| o.title);
    let event = DowntimeEnded {
        asset_id: log.asset_id,
        asset_name: None,
        sector_id: None,
        failure_id: Some(log.failure_occurrence_id),
        failure_title,
        ended_at,
        duration_minutes: total_minutes,
        cause: log.reason.clone(),
    };
    if let Err(e) = notifier.notify_downtime_end(&event) {
        tracing::warn!(downtime_log_id = log.id, error = %e, "downtime end notification failed");
    }

    Ok(ReturnConfirmation {
        downtime_log_id: log.id,
        total_minutes,
        ended_at,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloseCheck {
    pub valid: bool,
    pub error: Option<String>,
}

impl CloseCheck {
    fn ok() -> Self {
        CloseCheck {
            valid: true,
            error: None,
        }
    }

    fn blocked(error: impl Into<String>) -> Self {
        CloseCheck {
            valid: false,
            error: Some(error.into()),
        }
    }
}

/// Gate work-order closure on downtime and QA state.
///
/// Each failing condition yields its own user-facing message so the caller
/// can surface the exact blocking reason, never a generic rejection.
pub fn validate_can_close(
    conn: &Connection,
    work_order_id: i64,
    tenant_id: i64,
) -> Result<CloseCheck, EngineError> {
    if work_order_id <= 0 {
        return Err(EngineError::validation("work order id must be positive"));
    }

    let work_order = work_orders::get(conn, work_order_id)?;
    let cfg = settings::get_or_create(conn, tenant_id)?;

    if work_order.requires_return_to_production {
        if !work_order.return_to_production_confirmed {
            return Ok(CloseCheck::blocked(
                "No se puede cerrar: el Retorno a Producción no ha sido confirmado",
            ));
        }
        if downtime_store::has_open_for_work_order(conn, work_order_id)? {
            return Ok(CloseCheck::blocked(
                "No se puede cerrar: existe una parada de producción abierta",
            ));
        }
    }

    if let Some(qa) = qa_store::get_by_work_order(conn, work_order_id)? {
        if qa.is_required {
            if qa.status != QaStatus::Approved {
                return Ok(CloseCheck::blocked(format!(
                    "No se puede cerrar: el control de calidad no está aprobado (estado: {})",
                    qa.status
                )));
            }
            if cfg.require_return_confirmation_on_qa && !qa.return_to_production_confirmed {
                return Ok(CloseCheck::blocked(
                    "No se puede cerrar: el Retorno a Producción no está confirmado en el registro de calidad",
                ));
            }
        }
    }

    Ok(CloseCheck::ok())
}

pub fn get_open_downtimes(
    conn: &Connection,
    tenant_id: i64,
    asset_id: Option<i64>,
) -> Result<Vec<DowntimeLog>, EngineError> {
    downtime_store::list_open(conn, tenant_id, asset_id)
}

pub fn get_all_downtimes(
    conn: &Connection,
    tenant_id: i64,
    asset_id: Option<i64>,
    from: Option<OffsetDateTime>,
    to: Option<OffsetDateTime>,
) -> Result<Vec<DowntimeLog>, EngineError> {
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(EngineError::validation("start date is after end date"));
        }
    }
    downtime_store::list_all(conn, tenant_id, asset_id, from, to)
}

/// Total downtime minutes for a tenant (optionally one asset).
///
/// Closed windows contribute their recorded minutes; open windows contribute
/// the minutes elapsed so far, so an ongoing stoppage is not undercounted.
pub fn calculate_total_downtime(
    conn: &Connection,
    tenant_id: i64,
    asset_id: Option<i64>,
    from: Option<OffsetDateTime>,
    to: Option<OffsetDateTime>,
) -> Result<i64, EngineError> {
    let logs = get_all_downtimes(conn, tenant_id, asset_id, from, to)?;
    let now = OffsetDateTime::now_utc();
    Ok(logs
        .iter()
        .map(|log| match (log.total_minutes, log.ended_at) {
            (Some(minutes), _) => minutes,
            (None, Some(ended_at)) => rounded_minutes(log.started_at, ended_at),
            (None, None) => rounded_minutes(log.started_at, now).max(0),
        })
        .sum())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineDowntimeStats {
    pub asset_id: i64,
    pub window_count: i64,
    pub total_minutes: i64,
    pub open_count: i64,
}

/// Per-asset downtime aggregates, ordered by total minutes descending and
/// asset id for determinism.
pub fn get_downtime_stats_by_machine(
    conn: &Connection,
    tenant_id: i64,
    from: Option<OffsetDateTime>,
    to: Option<OffsetDateTime>,
) -> Result<Vec<MachineDowntimeStats>, EngineError> {
    let logs = get_all_downtimes(conn, tenant_id, None, from, to)?;
    let now = OffsetDateTime::now_utc();

    let mut per_asset: BTreeMap<i64, MachineDowntimeStats> = BTreeMap::new();
    for log in &logs {
        let entry = per_asset
            .entry(log.asset_id)
            .or_insert(MachineDowntimeStats {
                asset_id: log.asset_id,
                window_count: 0,
                total_minutes: 0,
                open_count: 0,
            });
        entry.window_count += 1;
        entry.total_minutes += match (log.total_minutes, log.ended_at) {
            (Some(minutes), _) => minutes,
            (None, Some(ended_at)) => rounded_minutes(log.started_at, ended_at),
            (None, None) => rounded_minutes(log.started_at, now).max(0),
        };
        if log.is_open() {
            entry.open_count += 1;
        }
    }

    let mut stats: Vec<MachineDowntimeStats> = per_asset.into_values().collect();
    stats.sort_by(|a, b| (-(a.total_minutes), a.asset_id).cmp(&(-(b.total_minutes), b.asset_id)));
    Ok(stats)
}

pub fn has_active_downtime(
    conn: &Connection,
    tenant_id: i64,
    asset_id: i64,
) -> Result<bool, EngineError> {
    Ok(downtime_store::active_for_asset(conn, tenant_id, asset_id)?.is_some())
}

pub fn get_active_downtime(
    conn: &Connection,
    tenant_id: i64,
    asset_id: i64,
) -> Result<Option<DowntimeLog>, EngineError> {
    downtime_store::active_for_asset(conn, tenant_id, asset_id)
}
