use std::cell::RefCell;

use pretty_assertions::assert_eq;
use rusqlite::Connection;
use time::{Duration, OffsetDateTime};

use corrective_core::db;
use corrective_core::domain::{DowntimeCategory, Priority, QaStatus};
use corrective_core::downtime::{
    calculate_total_downtime, confirm_return_to_production, get_active_downtime,
    get_all_downtimes, get_downtime_stats_by_machine, get_open_downtimes, handle_downtime,
    has_active_downtime, validate_can_close, ConfirmReturnRequest, HandleDowntimeRequest,
};
use corrective_core::notify::{
    DowntimeEnded, DowntimeNotifier, DowntimeStarted, NotifierError,
};
use corrective_core::qa::{create_or_update_qa, requires_qa, QaSignals};
use corrective_core::store::downtime::{self as downtime_store, NewDowntimeLog};
use corrective_core::store::occurrences::{self, NewFailureOccurrence};
use corrective_core::store::work_orders;

const TENANT: i64 = 1;
const ASSET: i64 = 10;

#[derive(Default)]
struct RecordingNotifier {
    started: RefCell<Vec<DowntimeStarted>>,
    ended: RefCell<Vec<DowntimeEnded>>,
    fail: bool,
}

impl DowntimeNotifier for RecordingNotifier {
    fn notify_downtime_start(&self, event: &DowntimeStarted) -> Result<(), NotifierError> {
        if self.fail {
            return Err(NotifierError::Unavailable("smtp down".to_string()));
        }
        self.started.borrow_mut().push(event.clone());
        Ok(())
    }

    fn notify_downtime_end(&self, event: &DowntimeEnded) -> Result<(), NotifierError> {
        if self.fail {
            return Err(NotifierError::Unavailable("smtp down".to_string()));
        }
        self.ended.borrow_mut().push(event.clone());
        Ok(())
    }
}

fn setup() -> Connection {
    let mut conn = db::open_in_memory().expect("open");
    db::migrate(&mut conn).expect("migrate");
    conn
}

fn failure(conn: &Connection, title: &str) -> i64 {
    occurrences::create(
        conn,
        &NewFailureOccurrence::new(TENANT, ASSET, title, 1, OffsetDateTime::now_utc()),
    )
    .expect("create occurrence")
    .id
}

fn stoppage_request(failure_id: i64, work_order_id: Option<i64>) -> HandleDowntimeRequest {
    HandleDowntimeRequest {
        tenant_id: TENANT,
        failure_occurrence_id: failure_id,
        work_order_id,
        asset_id: ASSET,
        asset_name: Some("Prensa 3".to_string()),
        sector_id: Some(2),
        caused_downtime: true,
        category: None,
        reason: Some("rodamiento bloqueado".to_string()),
        production_impact: None,
    }
}

#[test]
fn no_stoppage_means_no_record() {
    let conn = setup();
    let notifier = RecordingNotifier::default();
    let failure_id = failure(&conn, "Ruido extraño");

    let mut request = stoppage_request(failure_id, None);
    request.caused_downtime = false;
    let log = handle_downtime(&conn, &notifier, &request).unwrap();

    assert_eq!(log, None);
    assert!(get_all_downtimes(&conn, TENANT, None, None, None).unwrap().is_empty());
    assert!(notifier.started.borrow().is_empty());
}

#[test]
fn stoppage_opens_window_flags_work_order_and_notifies() {
    let conn = setup();
    let notifier = RecordingNotifier::default();
    let failure_id = failure(&conn, "Motor no arranca");
    let work_order = work_orders::create(&conn, TENANT).unwrap();

    let log = handle_downtime(&conn, &notifier, &stoppage_request(failure_id, Some(work_order.id)))
        .unwrap()
        .expect("downtime log");

    assert!(log.is_open());
    assert_eq!(log.category, DowntimeCategory::Unplanned);
    assert_eq!(log.work_order_id, Some(work_order.id));

    let work_order = work_orders::get(&conn, work_order.id).unwrap();
    assert!(work_order.requires_return_to_production);

    let started = notifier.started.borrow();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].failure_title.as_deref(), Some("Motor no arranca"));
    assert_eq!(started[0].asset_name.as_deref(), Some("Prensa 3"));
}

#[test]
fn notifier_failure_never_fails_the_operation() {
    let conn = setup();
    let notifier = RecordingNotifier {
        fail: true,
        ..RecordingNotifier::default()
    };
    let failure_id = failure(&conn, "Motor no arranca");

    let log = handle_downtime(&conn, &notifier, &stoppage_request(failure_id, None)).unwrap();
    assert!(log.is_some());

    let request = ConfirmReturnRequest {
        tenant_id: TENANT,
        downtime_log_id: log.unwrap().id,
        work_order_id: None,
        returned_by: 5,
        notes: None,
    };
    confirm_return_to_production(&conn, &notifier, &request).unwrap();
}

#[test]
fn confirmation_computes_rounded_minutes() {
    let conn = setup();
    let notifier = RecordingNotifier::default();
    let failure_id = failure(&conn, "Motor no arranca");

    let log = downtime_store::create(
        &conn,
        &NewDowntimeLog {
            tenant_id: TENANT,
            failure_occurrence_id: failure_id,
            work_order_id: None,
            asset_id: ASSET,
            started_at: OffsetDateTime::now_utc() - Duration::minutes(90),
            category: DowntimeCategory::Unplanned,
            reason: None,
            production_impact: None,
        },
    )
    .unwrap();

    let confirmation = confirm_return_to_production(
        &conn,
        &notifier,
        &ConfirmReturnRequest {
            tenant_id: TENANT,
            downtime_log_id: log.id,
            work_order_id: None,
            returned_by: 5,
            notes: None,
        },
    )
    .unwrap();

    assert_eq!(confirmation.total_minutes, 90);
    let ended = notifier.ended.borrow();
    assert_eq!(ended.len(), 1);
    assert_eq!(ended[0].duration_minutes, 90);
}

#[test]
fn second_confirmation_fails_and_keeps_total_minutes() {
    let conn = setup();
    let notifier = RecordingNotifier::default();
    let failure_id = failure(&conn, "Motor no arranca");

    let log = downtime_store::create(
        &conn,
        &NewDowntimeLog {
            tenant_id: TENANT,
            failure_occurrence_id: failure_id,
            work_order_id: None,
            asset_id: ASSET,
            started_at: OffsetDateTime::now_utc() - Duration::minutes(30),
            category: DowntimeCategory::Unplanned,
            reason: None,
            production_impact: None,
        },
    )
    .unwrap();

    let request = ConfirmReturnRequest {
        tenant_id: TENANT,
        downtime_log_id: log.id,
        work_order_id: None,
        returned_by: 5,
        notes: None,
    };
    let first = confirm_return_to_production(&conn, &notifier, &request).unwrap();

    let err = confirm_return_to_production(&conn, &notifier, &request).unwrap_err();
    assert_eq!(err.code(), "ALREADY_CLOSED");

    let after = downtime_store::get(&conn, log.id).unwrap();
    assert_eq!(after.total_minutes, Some(first.total_minutes));
}

#[test]
fn confirming_missing_log_is_not_found() {
    let conn = setup();
    let notifier = RecordingNotifier::default();
    let err = confirm_return_to_production(
        &conn,
        &notifier,
        &ConfirmReturnRequest {
            tenant_id: TENANT,
            downtime_log_id: 404,
            work_order_id: None,
            returned_by: 5,
            notes: None,
        },
    )
    .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[test]
fn closure_is_gated_on_return_qa_and_open_windows() {
    let conn = setup();
    let notifier = RecordingNotifier::default();
    let failure_id = failure(&conn, "Motor no arranca");
    let work_order = work_orders::create(&conn, TENANT).unwrap();

    let log = handle_downtime(&conn, &notifier, &stoppage_request(failure_id, Some(work_order.id)))
        .unwrap()
        .expect("downtime log");

    // QA required because the failure is safety-related.
    let requirement = requires_qa(
        &conn,
        TENANT,
        &QaSignals {
            is_safety_related: true,
            priority: Priority::P1,
            asset_criticality: None,
            caused_downtime: true,
            downtime_minutes: None,
            is_recurrence: false,
            recurrence_days: None,
        },
    )
    .unwrap();
    create_or_update_qa(&conn, work_order.id, TENANT, &requirement).unwrap();

    let check = validate_can_close(&conn, work_order.id, TENANT).unwrap();
    assert!(!check.valid);
    assert!(check.error.unwrap().contains("Retorno a Producción"));

    confirm_return_to_production(
        &conn,
        &notifier,
        &ConfirmReturnRequest {
            tenant_id: TENANT,
            downtime_log_id: log.id,
            work_order_id: Some(work_order.id),
            returned_by: 5,
            notes: None,
        },
    )
    .unwrap();

    // Return confirmed, but QA still pending.
    let check = validate_can_close(&conn, work_order.id, TENANT).unwrap();
    assert!(!check.valid);
    assert!(check.error.unwrap().contains("calidad"));

    corrective_core::store::qa::set_status(&conn, work_order.id, QaStatus::Approved).unwrap();
    let check = validate_can_close(&conn, work_order.id, TENANT).unwrap();
    assert!(check.valid, "unexpected block: {:?}", check.error);
}

#[test]
fn downtime_reads_and_stats() {
    let conn = setup();
    let notifier = RecordingNotifier::default();
    let failure_id = failure(&conn, "Motor no arranca");

    // One closed 60-minute window and one still open on another asset.
    let closed = downtime_store::create(
        &conn,
        &NewDowntimeLog {
            tenant_id: TENANT,
            failure_occurrence_id: failure_id,
            work_order_id: None,
            asset_id: ASSET,
            started_at: OffsetDateTime::now_utc() - Duration::minutes(60),
            category: DowntimeCategory::Unplanned,
            reason: None,
            production_impact: None,
        },
    )
    .unwrap();
    confirm_return_to_production(
        &conn,
        &notifier,
        &ConfirmReturnRequest {
            tenant_id: TENANT,
            downtime_log_id: closed.id,
            work_order_id: None,
            returned_by: 5,
            notes: None,
        },
    )
    .unwrap();

    downtime_store::create(
        &conn,
        &NewDowntimeLog {
            tenant_id: TENANT,
            failure_occurrence_id: failure_id,
            work_order_id: None,
            asset_id: 11,
            started_at: OffsetDateTime::now_utc() - Duration::minutes(10),
            category: DowntimeCategory::External,
            reason: None,
            production_impact: None,
        },
    )
    .unwrap();

    assert_eq!(get_open_downtimes(&conn, TENANT, None).unwrap().len(), 1);
    assert_eq!(get_all_downtimes(&conn, TENANT, None, None, None).unwrap().len(), 2);

    assert!(has_active_downtime(&conn, TENANT, 11).unwrap());
    assert!(!has_active_downtime(&conn, TENANT, ASSET).unwrap());
    assert_eq!(get_active_downtime(&conn, TENANT, 11).unwrap().map(|l| l.asset_id), Some(11));

    // 60 closed + ~10 elapsed on the open window.
    let total = calculate_total_downtime(&conn, TENANT, None, None, None).unwrap();
    assert!((69..=71).contains(&total), "total was {total}");

    let stats = get_downtime_stats_by_machine(&conn, TENANT, None, None).unwrap();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].asset_id, ASSET);
    assert_eq!(stats[0].total_minutes, 60);
    assert_eq!(stats[1].open_count, 1);

    let err = get_all_downtimes(
        &conn,
        TENANT,
        None,
        Some(OffsetDateTime::now_utc()),
        Some(OffsetDateTime::now_utc() - Duration::hours(1)),
    )
    .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_FAILED");
}
