use pretty_assertions::assert_eq;
use rusqlite::Connection;

use corrective_core::db;
use corrective_core::domain::{
    AssetCriticality, AttachmentList, EvidenceLevel, Priority, QaReason, QaStatus,
};
use corrective_core::qa::{
    create_or_update_qa, requires_qa, validate_qa_completion, QaSignals,
};
use corrective_core::store::qa as qa_store;
use corrective_core::store::work_orders;

const TENANT: i64 = 1;

fn setup() -> Connection {
    let mut conn = db::open_in_memory().expect("open");
    db::migrate(&mut conn).expect("migrate");
    conn
}

fn signals() -> QaSignals {
    QaSignals {
        is_safety_related: false,
        priority: Priority::P4,
        asset_criticality: None,
        caused_downtime: false,
        downtime_minutes: None,
        is_recurrence: false,
        recurrence_days: None,
    }
}

#[test]
fn safety_always_wins_with_complete_evidence() {
    let conn = setup();
    let requirement = requires_qa(
        &conn,
        TENANT,
        &QaSignals {
            is_safety_related: true,
            priority: Priority::P4,
            asset_criticality: Some(AssetCriticality::Low),
            ..signals()
        },
    )
    .unwrap();

    assert!(requirement.required);
    assert_eq!(requirement.reason, Some(QaReason::Safety));
    assert_eq!(requirement.evidence_level, EvidenceLevel::Complete);
}

#[test]
fn priority_rules_come_before_criticality() {
    let conn = setup();

    let p1 = requires_qa(&conn, TENANT, &QaSignals { priority: Priority::P1, ..signals() }).unwrap();
    assert_eq!(
        (p1.required, p1.reason, p1.evidence_level),
        (true, Some(QaReason::HighPriority), EvidenceLevel::Complete)
    );

    let p2 = requires_qa(
        &conn,
        TENANT,
        &QaSignals {
            priority: Priority::P2,
            asset_criticality: Some(AssetCriticality::Critical),
            caused_downtime: true,
            ..signals()
        },
    )
    .unwrap();
    // Criticality + downtime would also fire, but priority matched first.
    assert_eq!(
        (p2.required, p2.reason, p2.evidence_level),
        (true, Some(QaReason::HighPriority), EvidenceLevel::Standard)
    );
}

#[test]
fn critical_asset_with_downtime_requires_qa() {
    let conn = setup();
    let requirement = requires_qa(
        &conn,
        TENANT,
        &QaSignals {
            asset_criticality: Some(AssetCriticality::High),
            caused_downtime: true,
            ..signals()
        },
    )
    .unwrap();
    assert_eq!(requirement.reason, Some(QaReason::HighCriticality));
    assert_eq!(requirement.evidence_level, EvidenceLevel::Standard);
}

#[test]
fn long_downtime_and_recurrence_require_qa() {
    let conn = setup();

    // Default tenant threshold is 60 minutes.
    let downtime = requires_qa(
        &conn,
        TENANT,
        &QaSignals { downtime_minutes: Some(61), ..signals() },
    )
    .unwrap();
    assert_eq!(downtime.reason, Some(QaReason::HighDowntime));

    let at_threshold = requires_qa(
        &conn,
        TENANT,
        &QaSignals { downtime_minutes: Some(60), ..signals() },
    )
    .unwrap();
    assert!(!at_threshold.required);

    let recurrence = requires_qa(
        &conn,
        TENANT,
        &QaSignals {
            is_recurrence: true,
            recurrence_days: Some(3),
            ..signals()
        },
    )
    .unwrap();
    assert_eq!(recurrence.reason, Some(QaReason::Recurrence));
}

#[test]
fn p3_gets_basic_evidence_without_sign_off() {
    let conn = setup();
    let requirement =
        requires_qa(&conn, TENANT, &QaSignals { priority: Priority::P3, ..signals() }).unwrap();
    assert!(!requirement.required);
    assert_eq!(requirement.evidence_level, EvidenceLevel::Basic);

    let fallback = requires_qa(&conn, TENANT, &signals()).unwrap();
    assert!(!fallback.required);
    assert_eq!(fallback.evidence_level, EvidenceLevel::Optional);
}

#[test]
fn create_or_update_is_idempotent_per_work_order() {
    let conn = setup();
    let work_order = work_orders::create(&conn, TENANT).unwrap();

    let first = requires_qa(&conn, TENANT, &QaSignals { priority: Priority::P3, ..signals() }).unwrap();
    let created = create_or_update_qa(&conn, work_order.id, TENANT, &first).unwrap();
    assert_eq!(created.status, QaStatus::NotRequired);

    // New information arrives: the failure turned out to be safety-related.
    let second = requires_qa(
        &conn,
        TENANT,
        &QaSignals { is_safety_related: true, ..signals() },
    )
    .unwrap();
    let updated = create_or_update_qa(&conn, work_order.id, TENANT, &second).unwrap();

    assert_eq!(updated.id, created.id);
    assert!(updated.is_required);
    assert_eq!(updated.required_reason, Some(QaReason::Safety));
    assert_eq!(updated.status, QaStatus::Pending);
}

#[test]
fn completion_passes_without_record_or_requirement() {
    let conn = setup();
    let work_order = work_orders::create(&conn, TENANT).unwrap();

    let check = validate_qa_completion(&conn, work_order.id).unwrap();
    assert!(check.valid);

    let requirement = requires_qa(&conn, TENANT, &signals()).unwrap();
    create_or_update_qa(&conn, work_order.id, TENANT, &requirement).unwrap();
    let check = validate_qa_completion(&conn, work_order.id).unwrap();
    assert!(check.valid);
}

#[test]
fn completion_blocks_until_approved_with_evidence() {
    let conn = setup();
    let work_order = work_orders::create(&conn, TENANT).unwrap();
    let requirement = requires_qa(
        &conn,
        TENANT,
        &QaSignals { is_safety_related: true, ..signals() },
    )
    .unwrap();
    create_or_update_qa(&conn, work_order.id, TENANT, &requirement).unwrap();

    let pending = validate_qa_completion(&conn, work_order.id).unwrap();
    assert!(!pending.valid);
    assert!(pending.error.unwrap().contains("not approved"));

    qa_store::set_status(&conn, work_order.id, QaStatus::Approved).unwrap();
    let no_evidence = validate_qa_completion(&conn, work_order.id).unwrap();
    assert!(!no_evidence.valid);
    assert!(no_evidence.error.unwrap().contains("COMPLETE"));

    qa_store::set_evidence(
        &conn,
        work_order.id,
        &AttachmentList::new(vec!["informe.pdf".to_string()]),
    )
    .unwrap();
    let done = validate_qa_completion(&conn, work_order.id).unwrap();
    assert!(done.valid);
}
