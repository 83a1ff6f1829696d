use pretty_assertions::assert_eq;
use rusqlite::Connection;
use time::{Duration, OffsetDateTime};

use corrective_core::db;
use corrective_core::domain::{FailureStatus, SymptomList};
use corrective_core::duplicates::{detect_duplicates, link_duplicate, DuplicateQuery, LinkDuplicateRequest};
use corrective_core::recurrence::{detect_recurrence, RecurrenceQuery};
use corrective_core::store::occurrences::{self, NewFailureOccurrence};
use corrective_core::store::work_orders;

const TENANT: i64 = 1;
const ASSET: i64 = 10;

fn setup() -> Connection {
    let mut conn = db::open_in_memory().expect("open");
    db::migrate(&mut conn).expect("migrate");
    conn
}

fn report(
    conn: &Connection,
    title: &str,
    symptoms: &[i64],
    minutes_ago: i64,
) -> corrective_core::domain::FailureOccurrence {
    let mut new = NewFailureOccurrence::new(
        TENANT,
        ASSET,
        title,
        1,
        OffsetDateTime::now_utc() - Duration::minutes(minutes_ago),
    );
    new.symptoms = SymptomList::new(symptoms.to_vec());
    occurrences::create(conn, &new).expect("create occurrence")
}

fn query(title: &str, symptoms: &[i64]) -> DuplicateQuery {
    DuplicateQuery {
        tenant_id: TENANT,
        asset_id: ASSET,
        component_id: None,
        sub_component_id: None,
        title: title.to_string(),
        symptom_ids: symptoms.to_vec(),
    }
}

#[test]
fn detects_near_identical_open_failure() {
    let conn = setup();
    report(&conn, "Motor no arranca", &[], 60);

    let matches = detect_duplicates(&conn, &query("Motor no arranca correctamente", &[])).unwrap();
    assert_eq!(matches.len(), 1);
    assert!(matches[0].score > 70, "score was {}", matches[0].score);
}

#[test]
fn rejects_unrelated_report() {
    let conn = setup();
    report(&conn, "Totalmente diferente", &[5, 6, 7], 60);

    let matches = detect_duplicates(&conn, &query("Motor no arranca", &[1, 2])).unwrap();
    assert!(matches.is_empty());
}

#[test]
fn linked_duplicates_and_old_reports_are_never_candidates() {
    let mut conn = setup();
    let main = report(&conn, "Motor no arranca", &[], 30);
    // Outside the 48h default window.
    report(&conn, "Motor no arranca", &[], 49 * 60);

    link_duplicate(
        &mut conn,
        &LinkDuplicateRequest {
            tenant_id: TENANT,
            main_occurrence_id: main.id,
            reported_by: 2,
            asset_id: ASSET,
            sub_component_id: None,
            linked_reason: None,
            symptom_ids: vec![],
            attachments: vec![],
            notes: None,
        },
    )
    .unwrap();

    let matches = detect_duplicates(&conn, &query("Motor no arranca", &[])).unwrap();
    let ids: Vec<i64> = matches.iter().map(|m| m.occurrence.id).collect();
    assert_eq!(ids, vec![main.id]);
    assert!(matches.iter().all(|m| !m.occurrence.is_linked_duplicate));
}

#[test]
fn candidates_come_back_in_descending_score_order() {
    let conn = setup();
    report(&conn, "Motor no arranca correctamente", &[], 10);
    let exact = report(&conn, "Motor no arranca", &[], 20);

    let matches = detect_duplicates(&conn, &query("Motor no arranca", &[])).unwrap();
    assert!(matches.len() >= 2);
    assert_eq!(matches[0].occurrence.id, exact.id);
    assert!(matches[0].score >= matches[1].score);
}

#[test]
fn detect_validates_title_and_tenant() {
    let conn = setup();
    let err = detect_duplicates(&conn, &query("ab", &[])).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_FAILED");

    let mut q = query("Motor no arranca", &[]);
    q.tenant_id = 0;
    let err = detect_duplicates(&conn, &q).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_FAILED");
}

#[test]
fn link_duplicate_inherits_work_order_and_appends_attachments() {
    let mut conn = setup();
    let work_order = work_orders::create(&conn, TENANT).unwrap();
    let mut new = NewFailureOccurrence::new(TENANT, ASSET, "Fuga de aceite", 1, OffsetDateTime::now_utc());
    new.work_order_id = Some(work_order.id);
    let main = occurrences::create(&conn, &new).unwrap();

    let duplicate = link_duplicate(
        &mut conn,
        &LinkDuplicateRequest {
            tenant_id: TENANT,
            main_occurrence_id: main.id,
            reported_by: 2,
            asset_id: ASSET,
            sub_component_id: None,
            linked_reason: Some("same leak reported twice".to_string()),
            symptom_ids: vec![4],
            attachments: vec!["photo-1.jpg".to_string(), "photo-2.jpg".to_string()],
            notes: None,
        },
    )
    .unwrap();

    assert!(duplicate.is_linked_duplicate);
    assert_eq!(duplicate.linked_to_occurrence_id, Some(main.id));
    assert_eq!(duplicate.work_order_id, Some(work_order.id));
    assert_eq!(duplicate.status, FailureStatus::Open);
    assert_eq!(duplicate.symptoms.items, vec![4]);

    let main_after = occurrences::get(&conn, main.id).unwrap();
    assert_eq!(
        main_after.attachments.items,
        vec!["photo-1.jpg".to_string(), "photo-2.jpg".to_string()]
    );
}

#[test]
fn link_duplicate_requires_existing_main() {
    let mut conn = setup();
    let err = link_duplicate(
        &mut conn,
        &LinkDuplicateRequest {
            tenant_id: TENANT,
            main_occurrence_id: 999,
            reported_by: 2,
            asset_id: ASSET,
            sub_component_id: None,
            linked_reason: None,
            symptom_ids: vec![],
            attachments: vec![],
            notes: None,
        },
    )
    .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

fn resolved_report(conn: &Connection, title: &str, days_ago: i64) -> corrective_core::domain::FailureOccurrence {
    let now = OffsetDateTime::now_utc();
    let mut new = NewFailureOccurrence::new(TENANT, ASSET, title, 1, now - Duration::days(days_ago + 1));
    new.status = FailureStatus::Resolved;
    new.resolved_at = Some(now - Duration::days(days_ago) - Duration::hours(1));
    occurrences::create(conn, &new).expect("create resolved occurrence")
}

fn recurrence_query(title: &str) -> RecurrenceQuery {
    RecurrenceQuery {
        tenant_id: TENANT,
        asset_id: ASSET,
        component_id: None,
        sub_component_id: None,
        title: title.to_string(),
    }
}

#[test]
fn detects_recurrence_of_recently_resolved_failure() {
    let conn = setup();
    let previous = resolved_report(&conn, "Motor no arranca", 2);

    let check = detect_recurrence(&conn, &recurrence_query("Motor no arranca en frio")).unwrap();
    assert!(check.is_recurrence);
    assert_eq!(check.previous_occurrence.unwrap().id, previous.id);
    assert_eq!(check.days_since_resolved, Some(2));
}

#[test]
fn recurrence_ignores_failures_outside_the_window() {
    let conn = setup();
    // Default window is 7 days.
    resolved_report(&conn, "Motor no arranca", 9);

    let check = detect_recurrence(&conn, &recurrence_query("Motor no arranca")).unwrap();
    assert!(!check.is_recurrence);
    assert_eq!(check.previous_occurrence, None);
    assert_eq!(check.days_since_resolved, None);
}

#[test]
fn recurrence_requires_title_similarity_above_threshold() {
    let conn = setup();
    resolved_report(&conn, "Correa de transmision rota", 1);

    let check = detect_recurrence(&conn, &recurrence_query("Motor no arranca")).unwrap();
    assert!(!check.is_recurrence);
}
