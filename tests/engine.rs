//! End-to-end flow over the SQLite store: policy + rules seeded, an aging
//! ticket picks up violations and escalations, responding/resolving closes
//! them out.

use chrono::{Duration, TimeZone, Utc};
use tempfile::tempdir;

use deskwatch::calendar::BusinessCalendar;
use deskwatch::db::Database;
use deskwatch::engine::SlaEngine;
use deskwatch::models::{Priority, RuleAction, RuleTrigger, TicketType, ViolationKind};
use deskwatch::store::TicketStore;

fn monday_10am() -> chrono::DateTime<Utc> {
    // 2026-01-05 is a Monday.
    Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap()
}

#[test]
fn full_ticket_lifecycle() {
    let dir = tempdir().unwrap();
    let db = Database::open(&dir.path().join("helpdesk.db")).unwrap();

    db.create_policy(
        1,
        Priority::High,
        TicketType::Incident,
        2.0,
        8.0,
        &BusinessCalendar::standard(),
    )
    .unwrap();

    let tech = db.create_user(1, "Ada", "ada@example.com", "tech").unwrap();
    db.create_rule(
        1,
        "old incidents get an owner",
        &RuleTrigger::Age { hours: 24 },
        &RuleAction::Reassign { user_id: None, role: Some("tech".into()) },
    )
    .unwrap();
    db.create_rule(
        1,
        "page the noc",
        &RuleTrigger::Age { hours: 24 },
        &RuleAction::NotifyList { recipients: vec!["noc@example.com".into()] },
    )
    .unwrap();

    let ticket_id = db
        .create_ticket(1, "core switch flapping", None, Priority::High, TicketType::Incident)
        .unwrap();
    let ticket = db.get_ticket(ticket_id).unwrap().unwrap();
    let engine = SlaEngine::over(&db);

    // Young ticket: nothing due yet.
    let outcome = engine.run_ticket_checks_at(&ticket, ticket.created_at + Duration::minutes(5));
    assert!(outcome.new_violations.is_empty());
    assert!(outcome.fired_rules.is_empty());

    // Three days later: even across a weekend both deadlines are blown,
    // and the 24h age rules fire.
    let later = ticket.created_at + Duration::days(3);
    let outcome = engine.run_ticket_checks_at(&ticket, later);
    assert_eq!(outcome.new_violations.len(), 2);
    assert_eq!(outcome.fired_rules.len(), 2);

    let after = db.get_ticket(ticket_id).unwrap().unwrap();
    assert_eq!(after.assigned_to, Some(tech));
    assert_eq!(db.list_notifications().unwrap().len(), 1);

    // Re-check with unchanged conditions: nothing new, no repeat firing.
    let outcome = engine.run_ticket_checks_at(&after, later + Duration::hours(2));
    assert!(outcome.new_violations.is_empty());
    assert!(outcome.fired_rules.is_empty());
    assert_eq!(db.list_notifications().unwrap().len(), 1);

    // First response closes the response violation; the resolution one stays.
    db.mark_responded(ticket_id).unwrap();
    assert_eq!(
        engine.resolve_sla_violation(ticket_id, ViolationKind::Response).unwrap(),
        1
    );
    let open_resolution = db
        .list_violations(ticket_id)
        .unwrap()
        .into_iter()
        .filter(|v| !v.resolved)
        .collect::<Vec<_>>();
    assert_eq!(open_resolution.len(), 1);
    assert_eq!(open_resolution[0].kind, ViolationKind::Resolution);

    // Resolution closes the rest.
    db.mark_resolved(ticket_id).unwrap();
    assert_eq!(
        engine.resolve_sla_violation(ticket_id, ViolationKind::Resolution).unwrap(),
        1
    );
    assert!(db.list_violations(ticket_id).unwrap().iter().all(|v| v.resolved));

    // Audit trail: reassignment comment plus one audit comment per firing.
    let comments = db.get_comments(ticket_id).unwrap();
    assert!(comments.iter().any(|c| c.body.contains("Reassigned to Ada")));
    assert_eq!(
        comments.iter().filter(|c| c.body.contains("executed:")).count(),
        2
    );
    assert!(comments.iter().all(|c| c.internal));
}

#[test]
fn deadline_examples_from_the_handbook() {
    let dir = tempdir().unwrap();
    let db = Database::open(&dir.path().join("helpdesk.db")).unwrap();
    db.create_policy(
        7,
        Priority::Normal,
        TicketType::Question,
        10.0,
        40.0,
        &BusinessCalendar::standard(),
    )
    .unwrap();

    let engine = SlaEngine::over(&db);

    // Monday 10:00 + 10h: 7h to Monday close, 3h into Tuesday.
    let deadline = engine
        .calculate_deadline(7, Priority::Normal, TicketType::Question, ViolationKind::Response, monday_10am())
        .unwrap();
    assert_eq!(deadline, Some(Utc.with_ymd_and_hms(2026, 1, 6, 12, 0, 0).unwrap()));

    // Unknown tuple: no obligation.
    let none = engine
        .calculate_deadline(7, Priority::Urgent, TicketType::Question, ViolationKind::Response, monday_10am())
        .unwrap();
    assert!(none.is_none());
}

#[test]
fn manual_rules_stay_quiet_during_scans() {
    let dir = tempdir().unwrap();
    let db = Database::open(&dir.path().join("helpdesk.db")).unwrap();
    db.create_policy(
        1,
        Priority::Normal,
        TicketType::Question,
        1.0,
        2.0,
        &BusinessCalendar::standard(),
    )
    .unwrap();
    db.create_rule(
        1,
        "hand-cranked page",
        &RuleTrigger::Manual,
        &RuleAction::NotifyList { recipients: vec!["boss@example.com".into()] },
    )
    .unwrap();

    let ticket_id = db
        .create_ticket(1, "where is my invoice", None, Priority::Normal, TicketType::Question)
        .unwrap();
    let ticket = db.get_ticket(ticket_id).unwrap().unwrap();
    let engine = SlaEngine::over(&db);

    // Violations are detected, but a manual rule never fires from a scan.
    let outcome = engine.run_ticket_checks_at(&ticket, ticket.created_at + Duration::days(5));
    assert!(!outcome.violation_check_failed);
    assert!(!outcome.escalation_check_failed);
    assert_eq!(outcome.new_violations.len(), 2);
    assert!(outcome.fired_rules.is_empty());
    assert!(db.list_notifications().unwrap().is_empty());

    // Explicit invocation is the only path that runs it.
    let rule = db.list_rules(1).unwrap().remove(0);
    engine.fire_rule_manually(&rule, &ticket).unwrap();
    assert_eq!(db.list_notifications().unwrap().len(), 1);
}
