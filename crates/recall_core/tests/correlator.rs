use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;
use recall_core::{CorrelationSettings, Correlator, CorrelatorPhase, JobKind, Role};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
}

fn minutes(n: i64) -> chrono::TimeDelta {
    chrono::TimeDelta::minutes(n)
}

fn correlator() -> Correlator {
    recall_logging::initialize_for_tests();
    Correlator::new(CorrelationSettings {
        subject_id: "alice".to_string(),
        ..CorrelationSettings::default()
    })
}

#[test]
fn reply_within_timeout_produces_one_paired_job() {
    let mut correlator = correlator();
    assert!(correlator.on_user_turn("Hi", t0()).is_empty());
    assert_eq!(correlator.phase(), CorrelatorPhase::AwaitingReply);

    let jobs = correlator.on_assistant_turn("Hello back", None, t0() + minutes(3));
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].kind, JobKind::Paired);
    assert_eq!(jobs[0].user_text.as_deref(), Some("Hi"));
    assert_eq!(jobs[0].assistant_text.as_deref(), Some("Hello back"));
    assert_eq!(jobs[0].subject_id, "alice");
    assert_eq!(correlator.phase(), CorrelatorPhase::Idle);
}

#[test]
fn late_reply_produces_two_single_jobs_user_first() {
    let mut correlator = correlator();
    correlator.on_user_turn("Hi", t0());

    let jobs = correlator.on_assistant_turn("Hello back", None, t0() + minutes(6));
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|job| job.kind == JobKind::Single));
    assert_eq!(jobs[0].single_text(), Some("Hi"));
    assert_eq!(jobs[0].role, Some(Role::User));
    assert_eq!(jobs[1].single_text(), Some("Hello back"));
    assert_eq!(jobs[1].role, Some(Role::Assistant));
    assert_eq!(correlator.phase(), CorrelatorPhase::Idle);
}

#[test]
fn reply_exactly_at_timeout_still_pairs() {
    let mut correlator = correlator();
    correlator.on_user_turn("Hi", t0());
    let jobs = correlator.on_assistant_turn("Hello back", None, t0() + minutes(5));
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].kind, JobKind::Paired);
}

#[test]
fn assistant_without_pending_user_is_standalone() {
    let mut correlator = correlator();
    let jobs = correlator.on_assistant_turn("Welcome", Some("bot-1".into()), t0());
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].kind, JobKind::Single);
    assert_eq!(jobs[0].assistant_text.as_deref(), Some("Welcome"));
    assert_eq!(
        jobs[0].metadata.get("speaker_id").map(String::as_str),
        Some("bot-1")
    );
}

#[test]
fn repeated_user_notification_is_ignored() {
    let mut correlator = correlator();
    correlator.on_user_turn("Hi", t0());
    assert!(correlator.on_user_turn("Hi", t0() + minutes(1)).is_empty());

    let pending = correlator.pending().unwrap();
    assert_eq!(pending.user_turn.text, "Hi");
    assert_eq!(pending.cached_at, t0());
}

#[test]
fn newer_user_turn_flushes_the_previous_one() {
    let mut correlator = correlator();
    let mut flushed = Vec::new();
    for (idx, text) in ["first", "second", "third"].iter().enumerate() {
        flushed.extend(correlator.on_user_turn(text, t0() + minutes(idx as i64)));
    }

    let texts: Vec<_> = flushed.iter().filter_map(|job| job.single_text()).collect();
    assert_eq!(texts, vec!["first", "second"]);
    assert_eq!(correlator.pending().unwrap().user_turn.text, "third");

    let jobs = correlator.on_assistant_turn("answer", None, t0() + minutes(3));
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].user_text.as_deref(), Some("third"));
}

#[test]
fn expire_stale_only_fires_after_timeout() {
    let mut correlator = correlator();
    correlator.on_user_turn("Hi", t0());
    assert!(correlator.expire_stale(t0() + minutes(4)).is_none());

    let job = correlator.expire_stale(t0() + minutes(6)).unwrap();
    assert_eq!(job.single_text(), Some("Hi"));
    assert_eq!(correlator.phase(), CorrelatorPhase::Idle);
    assert!(correlator.expire_stale(t0() + minutes(7)).is_none());
}

#[test]
fn disabled_correlation_emits_user_turns_directly() {
    let mut correlator = Correlator::new(CorrelationSettings {
        enabled: false,
        ..CorrelationSettings::default()
    });
    let jobs = correlator.on_user_turn("Hi", t0());
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].role, Some(Role::User));
    assert_eq!(correlator.phase(), CorrelatorPhase::Idle);
}

#[test]
fn custom_timeout_is_honoured() {
    let mut correlator = Correlator::new(CorrelationSettings {
        timeout: Duration::from_secs(30),
        ..CorrelationSettings::default()
    });
    correlator.on_user_turn("Hi", t0());
    let jobs = correlator.on_assistant_turn("late", None, t0() + minutes(1));
    assert_eq!(jobs.len(), 2);
}
