use std::thread;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::America::Chicago;
use questline_core::{
    EngineError, FixedClock, InMemoryStore, NewTask, ProgressStore, QuestEngine, Recurrence,
    RewardSource, TaskPatch, TaskStatus, UserProgressionState,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 6, 9, 30, 0).unwrap()
}

/// Engine without achievements, so only task rewards move the ledger.
fn bare_engine() -> QuestEngine<InMemoryStore, FixedClock> {
    QuestEngine::new(InMemoryStore::with_catalog(vec![]), FixedClock(now()))
}

fn seed_user(store: &InMemoryStore, f: impl FnOnce(&mut UserProgressionState)) {
    let mut s = UserProgressionState::new("u1");
    f(&mut s);
    store.save_user_progression_state(&s, 0).unwrap();
}

#[test]
fn streak_bonus_example() {
    let e = bare_engine();
    seed_user(e.store(), |s| s.current_streak = 10);

    let t = e.create_task("u1", NewTask::titled("Deep work block").difficulty(3)).unwrap();
    let res = e.complete_task(&t.id).unwrap();

    assert_eq!(res.base_xp, 30);
    assert_eq!(res.bonus_xp, 6);
    assert_eq!(res.xp_gained, 36);
    assert_eq!(res.gold_gained, 15);
    assert_eq!(res.multiplier, 1.2);
    // Streak is read, not changed, by completing a task.
    assert_eq!(res.user.current_streak, 10);
}

#[test]
fn level_boundary_example() {
    let e = bare_engine();
    seed_user(e.store(), |s| {
        s.total_xp = 95;
        s.current_xp = 95;
    });

    let t = e.create_task("u1", NewTask::titled("Inbox zero").difficulty(1)).unwrap();
    let res = e.complete_task(&t.id).unwrap();

    assert_eq!(res.user.total_xp, 105);
    assert_eq!(res.user.level, 2);
    assert_eq!(res.user.current_xp, 5);
    assert!(res.leveled_up);

    let history = e.store().level_history("u1").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!((history[0].previous_level, history[0].new_level), (1, 2));
    assert_eq!(history[0].total_xp_at_levelup, 105);
}

#[test]
fn completing_twice_leaves_state_alone() {
    let e = bare_engine();
    let t = e.create_task("u1", NewTask::titled("Call mom").difficulty(2)).unwrap();

    let first = e.complete_task(&t.id).unwrap();
    assert_eq!(first.xp_gained, 20);
    let after_first = e.user_state("u1").unwrap();

    let second = e.complete_task(&t.id);
    assert_eq!(second, Err(EngineError::AlreadyCompleted { task_id: t.id.clone() }));
    assert_eq!(e.user_state("u1").unwrap(), after_first);
    assert_eq!(e.store().transactions("u1").unwrap().len(), 1);
}

#[test]
fn interleaved_pipelines_cannot_both_write_from_one_read() {
    let store = InMemoryStore::with_catalog(vec![]);
    let a = QuestEngine::new(store.clone(), FixedClock(now()));
    let b = QuestEngine::new(store.clone(), FixedClock(now()));

    let t1 = a.create_task("u1", NewTask::titled("one").difficulty(5)).unwrap();
    let t2 = a.create_task("u1", NewTask::titled("two").difficulty(5)).unwrap();

    // Both read version 0.
    let plan_a = a.plan_completion(&t1.id).unwrap();
    let plan_b = b.plan_completion(&t2.id).unwrap();

    a.commit_completion(plan_a).unwrap();
    let err = b.commit_completion(plan_b).unwrap_err();
    assert!(matches!(err, EngineError::ConcurrencyConflict { expected: 0, found: 1, .. }));

    // The losing write left no trace: task two is still open, one reward on the books.
    assert_eq!(store.load_task(&t2.id).unwrap().unwrap().status, TaskStatus::Pending);
    let mid = b.user_state("u1").unwrap();
    assert_eq!(mid.total_xp, 80);
    assert_eq!(mid.total_tasks_completed, 1);

    // Rerunning the whole pipeline from a fresh read succeeds.
    let res = b.complete_task(&t2.id).unwrap();
    assert_eq!(res.user.total_xp, 160);
    assert_eq!(res.user.level, 2);
    assert_eq!(res.user.total_tasks_completed, 2);
    assert!(res.user.is_consistent());
}

#[test]
fn concurrent_completions_keep_the_level_invariant() {
    let store = InMemoryStore::with_catalog(vec![]);
    let setup = QuestEngine::new(store.clone(), FixedClock(now()));
    let ids: Vec<String> = (0..8)
        .map(|i| {
            setup
                .create_task("u1", NewTask::titled(format!("task {i}")).difficulty(4))
                .unwrap()
                .id
        })
        .collect();

    let handles: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let store = store.clone();
            thread::spawn(move || {
                let e = QuestEngine::new(store, FixedClock(now()));
                loop {
                    match e.complete_task(&id) {
                        Err(err) if err.is_retryable() => continue,
                        other => return other.map(|r| r.xp_gained),
                    }
                }
            })
        })
        .collect();

    for h in handles {
        assert_eq!(h.join().unwrap().unwrap(), 50);
    }

    let user = setup.user_state("u1").unwrap();
    assert_eq!(user.total_xp, 400);
    assert_eq!(user.gold, 200);
    assert_eq!(user.level, 5);
    assert_eq!(user.total_tasks_completed, 8);
    assert!(user.is_consistent());
    assert_eq!(store.transactions("u1").unwrap().len(), 8);
}

#[test]
fn sweeping_twice_reports_nothing_new() {
    let e = bare_engine();
    let due = now() + Duration::hours(1);
    e.create_task("u1", NewTask::titled("a").due(due)).unwrap();
    e.create_task("u1", NewTask::titled("b").due(due)).unwrap();
    let done = e.create_task("u1", NewTask::titled("c").due(due)).unwrap();
    e.complete_task(&done.id).unwrap();

    let later = now() + Duration::days(1);
    assert_eq!(e.sweep_overdue(later).unwrap(), 2);
    assert_eq!(e.sweep_overdue(later).unwrap(), 0);
    assert_eq!(
        e.store().load_task(&done.id).unwrap().unwrap().status,
        TaskStatus::Completed
    );
}

#[test]
fn past_due_date_is_rejected_at_creation() {
    let e = bare_engine();
    let err = e
        .create_task("u1", NewTask::titled("late").due(now() - Duration::minutes(1)))
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { ref field, .. } if field == "due_date"));
    assert!(e.list_tasks("u1").unwrap().is_empty());
}

#[test]
fn subtasks_pay_lowest_tier_and_leave_parent_open() {
    let e = bare_engine();
    let parent = e.create_task("u1", NewTask::titled("Move house").difficulty(5)).unwrap();
    let sub = e
        .create_task("u1", NewTask::titled("Pack books").difficulty(5).under(&parent.id))
        .unwrap();

    let res = e.complete_task(&sub.id).unwrap();
    assert_eq!((res.xp_gained, res.gold_gained), (10, 5));
    assert_eq!(res.user.total_tasks_completed, 1);
    assert_eq!(
        e.store().load_task(&parent.id).unwrap().unwrap().status,
        TaskStatus::Pending
    );

    let today: Vec<String> = e.todays_tasks("u1").unwrap().into_iter().map(|t| t.id).collect();
    assert!(!today.contains(&sub.id));
}

#[test]
fn missing_references_are_not_found() {
    let e = bare_engine();
    assert!(matches!(e.complete_task("nope"), Err(EngineError::NotFound { .. })));
    assert!(matches!(
        e.create_task("u1", NewTask::titled("orphan").under("nope")),
        Err(EngineError::NotFound { .. })
    ));
    assert!(matches!(e.delete_task("nope"), Err(EngineError::NotFound { .. })));
}

#[test]
fn delete_takes_subtasks_along() {
    let e = bare_engine();
    let parent = e.create_task("u1", NewTask::titled("Trip").difficulty(3)).unwrap();
    let s1 = e.create_task("u1", NewTask::titled("Book flight").under(&parent.id)).unwrap();
    let s2 = e.create_task("u1", NewTask::titled("Pack").under(&parent.id)).unwrap();
    let other = e.create_task("u1", NewTask::titled("Unrelated")).unwrap();

    let deleted = e.delete_task(&parent.id).unwrap();
    assert_eq!(deleted.len(), 3);
    assert_eq!(deleted.last(), Some(&parent.id));
    for id in [&parent.id, &s1.id, &s2.id] {
        assert!(e.store().load_task(id).unwrap().is_none());
    }
    assert!(e.store().load_task(&other.id).unwrap().is_some());
}

#[test]
fn difficulty_edit_changes_what_completion_pays() {
    let e = bare_engine();
    let t = e.create_task("u1", NewTask::titled("Refactor").difficulty(1)).unwrap();
    e.update_task(
        &t.id,
        TaskPatch {
            difficulty: Some(5),
            ..TaskPatch::default()
        },
    )
    .unwrap();

    let res = e.complete_task(&t.id).unwrap();
    assert_eq!((res.xp_gained, res.gold_gained), (80, 40));
}

#[test]
fn recurring_completion_schedules_the_next_one() {
    let e = bare_engine();
    let due = now() + Duration::hours(3);
    let t = e
        .create_task("u1", NewTask::titled("Water plants").due(due).recurring(Recurrence::daily(2)))
        .unwrap();

    let res = e.complete_task(&t.id).unwrap();
    let next = res.next_occurrence.expect("recurring task rolls forward");
    assert_ne!(next.id, t.id);
    assert_eq!(next.status, TaskStatus::Pending);
    assert_eq!(next.due_date, Some(due + Duration::days(2)));
    assert!(e.store().load_task(&next.id).unwrap().is_some());
}

#[test]
fn weekly_recurrence_follows_the_local_calendar() {
    let e = bare_engine().with_timezone(Chicago);
    // Monday 23:59 in Chicago is already Tuesday in UTC.
    let due = Chicago.with_ymd_and_hms(2026, 4, 6, 23, 59, 0).unwrap().with_timezone(&Utc);
    let weekly = Recurrence::weekly(1, [Weekday::Mon]);
    let t = e
        .create_task("u1", NewTask::titled("Plan the week").due(due).recurring(weekly))
        .unwrap();

    let next = e.complete_task(&t.id).unwrap().next_occurrence.unwrap();
    let local = next.due_date.unwrap().with_timezone(&Chicago);
    assert_eq!(local.weekday(), Weekday::Mon);
    assert_eq!(local.date_naive(), chrono::NaiveDate::from_ymd_opt(2026, 4, 13).unwrap());
    assert_eq!((local.hour(), local.minute()), (23, 59));
}

#[test]
fn achievements_are_separate_reward_applications() {
    let e = QuestEngine::new(InMemoryStore::new(), FixedClock(now()));
    let t = e.create_task("u1", NewTask::titled("First!").difficulty(2)).unwrap();
    let res = e.complete_task(&t.id).unwrap();

    assert_eq!(res.xp_gained, 20);
    assert_eq!(res.achievements_unlocked.len(), 1);

    let txs = e.store().transactions("u1").unwrap();
    assert_eq!(txs.len(), 2);
    assert!(matches!(txs[0].source, RewardSource::Task { .. }));
    assert!(matches!(
        txs[1].source,
        RewardSource::Achievement { ref achievement_id } if achievement_id == "first_quest"
    ));

    let rows = e.achievements("u1").unwrap();
    let (_, first) = rows.iter().find(|(a, _)| a.id == "first_quest").unwrap();
    assert!(first.is_unlocked);
    let (_, novice) = rows.iter().find(|(a, _)| a.id == "quest_novice").unwrap();
    assert_eq!(novice.progress, 1);
    assert!(!novice.is_unlocked);
}

#[test]
fn invariant_holds_over_many_completions() {
    let e = QuestEngine::new(InMemoryStore::new(), FixedClock(now()));
    for i in 0..25u8 {
        let t = e
            .create_task("u1", NewTask::titled(format!("q{i}")).difficulty(i % 5 + 1))
            .unwrap();
        let res = e.complete_task(&t.id).unwrap();
        assert!(res.user.is_consistent(), "after #{i}: {:?}", res.user);
    }
    let user = e.user_state("u1").unwrap();
    assert_eq!(user.total_tasks_completed, 25);
    assert_eq!(user.level, questline_core::level_for(user.total_xp));
}
