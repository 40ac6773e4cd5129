//! End-to-end lifecycle tests for completion states driven by a
//! `LocalScheduler`.
//!
//! Covers delivery ordering across early and late subscribers, deferred
//! execution, advisory cancellation, unhandled-error reporting at disposal,
//! and re-entrant use of the state from inside callbacks.

use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use completion::{
    Callback, Completion, CompletionState, LocalScheduler, Scheduler, Status, SubscriptionId,
    UnhandledPolicy,
};

type Log = Rc<RefCell<Vec<(String, SubscriptionId)>>>;

fn collecting_scheduler() -> Rc<LocalScheduler> {
    Rc::new(LocalScheduler::with_policy(UnhandledPolicy::Collect))
}

fn record(log: &Log, label: &'static str) -> Callback<i32, String> {
    let log = Rc::clone(log);
    Box::new(move |outcome, id| {
        let entry = match outcome {
            Ok(v) => format!("{label}:ok:{v}"),
            Err(e) => format!("{label}:err:{e}"),
        };
        log.borrow_mut().push((entry, id));
    })
}

// ---------------------------------------------------------------------------
// Concrete scenarios
// ---------------------------------------------------------------------------

#[test]
fn early_then_late_subscriber_scenario() {
    let sched = collecting_scheduler();
    let state: CompletionState<i32, String> = CompletionState::new(sched.clone());
    let log: Log = Rc::default();

    let a = state.subscribe(record(&log, "cb1"));
    state.complete(42);
    assert!(log.borrow().is_empty(), "cb1 ran inside complete()");
    assert_eq!(sched.len(), 1);

    sched.run_until_idle();
    assert_eq!(*log.borrow(), vec![("cb1:ok:42".to_string(), a)]);

    let b = state.subscribe(record(&log, "cb2"));
    assert_ne!(a, b);
    assert_eq!(log.borrow().len(), 1, "cb2 ran inside subscribe()");

    sched.run_until_idle();
    assert_eq!(log.borrow()[1], ("cb2:ok:42".to_string(), b));
    assert!(sched.take_unhandled().is_empty());
}

#[test]
fn unobserved_error_is_reported_exactly_once() {
    let sched = collecting_scheduler();
    let state: CompletionState<i32, String> = CompletionState::new(sched.clone());
    state.error("E".to_string());
    sched.run_until_idle();
    assert!(sched.take_unhandled().is_empty());

    drop(state);
    let reports = sched.take_unhandled();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].message, "\"E\"");
    assert!(reports[0].to_string().starts_with("unhandled completion error"));
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[test]
fn error_reaches_every_subscriber_in_order() {
    let sched = collecting_scheduler();
    let state: CompletionState<i32, String> = CompletionState::new(sched.clone());
    let log: Log = Rc::default();
    let ids: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|label| state.subscribe(record(&log, label)))
        .collect();

    state.error("bad".to_string());
    sched.run_until_idle();

    let entries = log.borrow();
    assert_eq!(
        entries.iter().map(|(e, _)| e.as_str()).collect::<Vec<_>>(),
        vec!["a:err:bad", "b:err:bad", "c:err:bad"]
    );
    assert_eq!(entries.iter().map(|(_, id)| *id).collect::<Vec<_>>(), ids);
}

#[test]
fn late_subscribers_follow_the_drain() {
    let sched = collecting_scheduler();
    let state: CompletionState<i32, String> = CompletionState::new(sched.clone());
    let log: Log = Rc::default();

    state.subscribe(record(&log, "early1"));
    state.subscribe(record(&log, "early2"));
    state.complete(5);
    state.subscribe(record(&log, "late1"));
    state.subscribe(record(&log, "late2"));

    sched.run_until_idle();
    let labels: Vec<_> = log.borrow().iter().map(|(e, _)| e.clone()).collect();
    assert_eq!(labels, ["early1:ok:5", "early2:ok:5", "late1:ok:5", "late2:ok:5"]);
}

#[test]
fn callbacks_interleave_with_other_queued_work_in_fifo_order() {
    let sched = collecting_scheduler();
    let state: CompletionState<i32, String> = CompletionState::new(sched.clone());
    let order = Rc::new(RefCell::new(Vec::new()));

    let sink = Rc::clone(&order);
    state.subscribe(move |_, _| sink.borrow_mut().push("subscriber"));
    let sink = Rc::clone(&order);
    sched.enqueue(Box::new(move || sink.borrow_mut().push("other task")));
    state.complete(1);
    let sink = Rc::clone(&order);
    sched.enqueue(Box::new(move || sink.borrow_mut().push("after settle")));

    sched.run_until_idle();
    assert_eq!(*order.borrow(), ["other task", "subscriber", "after settle"]);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[test]
fn unsubscribe_removes_only_the_target() {
    let sched = collecting_scheduler();
    let state: CompletionState<i32, String> = CompletionState::new(sched.clone());
    let log: Log = Rc::default();

    let keep1 = state.subscribe(record(&log, "keep1"));
    let drop_me = state.subscribe(record(&log, "drop"));
    let keep2 = state.subscribe(record(&log, "keep2"));
    assert!(state.unsubscribe(drop_me));
    assert_eq!(state.subscriber_count(), 2);

    state.complete(9);
    sched.run_until_idle();
    let ids: Vec<_> = log.borrow().iter().map(|(_, id)| *id).collect();
    assert_eq!(ids, [keep1, keep2]);
}

#[test]
fn unsubscribe_of_foreign_or_fired_ids_is_a_noop() {
    let sched = collecting_scheduler();
    let state: CompletionState<i32, String> = CompletionState::new(sched.clone());
    let id = state.subscribe(|_, _| {});
    state.complete(0);
    sched.run_until_idle();
    assert!(!state.unsubscribe(id));

    // An id this state never issued.
    let other: CompletionState<i32, String> = CompletionState::new(sched.clone());
    let foreign = (0..5).map(|_| other.subscribe(|_, _| {})).last().unwrap();
    assert!(!state.unsubscribe(foreign));
}

// ---------------------------------------------------------------------------
// Re-entrancy
// ---------------------------------------------------------------------------

#[test]
fn callback_may_subscribe_to_the_same_state() {
    let sched = collecting_scheduler();
    let state: CompletionState<i32, String> = CompletionState::new(sched.clone());
    let log: Log = Rc::default();

    let handle = state.clone();
    let inner_log = Rc::clone(&log);
    state.subscribe(move |_, _| {
        handle.subscribe(record(&inner_log, "nested"));
    });
    state.complete(3);

    assert_eq!(sched.run_until_idle(), 2);
    assert_eq!(log.borrow()[0].0, "nested:ok:3");
}

#[test]
fn callback_may_settle_a_downstream_state() {
    let sched = collecting_scheduler();
    let upstream: CompletionState<i32, String> = CompletionState::new(sched.clone());
    let downstream: CompletionState<i32, String> = CompletionState::new(sched.clone());
    let log: Log = Rc::default();

    downstream.subscribe(record(&log, "down"));
    let producer = downstream.clone();
    upstream.subscribe(move |outcome, _| match outcome {
        Ok(v) => producer.complete(v * 2),
        Err(e) => producer.error(e.clone()),
    });

    upstream.complete(21);
    sched.run_until_idle();
    assert_eq!(log.borrow()[0].0, "down:ok:42");
    assert_eq!(downstream.status(), Status::Completed);
}

#[test]
fn subscriber_holding_a_handle_keeps_state_alive_until_settled() {
    let sched = collecting_scheduler();
    let state: CompletionState<i32, String> = CompletionState::new(sched.clone());
    let handle = state.clone();
    state.subscribe(move |_, _| drop(handle));
    state.error("observed".into());
    drop(state);
    sched.run_until_idle();
    assert!(sched.take_unhandled().is_empty());
}

// ---------------------------------------------------------------------------
// Handled flag
// ---------------------------------------------------------------------------

#[test]
fn subscribing_marks_handled_even_if_callback_ignores_error() {
    let sched = collecting_scheduler();
    {
        let state: CompletionState<i32, String> = CompletionState::new(sched.clone());
        state.error("ignored by callback".into());
        state.subscribe(|_, _| {});
        sched.run_until_idle();
    }
    assert!(sched.take_unhandled().is_empty());
}

#[test]
fn unsubscribe_does_not_unmark_handled() {
    let sched = collecting_scheduler();
    {
        let state: CompletionState<i32, String> = CompletionState::new(sched.clone());
        let id = state.subscribe(|_, _| {});
        state.unsubscribe(id);
        state.error("cancelled interest".into());
    }
    assert!(sched.take_unhandled().is_empty());
}

#[test]
fn anyhow_alias_carries_errors_through() {
    let sched = collecting_scheduler();
    let state: Completion<u8> = Completion::new(sched.clone());
    let seen = Rc::new(RefCell::new(String::new()));
    let sink = Rc::clone(&seen);
    state.subscribe(move |outcome, _| {
        if let Err(err) = outcome {
            *sink.borrow_mut() = err.to_string();
        }
    });
    state.error(anyhow::anyhow!("socket closed"));
    sched.run_until_idle();
    assert_eq!(*seen.borrow(), "socket closed");
}

#[test]
fn is_complete_flips_once_and_stays() {
    let sched = collecting_scheduler();
    let state: CompletionState<i32, String> = CompletionState::new(sched.clone());
    assert!(!state.is_complete());
    state.complete(1);
    for _ in 0..3 {
        assert!(state.is_complete());
        sched.run_until_idle();
    }
}

// ---------------------------------------------------------------------------
// Panic policy
// ---------------------------------------------------------------------------

#[test]
fn panic_policy_panics_when_unobserved_failure_is_dropped() {
    let sched = Rc::new(LocalScheduler::with_policy(UnhandledPolicy::Panic));
    let payload = catch_unwind(AssertUnwindSafe(|| {
        let state: CompletionState<i32, String> = CompletionState::new(sched.clone());
        state.error("x".to_string());
    }))
    .unwrap_err();

    let message = payload.downcast_ref::<String>().expect("formatted panic message");
    assert_eq!(
        *message,
        format!(
            "unhandled completion error ({}): \"x\"",
            std::any::type_name::<String>()
        )
    );
    assert!(sched.take_unhandled().is_empty());
}

#[test]
fn panic_policy_logs_instead_of_panicking_while_unwinding() {
    let sched = Rc::new(LocalScheduler::with_policy(UnhandledPolicy::Panic));
    let payload = catch_unwind(AssertUnwindSafe(|| {
        let state: CompletionState<i32, String> = CompletionState::new(sched.clone());
        state.error("x".to_string());
        panic!("outer");
    }))
    .unwrap_err();

    // A second panic from the drop would abort instead of reaching here.
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"outer"));
}
