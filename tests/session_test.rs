//! Session manager: per-task workers, trigger/collect, shutdown.

#![cfg(unix)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use asub_exec::telemetry::{EXCHANGES_TOTAL, EXCHANGE_FAILURES_TOTAL, TIMEOUTS_TOTAL};
use asub_exec::{
    CompletionHook, CompletionStatus, ExchangeFields, Field, FieldValue, SessionError,
    SessionManager, TaskConfig, TypeTag,
};

const ECHO: &str = env!("CARGO_BIN_EXE_asub-exec-echo");

fn task(name: &str, argv: &[&str], timeout: Duration) -> TaskConfig {
    TaskConfig::new(name, argv.iter().map(|s| s.to_string()).collect(), timeout)
}

fn doubles(values: Vec<f64>) -> ExchangeFields {
    let value = FieldValue::Double(values);
    let mut fields = ExchangeFields::default();
    fields.inputs.set(0, Field::from_value(&value).unwrap()).unwrap();
    fields.outputs.set(0, Field::new(TypeTag::Double, value.len() as u32)).unwrap();
    fields
}

fn manager(tasks: Vec<TaskConfig>) -> SessionManager {
    SessionManager::new(tasks, None).unwrap()
}

// =============================================================================
// Trigger and collect
// =============================================================================

#[test]
fn triggered_exchange_delivers_outputs() {
    let sessions = manager(vec![task("echo", &[ECHO], Duration::from_secs(10))]);

    sessions.trigger("echo", doubles(vec![1.5, -2.0])).unwrap();
    let result = sessions
        .wait_result("echo", Some(Duration::from_secs(10)))
        .unwrap()
        .expect("exchange finished");

    assert_eq!(result.outcome.status, CompletionStatus::Success, "{:?}", result.outcome.error);
    assert_eq!(
        result.fields.outputs.get(0).unwrap().value().unwrap(),
        FieldValue::Double(vec![1.5, -2.0])
    );
    assert!(!sessions.is_busy("echo").unwrap());
}

#[test]
fn task_can_run_again_after_collecting() {
    let sessions = manager(vec![task("echo", &[ECHO], Duration::from_secs(10))]);

    for round in 0..3 {
        sessions.trigger("echo", doubles(vec![round as f64])).unwrap();
        let result = sessions.wait_result("echo", None).unwrap().unwrap();
        assert!(result.outcome.is_success());
    }

    let snapshot = sessions.metrics();
    assert_eq!(snapshot.counter(EXCHANGES_TOTAL), 3);
    assert_eq!(snapshot.counter(EXCHANGE_FAILURES_TOTAL), 0);
}

#[test]
fn second_trigger_while_running_is_busy() {
    let sessions = manager(vec![task("slow", &["sleep", "30"], Duration::from_millis(500))]);

    sessions.trigger("slow", doubles(vec![1.0])).unwrap();
    let err = sessions.trigger("slow", doubles(vec![2.0])).unwrap_err();
    assert!(matches!(err, SessionError::Busy(ref t) if t == "slow"));
    assert!(sessions.is_busy("slow").unwrap());

    let result = sessions.wait_result("slow", None).unwrap().unwrap();
    assert!(result.outcome.timed_out());
    assert_eq!(sessions.metrics().counter(TIMEOUTS_TOTAL), 1);
}

#[test]
fn tasks_run_independently() {
    let sessions = manager(vec![
        task("slow", &["sleep", "30"], Duration::from_secs(2)),
        task("fast", &[ECHO], Duration::from_secs(10)),
    ]);

    sessions.trigger("slow", doubles(vec![1.0])).unwrap();
    sessions.trigger("fast", doubles(vec![2.0])).unwrap();

    let fast = sessions.wait_result("fast", Some(Duration::from_secs(1))).unwrap();
    assert!(fast.is_some_and(|r| r.outcome.is_success()));
    assert!(sessions.is_busy("slow").unwrap());
}

#[test]
fn wait_without_trigger_returns_nothing() {
    let sessions = manager(vec![task("echo", &[ECHO], Duration::from_secs(1))]);
    assert!(sessions.wait_result("echo", None).unwrap().is_none());
    assert!(sessions.poll_result("echo").unwrap().is_none());
}

#[test]
fn wait_times_out_while_exchange_runs() {
    let sessions = manager(vec![task("slow", &["sleep", "30"], Duration::from_secs(5))]);
    sessions.trigger("slow", doubles(vec![1.0])).unwrap();

    let start = Instant::now();
    let result = sessions.wait_result("slow", Some(Duration::from_millis(100))).unwrap();
    assert!(result.is_none());
    assert!(start.elapsed() < Duration::from_secs(2));
}

// =============================================================================
// Errors
// =============================================================================

#[test]
fn unknown_task_is_rejected() {
    let sessions = manager(vec![task("echo", &[ECHO], Duration::from_secs(1))]);
    assert!(matches!(
        sessions.trigger("nope", ExchangeFields::default()),
        Err(SessionError::UnknownTask(_))
    ));
    assert!(matches!(sessions.is_busy("nope"), Err(SessionError::UnknownTask(_))));
}

#[test]
fn duplicate_task_names_are_rejected() {
    let result = SessionManager::new(
        vec![
            task("same", &[ECHO], Duration::from_secs(1)),
            task("same", &[ECHO], Duration::from_secs(1)),
        ],
        None,
    );
    assert!(matches!(result, Err(SessionError::DuplicateTask(_))));
}

// =============================================================================
// Hook and shutdown
// =============================================================================

#[test]
fn completion_hook_sees_every_exchange() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let hook: Arc<dyn CompletionHook> =
        Arc::new(move |task: &str, status: CompletionStatus, exit_code: i32| {
            assert_eq!(task, "echo");
            assert_eq!(status, CompletionStatus::Success);
            assert_eq!(exit_code, 0);
            seen.fetch_add(1, Ordering::SeqCst);
        });

    let mut sessions = SessionManager::new(
        vec![task("echo", &[ECHO], Duration::from_secs(10))],
        Some(hook),
    )
    .unwrap();
    sessions.trigger("echo", doubles(vec![4.0])).unwrap();
    sessions.wait_result("echo", None).unwrap().unwrap();
    // The hook runs after the result is published; joining settles it.
    sessions.shutdown();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn shutdown_cancels_running_exchange() {
    let mut sessions = manager(vec![task("slow", &["sleep", "30"], Duration::from_secs(60))]);
    sessions.trigger("slow", doubles(vec![1.0])).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    let start = Instant::now();
    sessions.shutdown();
    assert!(start.elapsed() < Duration::from_secs(3));
    assert!(!sessions.is_running());

    let result = sessions.poll_result("slow").unwrap().unwrap();
    assert!(result.outcome.cancelled());
    assert!(matches!(
        sessions.trigger("slow", doubles(vec![1.0])),
        Err(SessionError::ShutDown)
    ));
}

#[test]
fn external_token_cancel_stops_workers() {
    let mut sessions = manager(vec![task("echo", &[ECHO], Duration::from_secs(1))]);
    sessions.shutdown_token().cancel();
    assert!(!sessions.is_running());

    let start = Instant::now();
    sessions.shutdown();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(matches!(
        sessions.wait_result("echo", None),
        Err(SessionError::ShutDown)
    ));
}
