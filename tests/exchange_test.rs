//! End-to-end exchanges against real child programs.

#![cfg(unix)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use asub_exec::error::ExecError;
use asub_exec::exchange::{run_exchange, CompletionStatus, Exchange, ExchangeState};
use asub_exec::field::{ExchangeFields, Field, FieldProvider, FieldValue};
use asub_exec::supervisor::{ReapStatus, UnixSupervisor, UnsupportedSupervisor, EXIT_TIMEOUT};
use asub_exec::wire::{ProtocolError, TypeTag};
use asub_exec::TaskConfig;
use tokio_util::sync::CancellationToken;
use tracing::field::{Field as TraceField, Visit};
use tracing::span::{Id, Record};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::Registry;

const ECHO: &str = env!("CARGO_BIN_EXE_asub-exec-echo");

fn task(argv: &[&str], timeout: Duration) -> TaskConfig {
    TaskConfig::new("test", argv.iter().map(|s| s.to_string()).collect(), timeout)
}

fn echo_fields() -> ExchangeFields {
    let mut fields = ExchangeFields::default();
    let inputs = [
        FieldValue::Long(vec![1, 2]),
        FieldValue::Float(vec![3.5]),
        FieldValue::String(vec!["hi".into()]),
    ];
    for (slot, value) in inputs.iter().enumerate() {
        fields.inputs.set(slot, Field::from_value(value).unwrap()).unwrap();
        fields.outputs.set(slot, Field::new(value.kind(), value.len() as u32)).unwrap();
    }
    fields
}

fn output(fields: &ExchangeFields, slot: usize) -> FieldValue {
    fields.outputs.get(slot).unwrap().value().unwrap()
}

// =============================================================================
// Success
// =============================================================================

#[test]
fn echo_child_roundtrips_values() {
    let config = task(&[ECHO], Duration::from_secs(10));
    let mut fields = echo_fields();

    let outcome = run_exchange(&config, &UnixSupervisor::new(), &CancellationToken::new(), &mut fields);

    assert_eq!(outcome.status, CompletionStatus::Success, "{:?}", outcome.error);
    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.mismatches.is_empty());
    assert!(outcome.pid.is_some());
    assert_eq!(output(&fields, 0), FieldValue::Long(vec![1, 2]));
    assert_eq!(output(&fields, 1), FieldValue::Float(vec![3.5]));
    assert_eq!(output(&fields, 2), FieldValue::String(vec!["hi".into()]));
}

#[test]
fn echo_child_mismatched_schema_is_reported_not_fatal() {
    let config = task(&[ECHO], Duration::from_secs(10));
    let mut fields = echo_fields();
    // Ask for DOUBLE where the input is FLOAT: the echo child answers with an
    // empty DOUBLE field.
    fields.outputs.set(1, Field::new(TypeTag::Double, 1)).unwrap();

    let outcome = run_exchange(&config, &UnixSupervisor::new(), &CancellationToken::new(), &mut fields);

    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(outcome.mismatches.len(), 1);
    assert!(outcome.warnings().all(|w| !w.is_fatal()));
    assert_eq!(output(&fields, 1), FieldValue::Double(vec![0.0]));
}

#[test]
fn exchange_ends_in_done_state() {
    let config = task(&[ECHO], Duration::from_secs(10));
    let supervisor = UnixSupervisor::new();
    let mut exchange = Exchange::new(&config, &supervisor, CancellationToken::new());
    assert_eq!(exchange.state(), ExchangeState::NotStarted);

    let mut fields = echo_fields();
    exchange.run(&mut fields);
    assert_eq!(exchange.state(), ExchangeState::Done);
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn silent_child_times_out_and_is_terminated() {
    let config = task(&["sleep", "30"], Duration::from_millis(300));
    let mut fields = echo_fields();

    let outcome = run_exchange(&config, &UnixSupervisor::new(), &CancellationToken::new(), &mut fields);

    assert_eq!(outcome.status, CompletionStatus::Failure);
    assert_eq!(outcome.exit_code, EXIT_TIMEOUT);
    assert!(outcome.timed_out());
    assert!(matches!(outcome.error, Some(ExecError::TransportTimeout)));
    assert!(outcome.elapsed < Duration::from_millis(300) + Duration::from_millis(2600));
}

#[test]
fn shutdown_mid_exchange_cancels_and_reaps() {
    let config = task(&["sleep", "30"], Duration::from_secs(60));
    let token = CancellationToken::new();
    let canceller = {
        let token = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            token.cancel();
        })
    };
    let mut fields = echo_fields();

    let outcome = run_exchange(&config, &UnixSupervisor::new(), &token, &mut fields);
    canceller.join().unwrap();

    assert_eq!(outcome.status, CompletionStatus::Failure);
    assert!(outcome.cancelled());
    assert_eq!(outcome.reap, Some(ReapStatus::Cancelled));
    // 60 s timeout means a 1 s poll interval.
    assert!(outcome.elapsed < Duration::from_secs(3));
}

#[test]
fn missing_program_is_a_launch_failure() {
    let config = task(&["/nonexistent/asub-exec-child"], Duration::from_secs(5));
    let mut fields = echo_fields();

    let outcome = run_exchange(&config, &UnixSupervisor::new(), &CancellationToken::new(), &mut fields);

    assert_eq!(outcome.status, CompletionStatus::Failure);
    assert_eq!(outcome.exit_code, 129);
    assert!(matches!(outcome.error, Some(ExecError::ChildLaunch(129))));
}

#[test]
fn child_without_answer_fails_with_its_exit_code() {
    let config = task(&["sh", "-c", "cat >/dev/null; exit 0"], Duration::from_secs(5));
    let mut fields = echo_fields();

    let outcome = run_exchange(&config, &UnixSupervisor::new(), &CancellationToken::new(), &mut fields);

    assert_eq!(outcome.status, CompletionStatus::Failure);
    assert_eq!(outcome.exit_code, 0);
    assert_eq!(outcome.bytes_read, 0);
}

#[test]
fn garbage_answer_is_a_protocol_error() {
    let config = task(
        &["sh", "-c", "cat >/dev/null; printf 'not-a-frame-at-all'"],
        Duration::from_secs(5),
    );
    let mut fields = echo_fields();

    let outcome = run_exchange(&config, &UnixSupervisor::new(), &CancellationToken::new(), &mut fields);

    assert_eq!(outcome.status, CompletionStatus::Failure);
    assert!(matches!(
        outcome.error,
        Some(ExecError::ProtocolDecode(ProtocolError::BadMagic(_)))
    ));
}

#[test]
fn spawn_failure_reports_setup_exit_code() {
    let config = task(&[ECHO], Duration::from_secs(5));
    let mut fields = echo_fields();

    let outcome = run_exchange(&config, &UnsupportedSupervisor, &CancellationToken::new(), &mut fields);

    assert_eq!(outcome.status, CompletionStatus::Failure);
    assert_eq!(outcome.exit_code, 128);
    assert!(outcome.pid.is_none());
    assert!(outcome.reap.is_none());
    assert!(matches!(outcome.error, Some(ExecError::Spawn(_))));
}

struct WideFloats(ExchangeFields);

impl FieldProvider for WideFloats {
    fn input(&self, index: usize) -> &Field {
        self.0.input(index)
    }
    fn output(&self, index: usize) -> &Field {
        self.0.output(index)
    }
    fn output_mut(&mut self, index: usize) -> &mut Field {
        self.0.output_mut(index)
    }
    fn element_size(&self, kind: TypeTag) -> usize {
        if kind == TypeTag::Float {
            8
        } else {
            kind.element_size()
        }
    }
}

#[test]
fn host_size_disagreement_refuses_to_spawn() {
    let config = task(&[ECHO], Duration::from_secs(5));
    let mut fields = WideFloats(echo_fields());

    let outcome = run_exchange(&config, &UnixSupervisor::new(), &CancellationToken::new(), &mut fields);

    assert_eq!(outcome.status, CompletionStatus::Failure);
    assert!(outcome.pid.is_none());
    assert!(matches!(
        outcome.error,
        Some(ExecError::ProtocolDecode(ProtocolError::ElementSizeMismatch { .. }))
    ));
}

// =============================================================================
// Span fields
// =============================================================================

/// Collects every value recorded on a span after creation.
#[derive(Clone, Default)]
struct RecordedFields(Arc<Mutex<Vec<(String, String)>>>);

impl RecordedFields {
    fn value(&self, name: &str) -> Option<String> {
        let fields = self.0.lock().unwrap();
        fields.iter().rev().find(|(k, _)| k == name).map(|(_, v)| v.clone())
    }
}

impl Visit for RecordedFields {
    fn record_str(&mut self, field: &TraceField, value: &str) {
        self.0.lock().unwrap().push((field.name().to_string(), value.to_string()));
    }

    fn record_debug(&mut self, field: &TraceField, value: &dyn std::fmt::Debug) {
        self.0.lock().unwrap().push((field.name().to_string(), format!("{value:?}")));
    }
}

impl<S: tracing::Subscriber> Layer<S> for RecordedFields {
    fn on_record(&self, _id: &Id, values: &Record<'_>, _ctx: Context<'_, S>) {
        values.record(&mut self.clone());
    }
}

fn run_recorded(
    config: &TaskConfig,
    supervisor: &dyn asub_exec::supervisor::ProcessSupervisor,
) -> (asub_exec::exchange::ExchangeOutcome, RecordedFields) {
    let recorded = RecordedFields::default();
    let subscriber = Registry::default().with(recorded.clone());
    let mut fields = echo_fields();
    let outcome = tracing::subscriber::with_default(subscriber, || {
        run_exchange(config, supervisor, &CancellationToken::new(), &mut fields)
    });
    (outcome, recorded)
}

#[test]
fn failed_exchange_records_error_on_span() {
    let config = task(&[ECHO], Duration::from_secs(5));
    let (outcome, recorded) = run_recorded(&config, &UnsupportedSupervisor);

    assert!(!outcome.is_success());
    assert_eq!(recorded.value("status").as_deref(), Some("error"));
    assert_eq!(recorded.value("exit_code").as_deref(), Some("128"));
    let message = recorded.value("error.message").unwrap();
    assert_eq!(message, outcome.error.unwrap().to_string());
}

#[test]
fn successful_exchange_records_ok_on_span() {
    let config = task(&[ECHO], Duration::from_secs(10));
    let (outcome, recorded) = run_recorded(&config, &UnixSupervisor::new());

    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(recorded.value("status").as_deref(), Some("ok"));
    assert_eq!(recorded.value("exit_code").as_deref(), Some("0"));
    assert_eq!(recorded.value("pid"), outcome.pid.map(|p| p.to_string()));
    assert!(recorded.value("error.message").is_none());
}
