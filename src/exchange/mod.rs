//! One request/response cycle with one child invocation.
//!
//! ```text
//! NotStarted -> Spawning -> WritingInputs -> ClosedInput -> ReadingOutputs
//!            -> WaitingChild -> Done
//! ```
//!
//! A spawn failure goes straight to `Done`. A write failure skips the read
//! phase. Once a child exists it is reaped exactly once, whatever happened
//! on the pipes.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::TaskConfig;
use crate::error::ExecError;
use crate::field::FieldProvider;
use crate::supervisor::{
    ProcessSupervisor, ReapOutcome, ReapStatus, EXIT_EXEC_FAILURE, EXIT_SETUP_FAILURE,
};
use crate::telemetry::{record_exchange_finished, record_exchange_started, ExchangeSpan, SpanExt};
use crate::transport::{send_all, DeadlineReader, IoContext};
use crate::wire::{encode_request, DecodeError, DecodeReport, FieldMismatch, ResponseDecoder, MIN_RESPONSE_FIELD_BYTES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExchangeState {
    NotStarted,
    Spawning,
    WritingInputs,
    ClosedInput,
    ReadingOutputs,
    WaitingChild,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Success,
    Failure,
}

impl CompletionStatus {
    pub fn is_success(self) -> bool {
        self == CompletionStatus::Success
    }
}

/// Result of one exchange.
#[derive(Debug)]
pub struct ExchangeOutcome {
    pub id: Uuid,
    pub status: CompletionStatus,
    pub exit_code: i32,
    /// Child pid, if one was spawned.
    pub pid: Option<i32>,
    /// First fatal error, if any.
    pub error: Option<ExecError>,
    /// Per-field disagreements recovered during decode.
    pub mismatches: Vec<FieldMismatch>,
    pub bytes_read: u64,
    pub field_bytes: u64,
    /// How the child was reaped; `None` when no child was spawned.
    pub reap: Option<ReapStatus>,
    pub elapsed: Duration,
}

impl ExchangeOutcome {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The child had to be terminated or the I/O deadline expired.
    pub fn timed_out(&self) -> bool {
        self.reap == Some(ReapStatus::Terminated)
            || self.error.as_ref().is_some_and(ExecError::is_timeout)
    }

    pub fn cancelled(&self) -> bool {
        self.reap == Some(ReapStatus::Cancelled)
            || self.error.as_ref().is_some_and(ExecError::is_cancelled)
    }

    /// Non-fatal mismatches as errors, for uniform reporting.
    pub fn warnings(&self) -> impl Iterator<Item = ExecError> + '_ {
        self.mismatches.iter().map(ExecError::from)
    }
}

/// Drives one exchange for one task.
pub struct Exchange<'a> {
    config: &'a TaskConfig,
    supervisor: &'a dyn ProcessSupervisor,
    shutdown: CancellationToken,
    state: ExchangeState,
}

impl<'a> Exchange<'a> {
    pub fn new(
        config: &'a TaskConfig,
        supervisor: &'a dyn ProcessSupervisor,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            supervisor,
            shutdown,
            state: ExchangeState::NotStarted,
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    fn enter(&mut self, state: ExchangeState) {
        debug!(from = ?self.state, to = ?state, "exchange state");
        self.state = state;
    }

    /// Run the exchange to completion, writing outputs into `fields`.
    pub fn run<P: FieldProvider + ?Sized>(&mut self, fields: &mut P) -> ExchangeOutcome {
        let task = self.config.identity.as_str();
        let id = Uuid::new_v4();
        let span = ExchangeSpan::new(task, &id);
        let _guard = span.enter();
        let start = Instant::now();
        record_exchange_started(task);

        let mut outcome = ExchangeOutcome {
            id,
            status: CompletionStatus::Failure,
            exit_code: EXIT_SETUP_FAILURE,
            pid: None,
            error: None,
            mismatches: Vec::new(),
            bytes_read: 0,
            field_bytes: 0,
            reap: None,
            elapsed: Duration::ZERO,
        };

        self.enter(ExchangeState::Spawning);
        match self.drive(fields, &mut outcome) {
            Ok(()) => {}
            Err(e) => {
                error!(task = %task, error = %e, "exchange aborted before spawn");
                outcome.error = Some(e);
            }
        }
        self.enter(ExchangeState::Done);

        outcome.status = if outcome.error.is_none() {
            CompletionStatus::Success
        } else {
            CompletionStatus::Failure
        };
        outcome.elapsed = start.elapsed();

        span.record_result(&outcome.error.as_ref().map_or(Ok(()), Err));
        span.record_exit(outcome.exit_code);
        span.record("elapsed_ms", outcome.elapsed.as_millis() as u64);
        record_exchange_finished(task, outcome.is_success(), outcome.timed_out(), outcome.elapsed);
        info!(
            task = %task,
            status = ?outcome.status,
            exit_code = outcome.exit_code,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "exchange complete"
        );
        outcome
    }

    /// Pre-spawn failures are returned; everything after the spawn is
    /// recorded on `outcome` directly.
    fn drive<P: FieldProvider + ?Sized>(
        &mut self,
        fields: &mut P,
        outcome: &mut ExchangeOutcome,
    ) -> Result<(), ExecError> {
        let request = encode_request(fields)?;
        let mut child = self.supervisor.spawn(&self.config.argv)?;
        outcome.pid = Some(child.pid);
        tracing::Span::current().record_pid(child.pid);

        // The deadline covers the pipes and starts once the child exists.
        let ctx = IoContext::new(self.config.timeout, self.shutdown.clone());

        self.enter(ExchangeState::WritingInputs);
        let written = send_all(&ctx, &mut child.input, &request);
        self.enter(ExchangeState::ClosedInput);
        drop(child.input);

        let mut report = DecodeReport::default();
        match written {
            Ok(()) => {
                debug!(bytes = request.len(), "request sent");
                self.enter(ExchangeState::ReadingOutputs);
                let mut decoder = ResponseDecoder::new();
                let mut source = DeadlineReader::new(&ctx, &mut child.output);
                let decoded = decoder.decode(&mut source, fields);
                report = decoder.into_report();
                if let Err(e) = decoded {
                    let e = match e {
                        DecodeError::Protocol(p) => ExecError::ProtocolDecode(p),
                        DecodeError::Source(t) => ExecError::from(t),
                    };
                    error!(error = %e, bytes_read = report.total_bytes, "reading outputs failed");
                    outcome.error = Some(e);
                }
            }
            Err(e) => {
                let e = ExecError::from(e);
                error!(error = %e, "writing inputs failed");
                outcome.error = Some(e);
            }
        }
        drop(child.output);

        self.enter(ExchangeState::WaitingChild);
        let reap = self
            .supervisor
            .terminate_and_reap(child.pid, &self.config.termination, &self.shutdown);
        self.settle(outcome, report, reap);
        Ok(())
    }

    fn settle(&self, outcome: &mut ExchangeOutcome, report: DecodeReport, reap: ReapOutcome) {
        outcome.exit_code = reap.exit_code;
        outcome.reap = Some(reap.status);
        outcome.bytes_read = report.total_bytes;
        outcome.field_bytes = report.field_bytes;
        outcome.mismatches = report.mismatches;

        if outcome.error.is_none() && report.field_bytes <= MIN_RESPONSE_FIELD_BYTES {
            outcome.error = Some(ExecError::InsufficientData(report.field_bytes));
        }
        match reap.status {
            ReapStatus::Anomaly if outcome.error.is_none() => {
                outcome.error = Some(ExecError::WaitAnomaly);
            }
            ReapStatus::Cancelled if outcome.error.is_none() => {
                outcome.error = Some(ExecError::TransportCancelled);
            }
            ReapStatus::Exited
                if outcome.error.is_some()
                    && matches!(reap.exit_code, EXIT_SETUP_FAILURE | EXIT_EXEC_FAILURE) =>
            {
                warn!(exit_code = reap.exit_code, program = %self.config.program(), "child failed to launch");
                outcome.error = Some(ExecError::ChildLaunch(reap.exit_code));
            }
            _ => {}
        }
    }
}

/// Run one exchange with a fresh [`Exchange`].
pub fn run_exchange<P: FieldProvider + ?Sized>(
    config: &TaskConfig,
    supervisor: &dyn ProcessSupervisor,
    shutdown: &CancellationToken,
    fields: &mut P,
) -> ExchangeOutcome {
    Exchange::new(config, supervisor, shutdown.clone()).run(fields)
}
