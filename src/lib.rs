//! asub-exec
//!
//! Delegates one computation at a time to an external program. The host
//! hands over up to 21 typed array inputs and a schema of 21 expected
//! outputs; the child reads them from stdin and writes its answer to stdout
//! in the same framed binary format. Every exchange runs under a wall-clock
//! deadline, and a child that overstays is terminated with SIGTERM, then
//! SIGKILL.
//!
//! # Layers
//!
//! - [`wire`]: frame encode/decode, no I/O
//! - [`transport`]: non-blocking pipe I/O under a deadline and shutdown token
//! - [`supervisor`]: fork/exec, pipe plumbing, staged termination
//! - [`exchange`]: one request/response cycle
//! - [`session`]: one worker thread per configured task

pub mod cli;
pub mod config;
pub mod error;
pub mod exchange;
pub mod field;
pub mod session;
pub mod supervisor;
pub mod telemetry;
pub mod transport;
pub mod wire;

pub use config::{ConfigStore, TaskConfig};
pub use error::ExecError;
pub use exchange::{CompletionStatus, Exchange, ExchangeOutcome};
pub use field::{ExchangeFields, Field, FieldProvider, FieldSet, FieldValue, OutputSpec};
pub use session::{CompletionHook, ExchangeResult, SessionError, SessionManager};
pub use wire::TypeTag;
