//! `run` subcommand: one exchange for one configured task.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::warn;

use super::{error_json, option_value, outputs_to_json, parse_inputs, parse_outputs, CliError};
use crate::config::load_config_file;
use crate::field::ExchangeFields;
use crate::session::SessionManager;
use crate::telemetry::{init_logging, init_metrics};

/// Run the subcommand and print a JSON report to stdout.
///
/// Returns 0 when the exchange succeeded, 1 when it failed and 2 on usage or
/// configuration errors.
pub async fn run(args: &[String]) -> i32 {
    match execute(args).await {
        Ok((report, success)) => {
            println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
            if success {
                0
            } else {
                1
            }
        }
        Err(e) => {
            println!("{}", error_json(&e));
            2
        }
    }
}

async fn execute(args: &[String]) -> Result<(Value, bool), CliError> {
    let config_path = option_value(args, "--config").ok_or(CliError::MissingOption("--config"))?;
    let task = option_value(args, "--task")
        .ok_or(CliError::MissingOption("--task"))?
        .to_string();

    let cfg = load_config_file(Path::new(config_path))?;
    let log = init_logging(&cfg.logging)?;
    if let Some(level) = option_value(args, "--log-level") {
        log.set_level(level)?;
    }
    init_metrics();

    let task_config = cfg.task(&task)?;
    let inputs = parse_inputs(option_value(args, "--inputs").unwrap_or("{}"))?;
    let outputs = parse_outputs(option_value(args, "--outputs").unwrap_or("{}"))?;

    let manager = Arc::new(SessionManager::new(vec![task_config], None)?);
    let token = manager.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, shutting down");
            token.cancel();
        }
    });

    manager.trigger(&task, ExchangeFields::new(inputs, outputs))?;

    let waiter = manager.clone();
    let name = task.clone();
    let result = tokio::task::spawn_blocking(move || waiter.wait_result(&name, None))
        .await
        .map_err(|e| CliError::Join(e.to_string()))??;
    let Some(result) = result else {
        return Err(CliError::Join("no result was produced".into()));
    };

    let outcome = &result.outcome;
    let report = json!({
        "task": task,
        "exchange_id": outcome.id.to_string(),
        "status": outcome.status,
        "exit_code": outcome.exit_code,
        "error": outcome.error.as_ref().map(|e| e.to_string()),
        "warnings": outcome.warnings().map(|w| w.to_string()).collect::<Vec<_>>(),
        "elapsed_ms": outcome.elapsed.as_millis() as u64,
        "outputs": outputs_to_json(&result.fields.outputs)?,
        "metrics": manager.metrics(),
    });
    Ok((report, outcome.is_success()))
}
