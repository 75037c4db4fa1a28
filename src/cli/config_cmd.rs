//! Config CLI subcommands: show, validate.

use std::path::Path;

use crate::config::load_config_file;

/// Print the parsed config file back as TOML.
///
/// Returns 0 on success, 1 if the file cannot be read or parsed.
pub fn run_show(path: &Path) -> i32 {
    let result = load_config_file(path).and_then(|cfg| cfg.to_toml());
    match result {
        Ok(text) => {
            print!("{text}");
            0
        }
        Err(e) => {
            eprintln!("ERROR: {e}");
            1
        }
    }
}

/// Resolve every task and report what would be executed.
///
/// Returns 0 if all tasks are valid, 1 otherwise.
pub fn run_validate(path: &Path) -> i32 {
    let cfg = match load_config_file(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return 1;
        }
    };
    if cfg.tasks.is_empty() {
        eprintln!("WARNING: no tasks configured");
    }
    match cfg.task_configs() {
        Ok(tasks) => {
            for task in &tasks {
                println!(
                    "{}: argv={:?} timeout={}s",
                    task.identity,
                    task.argv,
                    task.timeout.as_secs_f64()
                );
            }
            println!("Configuration is valid.");
            0
        }
        Err(e) => {
            eprintln!("ERROR: {e}");
            1
        }
    }
}
