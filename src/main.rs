//! asub-exec entry point.
//!
//! ## CLI Subcommands
//!
//! - `asub-exec run --config <file> --task <name> [--inputs <json>] [--outputs <json>] [--log-level <filter>]`
//! - `asub-exec config show|validate --config <file>`
//! - `asub-exec version`
//! - `asub-exec help`

use std::path::Path;
use std::process::ExitCode;

use asub_exec::cli::{config_cmd, option_value, run_cmd};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    match command {
        "run" => {
            let code = run_cmd::run(&args[2..]).await;
            ExitCode::from(code as u8)
        }
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            let Some(path) = option_value(&args, "--config") else {
                eprintln!("Missing required option --config");
                print_command_help("config");
                return ExitCode::from(2u8);
            };
            let code = match subcommand {
                "show" => config_cmd::run_show(Path::new(path)),
                "validate" => config_cmd::run_validate(Path::new(path)),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    return ExitCode::FAILURE;
                }
            };
            ExitCode::from(code as u8)
        }
        "help" | "--help" | "-h" => {
            if let Some(subcommand) = args.get(2) {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("asub-exec {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "asub-exec v{}

USAGE:
    asub-exec <COMMAND> [OPTIONS]

COMMANDS:
    run         Run one exchange for a configured task
    config      Show or validate a config file
    version     Print version
    help        Print this message, or help for a command

Run 'asub-exec help <COMMAND>' for details.",
        version
    );
}

fn print_command_help(command: &str) {
    match command {
        "run" => eprintln!(
            "asub-exec run --config <file> --task <name> [OPTIONS]

Spawns the task's program, sends the inputs, decodes the outputs and prints
a JSON report (status, exit code, outputs, metrics).

OPTIONS:
    --inputs <json>       Input fields, e.g. '{{\"A\": {{\"type\": \"LONG\", \"values\": [1, 2]}}}}'
    --outputs <json>      Output schema, e.g. '{{\"VALA\": {{\"type\": \"LONG\", \"count\": 2}}}}'
    --log-level <filter>  Override the configured log filter

EXIT CODES:
    0  exchange succeeded
    1  exchange failed
    2  usage or configuration error"
        ),
        "config" => eprintln!(
            "asub-exec config <show|validate> --config <file>

    show       Print the parsed config file
    validate   Resolve every task and report problems"
        ),
        _ => print_usage(),
    }
}
