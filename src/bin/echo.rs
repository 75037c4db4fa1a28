//! Conforming child program that echoes inputs back as outputs.
//!
//! Output slot `j` repeats input `j` when the requested kind matches, and is
//! left empty otherwise. Exits 0 on success, 1 on any read or write error.

use std::io::{stdin, stdout};
use std::process::ExitCode;

use asub_exec::wire::child::{echo_outputs, read_request, write_response};

fn main() -> ExitCode {
    let request = match read_request(&mut stdin().lock()) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("asub-exec-echo: {e}");
            return ExitCode::FAILURE;
        }
    };
    let outputs = echo_outputs(&request);
    match write_response(&mut stdout().lock(), &outputs) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("asub-exec-echo: {e}");
            ExitCode::FAILURE
        }
    }
}
