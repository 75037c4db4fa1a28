//! Fuzz target for request frame decoding, as a child program does it.

#![no_main]

use asub_exec::wire::child::echo_outputs;
use asub_exec::wire::decode_request;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = decode_request(data) {
        let _ = echo_outputs(&request);
    }
});
