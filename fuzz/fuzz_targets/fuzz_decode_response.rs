//! Fuzz target for response frame decoding.
//!
//! Arbitrary bytes decoded against a fixed output schema must never panic
//! and never write past a destination field.

#![no_main]

use asub_exec::field::{ExchangeFields, Field};
use asub_exec::wire::{decode_response, TypeTag};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut fields = ExchangeFields::default();
    let _ = fields.outputs.set(0, Field::new(TypeTag::Long, 4));
    let _ = fields.outputs.set(1, Field::new(TypeTag::String, 2));
    let _ = fields.outputs.set(20, Field::new(TypeTag::Double, 1));

    if decode_response(data, &mut fields).is_ok() {
        assert_eq!(fields.outputs.get(0).map(|f| f.data().len()), Some(16));
        assert_eq!(fields.outputs.get(1).map(|f| f.data().len()), Some(80));
    }
});
