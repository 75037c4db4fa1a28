//! Helpers for child programs written in Rust.
//!
//! A child reads one request frame from stdin until the host closes the
//! pipe, computes its outputs and writes one response frame to stdout.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use thiserror::Error;

use super::{decode_request, encode_response, DecodedRequest, ProtocolError, FIELD_COUNT};
use crate::field::{Field, FieldError, FieldSet, FieldValue};

#[derive(Debug, Error)]
pub enum ChildError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Output error: {0}")]
    Field(#[from] FieldError),
}

/// Read and decode the whole request frame.
pub fn read_request<R: Read>(reader: &mut R) -> Result<DecodedRequest, ChildError> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    Ok(decode_request(&bytes)?)
}

/// Encode and write one response frame, then flush.
pub fn write_response<W: Write>(writer: &mut W, outputs: &FieldSet) -> Result<(), ChildError> {
    writer.write_all(&encode_response(outputs))?;
    writer.flush()?;
    Ok(())
}

/// Outputs that mirror the inputs slot by slot.
///
/// Output slot `j` carries input `j` when its kind matches the requested
/// schema; otherwise it is an empty field of the requested kind.
pub fn echo_outputs(request: &DecodedRequest) -> FieldSet {
    let mut outputs = FieldSet::new();
    for ((out, input), spec) in outputs
        .iter_mut()
        .zip(request.inputs.iter())
        .zip(request.output_schema.iter())
    {
        *out = if input.kind() == spec.kind {
            input.clone()
        } else {
            Field::new(spec.kind, 0)
        };
    }
    outputs
}

/// Outputs built from per-slot values, fitted to the requested schema.
///
/// Each value is converted element by element to the kind its slot asks for
/// and cut to the requested count. A slot with no value gets a single zero
/// element. Slots whose requested kind is NONE stay empty.
pub fn pack_outputs(
    request: &DecodedRequest,
    mut values: BTreeMap<usize, FieldValue>,
) -> Result<FieldSet, ChildError> {
    if let Some(slot) = values.keys().find(|slot| **slot >= FIELD_COUNT) {
        return Err(FieldError::SlotOutOfRange(*slot).into());
    }
    let mut outputs = FieldSet::new();
    for (slot, (out, spec)) in outputs
        .iter_mut()
        .zip(request.output_schema.iter())
        .enumerate()
    {
        let value = values.remove(&slot).unwrap_or(FieldValue::Double(vec![0.0]));
        let mut fitted = value.convert_to(spec.kind)?;
        fitted.truncate(spec.count as usize);
        *out = Field::from_value(&fitted)?;
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{ExchangeFields, FieldValue};
    use crate::wire::{encode_request, TypeTag};

    #[test]
    fn echo_honours_schema() {
        let mut fields = ExchangeFields::default();
        fields
            .inputs
            .set(0, Field::from_value(&FieldValue::Short(vec![7])).unwrap())
            .unwrap();
        fields
            .inputs
            .set(1, Field::from_value(&FieldValue::Short(vec![8])).unwrap())
            .unwrap();
        fields.outputs.set(0, Field::new(TypeTag::Short, 1)).unwrap();
        fields.outputs.set(1, Field::new(TypeTag::Double, 1)).unwrap();

        let bytes = encode_request(&fields).unwrap();
        let request = read_request(&mut bytes.as_slice()).unwrap();
        let outputs = echo_outputs(&request);

        assert_eq!(outputs.get(0).unwrap().value().unwrap(), FieldValue::Short(vec![7]));
        let second = outputs.get(1).unwrap();
        assert_eq!(second.kind(), TypeTag::Double);
        assert_eq!(second.declared_count(), 0);
    }

    fn request_for(outputs: &[(TypeTag, u32)]) -> DecodedRequest {
        let mut fields = ExchangeFields::default();
        for (slot, (kind, count)) in outputs.iter().enumerate() {
            fields.outputs.set(slot, Field::new(*kind, *count)).unwrap();
        }
        read_request(&mut encode_request(&fields).unwrap().as_slice()).unwrap()
    }

    #[test]
    fn pack_converts_to_requested_kinds() {
        let request = request_for(&[(TypeTag::Long, 3), (TypeTag::String, 1)]);
        let values = BTreeMap::from([
            (0, FieldValue::Double(vec![1.9, -2.0])),
            (1, FieldValue::UShort(vec![5, 6])),
        ]);

        let outputs = pack_outputs(&request, values).unwrap();

        assert_eq!(outputs.get(0).unwrap().value().unwrap(), FieldValue::Long(vec![1, -2]));
        assert_eq!(
            outputs.get(1).unwrap().value().unwrap(),
            FieldValue::String(vec!["5".into()])
        );
    }

    #[test]
    fn pack_fills_missing_slots_with_zero() {
        let request = request_for(&[(TypeTag::Short, 4), (TypeTag::None, 0)]);
        let outputs = pack_outputs(&request, BTreeMap::new()).unwrap();

        let first = outputs.get(0).unwrap();
        assert_eq!(first.kind(), TypeTag::Short);
        assert_eq!(first.value().unwrap(), FieldValue::Short(vec![0]));
        assert_eq!(outputs.get(1).unwrap().kind(), TypeTag::None);
        assert_eq!(outputs.get(1).unwrap().declared_count(), 0);
    }

    #[test]
    fn pack_rejects_bad_values() {
        let request = request_for(&[(TypeTag::UChar, 1)]);
        let unfit = BTreeMap::from([(0, FieldValue::Long(vec![300]))]);
        assert!(matches!(
            pack_outputs(&request, unfit),
            Err(ChildError::Field(FieldError::InvalidValue { kind: TypeTag::UChar, .. }))
        ));

        let stray = BTreeMap::from([(FIELD_COUNT, FieldValue::Long(vec![1]))]);
        assert!(matches!(
            pack_outputs(&request, stray),
            Err(ChildError::Field(FieldError::SlotOutOfRange(21)))
        ));
    }

    #[test]
    fn packed_outputs_encode_as_response() {
        let request = request_for(&[(TypeTag::Double, 2)]);
        let values = BTreeMap::from([(0, FieldValue::Float(vec![0.5, 1.5, 2.5]))]);
        let mut sink = Vec::new();
        write_response(&mut sink, &pack_outputs(&request, values).unwrap()).unwrap();
        assert_eq!(&sink[..8], b"asubExec");
    }

    #[test]
    fn write_response_emits_frame() {
        let mut sink = Vec::new();
        write_response(&mut sink, &FieldSet::new()).unwrap();
        assert_eq!(&sink[..8], b"asubExec");
        assert_eq!(&sink[sink.len() - 4..], b"eod\n");
    }
}
