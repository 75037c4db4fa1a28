//! Whole-frame encode/decode over byte slices.
//!
//! The host encodes requests and decodes responses; a conforming child does
//! the reverse. None of these functions touch I/O.

use super::stream::{DecodeReport, ResponseDecoder, SliceSource};
use super::{
    version_compatible, DecodeError, ProtocolError, TypeTag, FIELD_COUNT, FIELD_HEADER_SIZE,
    MAGIC, PROTOCOL_VERSION, TERMINATOR,
};
use crate::field::{Field, FieldProvider, FieldSet, OutputSpec};

/// A request as seen by the child.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRequest {
    pub inputs: FieldSet,
    pub output_schema: [OutputSpec; FIELD_COUNT],
}

fn check_element_size<P: FieldProvider + ?Sized>(fields: &P, kind: TypeTag) -> Result<(), ProtocolError> {
    let host = fields.element_size(kind);
    let wire = kind.element_size();
    if host != wire {
        return Err(ProtocolError::ElementSizeMismatch { kind, host, wire });
    }
    Ok(())
}

fn put_header(out: &mut Vec<u8>, kind: TypeTag, count: u32) {
    out.extend_from_slice(&kind.to_wire().to_ne_bytes());
    out.extend_from_slice(&count.to_ne_bytes());
}

fn put_field(out: &mut Vec<u8>, field: &Field) {
    put_header(out, field.kind(), field.declared_count());
    out.extend_from_slice(field.data());
}

fn frame_start(capacity: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(capacity);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&PROTOCOL_VERSION.to_ne_bytes());
    out
}

/// Encode the request frame: 21 inputs with data, then the 21-entry output
/// schema.
pub fn encode_request<P: FieldProvider + ?Sized>(fields: &P) -> Result<Vec<u8>, ProtocolError> {
    let mut payload = 0;
    for i in 0..FIELD_COUNT {
        check_element_size(fields, fields.input(i).kind())?;
        check_element_size(fields, fields.output(i).kind())?;
        payload += fields.input(i).data().len();
    }

    let capacity = MAGIC.len() + 4 + 2 * FIELD_COUNT * FIELD_HEADER_SIZE + payload + TERMINATOR.len();
    let mut out = frame_start(capacity);
    for i in 0..FIELD_COUNT {
        put_field(&mut out, fields.input(i));
    }
    for i in 0..FIELD_COUNT {
        let output = fields.output(i);
        put_header(&mut out, output.kind(), output.declared_count());
    }
    out.extend_from_slice(&TERMINATOR);
    Ok(out)
}

/// Encode a response frame from a full output set.
pub fn encode_response(outputs: &FieldSet) -> Vec<u8> {
    let payload: usize = outputs.iter().map(|f| f.data().len()).sum();
    let capacity = MAGIC.len() + 4 + FIELD_COUNT * FIELD_HEADER_SIZE + payload + TERMINATOR.len();
    let mut out = frame_start(capacity);
    for field in outputs.iter() {
        put_field(&mut out, field);
    }
    out.extend_from_slice(&TERMINATOR);
    out
}

fn read_preamble(src: &mut SliceSource<'_>) -> Result<(), ProtocolError> {
    let magic = src.take(MAGIC.len())?;
    if magic != MAGIC {
        let mut found = [0u8; 8];
        found.copy_from_slice(magic);
        return Err(ProtocolError::BadMagic(found));
    }
    let version = read_u32(src)?;
    if !version_compatible(version) {
        return Err(ProtocolError::VersionMismatch {
            found: version,
            expected: PROTOCOL_VERSION,
        });
    }
    Ok(())
}

fn read_terminator(src: &mut SliceSource<'_>) -> Result<(), ProtocolError> {
    let end = src.take(TERMINATOR.len())?;
    if end != TERMINATOR {
        let mut found = [0u8; 4];
        found.copy_from_slice(end);
        return Err(ProtocolError::BadTerminator(found));
    }
    if src.remaining() > 0 {
        return Err(ProtocolError::TrailingBytes(src.remaining()));
    }
    Ok(())
}

fn read_u32(src: &mut SliceSource<'_>) -> Result<u32, ProtocolError> {
    let raw = src.take(4)?;
    Ok(u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn read_header(src: &mut SliceSource<'_>, slot: usize) -> Result<(TypeTag, u32), ProtocolError> {
    let raw = src.take(2)?;
    let code = i16::from_ne_bytes([raw[0], raw[1]]);
    let kind = TypeTag::from_wire(code).ok_or(ProtocolError::UnknownType { slot, code })?;
    let count = read_u32(src)?;
    Ok((kind, count))
}

/// Decode a request frame (child side).
pub fn decode_request(bytes: &[u8]) -> Result<DecodedRequest, ProtocolError> {
    let mut src = SliceSource::new(bytes);
    read_preamble(&mut src)?;

    let mut inputs = FieldSet::new();
    for slot in 0..FIELD_COUNT {
        let (kind, count) = read_header(&mut src, slot)?;
        let len = u64::from(count) * kind.element_size() as u64;
        if len > src.remaining() as u64 {
            return Err(ProtocolError::Truncated {
                needed: usize::try_from(len - src.remaining() as u64).unwrap_or(usize::MAX),
            });
        }
        let mut field = Field::new(kind, count);
        field.data_mut().copy_from_slice(src.take(len as usize)?);
        if let Some(dest) = inputs.get_mut(slot) {
            *dest = field;
        }
    }

    let mut output_schema = [OutputSpec::default(); FIELD_COUNT];
    for (slot, spec) in output_schema.iter_mut().enumerate() {
        let (kind, count) = read_header(&mut src, slot)?;
        *spec = OutputSpec { kind, count };
    }

    read_terminator(&mut src)?;
    Ok(DecodedRequest { inputs, output_schema })
}

/// Decode a complete response frame into the outputs of `fields` (host side,
/// in-memory variant of the streaming decoder).
pub fn decode_response<P: FieldProvider + ?Sized>(
    bytes: &[u8],
    fields: &mut P,
) -> Result<DecodeReport, ProtocolError> {
    let mut src = SliceSource::new(bytes);
    let mut decoder = ResponseDecoder::new();
    decoder.decode(&mut src, fields).map_err(|e| match e {
        DecodeError::Protocol(p) | DecodeError::Source(p) => p,
    })?;
    if src.remaining() > 0 {
        return Err(ProtocolError::TrailingBytes(src.remaining()));
    }
    Ok(decoder.into_report())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{ExchangeFields, FieldValue};

    fn sample() -> ExchangeFields {
        let mut fields = ExchangeFields::default();
        fields
            .inputs
            .set(0, Field::from_value(&FieldValue::Long(vec![1, 2])).unwrap())
            .unwrap();
        fields
            .inputs
            .set(2, Field::from_value(&FieldValue::String(vec!["hi".into()])).unwrap())
            .unwrap();
        fields.outputs.set(0, Field::new(TypeTag::Long, 2)).unwrap();
        fields
    }

    #[test]
    fn request_layout() {
        let bytes = encode_request(&sample()).unwrap();
        assert_eq!(&bytes[..8], b"asubExec");
        assert_eq!(&bytes[8..12], &PROTOCOL_VERSION.to_ne_bytes());
        assert_eq!(&bytes[12..14], &5i16.to_ne_bytes());
        assert_eq!(&bytes[14..18], &2u32.to_ne_bytes());
        assert_eq!(&bytes[bytes.len() - 4..], b"eod\n");
        let expected = 12 + 42 * FIELD_HEADER_SIZE + 8 + 40 + 4;
        assert_eq!(bytes.len(), expected);
    }

    #[test]
    fn request_roundtrip() {
        let fields = sample();
        let decoded = decode_request(&encode_request(&fields).unwrap()).unwrap();
        assert_eq!(decoded.inputs, fields.inputs);
        assert_eq!(decoded.output_schema, fields.outputs.schema());
    }

    #[test]
    fn request_rejects_trailing_bytes() {
        let mut bytes = encode_request(&sample()).unwrap();
        bytes.push(0);
        assert_eq!(decode_request(&bytes), Err(ProtocolError::TrailingBytes(1)));
    }

    #[test]
    fn request_rejects_huge_count() {
        let mut bytes = encode_request(&ExchangeFields::default()).unwrap();
        bytes[12..14].copy_from_slice(&8i16.to_ne_bytes());
        bytes[14..18].copy_from_slice(&u32::MAX.to_ne_bytes());
        assert!(matches!(decode_request(&bytes), Err(ProtocolError::Truncated { .. })));
    }

    struct WideLong(ExchangeFields);

    impl FieldProvider for WideLong {
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
            if kind == TypeTag::Long { 8 } else { kind.element_size() }
        }
    }

    #[test]
    fn host_element_size_must_agree() {
        let err = encode_request(&WideLong(sample())).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::ElementSizeMismatch { kind: TypeTag::Long, host: 8, wire: 4 }
        );
    }

    #[test]
    fn response_roundtrip() {
        let mut outputs = FieldSet::new();
        outputs
            .set(1, Field::from_value(&FieldValue::Double(vec![2.5, -1.0])).unwrap())
            .unwrap();
        let bytes = encode_response(&outputs);

        let mut fields = ExchangeFields::new(FieldSet::new(), FieldSet::from_schema(&outputs.schema()));
        let report = decode_response(&bytes, &mut fields).unwrap();
        assert!(report.complete);
        assert!(report.mismatches.is_empty());
        assert_eq!(report.field_bytes, (21 * FIELD_HEADER_SIZE + 16) as u64);
        assert_eq!(report.total_bytes, bytes.len() as u64);
        assert_eq!(fields.outputs, outputs);
    }

    #[test]
    fn response_bad_terminator() {
        let mut bytes = encode_response(&FieldSet::new());
        let n = bytes.len();
        bytes[n - 1] = b'x';
        let mut fields = ExchangeFields::default();
        assert!(matches!(
            decode_response(&bytes, &mut fields),
            Err(ProtocolError::BadTerminator(_))
        ));
    }
}
