//! Field descriptors exchanged with the child program.
//!
//! A field is one typed, variable-length array. Every exchange carries exactly
//! [`FIELD_COUNT`] input fields (A..U) and the same number of output fields
//! (VALA..VALU). Unused slots are simply empty fields of kind
//! [`TypeTag::None`].

mod host;
mod value;

pub use host::{EpicsFtype, EpicsLegacyFtype, HostTypeMap};
pub use value::FieldValue;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::wire::{TypeTag, FIELD_COUNT};

/// Errors raised when building fields from host or caller data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("Buffer holds {actual} bytes, {kind} x {count} needs {expected}")]
    BufferSize {
        kind: TypeTag,
        count: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Slot index {0} out of range (0..21)")]
    SlotOutOfRange(usize),

    #[error("Unknown slot name: {0}")]
    UnknownSlot(String),

    #[error("Payload of {len} bytes is not a multiple of {kind} element size {size}")]
    Misaligned { kind: TypeTag, len: usize, size: usize },

    #[error("Value does not fit {kind}: {reason}")]
    InvalidValue { kind: TypeTag, reason: String },

    #[error("{kind} x {count} needs {bytes} bytes, limit is {limit}")]
    TooLarge {
        kind: TypeTag,
        count: u64,
        bytes: u64,
        limit: u64,
    },
}

/// Input slot name for index 0..21 ("A".."U").
pub fn input_slot_name(index: usize) -> String {
    slot_letter(index).to_string()
}

/// Output slot name for index 0..21 ("VALA".."VALU").
pub fn output_slot_name(index: usize) -> String {
    format!("VAL{}", slot_letter(index))
}

fn slot_letter(index: usize) -> char {
    // Index is bounded by FIELD_COUNT (21), so it always fits A..U.
    (b'A' + (index.min(FIELD_COUNT - 1) as u8)) as char
}

/// Parse "A".."U" or "VALA".."VALU" (case-insensitive) into a slot index.
pub fn parse_slot_name(name: &str) -> Result<usize, FieldError> {
    let upper = name.to_ascii_uppercase();
    let letter = upper.strip_prefix("VAL").unwrap_or(&upper);
    let mut chars = letter.chars();
    match (chars.next(), chars.next()) {
        (Some(c @ 'A'..='U'), None) => Ok((c as u8 - b'A') as usize),
        _ => Err(FieldError::UnknownSlot(name.to_string())),
    }
}

/// One typed array slot: kind, declared element count and raw element bytes.
///
/// The data buffer always holds exactly `declared_count * kind.element_size()`
/// bytes in native byte order.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    kind: TypeTag,
    declared_count: u32,
    data: Vec<u8>,
}

impl Field {
    /// An unused slot.
    pub fn empty() -> Self {
        Self {
            kind: TypeTag::None,
            declared_count: 0,
            data: Vec::new(),
        }
    }

    /// A zero-filled field with room for `declared_count` elements.
    pub fn new(kind: TypeTag, declared_count: u32) -> Self {
        Self {
            kind,
            declared_count,
            data: vec![0u8; declared_count as usize * kind.element_size()],
        }
    }

    /// Like [`Field::new`], refusing a buffer of more than `limit` bytes.
    pub fn bounded(kind: TypeTag, declared_count: u32, limit: u64) -> Result<Self, FieldError> {
        let bytes = u64::from(declared_count) * kind.element_size() as u64;
        if bytes > limit {
            return Err(FieldError::TooLarge {
                kind,
                count: u64::from(declared_count),
                bytes,
                limit,
            });
        }
        Ok(Self::new(kind, declared_count))
    }

    /// Wrap an existing element buffer. The buffer length must match the
    /// declared count exactly.
    pub fn with_data(kind: TypeTag, declared_count: u32, data: Vec<u8>) -> Result<Self, FieldError> {
        let expected = declared_count as usize * kind.element_size();
        if data.len() != expected {
            return Err(FieldError::BufferSize {
                kind,
                count: declared_count,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            kind,
            declared_count,
            data,
        })
    }

    /// Build a field holding exactly the given values.
    pub fn from_value(value: &FieldValue) -> Result<Self, FieldError> {
        let kind = value.kind();
        let count = u32::try_from(value.len()).map_err(|_| FieldError::TooLarge {
            kind,
            count: value.len() as u64,
            bytes: value.len() as u64 * kind.element_size() as u64,
            limit: u64::from(u32::MAX) * kind.element_size() as u64,
        })?;
        let data = value.to_bytes()?;
        Self::with_data(kind, count, data)
    }

    pub fn kind(&self) -> TypeTag {
        self.kind
    }

    pub fn declared_count(&self) -> u32 {
        self.declared_count
    }

    pub fn element_size(&self) -> usize {
        self.kind.element_size()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Decode the element bytes into typed values.
    pub fn value(&self) -> Result<FieldValue, FieldError> {
        FieldValue::from_bytes(self.kind, &self.data)
    }
}

impl Default for Field {
    fn default() -> Self {
        Self::empty()
    }
}

/// Requested kind and element count for one output slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputSpec {
    #[serde(rename = "type")]
    pub kind: TypeTag,
    pub count: u32,
}

/// The fixed, ordered set of 21 fields for one side of an exchange.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldSet {
    fields: [Field; FIELD_COUNT],
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output set sized from a schema: each slot zero-filled to its count.
    pub fn from_schema(schema: &[OutputSpec; FIELD_COUNT]) -> Self {
        let mut set = Self::new();
        for (field, spec) in set.fields.iter_mut().zip(schema.iter()) {
            *field = Field::new(spec.kind, spec.count);
        }
        set
    }

    pub fn get(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Field> {
        self.fields.get_mut(index)
    }

    pub fn set(&mut self, index: usize, field: Field) -> Result<(), FieldError> {
        let slot = self
            .fields
            .get_mut(index)
            .ok_or(FieldError::SlotOutOfRange(index))?;
        *slot = field;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Field> {
        self.fields.iter_mut()
    }

    /// The (kind, count) schema of this set.
    pub fn schema(&self) -> [OutputSpec; FIELD_COUNT] {
        let mut schema = [OutputSpec::default(); FIELD_COUNT];
        for (spec, field) in schema.iter_mut().zip(self.fields.iter()) {
            *spec = OutputSpec {
                kind: field.kind,
                count: field.declared_count,
            };
        }
        schema
    }
}

/// The host's view of the fields for one exchange.
///
/// Inputs are read-only to the exchange; outputs are written in place. Slots
/// the child does not fill keep their prior contents.
pub trait FieldProvider {
    fn input(&self, index: usize) -> &Field;

    fn output(&self, index: usize) -> &Field;

    fn output_mut(&mut self, index: usize) -> &mut Field;

    /// The host's element width for a kind. Must agree with
    /// [`TypeTag::element_size`]; the exchange refuses to run otherwise.
    fn element_size(&self, kind: TypeTag) -> usize {
        kind.element_size()
    }
}

/// Owned inputs and outputs for one exchange.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExchangeFields {
    pub inputs: FieldSet,
    pub outputs: FieldSet,
}

impl ExchangeFields {
    pub fn new(inputs: FieldSet, outputs: FieldSet) -> Self {
        Self { inputs, outputs }
    }
}

impl FieldProvider for ExchangeFields {
    fn input(&self, index: usize) -> &Field {
        &self.inputs.fields[index]
    }

    fn output(&self, index: usize) -> &Field {
        &self.outputs.fields[index]
    }

    fn output_mut(&mut self, index: usize) -> &mut Field {
        &mut self.outputs.fields[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_names() {
        assert_eq!(input_slot_name(0), "A");
        assert_eq!(input_slot_name(20), "U");
        assert_eq!(output_slot_name(0), "VALA");
        assert_eq!(output_slot_name(20), "VALU");
    }

    #[test]
    fn parse_slot_names() {
        assert_eq!(parse_slot_name("a").unwrap(), 0);
        assert_eq!(parse_slot_name("VALC").unwrap(), 2);
        assert_eq!(parse_slot_name("U").unwrap(), 20);
        assert!(parse_slot_name("V").is_err());
        assert!(parse_slot_name("VALV").is_err());
        assert!(parse_slot_name("AB").is_err());
        assert!(parse_slot_name("").is_err());
    }

    #[test]
    fn new_field_is_zero_filled() {
        let field = Field::new(TypeTag::Double, 3);
        assert_eq!(field.data().len(), 24);
        assert!(field.data().iter().all(|b| *b == 0));
    }

    #[test]
    fn bounded_field_checks_byte_size() {
        assert_eq!(Field::bounded(TypeTag::Long, 4, 16).unwrap().data().len(), 16);
        assert_eq!(
            Field::bounded(TypeTag::Long, 5, 16),
            Err(FieldError::TooLarge {
                kind: TypeTag::Long,
                count: 5,
                bytes: 20,
                limit: 16,
            })
        );
        assert!(Field::bounded(TypeTag::String, u32::MAX, 1 << 20).is_err());
    }

    #[test]
    fn with_data_checks_length() {
        assert!(Field::with_data(TypeTag::Long, 2, vec![0; 8]).is_ok());
        let err = Field::with_data(TypeTag::Long, 2, vec![0; 7]).unwrap_err();
        assert!(matches!(err, FieldError::BufferSize { expected: 8, actual: 7, .. }));
    }

    #[test]
    fn schema_roundtrip() {
        let mut set = FieldSet::new();
        set.set(4, Field::new(TypeTag::Short, 5)).unwrap();
        let schema = set.schema();
        assert_eq!(schema[4], OutputSpec { kind: TypeTag::Short, count: 5 });
        assert_eq!(schema[0].kind, TypeTag::None);

        let rebuilt = FieldSet::from_schema(&schema);
        assert_eq!(rebuilt.get(4).unwrap().data().len(), 10);
    }

    #[test]
    fn set_out_of_range() {
        let mut set = FieldSet::new();
        assert_eq!(
            set.set(FIELD_COUNT, Field::empty()),
            Err(FieldError::SlotOutOfRange(FIELD_COUNT))
        );
    }
}
