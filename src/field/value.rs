//! Typed views of field payloads.
//!
//! Element bytes are native endian. STRING elements occupy a fixed 40 byte
//! slot, NUL padded; at most 39 bytes of text are kept so the slot always
//! ends with a terminator.

use serde::{Deserialize, Serialize};

use super::FieldError;
use crate::wire::{TypeTag, STRING_SLOT_SIZE};

/// Typed element values for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "UPPERCASE")]
pub enum FieldValue {
    None,
    String(Vec<String>),
    Char(Vec<i8>),
    UChar(Vec<u8>),
    Short(Vec<i16>),
    UShort(Vec<u16>),
    Long(Vec<i32>),
    ULong(Vec<u32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Enum(Vec<u16>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
}

macro_rules! encode_numbers {
    ($values:expr, $size:expr) => {{
        let mut out = Vec::with_capacity($values.len() * $size);
        for v in $values {
            out.extend_from_slice(&v.to_ne_bytes());
        }
        out
    }};
}

macro_rules! decode_numbers {
    ($bytes:expr, $ty:ty) => {{
        const SIZE: usize = std::mem::size_of::<$ty>();
        $bytes
            .chunks_exact(SIZE)
            .map(|chunk| {
                let mut raw = [0u8; SIZE];
                raw.copy_from_slice(chunk);
                <$ty>::from_ne_bytes(raw)
            })
            .collect::<Vec<$ty>>()
    }};
}

impl FieldValue {
    pub fn kind(&self) -> TypeTag {
        match self {
            FieldValue::None => TypeTag::None,
            FieldValue::String(_) => TypeTag::String,
            FieldValue::Char(_) => TypeTag::Char,
            FieldValue::UChar(_) => TypeTag::UChar,
            FieldValue::Short(_) => TypeTag::Short,
            FieldValue::UShort(_) => TypeTag::UShort,
            FieldValue::Long(_) => TypeTag::Long,
            FieldValue::ULong(_) => TypeTag::ULong,
            FieldValue::Float(_) => TypeTag::Float,
            FieldValue::Double(_) => TypeTag::Double,
            FieldValue::Enum(_) => TypeTag::Enum,
            FieldValue::Int64(_) => TypeTag::Int64,
            FieldValue::UInt64(_) => TypeTag::UInt64,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            FieldValue::None => 0,
            FieldValue::String(v) => v.len(),
            FieldValue::Char(v) => v.len(),
            FieldValue::UChar(v) => v.len(),
            FieldValue::Short(v) => v.len(),
            FieldValue::UShort(v) => v.len(),
            FieldValue::Long(v) => v.len(),
            FieldValue::ULong(v) => v.len(),
            FieldValue::Float(v) => v.len(),
            FieldValue::Double(v) => v.len(),
            FieldValue::Enum(v) => v.len(),
            FieldValue::Int64(v) => v.len(),
            FieldValue::UInt64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encode into native-endian element bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FieldError> {
        let bytes = match self {
            FieldValue::None => Vec::new(),
            FieldValue::String(v) => encode_strings(v)?,
            FieldValue::Char(v) => encode_numbers!(v, 1),
            FieldValue::UChar(v) => v.clone(),
            FieldValue::Short(v) => encode_numbers!(v, 2),
            FieldValue::UShort(v) => encode_numbers!(v, 2),
            FieldValue::Long(v) => encode_numbers!(v, 4),
            FieldValue::ULong(v) => encode_numbers!(v, 4),
            FieldValue::Float(v) => encode_numbers!(v, 4),
            FieldValue::Double(v) => encode_numbers!(v, 8),
            FieldValue::Enum(v) => encode_numbers!(v, 2),
            FieldValue::Int64(v) => encode_numbers!(v, 8),
            FieldValue::UInt64(v) => encode_numbers!(v, 8),
        };
        Ok(bytes)
    }

    /// Decode native-endian element bytes of the given kind.
    pub fn from_bytes(kind: TypeTag, bytes: &[u8]) -> Result<Self, FieldError> {
        let size = kind.element_size();
        if kind == TypeTag::None {
            return Ok(FieldValue::None);
        }
        if bytes.len() % size != 0 {
            return Err(FieldError::Misaligned {
                kind,
                len: bytes.len(),
                size,
            });
        }
        let value = match kind {
            TypeTag::None => FieldValue::None,
            TypeTag::String => FieldValue::String(decode_strings(bytes)),
            TypeTag::Char => FieldValue::Char(decode_numbers!(bytes, i8)),
            TypeTag::UChar => FieldValue::UChar(bytes.to_vec()),
            TypeTag::Short => FieldValue::Short(decode_numbers!(bytes, i16)),
            TypeTag::UShort => FieldValue::UShort(decode_numbers!(bytes, u16)),
            TypeTag::Long => FieldValue::Long(decode_numbers!(bytes, i32)),
            TypeTag::ULong => FieldValue::ULong(decode_numbers!(bytes, u32)),
            TypeTag::Float => FieldValue::Float(decode_numbers!(bytes, f32)),
            TypeTag::Double => FieldValue::Double(decode_numbers!(bytes, f64)),
            TypeTag::Enum => FieldValue::Enum(decode_numbers!(bytes, u16)),
            TypeTag::Int64 => FieldValue::Int64(decode_numbers!(bytes, i64)),
            TypeTag::UInt64 => FieldValue::UInt64(decode_numbers!(bytes, u64)),
        };
        Ok(value)
    }
}

macro_rules! each_vec {
    ($value:expr, $v:ident => $body:expr) => {
        match $value {
            FieldValue::None => {}
            FieldValue::String($v) => $body,
            FieldValue::Char($v) => $body,
            FieldValue::UChar($v) => $body,
            FieldValue::Short($v) => $body,
            FieldValue::UShort($v) => $body,
            FieldValue::Long($v) => $body,
            FieldValue::ULong($v) => $body,
            FieldValue::Float($v) => $body,
            FieldValue::Double($v) => $body,
            FieldValue::Enum($v) => $body,
            FieldValue::Int64($v) => $body,
            FieldValue::UInt64($v) => $body,
        }
    };
}

impl FieldValue {
    /// Keep at most `len` elements.
    pub fn truncate(&mut self, len: usize) {
        each_vec!(self, v => v.truncate(len));
    }

    /// Convert every element to `kind`.
    ///
    /// Numbers are cast between kinds; integers must fit the target range and
    /// reals are truncated toward zero. Text parses into numbers and numbers
    /// format into text. Converting to NONE drops all elements.
    pub fn convert_to(&self, kind: TypeTag) -> Result<FieldValue, FieldError> {
        if self.kind() == kind {
            return Ok(self.clone());
        }
        let elements = self.elements();

        macro_rules! ints {
            ($variant:ident) => {
                FieldValue::$variant(
                    elements
                        .iter()
                        .map(|e| e.to_int(kind))
                        .collect::<Result<_, _>>()?,
                )
            };
        }

        let value = match kind {
            TypeTag::None => FieldValue::None,
            TypeTag::String => FieldValue::String(elements.iter().map(Element::to_text).collect()),
            TypeTag::Char => ints!(Char),
            TypeTag::UChar => ints!(UChar),
            TypeTag::Short => ints!(Short),
            TypeTag::UShort => ints!(UShort),
            TypeTag::Long => ints!(Long),
            TypeTag::ULong => ints!(ULong),
            TypeTag::Enum => ints!(Enum),
            TypeTag::Int64 => ints!(Int64),
            TypeTag::UInt64 => ints!(UInt64),
            TypeTag::Float => FieldValue::Float(
                elements
                    .iter()
                    .map(|e| e.to_real(kind).map(|r| r as f32))
                    .collect::<Result<_, _>>()?,
            ),
            TypeTag::Double => FieldValue::Double(
                elements
                    .iter()
                    .map(|e| e.to_real(kind))
                    .collect::<Result<_, _>>()?,
            ),
        };
        Ok(value)
    }

    fn elements(&self) -> Vec<Element> {
        fn signed<T: Copy + Into<i64>>(v: &[T]) -> Vec<Element> {
            v.iter().map(|x| Element::Signed((*x).into())).collect()
        }
        fn unsigned<T: Copy + Into<u64>>(v: &[T]) -> Vec<Element> {
            v.iter().map(|x| Element::Unsigned((*x).into())).collect()
        }

        match self {
            FieldValue::None => Vec::new(),
            FieldValue::String(v) => v.iter().cloned().map(Element::Text).collect(),
            FieldValue::Char(v) => signed(v),
            FieldValue::UChar(v) => unsigned(v),
            FieldValue::Short(v) => signed(v),
            FieldValue::UShort(v) => unsigned(v),
            FieldValue::Long(v) => signed(v),
            FieldValue::ULong(v) => unsigned(v),
            FieldValue::Float(v) => v.iter().map(|x| Element::Real(f64::from(*x))).collect(),
            FieldValue::Double(v) => v.iter().copied().map(Element::Real).collect(),
            FieldValue::Enum(v) => unsigned(v),
            FieldValue::Int64(v) => signed(v),
            FieldValue::UInt64(v) => unsigned(v),
        }
    }
}

/// One element with its kind erased, used while converting.
#[derive(Debug, Clone, PartialEq)]
enum Element {
    Signed(i64),
    Unsigned(u64),
    Real(f64),
    Text(String),
}

impl Element {
    fn to_int<T>(&self, kind: TypeTag) -> Result<T, FieldError>
    where
        T: TryFrom<i64> + TryFrom<u64>,
    {
        let invalid = |reason: String| FieldError::InvalidValue { kind, reason };
        match self {
            Element::Signed(v) => T::try_from(*v).map_err(|_| invalid(format!("{v} is out of range"))),
            Element::Unsigned(v) => T::try_from(*v).map_err(|_| invalid(format!("{v} is out of range"))),
            Element::Real(v) => {
                let whole = v.trunc();
                if !whole.is_finite() || whole < i64::MIN as f64 || whole >= u64::MAX as f64 {
                    return Err(invalid(format!("{v} is out of range")));
                }
                if whole < 0.0 {
                    Element::Signed(whole as i64).to_int(kind)
                } else {
                    Element::Unsigned(whole as u64).to_int(kind)
                }
            }
            Element::Text(text) => {
                let trimmed = text.trim();
                if let Ok(v) = trimmed.parse::<i64>() {
                    Element::Signed(v).to_int(kind)
                } else if let Ok(v) = trimmed.parse::<u64>() {
                    Element::Unsigned(v).to_int(kind)
                } else {
                    Err(invalid(format!("{text:?} is not an integer")))
                }
            }
        }
    }

    fn to_real(&self, kind: TypeTag) -> Result<f64, FieldError> {
        match self {
            Element::Signed(v) => Ok(*v as f64),
            Element::Unsigned(v) => Ok(*v as f64),
            Element::Real(v) => Ok(*v),
            Element::Text(text) => text.trim().parse::<f64>().map_err(|_| FieldError::InvalidValue {
                kind,
                reason: format!("{text:?} is not a number"),
            }),
        }
    }

    fn to_text(&self) -> String {
        match self {
            Element::Signed(v) => v.to_string(),
            Element::Unsigned(v) => v.to_string(),
            Element::Real(v) => v.to_string(),
            Element::Text(text) => text.clone(),
        }
    }
}

fn encode_strings(values: &[String]) -> Result<Vec<u8>, FieldError> {
    let mut out = vec![0u8; values.len() * STRING_SLOT_SIZE];
    for (slot, text) in out.chunks_exact_mut(STRING_SLOT_SIZE).zip(values) {
        let raw = text.as_bytes();
        if raw.contains(&0) {
            return Err(FieldError::InvalidValue {
                kind: TypeTag::String,
                reason: "embedded NUL".into(),
            });
        }
        let mut len = raw.len().min(STRING_SLOT_SIZE - 1);
        while !text.is_char_boundary(len) {
            len -= 1;
        }
        slot[..len].copy_from_slice(&raw[..len]);
    }
    Ok(out)
}

fn decode_strings(bytes: &[u8]) -> Vec<String> {
    bytes
        .chunks_exact(STRING_SLOT_SIZE)
        .map(|slot| {
            let end = slot.iter().position(|b| *b == 0).unwrap_or(slot.len());
            String::from_utf8_lossy(&slot[..end]).into_owned()
        })
        .collect()
}
