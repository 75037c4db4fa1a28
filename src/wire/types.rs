//! Frozen element type table shared with child programs.
//!
//! The numeric values below are part of the wire protocol. New kinds may be
//! appended; existing values never change. Host frameworks translate their own
//! numbering to and from [`TypeTag`] (see [`crate::field::HostTypeMap`]).

use serde::{Deserialize, Serialize};

/// Fixed width of one STRING element: a NUL padded 40 byte slot.
pub const STRING_SLOT_SIZE: usize = 40;

/// Element type of a field as transmitted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(i16)]
pub enum TypeTag {
    None = -1,
    String = 0,
    Char = 1,
    UChar = 2,
    Short = 3,
    UShort = 4,
    Long = 5,
    ULong = 6,
    Float = 7,
    Double = 8,
    Enum = 9,
    Int64 = 10,
    UInt64 = 11,
}

impl TypeTag {
    /// Every kind, in wire order.
    pub const ALL: [TypeTag; 13] = [
        TypeTag::None,
        TypeTag::String,
        TypeTag::Char,
        TypeTag::UChar,
        TypeTag::Short,
        TypeTag::UShort,
        TypeTag::Long,
        TypeTag::ULong,
        TypeTag::Float,
        TypeTag::Double,
        TypeTag::Enum,
        TypeTag::Int64,
        TypeTag::UInt64,
    ];

    /// Decode a raw wire value. Unknown values yield `None` (the Rust option,
    /// not [`TypeTag::None`]).
    pub fn from_wire(raw: i16) -> Option<Self> {
        Self::ALL.iter().copied().find(|tag| tag.to_wire() == raw)
    }

    pub fn to_wire(self) -> i16 {
        self as i16
    }

    /// Byte width of one element of this kind.
    pub fn element_size(self) -> usize {
        match self {
            TypeTag::None => 0,
            TypeTag::String => STRING_SLOT_SIZE,
            TypeTag::Char | TypeTag::UChar => 1,
            TypeTag::Short | TypeTag::UShort | TypeTag::Enum => 2,
            TypeTag::Long | TypeTag::ULong | TypeTag::Float => 4,
            TypeTag::Double | TypeTag::Int64 | TypeTag::UInt64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeTag::None => "NONE",
            TypeTag::String => "STRING",
            TypeTag::Char => "CHAR",
            TypeTag::UChar => "UCHAR",
            TypeTag::Short => "SHORT",
            TypeTag::UShort => "USHORT",
            TypeTag::Long => "LONG",
            TypeTag::ULong => "ULONG",
            TypeTag::Float => "FLOAT",
            TypeTag::Double => "DOUBLE",
            TypeTag::Enum => "ENUM",
            TypeTag::Int64 => "INT64",
            TypeTag::UInt64 => "UINT64",
        }
    }
}

impl Default for TypeTag {
    fn default() -> Self {
        TypeTag::None
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
