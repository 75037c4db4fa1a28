//! Translation between a host framework's field-type numbering and
//! [`TypeTag`].
//!
//! Host numbering is not stable across host versions, so it is never put on
//! the wire. Each host supplies a [`HostTypeMap`] instead.

use crate::wire::TypeTag;

/// Maps a host's internal type codes to and from the wire's [`TypeTag`].
pub trait HostTypeMap {
    /// Host code to wire tag. Codes without a wire equivalent map to
    /// [`TypeTag::None`].
    fn to_tag(&self, host_code: u16) -> TypeTag;

    /// Wire tag to host code, or `None` when the host lacks the kind.
    fn from_tag(&self, tag: TypeTag) -> Option<u16>;
}

/// EPICS base 7 `menuFtype` numbering.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpicsFtype;

const EPICS7_TABLE: [(u16, TypeTag); 12] = [
    (0, TypeTag::String),
    (1, TypeTag::Char),
    (2, TypeTag::UChar),
    (3, TypeTag::Short),
    (4, TypeTag::UShort),
    (5, TypeTag::Long),
    (6, TypeTag::ULong),
    (7, TypeTag::Int64),
    (8, TypeTag::UInt64),
    (9, TypeTag::Float),
    (10, TypeTag::Double),
    (11, TypeTag::Enum),
];

/// EPICS base 3.15 `menuFtype` numbering (no 64-bit integers).
#[derive(Debug, Clone, Copy, Default)]
pub struct EpicsLegacyFtype;

const EPICS315_TABLE: [(u16, TypeTag); 10] = [
    (0, TypeTag::String),
    (1, TypeTag::Char),
    (2, TypeTag::UChar),
    (3, TypeTag::Short),
    (4, TypeTag::UShort),
    (5, TypeTag::Long),
    (6, TypeTag::ULong),
    (7, TypeTag::Float),
    (8, TypeTag::Double),
    (9, TypeTag::Enum),
];

fn lookup_tag(table: &[(u16, TypeTag)], code: u16) -> TypeTag {
    table
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, tag)| *tag)
        .unwrap_or(TypeTag::None)
}

fn lookup_code(table: &[(u16, TypeTag)], tag: TypeTag) -> Option<u16> {
    table.iter().find(|(_, t)| *t == tag).map(|(c, _)| *c)
}

impl HostTypeMap for EpicsFtype {
    fn to_tag(&self, host_code: u16) -> TypeTag {
        lookup_tag(&EPICS7_TABLE, host_code)
    }

    fn from_tag(&self, tag: TypeTag) -> Option<u16> {
        lookup_code(&EPICS7_TABLE, tag)
    }
}

impl HostTypeMap for EpicsLegacyFtype {
    fn to_tag(&self, host_code: u16) -> TypeTag {
        lookup_tag(&EPICS315_TABLE, host_code)
    }

    fn from_tag(&self, tag: TypeTag) -> Option<u16> {
        lookup_code(&EPICS315_TABLE, tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base7_numbering_differs_from_wire() {
        let map = EpicsFtype;
        assert_eq!(map.to_tag(7), TypeTag::Int64);
        assert_eq!(map.to_tag(9), TypeTag::Float);
        assert_eq!(map.from_tag(TypeTag::Double), Some(10));
        assert_ne!(map.from_tag(TypeTag::Float), Some(TypeTag::Float.to_wire() as u16));
    }

    #[test]
    fn legacy_has_no_64_bit_kinds() {
        let map = EpicsLegacyFtype;
        assert_eq!(map.from_tag(TypeTag::Int64), None);
        assert_eq!(map.from_tag(TypeTag::UInt64), None);
        assert_eq!(map.to_tag(7), TypeTag::Float);
    }

    #[test]
    fn unknown_codes_map_to_none() {
        assert_eq!(EpicsFtype.to_tag(200), TypeTag::None);
        assert_eq!(EpicsFtype.from_tag(TypeTag::None), None);
    }

    #[test]
    fn every_mapped_code_roundtrips() {
        for code in 0..12u16 {
            let tag = EpicsFtype.to_tag(code);
            assert_eq!(EpicsFtype.from_tag(tag), Some(code));
        }
    }
}
