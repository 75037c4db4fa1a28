//! Framed binary protocol spoken with child programs over stdin/stdout.
//!
//! # Frames
//!
//! Request (host to child):
//!
//! ```text
//! MAGIC "asubExec" | VERSION u32 |
//! 21 x { TYPE i16, COUNT u32, DATA COUNT * size(TYPE) }   input fields A..U
//! 21 x { TYPE i16, COUNT u32 }                            output schema VALA..VALU
//! TERMINATOR "eod\n"
//! ```
//!
//! Response (child to host):
//!
//! ```text
//! MAGIC | VERSION | 21 x { TYPE, COUNT, DATA } | TERMINATOR
//! ```
//!
//! All integers use the host's native byte order; parent and child always
//! share a machine.

mod codec;
mod stream;
mod types;

pub mod child;

pub use codec::{decode_request, decode_response, encode_request, encode_response, DecodedRequest};
pub use stream::{ByteSource, DecodeError, DecodeReport, FieldMismatch, ResponseDecoder, SliceSource};
pub use types::{TypeTag, STRING_SLOT_SIZE};

use thiserror::Error;

/// Frame start marker.
pub const MAGIC: [u8; 8] = *b"asubExec";

/// Frame end marker.
pub const TERMINATOR: [u8; 4] = *b"eod\n";

/// Protocol version 1.2.2 (major.minor.patch, one byte each).
pub const PROTOCOL_VERSION: u32 = 0x0001_0202;

/// Fields per side of an exchange (A..U, VALA..VALU).
pub const FIELD_COUNT: usize = 21;

/// Size of one field header: TYPE (i16) + COUNT (u32).
pub const FIELD_HEADER_SIZE: usize = 2 + 4;

/// A response must carry more field bytes than bare headers.
pub const MIN_RESPONSE_FIELD_BYTES: u64 = (FIELD_COUNT * FIELD_HEADER_SIZE) as u64;

/// Upper bound on bytes discarded for any one field.
pub const MAX_DISCARD_BYTES: u64 = 512 * 1024;

/// Fatal framing errors. Any of these aborts the whole exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Bad frame magic: {0:02x?}")]
    BadMagic([u8; 8]),

    #[error("Bad frame terminator: {0:02x?}")]
    BadTerminator([u8; 4]),

    #[error("Incompatible protocol version {found:#010x} (expected {expected:#010x})")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("Unknown type code {code} in slot {slot}")]
    UnknownType { slot: usize, code: i16 },

    #[error("Slot {slot}: {bytes} bytes to discard exceeds limit of 524288")]
    DiscardTooLarge { slot: usize, bytes: u64 },

    #[error("Frame truncated: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("Host element size {host} for {kind} disagrees with wire size {wire}")]
    ElementSizeMismatch { kind: TypeTag, host: usize, wire: usize },

    #[error("Trailing bytes after terminator: {0}")]
    TrailingBytes(usize),
}

/// Versions are compatible when everything but the patch byte matches.
pub fn version_compatible(found: u32) -> bool {
    (found & !0xff) == (PROTOCOL_VERSION & !0xff)
}
