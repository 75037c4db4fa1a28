//! Streaming response decoder.
//!
//! Pulls bytes from any [`ByteSource`] and writes matching output fields in
//! place. Per-field mismatches are recovered here (logged, payload skipped);
//! framing errors abort.

use thiserror::Error;
use tracing::{trace, warn};

use super::{
    version_compatible, ProtocolError, TypeTag, FIELD_COUNT, FIELD_HEADER_SIZE, MAGIC,
    MAX_DISCARD_BYTES, PROTOCOL_VERSION, TERMINATOR,
};
use crate::field::{output_slot_name, FieldProvider};

/// Anything that can hand over an exact number of bytes.
pub trait ByteSource {
    type Error;

    /// Fill `buf` completely or fail.
    fn fill(&mut self, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Read and drop `len` bytes.
    fn discard(&mut self, len: u64) -> Result<(), Self::Error> {
        let mut scratch = [0u8; 4096];
        let mut remaining = len;
        while remaining > 0 {
            let chunk = remaining.min(scratch.len() as u64) as usize;
            self.fill(&mut scratch[..chunk])?;
            remaining -= chunk as u64;
        }
        Ok(())
    }
}

/// In-memory byte source over a complete frame.
#[derive(Debug)]
pub struct SliceSource<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        if len > self.remaining() {
            return Err(ProtocolError::Truncated {
                needed: len - self.remaining(),
            });
        }
        let out = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }
}

impl ByteSource for SliceSource<'_> {
    type Error = ProtocolError;

    fn fill(&mut self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        let src = self.take(buf.len())?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn discard(&mut self, len: u64) -> Result<(), ProtocolError> {
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        self.take(len).map(|_| ())
    }
}

/// Decode failure: either the frame itself is bad or the source failed.
#[derive(Debug, Error)]
pub enum DecodeError<E> {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Byte source failed: {0}")]
    Source(E),
}

/// A recoverable per-field disagreement between the child's answer and the
/// declared output schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldMismatch {
    /// Child sent a different kind; its payload was discarded.
    Type {
        slot: usize,
        expected: TypeTag,
        actual: TypeTag,
        count: u32,
    },
    /// Child sent a different element count; surplus discarded or the tail
    /// left untouched.
    Count { slot: usize, expected: u32, actual: u32 },
}

impl FieldMismatch {
    pub fn slot(&self) -> usize {
        match self {
            FieldMismatch::Type { slot, .. } | FieldMismatch::Count { slot, .. } => *slot,
        }
    }
}

/// What a decode pass consumed and recovered from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeReport {
    /// Every byte read, framing included.
    pub total_bytes: u64,
    /// Bytes read inside the 21 field records (headers and payload).
    pub field_bytes: u64,
    pub mismatches: Vec<FieldMismatch>,
    /// True once the terminator has been read and verified.
    pub complete: bool,
}

/// Decoder for one response frame.
#[derive(Debug, Default)]
pub struct ResponseDecoder {
    report: DecodeReport,
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Progress so far; meaningful after a failed [`decode`](Self::decode)
    /// too.
    pub fn report(&self) -> &DecodeReport {
        &self.report
    }

    pub fn into_report(self) -> DecodeReport {
        self.report
    }

    /// Decode one response frame from `source` into the outputs of `fields`.
    pub fn decode<S, P>(&mut self, source: &mut S, fields: &mut P) -> Result<(), DecodeError<S::Error>>
    where
        S: ByteSource + ?Sized,
        P: FieldProvider + ?Sized,
    {
        let mut magic = [0u8; 8];
        self.read(source, &mut magic)?;
        if magic != MAGIC {
            return Err(ProtocolError::BadMagic(magic).into());
        }

        let mut version = [0u8; 4];
        self.read(source, &mut version)?;
        let version = u32::from_ne_bytes(version);
        if !version_compatible(version) {
            return Err(ProtocolError::VersionMismatch {
                found: version,
                expected: PROTOCOL_VERSION,
            }
            .into());
        }

        for slot in 0..FIELD_COUNT {
            self.decode_field(source, fields, slot)?;
        }

        let mut terminator = [0u8; 4];
        self.read(source, &mut terminator)?;
        if terminator != TERMINATOR {
            return Err(ProtocolError::BadTerminator(terminator).into());
        }
        self.report.complete = true;
        Ok(())
    }

    fn decode_field<S, P>(
        &mut self,
        source: &mut S,
        fields: &mut P,
        slot: usize,
    ) -> Result<(), DecodeError<S::Error>>
    where
        S: ByteSource + ?Sized,
        P: FieldProvider + ?Sized,
    {
        let mut header = [0u8; FIELD_HEADER_SIZE];
        self.read(source, &mut header)?;
        self.report.field_bytes += FIELD_HEADER_SIZE as u64;

        let code = i16::from_ne_bytes([header[0], header[1]]);
        let count = u32::from_ne_bytes([header[2], header[3], header[4], header[5]]);
        let kind = TypeTag::from_wire(code).ok_or(ProtocolError::UnknownType { slot, code })?;
        let element_size = kind.element_size() as u64;

        let declared = fields.output(slot);
        let expected_kind = declared.kind();
        let expected_count = declared.declared_count();

        if kind != expected_kind {
            warn!(
                field = %output_slot_name(slot),
                expected = %expected_kind,
                actual = %kind,
                "output type mismatch, discarding payload"
            );
            self.skip(source, slot, u64::from(count) * element_size)?;
            self.report.mismatches.push(FieldMismatch::Type {
                slot,
                expected: expected_kind,
                actual: kind,
                count,
            });
            return Ok(());
        }

        let copied = count.min(expected_count);
        let copy_len = copied as usize * kind.element_size();
        let surplus = u64::from(count - copied) * element_size;
        if surplus > MAX_DISCARD_BYTES {
            return Err(ProtocolError::DiscardTooLarge { slot, bytes: surplus }.into());
        }

        let dest = &mut fields.output_mut(slot).data_mut()[..copy_len];
        source.fill(dest).map_err(DecodeError::Source)?;
        self.report.total_bytes += copy_len as u64;
        self.report.field_bytes += copy_len as u64;

        if surplus > 0 {
            self.skip(source, slot, surplus)?;
        }

        if count != expected_count {
            warn!(
                field = %output_slot_name(slot),
                expected = expected_count,
                actual = count,
                "output element count mismatch"
            );
            self.report.mismatches.push(FieldMismatch::Count {
                slot,
                expected: expected_count,
                actual: count,
            });
        }

        trace!(field = %output_slot_name(slot), kind = %kind, count, "decoded output field");
        Ok(())
    }

    fn skip<S>(&mut self, source: &mut S, slot: usize, bytes: u64) -> Result<(), DecodeError<S::Error>>
    where
        S: ByteSource + ?Sized,
    {
        if bytes > MAX_DISCARD_BYTES {
            return Err(ProtocolError::DiscardTooLarge { slot, bytes }.into());
        }
        source.discard(bytes).map_err(DecodeError::Source)?;
        self.report.total_bytes += bytes;
        self.report.field_bytes += bytes;
        Ok(())
    }

    fn read<S>(&mut self, source: &mut S, buf: &mut [u8]) -> Result<(), DecodeError<S::Error>>
    where
        S: ByteSource + ?Sized,
    {
        source.fill(buf).map_err(DecodeError::Source)?;
        self.report.total_bytes += buf.len() as u64;
        Ok(())
    }
}
