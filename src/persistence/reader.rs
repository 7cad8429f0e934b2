//! Typed binary reader, the mirror of [`GenericWriter`](super::writer::GenericWriter).

use bytes::{Buf, Bytes};
use chrono::{DateTime, TimeDelta, Utc};

use super::error::PersistError;
use super::object::Serial;
use super::time;
use super::version::CompactVersion;

pub struct GenericReader {
    buf: Bytes,
    len: usize,
    /// Reference instant for delta-encoded timestamps.
    now: DateTime<Utc>,
}

impl GenericReader {
    pub fn new(buf: impl Into<Bytes>) -> Self {
        Self::at(buf, Utc::now())
    }

    /// Reader whose delta timestamps are rebuilt relative to `now`.
    pub fn at(buf: impl Into<Bytes>, now: DateTime<Utc>) -> Self {
        let buf = buf.into();
        let len = buf.len();
        Self { buf, len, now }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.len - self.buf.remaining()
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        !self.buf.has_remaining()
    }

    fn need(&self, n: usize) -> Result<(), PersistError> {
        if self.buf.remaining() < n {
            return Err(PersistError::UnexpectedEof {
                position: self.position(),
                needed: n,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    // ── Versions ──────────────────────────────────────────────────────────────

    /// Next byte without advancing. `None` at end of stream.
    pub fn peek_byte(&self) -> Option<u8> {
        self.buf.chunk().first().copied()
    }

    /// Raw full-int version tag. Range checks belong to the caller, which
    /// knows the type's maximum.
    pub fn read_version(&mut self) -> Result<i32, PersistError> {
        self.read_int()
    }

    /// Compact version tag. A first byte without the high bit means the
    /// stream predates version tags: returns 0 and consumes nothing, since
    /// that byte belongs to the first legacy field.
    pub fn read_compact_version(&mut self) -> Result<u32, PersistError> {
        match self.peek_byte() {
            Some(b) if !CompactVersion::is_legacy_stream(b) => {
                self.buf.advance(1);
                Ok(CompactVersion::decode(b).map_or(0, CompactVersion::get))
            }
            _ => Ok(0),
        }
    }

    // ── Primitives ────────────────────────────────────────────────────────────

    pub fn read_bool(&mut self) -> Result<bool, PersistError> {
        Ok(self.read_byte()? != 0)
    }

    pub fn read_byte(&mut self) -> Result<u8, PersistError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_short(&mut self) -> Result<i16, PersistError> {
        self.need(2)?;
        Ok(self.buf.get_i16_le())
    }

    pub fn read_ushort(&mut self) -> Result<u16, PersistError> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_int(&mut self) -> Result<i32, PersistError> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_uint(&mut self) -> Result<u32, PersistError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_long(&mut self) -> Result<i64, PersistError> {
        self.need(8)?;
        Ok(self.buf.get_i64_le())
    }

    pub fn read_double(&mut self) -> Result<f64, PersistError> {
        self.need(8)?;
        Ok(self.buf.get_f64_le())
    }

    pub fn read_encoded_int(&mut self) -> Result<i32, PersistError> {
        let start = self.position();
        let mut value: u32 = 0;
        let mut shift = 0u32;
        loop {
            let b = self.read_byte()?;
            value |= ((b & 0x7F) as u32) << shift;
            if b & 0x80 == 0 {
                return Ok(value as i32);
            }
            shift += 7;
            if shift > 28 {
                return Err(PersistError::InvalidEncodedInt(start));
            }
        }
    }

    pub fn read_string(&mut self) -> Result<Option<String>, PersistError> {
        if !self.read_bool()? {
            return Ok(None);
        }
        let position = self.position();
        let len = self.read_encoded_int()?;
        if len < 0 {
            return Err(PersistError::NegativeCount { position, count: len });
        }
        let raw = self.read_bytes(len as usize)?;
        String::from_utf8(raw.to_vec())
            .map(Some)
            .map_err(|_| PersistError::InvalidString(position))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes, PersistError> {
        self.need(n)?;
        Ok(self.buf.copy_to_bytes(n))
    }

    // ── Time ──────────────────────────────────────────────────────────────────

    pub fn read_date_time(&mut self) -> Result<DateTime<Utc>, PersistError> {
        Ok(time::from_ticks(self.read_long()?))
    }

    pub fn read_delta_time(&mut self) -> Result<DateTime<Utc>, PersistError> {
        Ok(time::decode_delta(self.read_long()?, self.now))
    }

    pub fn read_time_span(&mut self) -> Result<TimeDelta, PersistError> {
        Ok(time::span_from_ticks(self.read_long()?))
    }

    // ── Object references ─────────────────────────────────────────────────────

    pub fn read_serial(&mut self) -> Result<Option<Serial>, PersistError> {
        let raw = self.read_uint()?;
        Ok((raw != Serial::NONE_RAW).then_some(Serial(raw)))
    }

    pub fn read_serial_list(&mut self) -> Result<Vec<Serial>, PersistError> {
        let position = self.position();
        let count = self.read_int()?;
        if count < 0 {
            return Err(PersistError::NegativeCount { position, count });
        }
        // Bound the allocation by what the stream can actually hold.
        self.need(count as usize * 4)?;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            out.push(Serial(self.read_uint()?));
        }
        Ok(out)
    }
}
