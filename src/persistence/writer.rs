//! Append-only typed binary writer.
//!
//! All multi-byte values are little-endian. Nothing is tagged: the reader must
//! ask for the same types in the same order.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeDelta, Utc};

use super::error::PersistError;
use super::object::Serial;
use super::time;
use super::version::CompactVersion;

pub struct GenericWriter {
    buf: BytesMut,
    /// Reference instant for delta-encoded timestamps.
    now: DateTime<Utc>,
}

impl GenericWriter {
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Writer whose delta timestamps are taken relative to `now`.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            buf: BytesMut::with_capacity(64),
            now,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Bytes written so far.
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    // ── Versions ──────────────────────────────────────────────────────────────

    /// Full-int version tag.
    pub fn write_version(&mut self, version: u32) -> Result<(), PersistError> {
        let tag = i32::try_from(version).map_err(|_| PersistError::VersionOverflow(version))?;
        self.write_int(tag);
        Ok(())
    }

    /// Single-byte version tag with the high bit set.
    pub fn write_compact_version(&mut self, version: CompactVersion) {
        self.write_byte(version.to_byte());
    }

    // ── Primitives ────────────────────────────────────────────────────────────

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(value as u8);
    }

    pub fn write_byte(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_short(&mut self, value: i16) {
        self.buf.put_i16_le(value);
    }

    pub fn write_ushort(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    pub fn write_int(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn write_uint(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn write_long(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    pub fn write_double(&mut self, value: f64) {
        self.buf.put_f64_le(value);
    }

    /// 7 bits per byte, high bit = more bytes follow. Negative values take 5 bytes.
    pub fn write_encoded_int(&mut self, value: i32) {
        let mut v = value as u32;
        while v >= 0x80 {
            self.buf.put_u8((v | 0x80) as u8);
            v >>= 7;
        }
        self.buf.put_u8(v as u8);
    }

    /// Presence flag, then an encoded length and the UTF-8 bytes.
    pub fn write_string(&mut self, value: Option<&str>) {
        match value {
            Some(s) => {
                self.write_bool(true);
                self.write_encoded_int(s.len() as i32);
                self.buf.put_slice(s.as_bytes());
            }
            None => self.write_bool(false),
        }
    }

    pub fn write_bytes(&mut self, value: &[u8]) {
        self.buf.put_slice(value);
    }

    // ── Time ──────────────────────────────────────────────────────────────────

    pub fn write_date_time(&mut self, value: DateTime<Utc>) {
        self.write_long(time::to_ticks(value));
    }

    /// Offset from the writer's `now` instead of an absolute timestamp.
    pub fn write_delta_time(&mut self, value: DateTime<Utc>) {
        self.write_long(time::encode_delta(value, self.now));
    }

    pub fn write_time_span(&mut self, value: TimeDelta) {
        self.write_long(time::span_to_ticks(value));
    }

    // ── Object references ─────────────────────────────────────────────────────

    pub fn write_serial(&mut self, value: Option<Serial>) {
        self.write_uint(value.map_or(Serial::NONE_RAW, |s| s.0));
    }

    pub fn write_serial_list(&mut self, values: &[Serial]) {
        self.write_int(values.len() as i32);
        for s in values {
            self.write_uint(s.0);
        }
    }
}

impl Default for GenericWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer() -> GenericWriter {
        GenericWriter::at(DateTime::from_timestamp(1_000_000, 0).unwrap())
    }

    #[test]
    fn test_little_endian_layout() {
        let mut w = writer();
        w.write_int(0x0102_0304);
        w.write_short(-2);
        w.write_bool(true);
        assert_eq!(w.as_slice(), &[0x04, 0x03, 0x02, 0x01, 0xFE, 0xFF, 0x01]);
    }

    #[test]
    fn test_full_int_version_is_four_bytes() {
        let mut w = writer();
        w.write_version(3).unwrap();
        assert_eq!(w.as_slice(), &[3, 0, 0, 0]);
    }

    #[test]
    fn test_full_int_version_rejects_overflow() {
        let mut w = writer();
        assert!(matches!(
            w.write_version(i32::MAX as u32 + 1),
            Err(PersistError::VersionOverflow(_))
        ));
        assert!(w.as_slice().is_empty());
        w.write_version(i32::MAX as u32).unwrap();
        assert_eq!(w.as_slice(), &[0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn test_compact_version_sets_high_bit() {
        let mut w = writer();
        w.write_compact_version(CompactVersion::new(5).unwrap());
        assert_eq!(w.as_slice(), &[0x85]);
    }

    #[test]
    fn test_encoded_int() {
        let mut w = writer();
        w.write_encoded_int(127);
        w.write_encoded_int(300);
        assert_eq!(w.as_slice(), &[0x7F, 0xAC, 0x02]);

        let mut w = writer();
        w.write_encoded_int(-1);
        assert_eq!(w.as_slice(), &[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
    }

    #[test]
    fn test_string_and_null_string() {
        let mut w = writer();
        w.write_string(Some("Lord British"));
        w.write_string(None);
        let bytes = w.as_slice();
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[1], 12);
        assert_eq!(&bytes[2..14], b"Lord British");
        assert_eq!(bytes[14], 0);
        assert_eq!(bytes.len(), 15);
    }

    #[test]
    fn test_missing_serial_is_all_ones() {
        let mut w = writer();
        w.write_serial(None);
        w.write_serial(Some(Serial(2)));
        assert_eq!(w.as_slice(), &[0xFF, 0xFF, 0xFF, 0xFF, 2, 0, 0, 0]);
    }

    #[test]
    fn test_delta_time_relative_to_now() {
        let mut w = writer();
        let ten_secs_ago = w.now() - TimeDelta::seconds(10);
        w.write_delta_time(ten_secs_ago);
        let delta = i64::from_le_bytes(w.as_slice().try_into().unwrap());
        assert_eq!(delta, -10 * time::TICKS_PER_SECOND);
    }
}
