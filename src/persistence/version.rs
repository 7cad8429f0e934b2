//! Version tags and the dispatch check that guards every read ladder.
//!
//! Two encodings exist on disk:
//! - full int: 4-byte little-endian signed int, used by most types
//! - compact byte: `0x80 | version` in a single byte, used by high-count
//!   world decorations. A first byte with the high bit clear marks a
//!   stream written before version tags existed; it is read as version 0.
//!
//! The compact form caps a type at 128 revisions (0..=127). Bumping past
//! that is rejected rather than wrapped into the flag bit.

use serde::{Deserialize, Serialize};

use super::error::PersistError;
use super::reader::GenericReader;
use super::writer::GenericWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionEncoding {
    FullInt,
    CompactByte,
}

/// A version number that fits the compact byte tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CompactVersion(u8);

impl CompactVersion {
    pub const FLAG: u8 = 0x80;
    pub const MAX: u32 = 0x7F;

    pub fn new(version: u32) -> Result<Self, PersistError> {
        if version > Self::MAX {
            return Err(PersistError::CompactVersionOverflow(version));
        }
        Ok(Self(version as u8))
    }

    /// Tag byte for `version`, or an error past the 7-bit ceiling.
    pub fn try_encode(version: u32) -> Result<u8, PersistError> {
        Self::new(version).map(Self::to_byte)
    }

    /// `None` when `byte` is not a version tag (legacy stream).
    pub fn decode(byte: u8) -> Option<Self> {
        if Self::is_legacy_stream(byte) {
            return None;
        }
        Some(Self(byte & !Self::FLAG))
    }

    /// True when the stream's first byte shows no version tag.
    pub fn is_legacy_stream(first_byte: u8) -> bool {
        first_byte & Self::FLAG == 0
    }

    pub fn get(self) -> u32 {
        self.0 as u32
    }

    pub fn to_byte(self) -> u8 {
        Self::FLAG | self.0
    }
}

/// Reject versions the reader has no case for.
pub fn check_version(type_name: &str, found: i64, max: u32) -> Result<u32, PersistError> {
    if found < 0 || found > max as i64 {
        return Err(PersistError::FormatMismatch {
            type_name: type_name.to_string(),
            found,
            max,
        });
    }
    Ok(found as u32)
}

/// Write the tag for `version` in the given encoding.
pub fn write_version_tag(
    writer: &mut GenericWriter,
    encoding: VersionEncoding,
    version: u32,
) -> Result<(), PersistError> {
    match encoding {
        VersionEncoding::FullInt => writer.write_version(version)?,
        VersionEncoding::CompactByte => writer.write_compact_version(CompactVersion::new(version)?),
    }
    Ok(())
}

/// Read a tag and check it against `max` before any field is decoded.
pub fn read_version_tag(
    reader: &mut GenericReader,
    encoding: VersionEncoding,
    type_name: &str,
    max: u32,
) -> Result<u32, PersistError> {
    let found = match encoding {
        VersionEncoding::FullInt => reader.read_version()? as i64,
        VersionEncoding::CompactByte => reader.read_compact_version()? as i64,
    };
    check_version(type_name, found, max)
}
