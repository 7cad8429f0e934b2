use super::layout::FieldKind;
use super::object::Serial;

/// Error types for persistence operations
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("Read out of bounds: pos={position}, needed={needed}, remaining={remaining}")]
    UnexpectedEof {
        position: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("Encoded int too long at pos={0}")]
    InvalidEncodedInt(usize),

    #[error("Invalid UTF-8 string at pos={0}")]
    InvalidString(usize),

    #[error("Negative count at pos={position}: {count}")]
    NegativeCount { position: usize, count: i32 },

    /// The stream carries a version the reader has no case for.
    #[error("Unknown format version for {type_name}: found v{found}, max supported v{max}")]
    FormatMismatch {
        type_name: String,
        found: i64,
        max: u32,
    },

    #[error("Version out of range: {0} (max {max})", max = i32::MAX)]
    VersionOverflow(u32),

    #[error("Compact version out of range: {0} (max 127)")]
    CompactVersionOverflow(u32),

    #[error("Invalid layout for {type_name}: {reason}")]
    InvalidLayout { type_name: String, reason: String },

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Field kind mismatch: field={field}, expected={expected:?}, found={found:?}")]
    KindMismatch {
        field: String,
        expected: FieldKind,
        found: FieldKind,
    },

    #[error("Dangling reference: {source_serial} -> {target}")]
    DanglingReference { source_serial: Serial, target: Serial },

    #[error("Duplicate serial: {0}")]
    DuplicateSerial(Serial),

    #[error("Cannot begin load: world already holds {0} objects")]
    WorldNotEmpty(usize),

    #[error("Load already in progress")]
    LoadInProgress,

    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// Consumed byte count differs from the indexed length, i.e. the
    /// reader and writer disagree on field order.
    #[error("Bad serialize for {type_name} {serial}: indexed {expected} bytes, consumed {consumed}")]
    LengthMismatch {
        serial: Serial,
        type_name: String,
        expected: usize,
        consumed: usize,
    },

    #[error("Bad magic bytes: {0:02X?}")]
    BadMagic([u8; 4]),

    #[error("Unsupported world file format: v{found} (max v{max})")]
    UnsupportedFile { found: u32, max: u32 },

    #[error("Checksum mismatch: expected={expected}, actual={actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Index entry out of bounds: serial={serial}, offset={offset}, length={length}")]
    BadIndexEntry {
        serial: Serial,
        offset: usize,
        length: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
