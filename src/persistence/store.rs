//! World file: every persistent object in one file, loaded in two passes.
//!
//! Layout (little-endian):
//!   [0..4]   magic "SHRD"
//!   [4..8]   file format version (u32)
//!   [8..12]  flags (u32, bit 0 = zlib-compressed body)
//!   [12..20] saved-at ticks (i64)
//!   [20..24] uncompressed body length (u32)
//!   [24..40] MD5 of the uncompressed body
//!   [40..]   body
//!
//! Body:
//!   i32 type count, then type names (strings)
//!   i32 object count, then entries (u32 serial, u32 type index,
//!     u32 offset, u32 length), offsets relative to the data section
//!   data section: object payloads in serial order
//!
//! The per-object length lets the loader confirm each object consumed
//! exactly what it wrote; a mismatch means the reader and writer disagree
//! on field order.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use md5::{Digest, Md5};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::error::PersistError;
use super::object::{to_bytes, LoadContext, Persistent, Serial};
use super::reader::GenericReader;
use super::registry::TypeRegistry;
use super::time;
use super::validation::DanglingPolicy;
use super::world::WorldState;
use super::writer::GenericWriter;
use crate::config::PersistConfig;

pub const MAGIC: [u8; 4] = *b"SHRD";
pub const FILE_FORMAT_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 40;

const FLAG_COMPRESSED: u32 = 1;

/// Most a header can make `parse` reserve up front for the inflated body.
const MAX_BODY_PREALLOC: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveStrategy {
    /// Encode objects one after another.
    #[default]
    Standard,
    /// Encode each object into its own buffer across the rayon pool.
    /// Output is byte-identical to `Standard`.
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    pub strategy: SaveStrategy,
    pub compress: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            strategy: SaveStrategy::Standard,
            compress: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub dangling_policy: DanglingPolicy,
    /// Skip objects that leave bytes unread.
    pub strict_length: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            dangling_policy: DanglingPolicy::LogAndDrop,
            strict_length: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub serial: Serial,
    pub type_index: u32,
    pub offset: u32,
    pub length: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldFileHeader {
    pub format_version: u32,
    pub flags: u32,
    pub saved_at: DateTime<Utc>,
    pub body_len: u32,
    pub checksum: [u8; 16],
}

impl WorldFileHeader {
    pub fn compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }
}

/// A parsed world file: header, type table, index, and the raw data section.
#[derive(Debug, Clone)]
pub struct WorldFile {
    pub header: WorldFileHeader,
    pub types: Vec<String>,
    pub entries: Vec<IndexEntry>,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedObject {
    pub serial: Serial,
    pub type_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub saved_at: DateTime<Utc>,
    pub loaded: usize,
    pub skipped: Vec<SkippedObject>,
    pub validations_run: usize,
    pub dangling_dropped: usize,
}

// ── Encode ────────────────────────────────────────────────────────────────────

/// Serialize every object in `world` into a world file image.
///
/// Delta timestamps in every object are taken relative to `now`.
pub fn encode_world(
    world: &WorldState,
    options: &SaveOptions,
    now: DateTime<Utc>,
) -> Result<Vec<u8>, PersistError> {
    let objects: Vec<&dyn Persistent> = world.iter().collect();
    let payloads: Vec<Bytes> = match options.strategy {
        SaveStrategy::Standard => objects
            .iter()
            .map(|obj| to_bytes(*obj, GenericWriter::at(now)))
            .collect::<Result<_, _>>()?,
        SaveStrategy::Parallel => objects
            .par_iter()
            .map(|obj| to_bytes(*obj, GenericWriter::at(now)))
            .collect::<Result<_, _>>()?,
    };

    let mut types: Vec<&'static str> = Vec::new();
    let mut type_index: HashMap<&'static str, u32> = HashMap::new();
    let mut body = GenericWriter::at(now);

    let mut entries = Vec::with_capacity(objects.len());
    let mut offset = 0u32;
    for (obj, payload) in objects.iter().zip(&payloads) {
        let idx = *type_index.entry(obj.type_name()).or_insert_with(|| {
            types.push(obj.type_name());
            (types.len() - 1) as u32
        });
        entries.push(IndexEntry {
            serial: obj.serial(),
            type_index: idx,
            offset,
            length: payload.len() as u32,
        });
        offset += payload.len() as u32;
    }

    body.write_int(types.len() as i32);
    for name in &types {
        body.write_string(Some(name));
    }
    body.write_int(entries.len() as i32);
    for e in &entries {
        body.write_uint(e.serial.0);
        body.write_uint(e.type_index);
        body.write_uint(e.offset);
        body.write_uint(e.length);
    }
    for payload in &payloads {
        body.write_bytes(payload);
    }
    let body = body.into_bytes();

    let checksum = md5_of(&body);
    let mut flags = 0;
    let stored = if options.compress {
        flags |= FLAG_COMPRESSED;
        let mut enc = ZlibEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
        enc.write_all(&body)?;
        enc.finish()?
    } else {
        body.to_vec()
    };

    let mut out = GenericWriter::at(now);
    out.write_bytes(&MAGIC);
    out.write_uint(FILE_FORMAT_VERSION);
    out.write_uint(flags);
    out.write_date_time(now);
    out.write_uint(body.len() as u32);
    out.write_bytes(&checksum);
    out.write_bytes(&stored);

    tracing::debug!(
        "[world] [encode] objects={} types={} body={} stored={}",
        entries.len(),
        types.len(),
        body.len(),
        stored.len()
    );
    Ok(out.into_bytes().to_vec())
}

// ── Decode ────────────────────────────────────────────────────────────────────

impl WorldFile {
    /// Check header and checksum, then split out type table, index and data.
    pub fn parse(bytes: &[u8]) -> Result<Self, PersistError> {
        if bytes.len() >= 4 && bytes[..4] != MAGIC {
            let mut found = [0u8; 4];
            found.copy_from_slice(&bytes[..4]);
            return Err(PersistError::BadMagic(found));
        }
        if bytes.len() < HEADER_SIZE {
            return Err(PersistError::UnexpectedEof {
                position: 0,
                needed: HEADER_SIZE,
                remaining: bytes.len(),
            });
        }

        let mut r = GenericReader::new(Bytes::copy_from_slice(&bytes[4..HEADER_SIZE]));
        let format_version = r.read_uint()?;
        if format_version > FILE_FORMAT_VERSION {
            return Err(PersistError::UnsupportedFile {
                found: format_version,
                max: FILE_FORMAT_VERSION,
            });
        }
        let flags = r.read_uint()?;
        let saved_at = time::from_ticks(r.read_long()?);
        let body_len = r.read_uint()?;
        let mut checksum = [0u8; 16];
        checksum.copy_from_slice(&r.read_bytes(16)?);
        let header = WorldFileHeader {
            format_version,
            flags,
            saved_at,
            body_len,
            checksum,
        };

        let stored = &bytes[HEADER_SIZE..];
        let body = if header.compressed() {
            // The header is unverified here: never inflate past one byte
            // over the declared length.
            let mut raw = Vec::with_capacity((body_len as usize).min(MAX_BODY_PREALLOC));
            ZlibDecoder::new(stored)
                .take(body_len as u64 + 1)
                .read_to_end(&mut raw)?;
            raw
        } else {
            stored.to_vec()
        };

        let actual = md5_of(&body);
        if actual != checksum || body.len() != body_len as usize {
            return Err(PersistError::ChecksumMismatch {
                expected: hex::encode(checksum),
                actual: hex::encode(actual),
            });
        }

        let mut r = GenericReader::new(body);
        let type_count = read_count(&mut r)?;
        let mut types = Vec::with_capacity(type_count.min(1024));
        for _ in 0..type_count {
            types.push(r.read_string()?.unwrap_or_default());
        }
        let entry_count = read_count(&mut r)?;
        let mut entries = Vec::with_capacity(entry_count.min(r.remaining() / 16));
        for _ in 0..entry_count {
            entries.push(IndexEntry {
                serial: Serial(r.read_uint()?),
                type_index: r.read_uint()?,
                offset: r.read_uint()?,
                length: r.read_uint()?,
            });
        }
        let data_len = r.remaining();
        let data = r.read_bytes(data_len)?;

        Ok(Self {
            header,
            types,
            entries,
            data,
        })
    }

    pub fn type_name(&self, entry: &IndexEntry) -> Option<&str> {
        self.types.get(entry.type_index as usize).map(String::as_str)
    }

    /// The bytes an entry points at.
    pub fn payload(&self, entry: &IndexEntry) -> Result<Bytes, PersistError> {
        let start = entry.offset as usize;
        let end = start + entry.length as usize;
        if end > self.data.len() {
            return Err(PersistError::BadIndexEntry {
                serial: entry.serial,
                offset: start,
                length: entry.length as usize,
            });
        }
        Ok(self.data.slice(start..end))
    }
}

fn md5_of(data: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&Md5::digest(data));
    out
}

fn read_count(r: &mut GenericReader) -> Result<usize, PersistError> {
    let position = r.position();
    let count = r.read_int()?;
    if count < 0 {
        return Err(PersistError::NegativeCount { position, count });
    }
    Ok(count as usize)
}

/// First-pass decode of a single entry.
fn load_object(
    file: &WorldFile,
    entry: &IndexEntry,
    type_name: &str,
    registry: &TypeRegistry,
    options: &LoadOptions,
    now: DateTime<Utc>,
) -> Result<(Box<dyn Persistent>, LoadContext), PersistError> {
    let mut obj = registry
        .construct(type_name, entry.serial)
        .ok_or_else(|| PersistError::UnknownType(type_name.to_string()))?;
    let mut reader = GenericReader::at(file.payload(entry)?, now);
    let mut ctx = LoadContext::new(entry.serial);
    obj.deserialize(&mut reader, &mut ctx)?;

    let unread = reader.remaining();
    if unread > 0 {
        if options.strict_length {
            return Err(PersistError::LengthMismatch {
                serial: entry.serial,
                type_name: type_name.to_string(),
                expected: entry.length as usize,
                consumed: reader.position(),
            });
        }
        tracing::debug!(
            "[world] [load] {} {} left {} bytes unread",
            type_name,
            entry.serial,
            unread
        );
    }
    Ok((obj, ctx))
}

/// Two-pass load of a world file image.
///
/// A bad object is logged, recorded in the report and left out; the rest of
/// the world still loads. Only whole-file problems (magic, format, checksum)
/// and a failing dangling policy abort.
pub fn decode_world(
    bytes: &[u8],
    registry: &TypeRegistry,
    options: &LoadOptions,
    now: DateTime<Utc>,
) -> Result<(WorldState, LoadReport), PersistError> {
    let file = WorldFile::parse(bytes)?;
    let mut report = LoadReport {
        saved_at: file.header.saved_at,
        ..LoadReport::default()
    };

    let mut world = WorldState::new();
    world.begin_load()?;

    for entry in &file.entries {
        let Some(type_name) = file.type_name(entry) else {
            skip(&mut report, entry.serial, "?", format!("type index {} out of range", entry.type_index));
            continue;
        };
        let loaded = load_object(&file, entry, type_name, registry, options, now)
            .and_then(|(obj, ctx)| world.insert_loaded(obj, ctx));
        match loaded {
            Ok(_) => report.loaded += 1,
            Err(e) => skip(&mut report, entry.serial, type_name, e.to_string()),
        }
    }

    let drained = world.finish_load(options.dangling_policy)?;
    report.validations_run = drained.run;
    report.dangling_dropped = drained.dangling;

    tracing::info!(
        "[world] [load] loaded={} skipped={} validations={} dangling={}",
        report.loaded,
        report.skipped.len(),
        report.validations_run,
        report.dangling_dropped
    );
    Ok((world, report))
}

fn skip(report: &mut LoadReport, serial: Serial, type_name: &str, reason: String) {
    tracing::warn!("[world] [load] skipped {} {}: {}", type_name, serial, reason);
    report.skipped.push(SkippedObject {
        serial,
        type_name: type_name.to_string(),
        reason,
    });
}

// ── Files ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveSummary {
    pub objects: usize,
    pub bytes: usize,
}

/// Saves and loads the world file named by a [`PersistConfig`].
pub struct WorldStore {
    path: PathBuf,
    keep_backup: bool,
    save_options: SaveOptions,
    load_options: LoadOptions,
    registry: TypeRegistry,
}

impl WorldStore {
    pub fn new(config: &PersistConfig, registry: TypeRegistry) -> Self {
        Self {
            path: config.world_path(),
            keep_backup: config.keep_backup,
            save_options: config.save_options(),
            load_options: config.load_options(),
            registry,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        self.path.with_extension("bak")
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Write the world via a temp file and rename, keeping the previous
    /// file as `.bak` when configured.
    pub fn save(&self, world: &WorldState) -> Result<SaveSummary, PersistError> {
        let started = Instant::now();
        let bytes = encode_world(world, &self.save_options, Utc::now())?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        if self.keep_backup && self.path.exists() {
            fs::copy(&self.path, self.backup_path())?;
        }
        let tmp_path = self.path.with_extension("tmp");
        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;

        tracing::info!(
            "[world] [save] objects={} bytes={} path={} elapsed={:?}",
            world.len(),
            bytes.len(),
            self.path.display(),
            started.elapsed()
        );
        Ok(SaveSummary {
            objects: world.len(),
            bytes: bytes.len(),
        })
    }

    /// Load the world file, falling back to the backup when the primary is
    /// missing or unreadable. No file at all yields an empty world.
    pub fn load(&self) -> Result<(WorldState, LoadReport), PersistError> {
        let backup = self.backup_path();
        match fs::read(&self.path) {
            Ok(bytes) => match self.decode(&bytes) {
                Ok(loaded) => Ok(loaded),
                Err(e) if self.keep_backup && backup.exists() => {
                    tracing::warn!(
                        "[world] [load] {} unreadable ({}), using backup",
                        self.path.display(),
                        e
                    );
                    self.decode(&fs::read(&backup)?)
                }
                Err(e) => Err(e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.keep_backup && backup.exists() {
                    tracing::warn!("[world] [load] {} missing, using backup", self.path.display());
                    return self.decode(&fs::read(&backup)?);
                }
                tracing::info!("[world] [load] no world file at {}, starting empty", self.path.display());
                Ok((WorldState::new(), LoadReport::default()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<(WorldState, LoadReport), PersistError> {
        decode_world(bytes, &self.registry, &self.load_options, Utc::now())
    }
}
