//! Declarative field layouts.
//!
//! A [`Layout`] lists every field a type has ever persisted, grouped into
//! [`Layer`]s (logical base types first, concrete type last), each field
//! tagged with the version that introduced it and, if dropped, the version
//! that retired it. The same declaration drives both the writer and the
//! reader, so the two cannot drift apart.
//!
//! Stream order for version `v` is every field present at `v`, grouped by
//! introducing version: newest group first by default (the classic read
//! ladder), oldest first with [`FieldOrder::Appended`]. Ties keep
//! declaration order.

use std::sync::OnceLock;

use chrono::{DateTime, TimeDelta, Utc};
use md5::{Digest, Md5};

use super::error::PersistError;
use super::object::Serial;
use super::reader::GenericReader;
use super::time;
use super::version::{read_version_tag, write_version_tag, CompactVersion, VersionEncoding};
use super::writer::GenericWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Byte,
    Short,
    UShort,
    Int,
    UInt,
    EncodedInt,
    Long,
    Double,
    String,
    DateTime,
    DeltaTime,
    TimeSpan,
    Reference,
    ReferenceList,
}

impl FieldKind {
    /// Zero value used when a field declares no default of its own.
    pub fn zero_value(self) -> FieldValue {
        match self {
            FieldKind::Bool => FieldValue::Bool(false),
            FieldKind::Byte => FieldValue::Byte(0),
            FieldKind::Short => FieldValue::Short(0),
            FieldKind::UShort => FieldValue::UShort(0),
            FieldKind::Int => FieldValue::Int(0),
            FieldKind::UInt => FieldValue::UInt(0),
            FieldKind::EncodedInt => FieldValue::EncodedInt(0),
            FieldKind::Long => FieldValue::Long(0),
            FieldKind::Double => FieldValue::Double(0.0),
            FieldKind::String => FieldValue::String(None),
            FieldKind::DateTime => FieldValue::DateTime(time::min_time()),
            FieldKind::DeltaTime => FieldValue::DeltaTime(time::min_time()),
            FieldKind::TimeSpan => FieldValue::TimeSpan(TimeDelta::zero()),
            FieldKind::Reference => FieldValue::Reference(None),
            FieldKind::ReferenceList => FieldValue::ReferenceList(Vec::new()),
        }
    }

    fn tag(self) -> &'static str {
        match self {
            FieldKind::Bool => "bool",
            FieldKind::Byte => "u8",
            FieldKind::Short => "i16",
            FieldKind::UShort => "u16",
            FieldKind::Int => "i32",
            FieldKind::UInt => "u32",
            FieldKind::EncodedInt => "enc",
            FieldKind::Long => "i64",
            FieldKind::Double => "f64",
            FieldKind::String => "str",
            FieldKind::DateTime => "dt",
            FieldKind::DeltaTime => "delta",
            FieldKind::TimeSpan => "span",
            FieldKind::Reference => "ref",
            FieldKind::ReferenceList => "refs",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Byte(u8),
    Short(i16),
    UShort(u16),
    Int(i32),
    UInt(u32),
    EncodedInt(i32),
    Long(i64),
    Double(f64),
    String(Option<String>),
    DateTime(DateTime<Utc>),
    DeltaTime(DateTime<Utc>),
    TimeSpan(TimeDelta),
    Reference(Option<Serial>),
    ReferenceList(Vec<Serial>),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Bool(_) => FieldKind::Bool,
            FieldValue::Byte(_) => FieldKind::Byte,
            FieldValue::Short(_) => FieldKind::Short,
            FieldValue::UShort(_) => FieldKind::UShort,
            FieldValue::Int(_) => FieldKind::Int,
            FieldValue::UInt(_) => FieldKind::UInt,
            FieldValue::EncodedInt(_) => FieldKind::EncodedInt,
            FieldValue::Long(_) => FieldKind::Long,
            FieldValue::Double(_) => FieldKind::Double,
            FieldValue::String(_) => FieldKind::String,
            FieldValue::DateTime(_) => FieldKind::DateTime,
            FieldValue::DeltaTime(_) => FieldKind::DeltaTime,
            FieldValue::TimeSpan(_) => FieldKind::TimeSpan,
            FieldValue::Reference(_) => FieldKind::Reference,
            FieldValue::ReferenceList(_) => FieldKind::ReferenceList,
        }
    }

    pub fn write(&self, w: &mut GenericWriter) {
        match self {
            FieldValue::Bool(v) => w.write_bool(*v),
            FieldValue::Byte(v) => w.write_byte(*v),
            FieldValue::Short(v) => w.write_short(*v),
            FieldValue::UShort(v) => w.write_ushort(*v),
            FieldValue::Int(v) => w.write_int(*v),
            FieldValue::UInt(v) => w.write_uint(*v),
            FieldValue::EncodedInt(v) => w.write_encoded_int(*v),
            FieldValue::Long(v) => w.write_long(*v),
            FieldValue::Double(v) => w.write_double(*v),
            FieldValue::String(v) => w.write_string(v.as_deref()),
            FieldValue::DateTime(v) => w.write_date_time(*v),
            FieldValue::DeltaTime(v) => w.write_delta_time(*v),
            FieldValue::TimeSpan(v) => w.write_time_span(*v),
            FieldValue::Reference(v) => w.write_serial(*v),
            FieldValue::ReferenceList(v) => w.write_serial_list(v),
        }
    }

    pub fn read(kind: FieldKind, r: &mut GenericReader) -> Result<Self, PersistError> {
        Ok(match kind {
            FieldKind::Bool => FieldValue::Bool(r.read_bool()?),
            FieldKind::Byte => FieldValue::Byte(r.read_byte()?),
            FieldKind::Short => FieldValue::Short(r.read_short()?),
            FieldKind::UShort => FieldValue::UShort(r.read_ushort()?),
            FieldKind::Int => FieldValue::Int(r.read_int()?),
            FieldKind::UInt => FieldValue::UInt(r.read_uint()?),
            FieldKind::EncodedInt => FieldValue::EncodedInt(r.read_encoded_int()?),
            FieldKind::Long => FieldValue::Long(r.read_long()?),
            FieldKind::Double => FieldValue::Double(r.read_double()?),
            FieldKind::String => FieldValue::String(r.read_string()?),
            FieldKind::DateTime => FieldValue::DateTime(r.read_date_time()?),
            FieldKind::DeltaTime => FieldValue::DeltaTime(r.read_delta_time()?),
            FieldKind::TimeSpan => FieldValue::TimeSpan(r.read_time_span()?),
            FieldKind::Reference => FieldValue::Reference(r.read_serial()?),
            FieldKind::ReferenceList => FieldValue::ReferenceList(r.read_serial_list()?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Version that introduced the field.
    pub since: u32,
    /// Version that stopped writing it, if any.
    pub until: Option<u32>,
    /// Value assigned when reading a stream older than `since`.
    pub default: FieldValue,
}

impl FieldDescriptor {
    pub fn present_at(&self, version: u32) -> bool {
        self.since <= version && self.until.map_or(true, |u| version < u)
    }
}

/// Fields contributed by one logical base type.
#[derive(Debug, Clone)]
pub struct Layer {
    name: &'static str,
    fields: Vec<FieldDescriptor>,
}

impl Layer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(self, name: &'static str, kind: FieldKind, since: u32) -> Self {
        self.field_default(name, since, kind.zero_value())
    }

    pub fn field_default(mut self, name: &'static str, since: u32, default: FieldValue) -> Self {
        self.fields.push(FieldDescriptor {
            name,
            kind: default.kind(),
            since,
            until: None,
            default,
        });
        self
    }

    /// A field that legacy streams carry but current versions no longer write.
    pub fn retired(mut self, name: &'static str, kind: FieldKind, since: u32, until: u32) -> Self {
        self.fields.push(FieldDescriptor {
            name,
            kind,
            since,
            until: Some(until),
            default: kind.zero_value(),
        });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldOrder {
    /// Newest version group first, down to version 0.
    #[default]
    NewestFirst,
    /// Version 0 fields first; each version appends to the previous one.
    Appended,
}

#[derive(Debug, Clone)]
pub struct Layout {
    type_name: &'static str,
    encoding: VersionEncoding,
    version: u32,
    order: FieldOrder,
    layers: Vec<Layer>,
}

pub struct LayoutBuilder {
    layout: Layout,
}

impl LayoutBuilder {
    pub fn order(mut self, order: FieldOrder) -> Self {
        self.layout.order = order;
        self
    }

    pub fn layer(mut self, layer: Layer) -> Self {
        self.layout.layers.push(layer);
        self
    }

    pub fn build(self) -> Result<Layout, PersistError> {
        self.layout.validate()?;
        Ok(self.layout)
    }
}

impl Layout {
    pub fn builder(type_name: &'static str, encoding: VersionEncoding, version: u32) -> LayoutBuilder {
        LayoutBuilder {
            layout: Layout {
                type_name,
                encoding,
                version,
                order: FieldOrder::default(),
                layers: Vec::new(),
            },
        }
    }

    /// Build once into `cell`; later calls reuse it. A build error is
    /// returned every time rather than cached.
    pub fn cached(
        cell: &'static OnceLock<Layout>,
        build: fn() -> Result<Layout, PersistError>,
    ) -> Result<&'static Layout, PersistError> {
        if let Some(layout) = cell.get() {
            return Ok(layout);
        }
        let layout = build()?;
        Ok(cell.get_or_init(|| layout))
    }

    fn invalid(&self, reason: String) -> PersistError {
        PersistError::InvalidLayout {
            type_name: self.type_name.to_string(),
            reason,
        }
    }

    fn validate(&self) -> Result<(), PersistError> {
        if self.encoding == VersionEncoding::CompactByte && self.version > CompactVersion::MAX {
            return Err(self.invalid(format!(
                "version {} exceeds the compact ceiling of {}",
                self.version,
                CompactVersion::MAX
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for f in self.fields() {
            if !seen.insert(f.name) {
                return Err(self.invalid(format!("duplicate field {}", f.name)));
            }
            if f.since > self.version {
                return Err(self.invalid(format!(
                    "field {} introduced in v{} after current v{}",
                    f.name, f.since, self.version
                )));
            }
            if let Some(until) = f.until {
                if until <= f.since || until > self.version {
                    return Err(self.invalid(format!(
                        "field {} retired at v{} outside v{}..=v{}",
                        f.name,
                        until,
                        f.since + 1,
                        self.version
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn encoding(&self) -> VersionEncoding {
        self.encoding
    }

    /// Current (write) version.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn order(&self) -> FieldOrder {
        self.order
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Every declared field, base layers first.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.layers.iter().flat_map(|l| l.fields.iter())
    }

    /// Fields in the order a version-`version` stream carries them.
    pub fn stream_order(&self, version: u32) -> Vec<&FieldDescriptor> {
        let mut fields: Vec<_> = self.fields().filter(|f| f.present_at(version)).collect();
        match self.order {
            FieldOrder::NewestFirst => fields.sort_by(|a, b| b.since.cmp(&a.since)),
            FieldOrder::Appended => fields.sort_by(|a, b| a.since.cmp(&b.since)),
        }
        fields
    }

    /// MD5 of the ordered field list at `version`. Pin shipped versions in
    /// tests: a shipped layout must never change.
    pub fn fingerprint(&self, version: u32) -> String {
        let mut hasher = Md5::new();
        hasher.update(self.type_name.as_bytes());
        for f in self.stream_order(version) {
            hasher.update(format!("\n{}:{}", f.name, f.kind.tag()).as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Version tag followed by the current version's fields.
    pub fn write(&self, w: &mut GenericWriter, record: &Record) -> Result<(), PersistError> {
        let fields = self.stream_order(self.version);
        // Check everything before the first byte goes out.
        let mut values = Vec::with_capacity(fields.len());
        for f in &fields {
            let value = record
                .get(f.name)
                .ok_or_else(|| PersistError::MissingField(f.name.to_string()))?;
            if value.kind() != f.kind {
                return Err(PersistError::KindMismatch {
                    field: f.name.to_string(),
                    expected: f.kind,
                    found: value.kind(),
                });
            }
            values.push(value);
        }
        write_version_tag(w, self.encoding, self.version)?;
        for value in values {
            value.write(w);
        }
        Ok(())
    }

    /// Read a tagged stream of any known version and bring it up to the
    /// current shape. Fields newer than the stream get their declared
    /// defaults; retired fields the stream carried stay in the record for
    /// upgrade hooks.
    pub fn read(&self, r: &mut GenericReader) -> Result<Record, PersistError> {
        let version = read_version_tag(r, self.encoding, self.type_name, self.version)?;
        let mut record = self.read_fields(r, version)?;
        for f in self.fields() {
            if f.present_at(self.version) && !f.present_at(version) {
                record.set(f.name, f.default.clone());
            }
        }
        Ok(record)
    }

    /// Read the untagged body of a version-`version` stream.
    pub fn read_fields(&self, r: &mut GenericReader, version: u32) -> Result<Record, PersistError> {
        if version > self.version {
            return Err(PersistError::FormatMismatch {
                type_name: self.type_name.to_string(),
                found: version as i64,
                max: self.version,
            });
        }
        let mut record = Record::new(version);
        for f in self.stream_order(version) {
            record.set(f.name, FieldValue::read(f.kind, r)?);
        }
        Ok(record)
    }
}

/// Named field values for one object, tagged with the version they came from.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    version: u32,
    values: Vec<(&'static str, FieldValue)>,
}

macro_rules! record_getter {
    ($fn_name:ident, $variant:ident, $ty:ty) => {
        pub fn $fn_name(&self, name: &str) -> Result<$ty, PersistError> {
            match self.require(name)? {
                FieldValue::$variant(v) => Ok(v.clone()),
                other => Err(PersistError::KindMismatch {
                    field: name.to_string(),
                    expected: FieldKind::$variant,
                    found: other.kind(),
                }),
            }
        }
    };
}

impl Record {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            values: Vec::new(),
        }
    }

    /// Version of the stream this record was read from.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn with(mut self, name: &'static str, value: FieldValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &'static str, value: FieldValue) {
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn require(&self, name: &str) -> Result<&FieldValue, PersistError> {
        self.get(name)
            .ok_or_else(|| PersistError::MissingField(name.to_string()))
    }

    record_getter!(bool, Bool, bool);
    record_getter!(byte, Byte, u8);
    record_getter!(short, Short, i16);
    record_getter!(ushort, UShort, u16);
    record_getter!(int, Int, i32);
    record_getter!(uint, UInt, u32);
    record_getter!(encoded_int, EncodedInt, i32);
    record_getter!(long, Long, i64);
    record_getter!(double, Double, f64);
    record_getter!(string, String, Option<String>);
    record_getter!(date_time, DateTime, DateTime<Utc>);
    record_getter!(delta_time, DeltaTime, DateTime<Utc>);
    record_getter!(time_span, TimeSpan, TimeDelta);
    record_getter!(reference, Reference, Option<Serial>);
    record_getter!(references, ReferenceList, Vec<Serial>);
}
