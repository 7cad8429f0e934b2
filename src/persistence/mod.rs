//! Versioned object persistence.
//!
//! Every persistent type writes a version tag followed by its fields, newest
//! first, and reads them back through a waterfall: the reader starts at the
//! stream's version and falls through to the oldest, filling defaults for
//! anything the stream predates.

pub mod error;
pub mod layout;
pub mod object;
pub mod reader;
pub mod registry;
pub mod store;
pub mod time;
pub mod validation;
pub mod version;
pub mod world;
pub mod writer;

pub use error::PersistError;
pub use layout::{FieldDescriptor, FieldKind, FieldOrder, FieldValue, Layer, Layout, Record};
pub use object::{to_bytes, LoadContext, Persistent, PersistentType, Serial};
pub use reader::GenericReader;
pub use registry::TypeRegistry;
pub use store::{
    decode_world, encode_world, LoadOptions, LoadReport, SaveOptions, SaveStrategy, WorldFile,
    WorldStore,
};
pub use validation::{DanglingPolicy, ValidationQueue};
pub use version::{CompactVersion, VersionEncoding};
pub use world::WorldState;
pub use writer::GenericWriter;
