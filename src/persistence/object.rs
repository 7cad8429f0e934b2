use std::any::Any;
use std::fmt;

use super::error::PersistError;
use super::reader::GenericReader;
use super::validation::Validation;
use super::world::WorldState;
use super::writer::GenericWriter;

/// World-unique identity of a persistent object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Serial(pub u32);

impl Serial {
    /// Wire value for "no object".
    pub const NONE_RAW: u32 = u32::MAX;
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Anything that must survive a world save.
///
/// `serialize` and `deserialize` must write and read the same fields in the
/// same order; the stream carries no per-field tags.
pub trait Persistent: Send + Sync + 'static {
    fn serial(&self) -> Serial;

    fn type_name(&self) -> &'static str;

    fn serialize(&self, writer: &mut GenericWriter) -> Result<(), PersistError>;

    /// First-pass decode. References to other objects go through
    /// [`LoadContext::defer`]; the target may not exist yet.
    fn deserialize(
        &mut self,
        reader: &mut GenericReader,
        ctx: &mut LoadContext,
    ) -> Result<(), PersistError>;

    /// Names of the world registries this object belongs to.
    fn registries(&self) -> &'static [&'static str] {
        &[]
    }

    /// Called by [`WorldState::delete`] after the object has left the world.
    /// Release it from whatever other objects hold it.
    fn on_delete(&self, _world: &mut WorldState) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Static half of [`Persistent`]: the type's stable name and its
/// deserialization constructor.
pub trait PersistentType: Persistent + Sized {
    const TYPE_NAME: &'static str;

    /// Empty shell for the given serial; `deserialize` fills it in.
    fn construct(serial: Serial) -> Self;
}

/// Per-object state handed to [`Persistent::deserialize`].
///
/// Deferred validations are held here until the object decodes
/// successfully; an object that fails to load takes its deferrals with it.
pub struct LoadContext {
    serial: Serial,
    deferred: Vec<(&'static str, Validation)>,
}

impl LoadContext {
    pub fn new(serial: Serial) -> Self {
        Self {
            serial,
            deferred: Vec::new(),
        }
    }

    /// Serial of the object being decoded.
    pub fn serial(&self) -> Serial {
        self.serial
    }

    /// Queue `f` to run after every object in the world has been decoded.
    pub fn defer<F>(&mut self, type_name: &'static str, f: F)
    where
        F: FnOnce(&mut WorldState) -> Result<(), PersistError> + Send + 'static,
    {
        self.deferred.push((type_name, Box::new(f)));
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    pub(crate) fn into_deferred(self) -> Vec<(&'static str, Validation)> {
        self.deferred
    }
}

/// Serialize `obj` into a standalone buffer.
pub fn to_bytes(
    obj: &dyn Persistent,
    mut writer: GenericWriter,
) -> Result<bytes::Bytes, PersistError> {
    obj.serialize(&mut writer)?;
    Ok(writer.into_bytes())
}
