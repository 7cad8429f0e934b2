//! Township items: placeable statics and lockable doors.
//!
//! Both use a one-byte version tag. Streams written before the tag existed
//! start directly with the first field and read as version 0; that only
//! works while the first byte of such a stream stays below 0x80.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};

use super::citizen::Citizen;
use super::TOWNSHIP_ITEMS;
use crate::persistence::time;
use crate::persistence::version::check_version;
use crate::persistence::{
    CompactVersion, FieldKind, FieldValue, GenericReader, GenericWriter, Layer, Layout,
    LoadContext, Persistent, PersistentType, PersistError, Record, Serial, VersionEncoding,
    WorldState,
};

/// Max hit points of a static placed before they were tracked.
pub const DEFAULT_MAX_HIT_POINTS: i16 = 100;

/// Lock level given to doors that were locked before lock levels existed.
pub const LEGACY_LOCK_LEVEL: i32 = 50;

/// Max lock level given to doors that were locked before lock levels existed.
pub const LEGACY_MAX_LOCK_LEVEL: i32 = 100;

// ── TownshipStatic ───────────────────────────────────────────────────────────

/// Stream, newest group first:
///   v2: last_damage (delta)
///   v1: max_hit_points
///   v0: hit_points (also the untagged legacy stream)
#[derive(Debug, Clone, PartialEq)]
pub struct TownshipStatic {
    serial: Serial,
    pub hit_points: i16,
    pub max_hit_points: i16,
    pub last_damage: DateTime<Utc>,
}

impl TownshipStatic {
    pub const VERSION: u32 = 2;

    pub fn new(serial: Serial, max_hit_points: i16) -> Self {
        Self {
            hit_points: max_hit_points,
            max_hit_points,
            ..Self::construct(serial)
        }
    }
}

impl PersistentType for TownshipStatic {
    const TYPE_NAME: &'static str = "TownshipStatic";

    fn construct(serial: Serial) -> Self {
        Self {
            serial,
            hit_points: DEFAULT_MAX_HIT_POINTS,
            max_hit_points: DEFAULT_MAX_HIT_POINTS,
            last_damage: time::min_time(),
        }
    }
}

impl Persistent for TownshipStatic {
    persistent_common!();

    fn serialize(&self, writer: &mut GenericWriter) -> Result<(), PersistError> {
        writer.write_compact_version(CompactVersion::new(Self::VERSION)?);
        writer.write_delta_time(self.last_damage);
        writer.write_short(self.max_hit_points);
        writer.write_short(self.hit_points);
        Ok(())
    }

    fn deserialize(
        &mut self,
        reader: &mut GenericReader,
        _ctx: &mut LoadContext,
    ) -> Result<(), PersistError> {
        let found = reader.read_compact_version()?;
        let version = check_version(Self::TYPE_NAME, found as i64, Self::VERSION)?;

        self.last_damage = if version >= 2 {
            reader.read_delta_time()?
        } else {
            time::min_time()
        };
        let max_hit_points = if version >= 1 {
            Some(reader.read_short()?)
        } else {
            None
        };
        self.hit_points = reader.read_short()?;
        self.max_hit_points =
            max_hit_points.unwrap_or_else(|| self.hit_points.max(DEFAULT_MAX_HIT_POINTS));
        Ok(())
    }

    fn registries(&self) -> &'static [&'static str] {
        &[TOWNSHIP_ITEMS]
    }
}

// ── TownshipDoor ─────────────────────────────────────────────────────────────

static DOOR_LAYOUT: OnceLock<Layout> = OnceLock::new();

/// v0 doors derived from a plain door with an auto-close flag; v2 moved them
/// onto a lockpickable base that dropped it.
fn build_door_layout() -> Result<Layout, PersistError> {
    Layout::builder(
        TownshipDoor::TYPE_NAME,
        VersionEncoding::CompactByte,
        TownshipDoor::VERSION,
    )
    .layer(
        Layer::new("door")
            .field("locked", FieldKind::Bool, 0)
            .field("key_value", FieldKind::UInt, 0)
            .retired("auto_close", FieldKind::Bool, 0, 2),
    )
    .layer(
        Layer::new("lockpickable")
            .field("lock_level", FieldKind::Int, 2)
            .field("max_lock_level", FieldKind::Int, 2),
    )
    .layer(Layer::new("township_door").field("owner", FieldKind::Reference, 1))
    .build()
}

#[derive(Debug, Clone, PartialEq)]
pub struct TownshipDoor {
    serial: Serial,
    pub locked: bool,
    pub key_value: u32,
    pub lock_level: i32,
    pub max_lock_level: i32,
    owner: Option<Serial>,
}

impl TownshipDoor {
    pub const VERSION: u32 = 2;

    pub fn layout() -> Result<&'static Layout, PersistError> {
        Layout::cached(&DOOR_LAYOUT, build_door_layout)
    }

    pub fn new(serial: Serial, key_value: u32) -> Self {
        Self {
            key_value,
            ..Self::construct(serial)
        }
    }

    pub fn owner(&self) -> Option<Serial> {
        self.owner
    }

    /// Hand the door to `citizen`, releasing it from any previous owner.
    ///
    /// Returns false and changes nothing unless `door` is a live door and
    /// `citizen`, when given, is a live citizen.
    pub fn set_owner(world: &mut WorldState, door: Serial, citizen: Option<Serial>) -> bool {
        let Some(previous) = world.get_as::<TownshipDoor>(door).map(|d| d.owner) else {
            return false;
        };
        if let Some(new_owner) = citizen {
            if world.get_as::<Citizen>(new_owner).is_none() {
                return false;
            }
        }
        if let Some(prev) = previous {
            if let Some(c) = world.get_mut_as::<Citizen>(prev) {
                c.remove_door(door);
            }
        }
        if let Some(new_owner) = citizen {
            if let Some(c) = world.get_mut_as::<Citizen>(new_owner) {
                c.add_door(door);
            }
        }
        if let Some(d) = world.get_mut_as::<TownshipDoor>(door) {
            d.owner = citizen;
        }
        true
    }

    /// Forget the owner without touching the owner's door list.
    pub(crate) fn clear_owner(&mut self) {
        self.owner = None;
    }

    fn to_record(&self) -> Record {
        Record::new(Self::VERSION)
            .with("locked", FieldValue::Bool(self.locked))
            .with("key_value", FieldValue::UInt(self.key_value))
            .with("lock_level", FieldValue::Int(self.lock_level))
            .with("max_lock_level", FieldValue::Int(self.max_lock_level))
            .with("owner", FieldValue::Reference(self.owner))
    }
}

/// Second pass: attach the door to its owner, or drop the reference.
fn resolve_owner(world: &mut WorldState, door: Serial, owner: Serial) -> Result<(), PersistError> {
    match world.get_mut_as::<Citizen>(owner) {
        Some(citizen) => {
            citizen.add_door(door);
            Ok(())
        }
        None => {
            if let Some(d) = world.get_mut_as::<TownshipDoor>(door) {
                d.owner = None;
            }
            Err(PersistError::DanglingReference {
                source_serial: door,
                target: owner,
            })
        }
    }
}

impl PersistentType for TownshipDoor {
    const TYPE_NAME: &'static str = "TownshipDoor";

    fn construct(serial: Serial) -> Self {
        Self {
            serial,
            locked: false,
            key_value: 0,
            lock_level: 0,
            max_lock_level: 0,
            owner: None,
        }
    }
}

impl Persistent for TownshipDoor {
    persistent_common!();

    fn serialize(&self, writer: &mut GenericWriter) -> Result<(), PersistError> {
        Self::layout()?.write(writer, &self.to_record())
    }

    fn deserialize(
        &mut self,
        reader: &mut GenericReader,
        ctx: &mut LoadContext,
    ) -> Result<(), PersistError> {
        let record = Self::layout()?.read(reader)?;
        self.locked = record.bool("locked")?;
        self.key_value = record.uint("key_value")?;
        self.lock_level = record.int("lock_level")?;
        self.max_lock_level = record.int("max_lock_level")?;
        self.owner = record.reference("owner")?;

        if record.version() < 2 {
            // Auto-closing doors could not be locked
            if record.bool("auto_close")? {
                self.locked = false;
            }
            if self.locked {
                self.lock_level = LEGACY_LOCK_LEVEL;
                self.max_lock_level = LEGACY_MAX_LOCK_LEVEL;
            }
        }

        if let Some(owner) = self.owner {
            let door = ctx.serial();
            ctx.defer(Self::TYPE_NAME, move |world| resolve_owner(world, door, owner));
        }
        Ok(())
    }

    fn registries(&self) -> &'static [&'static str] {
        &[TOWNSHIP_ITEMS]
    }

    fn on_delete(&self, world: &mut WorldState) {
        if let Some(owner) = self.owner {
            if let Some(c) = world.get_mut_as::<Citizen>(owner) {
                c.remove_door(self.serial);
            }
        }
    }
}
