use std::sync::OnceLock;

use chrono::{DateTime, Utc};

use crate::persistence::{
    FieldKind, FieldValue, GenericReader, GenericWriter, Layer, Layout, LoadContext, Persistent,
    PersistentType, PersistError, Record, Serial, VersionEncoding,
};
use crate::persistence::time;
use crate::persistence::WorldState;

use super::township::TownshipDoor;

static LAYOUT: OnceLock<Layout> = OnceLock::new();

fn build_layout() -> Result<Layout, PersistError> {
    Layout::builder(Citizen::TYPE_NAME, VersionEncoding::FullInt, Citizen::VERSION)
        .layer(
            Layer::new("mobile")
                .field("name", FieldKind::String, 0)
                .field("hits", FieldKind::Int, 0),
        )
        .layer(Layer::new("citizen").field("last_change", FieldKind::DeltaTime, 1))
        .build()
}

/// Mobile that owns township doors.
///
/// The door list is not saved. Each door stores its owner and re-adds itself
/// here once the whole world has loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Citizen {
    serial: Serial,
    pub name: Option<String>,
    pub hits: i32,
    /// Last time the citizen's holdings changed
    pub last_change: DateTime<Utc>,
    doors: Vec<Serial>,
}

impl Citizen {
    pub const VERSION: u32 = 1;

    pub fn layout() -> Result<&'static Layout, PersistError> {
        Layout::cached(&LAYOUT, build_layout)
    }

    pub fn new(serial: Serial, name: &str, now: DateTime<Utc>) -> Self {
        Self {
            name: Some(name.to_string()),
            last_change: now,
            ..Self::construct(serial)
        }
    }

    pub fn doors(&self) -> &[Serial] {
        &self.doors
    }

    pub fn add_door(&mut self, door: Serial) {
        if !self.doors.contains(&door) {
            self.doors.push(door);
        }
    }

    pub fn remove_door(&mut self, door: Serial) {
        self.doors.retain(|d| *d != door);
    }
}

impl PersistentType for Citizen {
    const TYPE_NAME: &'static str = "Citizen";

    fn construct(serial: Serial) -> Self {
        Self {
            serial,
            name: None,
            hits: 0,
            last_change: time::min_time(),
            doors: Vec::new(),
        }
    }
}

impl Persistent for Citizen {
    persistent_common!();

    fn serialize(&self, writer: &mut GenericWriter) -> Result<(), PersistError> {
        let record = Record::new(Self::VERSION)
            .with("name", FieldValue::String(self.name.clone()))
            .with("hits", FieldValue::Int(self.hits))
            .with("last_change", FieldValue::DeltaTime(self.last_change));
        Self::layout()?.write(writer, &record)
    }

    fn deserialize(
        &mut self,
        reader: &mut GenericReader,
        _ctx: &mut LoadContext,
    ) -> Result<(), PersistError> {
        let record = Self::layout()?.read(reader)?;
        self.name = record.string("name")?;
        self.hits = record.int("hits")?;
        // v0 never tracked changes; treat the load as the last change
        self.last_change = if record.version() >= 1 {
            record.delta_time("last_change")?
        } else {
            reader.now()
        };
        Ok(())
    }

    fn on_delete(&self, world: &mut WorldState) {
        for door in &self.doors {
            if let Some(d) = world.get_mut_as::<TownshipDoor>(*door) {
                d.clear_owner();
            }
        }
    }
}
