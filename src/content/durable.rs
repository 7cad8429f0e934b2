use chrono::{DateTime, Utc};

use crate::persistence::time;
use crate::persistence::version::read_version_tag;
use crate::persistence::{
    GenericReader, GenericWriter, LoadContext, Persistent, PersistentType, PersistError, Serial,
    VersionEncoding,
};

/// Item that wears down and gets repaired.
///
/// Stream, newest group first:
///   v2: last_repair
///   v1: last_damage
///   v0: hits
#[derive(Debug, Clone, PartialEq)]
pub struct Durable {
    serial: Serial,
    pub hits: i32,
    pub last_damage: DateTime<Utc>,
    pub last_repair: DateTime<Utc>,
}

impl Durable {
    pub const VERSION: u32 = 2;

    pub fn new(serial: Serial, hits: i32) -> Self {
        Self {
            hits,
            ..Self::construct(serial)
        }
    }

    pub fn damage(&mut self, amount: i32, at: DateTime<Utc>) {
        self.hits = (self.hits - amount).max(0);
        self.last_damage = at;
    }

    pub fn repair(&mut self, hits: i32, at: DateTime<Utc>) {
        self.hits = hits;
        self.last_repair = at;
    }
}

impl PersistentType for Durable {
    const TYPE_NAME: &'static str = "Durable";

    fn construct(serial: Serial) -> Self {
        Self {
            serial,
            hits: 0,
            last_damage: time::min_time(),
            last_repair: time::min_time(),
        }
    }
}

impl Persistent for Durable {
    persistent_common!();

    fn serialize(&self, writer: &mut GenericWriter) -> Result<(), PersistError> {
        writer.write_version(Self::VERSION)?;
        writer.write_date_time(self.last_repair);
        writer.write_date_time(self.last_damage);
        writer.write_int(self.hits);
        Ok(())
    }

    fn deserialize(
        &mut self,
        reader: &mut GenericReader,
        _ctx: &mut LoadContext,
    ) -> Result<(), PersistError> {
        let version = read_version_tag(
            reader,
            VersionEncoding::FullInt,
            Self::TYPE_NAME,
            Self::VERSION,
        )?;

        // Never repaired before v2
        self.last_repair = if version >= 2 {
            reader.read_date_time()?
        } else {
            time::min_time()
        };
        self.last_damage = if version >= 1 {
            reader.read_date_time()?
        } else {
            time::min_time()
        };
        self.hits = reader.read_int()?;
        Ok(())
    }
}
