use std::sync::OnceLock;

use crate::persistence::{
    FieldKind, FieldValue, GenericReader, GenericWriter, Layer, Layout, LoadContext, Persistent,
    PersistentType, PersistError, Record, Serial, VersionEncoding,
};

/// Weight of a keg. Kegs saved before v1 carried the generic item weight.
pub const KEG_WEIGHT: f64 = 20.0;

/// Generic item weight that v0 kegs stored implicitly.
const LEGACY_WEIGHT: f64 = 1.0;

/// Most potions a keg holds.
pub const MAX_HELD: i32 = 100;

static LAYOUT: OnceLock<Layout> = OnceLock::new();

fn build_layout() -> Result<Layout, PersistError> {
    Layout::builder(PotionKeg::TYPE_NAME, VersionEncoding::FullInt, PotionKeg::VERSION)
        .layer(
            Layer::new("potion_keg")
                .field("held", FieldKind::Int, 0)
                .field("potion", FieldKind::Int, 0)
                .field_default("weight", 1, FieldValue::Double(LEGACY_WEIGHT)),
        )
        .build()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PotionKeg {
    serial: Serial,
    pub held: i32,
    /// Potion effect id
    pub potion: i32,
    pub weight: f64,
}

impl PotionKeg {
    pub const VERSION: u32 = 1;

    pub fn layout() -> Result<&'static Layout, PersistError> {
        Layout::cached(&LAYOUT, build_layout)
    }

    pub fn new(serial: Serial, potion: i32, held: i32) -> Self {
        Self {
            potion,
            held: held.clamp(0, MAX_HELD),
            ..Self::construct(serial)
        }
    }

    fn to_record(&self) -> Record {
        Record::new(Self::VERSION)
            .with("held", FieldValue::Int(self.held))
            .with("potion", FieldValue::Int(self.potion))
            .with("weight", FieldValue::Double(self.weight))
    }
}

impl PersistentType for PotionKeg {
    const TYPE_NAME: &'static str = "PotionKeg";

    fn construct(serial: Serial) -> Self {
        Self {
            serial,
            held: 0,
            potion: 0,
            weight: KEG_WEIGHT,
        }
    }
}

impl Persistent for PotionKeg {
    persistent_common!();

    fn serialize(&self, writer: &mut GenericWriter) -> Result<(), PersistError> {
        Self::layout()?.write(writer, &self.to_record())
    }

    fn deserialize(
        &mut self,
        reader: &mut GenericReader,
        _ctx: &mut LoadContext,
    ) -> Result<(), PersistError> {
        let record = Self::layout()?.read(reader)?;
        self.held = record.int("held")?;
        self.potion = record.int("potion")?;
        self.weight = record.double("weight")?;

        if self.weight == LEGACY_WEIGHT {
            self.weight = KEG_WEIGHT;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{to_bytes, FieldKind};

    fn decode(bytes: bytes::Bytes) -> Result<PotionKeg, PersistError> {
        let mut keg = PotionKeg::construct(Serial(2));
        keg.deserialize(&mut GenericReader::new(bytes), &mut LoadContext::new(Serial(2)))?;
        Ok(keg)
    }

    #[test]
    fn test_roundtrip() {
        let mut keg = PotionKeg::new(Serial(2), 7, 42);
        keg.weight = 25.5;
        let bytes = to_bytes(&keg, GenericWriter::new()).unwrap();
        // version, weight, held, potion
        assert_eq!(bytes.len(), 4 + 8 + 4 + 4);
        assert_eq!(&bytes[..4], &1i32.to_le_bytes());
        assert_eq!(decode(bytes).unwrap(), keg);
    }

    #[test]
    fn test_v0_keg_gets_keg_weight() {
        let mut w = GenericWriter::new();
        w.write_version(0).unwrap();
        w.write_int(10);
        w.write_int(3);

        let keg = decode(w.into_bytes()).unwrap();
        assert_eq!(keg.held, 10);
        assert_eq!(keg.potion, 3);
        assert_eq!(keg.weight, KEG_WEIGHT);
    }

    #[test]
    fn test_stored_legacy_weight_repaired() {
        let mut keg = PotionKeg::new(Serial(2), 1, 1);
        keg.weight = 1.0;
        let bytes = to_bytes(&keg, GenericWriter::new()).unwrap();
        assert_eq!(decode(bytes).unwrap().weight, KEG_WEIGHT);
    }

    #[test]
    fn test_held_clamped() {
        assert_eq!(PotionKeg::new(Serial(2), 0, 500).held, MAX_HELD);
        assert_eq!(PotionKeg::new(Serial(2), 0, -1).held, 0);
    }

    #[test]
    fn test_layout_pinned() {
        let layout = PotionKeg::layout().unwrap();
        let v1: Vec<_> = layout.stream_order(1).iter().map(|f| (f.name, f.kind)).collect();
        assert_eq!(
            v1,
            vec![
                ("weight", FieldKind::Double),
                ("held", FieldKind::Int),
                ("potion", FieldKind::Int)
            ]
        );
        // Shipped versions; these must never change.
        assert_eq!(layout.fingerprint(0), "32608e7c76ec5f95d80c470de818d26a");
        assert_eq!(layout.fingerprint(1), "baa7bcd7d0f4ea6b0ad70b2c0a31863d");
    }
}
