use crate::persistence::version::{read_version_tag, write_version_tag};
use crate::persistence::{
    GenericReader, GenericWriter, LoadContext, Persistent, PersistentType, PersistError, Serial,
    VersionEncoding,
};

/// Dye tub with a limited number of uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyeTubCharged {
    serial: Serial,
    pub charges: i32,
    /// Whether the tub's hue can be changed. Always true before v1.
    pub redyable: bool,
}

impl DyeTubCharged {
    pub const VERSION: u32 = 1;

    pub fn new(serial: Serial, charges: i32) -> Self {
        Self {
            charges,
            ..Self::construct(serial)
        }
    }

    /// Use one charge. Returns false once the tub is empty.
    pub fn consume(&mut self) -> bool {
        if self.charges <= 0 {
            return false;
        }
        self.charges -= 1;
        true
    }
}

impl PersistentType for DyeTubCharged {
    const TYPE_NAME: &'static str = "DyeTubCharged";

    fn construct(serial: Serial) -> Self {
        Self {
            serial,
            charges: 0,
            redyable: true,
        }
    }
}

impl Persistent for DyeTubCharged {
    persistent_common!();

    fn serialize(&self, writer: &mut GenericWriter) -> Result<(), PersistError> {
        write_version_tag(writer, VersionEncoding::CompactByte, Self::VERSION)?;
        writer.write_bool(self.redyable);
        writer.write_int(self.charges);
        Ok(())
    }

    fn deserialize(
        &mut self,
        reader: &mut GenericReader,
        _ctx: &mut LoadContext,
    ) -> Result<(), PersistError> {
        let version = read_version_tag(
            reader,
            VersionEncoding::CompactByte,
            Self::TYPE_NAME,
            Self::VERSION,
        )?;
        self.redyable = if version >= 1 { reader.read_bool()? } else { true };
        self.charges = reader.read_int()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::to_bytes;

    fn decode(bytes: &'static [u8]) -> Result<DyeTubCharged, PersistError> {
        let mut tub = DyeTubCharged::construct(Serial(3));
        tub.deserialize(
            &mut GenericReader::new(bytes::Bytes::from_static(bytes)),
            &mut LoadContext::new(Serial(3)),
        )?;
        Ok(tub)
    }

    #[test]
    fn test_wire_bytes() {
        let mut tub = DyeTubCharged::new(Serial(3), 10);
        tub.redyable = false;
        let bytes = to_bytes(&tub, GenericWriter::new()).unwrap();
        assert_eq!(&bytes[..], &[0x81, 0x00, 0x0A, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_roundtrip() {
        let mut tub = DyeTubCharged::new(Serial(3), 25);
        tub.redyable = false;
        let bytes = to_bytes(&tub, GenericWriter::new()).unwrap();
        let mut loaded = DyeTubCharged::construct(Serial(3));
        loaded
            .deserialize(&mut GenericReader::new(bytes), &mut LoadContext::new(Serial(3)))
            .unwrap();
        assert_eq!(loaded, tub);
    }

    #[test]
    fn test_v0_defaults_redyable() {
        let tub = decode(&[0x80, 0x05, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(tub.charges, 5);
        assert!(tub.redyable);
    }

    #[test]
    fn test_untagged_stream_reads_as_v0() {
        let tub = decode(&[0x07, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(tub.charges, 7);
        assert!(tub.redyable);
    }

    #[test]
    fn test_future_version() {
        assert!(matches!(
            decode(&[0x82, 0x01, 0x05, 0x00, 0x00, 0x00]),
            Err(PersistError::FormatMismatch { found: 2, max: 1, .. })
        ));
    }

    #[test]
    fn test_consume() {
        let mut tub = DyeTubCharged::new(Serial(3), 1);
        assert!(tub.consume());
        assert!(!tub.consume());
        assert_eq!(tub.charges, 0);
    }
}
