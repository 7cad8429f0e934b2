use chrono::{DateTime, TimeDelta, Utc};
use shardkeep::config::PersistConfig;
use shardkeep::content::{
    self, Citizen, Durable, DyeTubCharged, PotionKeg, TownshipDoor, TownshipStatic, TOWNSHIP_ITEMS,
};
use shardkeep::persistence::{
    decode_world, encode_world, DanglingPolicy, GenericReader, GenericWriter, LoadContext,
    LoadOptions, PersistError, Persistent, PersistentType, SaveOptions, SaveStrategy, Serial,
    TypeRegistry, WorldFile, WorldState, WorldStore,
};

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

/// A small world where every door is saved before its owner.
fn sample_world(now: DateTime<Utc>) -> WorldState {
    let mut world = WorldState::new();

    let mut durable = Durable::new(Serial(0x01), 40);
    durable.damage(5, now - TimeDelta::days(1));
    world.add(Box::new(durable)).unwrap();
    world.add(Box::new(PotionKeg::new(Serial(0x02), 4, 60))).unwrap();
    world.add(Box::new(DyeTubCharged::new(Serial(0x03), 12))).unwrap();

    let mut wall = TownshipStatic::new(Serial(0x04), 500);
    wall.hit_points = 321;
    wall.last_damage = now - TimeDelta::hours(6);
    world.add(Box::new(wall)).unwrap();

    world.add(Box::new(TownshipDoor::new(Serial(0x05), 0x1234))).unwrap();
    world.add(Box::new(TownshipDoor::new(Serial(0x06), 0x5678))).unwrap();
    world
        .add(Box::new(Citizen::new(Serial(0x20), "Iolo", now - TimeDelta::minutes(30))))
        .unwrap();
    TownshipDoor::set_owner(&mut world, Serial(0x05), Some(Serial(0x20)));
    TownshipDoor::set_owner(&mut world, Serial(0x06), Some(Serial(0x20)));
    world
}

#[test]
fn test_world_roundtrip_resolves_owners() {
    let now = at(1_700_000_000);
    let world = sample_world(now);
    let bytes = encode_world(&world, &SaveOptions::default(), now).unwrap();

    let (loaded, report) =
        decode_world(&bytes, &content::registry(), &LoadOptions::default(), now).unwrap();
    assert_eq!(report.loaded, 7);
    assert!(report.skipped.is_empty());
    assert_eq!(report.validations_run, 2);
    assert_eq!(report.dangling_dropped, 0);

    let citizen = loaded.get_as::<Citizen>(Serial(0x20)).unwrap();
    assert_eq!(citizen.doors(), &[Serial(0x05), Serial(0x06)]);
    assert_eq!(citizen.last_change, now - TimeDelta::minutes(30));
    assert_eq!(
        loaded.get_as::<TownshipDoor>(Serial(0x05)).unwrap().owner(),
        Some(Serial(0x20))
    );

    assert_eq!(
        loaded.registry(TOWNSHIP_ITEMS),
        vec![Serial(0x04), Serial(0x05), Serial(0x06)]
    );
    assert_eq!(
        loaded.get_as::<TownshipStatic>(Serial(0x04)).unwrap(),
        world.get_as::<TownshipStatic>(Serial(0x04)).unwrap()
    );
    assert_eq!(
        loaded.get_as::<Durable>(Serial(0x01)).unwrap(),
        world.get_as::<Durable>(Serial(0x01)).unwrap()
    );
}

#[test]
fn test_delta_times_shift_with_downtime() {
    let saved = at(1_700_000_000);
    let world = sample_world(saved);
    let bytes = encode_world(&world, &SaveOptions::default(), saved).unwrap();

    let later = saved + TimeDelta::hours(12);
    let (loaded, _) =
        decode_world(&bytes, &content::registry(), &LoadOptions::default(), later).unwrap();

    // Delta fields move with the clock, absolute ones do not.
    let wall = loaded.get_as::<TownshipStatic>(Serial(0x04)).unwrap();
    assert_eq!(wall.last_damage, later - TimeDelta::hours(6));
    let durable = loaded.get_as::<Durable>(Serial(0x01)).unwrap();
    assert_eq!(durable.last_damage, saved - TimeDelta::days(1));
}

#[test]
fn test_parallel_save_matches_standard() {
    let now = at(1_700_000_000);
    let world = sample_world(now);
    for compress in [true, false] {
        let standard = encode_world(
            &world,
            &SaveOptions { strategy: SaveStrategy::Standard, compress },
            now,
        )
        .unwrap();
        let parallel = encode_world(
            &world,
            &SaveOptions { strategy: SaveStrategy::Parallel, compress },
            now,
        )
        .unwrap();
        assert_eq!(standard, parallel);
    }
}

#[test]
fn test_objects_saved_in_serial_order() {
    let now = at(1_700_000_000);
    let bytes = encode_world(&sample_world(now), &SaveOptions::default(), now).unwrap();
    let file = WorldFile::parse(&bytes).unwrap();
    let serials: Vec<u32> = file.entries.iter().map(|e| e.serial.0).collect();
    assert_eq!(serials, vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x20]);
    assert_eq!(file.type_name(&file.entries[6]), Some("Citizen"));
}

#[test]
fn test_deleted_owner_saves_ownerless_doors() {
    let now = at(1_700_000_000);
    let mut world = sample_world(now);
    world.delete(Serial(0x20));
    assert_eq!(world.get_as::<TownshipDoor>(Serial(0x05)).unwrap().owner(), None);

    let bytes = encode_world(&world, &SaveOptions::default(), now).unwrap();
    let (loaded, report) =
        decode_world(&bytes, &content::registry(), &LoadOptions::default(), now).unwrap();
    assert_eq!(report.validations_run, 0);
    assert_eq!(report.dangling_dropped, 0);
    assert_eq!(loaded.get_as::<TownshipDoor>(Serial(0x06)).unwrap().owner(), None);
}

#[test]
fn test_missing_owner_policy() {
    let now = at(1_700_000_000);
    let bytes = encode_world(&sample_world(now), &SaveOptions::default(), now).unwrap();

    // Citizens are unknown to this registry, so every owner dangles.
    let mut registry = TypeRegistry::new();
    registry.register::<TownshipStatic>();
    registry.register::<TownshipDoor>();

    let (loaded, report) =
        decode_world(&bytes, &registry, &LoadOptions::default(), now).unwrap();
    assert_eq!(report.dangling_dropped, 2);
    assert!(!loaded.contains(Serial(0x20)));
    assert_eq!(loaded.get_as::<TownshipDoor>(Serial(0x05)).unwrap().owner(), None);

    let strict = LoadOptions {
        dangling_policy: DanglingPolicy::Fail,
        ..LoadOptions::default()
    };
    assert!(matches!(
        decode_world(&bytes, &registry, &strict, now),
        Err(PersistError::DanglingReference { target: Serial(0x20), .. })
    ));
}

#[test]
fn test_bad_object_skipped_rest_loads() {
    let now = at(1_700_000_000);
    let world = sample_world(now);
    let bytes = encode_world(&world, &SaveOptions::default(), now).unwrap();

    // A registry that decodes kegs as dye tubs: the keg's first byte (i32
    // version 1, low byte 0x01) reads as an untagged tub and leaves bytes over.
    let mut registry = content::registry();
    registry.register::<KegAsTub>();

    let (loaded, report) =
        decode_world(&bytes, &registry, &LoadOptions::default(), now).unwrap();
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].serial, Serial(0x02));
    assert!(report.skipped[0].reason.contains("Bad serialize"));
    assert!(!loaded.contains(Serial(0x02)));
    assert_eq!(report.loaded, 6);

    // Lenient length checking keeps the misread object.
    let lenient = LoadOptions {
        strict_length: false,
        ..LoadOptions::default()
    };
    let (loaded, report) = decode_world(&bytes, &registry, &lenient, now).unwrap();
    assert!(report.skipped.is_empty());
    assert!(loaded.contains(Serial(0x02)));
}

/// Registered under the keg's name but reads a dye tub's fields.
struct KegAsTub(DyeTubCharged);

impl Persistent for KegAsTub {
    fn serial(&self) -> Serial {
        self.0.serial()
    }
    fn type_name(&self) -> &'static str {
        "PotionKeg"
    }
    fn serialize(&self, writer: &mut GenericWriter) -> Result<(), PersistError> {
        self.0.serialize(writer)
    }
    fn deserialize(
        &mut self,
        reader: &mut GenericReader,
        ctx: &mut LoadContext,
    ) -> Result<(), PersistError> {
        self.0.deserialize(reader, ctx)
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl PersistentType for KegAsTub {
    const TYPE_NAME: &'static str = "PotionKeg";
    fn construct(serial: Serial) -> Self {
        Self(DyeTubCharged::construct(serial))
    }
}

#[test]
fn test_unknown_type_skipped() {
    let now = at(1_700_000_000);
    let bytes = encode_world(&sample_world(now), &SaveOptions::default(), now).unwrap();
    let mut registry = TypeRegistry::new();
    registry.register::<Durable>();

    let (loaded, report) =
        decode_world(&bytes, &registry, &LoadOptions::default(), now).unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(report.skipped.len(), 6);
    // Doors that never loaded queue nothing.
    assert_eq!(report.validations_run, 0);
}

#[test]
fn test_store_roundtrip_on_disk() {
    let dir = std::env::temp_dir().join(format!("shardkeep_it_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let config = PersistConfig::from_str(&format!(
        "save_dir: \"{}\"\nstrategy: parallel\n",
        dir.display()
    ))
    .unwrap();
    let store = WorldStore::new(&config, content::registry());

    let now = Utc::now();
    let world = sample_world(now);
    let summary = store.save(&world).unwrap();
    assert_eq!(summary.objects, 7);

    let (loaded, report) = store.load().unwrap();
    assert_eq!(report.loaded, 7);
    assert_eq!(
        loaded.get_as::<Citizen>(Serial(0x20)).unwrap().doors(),
        &[Serial(0x05), Serial(0x06)]
    );
    let _ = std::fs::remove_dir_all(&dir);
}
