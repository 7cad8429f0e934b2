//! Persistent content types.
//!
//! Each type here carries real version history: hand-written read ladders,
//! layout-driven records, compact version bytes with legacy streams, a base
//! layer that changed shape, and references resolved after load.

use crate::persistence::TypeRegistry;

/// Accessors every content type implements the same way.
macro_rules! persistent_common {
    () => {
        fn serial(&self) -> $crate::persistence::Serial {
            self.serial
        }

        fn type_name(&self) -> &'static str {
            <Self as $crate::persistence::PersistentType>::TYPE_NAME
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    };
}

pub mod citizen;
pub mod durable;
pub mod dye_tub;
pub mod keg;
pub mod township;

pub use citizen::Citizen;
pub use durable::Durable;
pub use dye_tub::DyeTubCharged;
pub use keg::PotionKeg;
pub use township::{TownshipDoor, TownshipStatic};

/// World registry holding every township item.
pub const TOWNSHIP_ITEMS: &str = "township_items";

/// Register every content type with `registry`.
pub fn register_all(registry: &mut TypeRegistry) {
    registry
        .register::<Durable>()
        .register::<PotionKeg>()
        .register::<Citizen>()
        .register::<TownshipStatic>()
        .register::<TownshipDoor>()
        .register::<DyeTubCharged>();
}

/// A registry with every content type.
pub fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    register_all(&mut registry);
    registry
}
