use std::collections::HashMap;

use super::object::{Persistent, PersistentType, Serial};

/// Builds an empty shell of a type for the loader to deserialize into.
pub type Constructor = fn(Serial) -> Box<dyn Persistent>;

fn construct_boxed<T: PersistentType>(serial: Serial) -> Box<dyn Persistent> {
    Box::new(T::construct(serial))
}

/// Type name → constructor, used to pick the decode routine for each entry
/// of a world file.
#[derive(Default, Clone)]
pub struct TypeRegistry {
    constructors: HashMap<&'static str, Constructor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: PersistentType>(&mut self) -> &mut Self {
        if self
            .constructors
            .insert(T::TYPE_NAME, construct_boxed::<T>)
            .is_some()
        {
            tracing::warn!("[registry] type {} registered twice", T::TYPE_NAME);
        }
        self
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    pub fn construct(&self, type_name: &str, serial: Serial) -> Option<Box<dyn Persistent>> {
        self.constructors.get(type_name).map(|ctor| ctor(serial))
    }

    /// Registered names, sorted.
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.constructors.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}
