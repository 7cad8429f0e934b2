//! World state: the live object set plus the registries that index it.
//!
//! Objects are owned here, keyed by serial. Registries are named serial sets
//! (e.g. every township item) kept in step with the object set: `add`
//! registers an object under each name it reports, `delete` unregisters it.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::error::PersistError;
use super::object::{LoadContext, Persistent, Serial};
use super::validation::{DanglingPolicy, DrainReport, ValidationQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    /// Live world, no load in progress.
    Idle,
    /// First pass: objects are being decoded and inserted.
    Decoding,
}

pub struct WorldState {
    objects: BTreeMap<Serial, Box<dyn Persistent>>,
    registries: HashMap<&'static str, BTreeSet<Serial>>,
    queue: ValidationQueue,
    phase: LoadPhase,
    next_serial: u32,
}

impl WorldState {
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            registries: HashMap::new(),
            queue: ValidationQueue::new(),
            phase: LoadPhase::Idle,
            next_serial: 1,
        }
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    /// Hand out a serial no live object uses.
    pub fn new_serial(&mut self) -> Serial {
        while self.objects.contains_key(&Serial(self.next_serial))
            || self.next_serial == Serial::NONE_RAW
        {
            self.next_serial = self.next_serial.wrapping_add(1);
        }
        let serial = Serial(self.next_serial);
        self.next_serial = self.next_serial.wrapping_add(1);
        serial
    }

    pub fn add(&mut self, obj: Box<dyn Persistent>) -> Result<Serial, PersistError> {
        let serial = obj.serial();
        if self.objects.contains_key(&serial) {
            return Err(PersistError::DuplicateSerial(serial));
        }
        for name in obj.registries() {
            self.registries.entry(*name).or_default().insert(serial);
        }
        if serial.0 >= self.next_serial && serial.0 != Serial::NONE_RAW {
            self.next_serial = serial.0.wrapping_add(1);
        }
        self.objects.insert(serial, obj);
        Ok(serial)
    }

    /// Remove an object and release it from every registry and every object
    /// that holds it.
    pub fn delete(&mut self, serial: Serial) -> Option<Box<dyn Persistent>> {
        let obj = self.objects.remove(&serial)?;
        for name in obj.registries() {
            if let Some(set) = self.registries.get_mut(name) {
                set.remove(&serial);
            }
        }
        obj.on_delete(self);
        tracing::debug!("[world] [delete] {} {}", obj.type_name(), serial);
        Some(obj)
    }

    pub fn contains(&self, serial: Serial) -> bool {
        self.objects.contains_key(&serial)
    }

    pub fn get(&self, serial: Serial) -> Option<&dyn Persistent> {
        self.objects.get(&serial).map(|obj| &**obj)
    }

    pub fn get_as<T: Persistent>(&self, serial: Serial) -> Option<&T> {
        self.objects
            .get(&serial)
            .and_then(|obj| obj.as_any().downcast_ref::<T>())
    }

    pub fn get_mut_as<T: Persistent>(&mut self, serial: Serial) -> Option<&mut T> {
        self.objects
            .get_mut(&serial)
            .and_then(|obj| obj.as_any_mut().downcast_mut::<T>())
    }

    /// Objects in serial order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Persistent> {
        self.objects.values().map(|obj| &**obj)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Serials registered under `name`, in order.
    pub fn registry(&self, name: &str) -> Vec<Serial> {
        self.registries
            .get(name)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    // ── Load lifecycle ────────────────────────────────────────────────────────

    /// Start a two-phase load. Only an empty, idle world can be loaded into.
    pub fn begin_load(&mut self) -> Result<(), PersistError> {
        if self.phase == LoadPhase::Decoding {
            return Err(PersistError::LoadInProgress);
        }
        if !self.objects.is_empty() {
            return Err(PersistError::WorldNotEmpty(self.objects.len()));
        }
        self.phase = LoadPhase::Decoding;
        self.queue = ValidationQueue::new();
        Ok(())
    }

    /// Insert a decoded object and commit the validations it deferred.
    pub fn insert_loaded(
        &mut self,
        obj: Box<dyn Persistent>,
        ctx: LoadContext,
    ) -> Result<Serial, PersistError> {
        let serial = self.add(obj)?;
        for (type_name, validation) in ctx.into_deferred() {
            self.queue.enqueue(type_name, validation);
        }
        Ok(serial)
    }

    pub fn pending_validations(&self) -> usize {
        self.queue.len()
    }

    /// Second pass: every object exists now, resolve queued references.
    pub fn finish_load(&mut self, policy: DanglingPolicy) -> Result<DrainReport, PersistError> {
        let queue = std::mem::take(&mut self.queue);
        let result = queue.drain(self, policy);
        self.phase = LoadPhase::Idle;
        result
    }
}

impl Default for WorldState {
    fn default() -> Self {
        Self::new()
    }
}
