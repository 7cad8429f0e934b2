//! Deferred cross-reference resolution.
//!
//! During the first load pass an object may reference another that has not
//! been decoded yet. It queues a validation instead; the queue is drained
//! once every object in the world file has been constructed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::PersistError;
use super::world::WorldState;

pub type Validation = Box<dyn FnOnce(&mut WorldState) -> Result<(), PersistError> + Send>;

/// What to do when a queued reference points at an object that never loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DanglingPolicy {
    /// Drop the reference without a warning.
    Drop,
    /// Drop the reference and log it.
    #[default]
    LogAndDrop,
    /// Abort the load.
    Fail,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub run: usize,
    pub dangling: usize,
}

/// Pending validations keyed by the type that queued them.
///
/// Types drain in name order, each type's validations in queue order.
#[derive(Default)]
pub struct ValidationQueue {
    pending: BTreeMap<&'static str, Vec<Validation>>,
}

impl ValidationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, type_name: &'static str, validation: Validation) {
        self.pending.entry(type_name).or_default().push(validation);
    }

    pub fn len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.values().all(Vec::is_empty)
    }

    /// Pending validations queued by `type_name`.
    pub fn pending_for(&self, type_name: &str) -> usize {
        self.pending.get(type_name).map_or(0, Vec::len)
    }

    /// Run every queued validation against `world`.
    ///
    /// Dangling references are handled per `policy`; any other error aborts
    /// the drain.
    pub fn drain(
        self,
        world: &mut WorldState,
        policy: DanglingPolicy,
    ) -> Result<DrainReport, PersistError> {
        let mut report = DrainReport::default();
        for (type_name, validations) in self.pending {
            for validation in validations {
                report.run += 1;
                match validation(world) {
                    Ok(()) => {}
                    Err(PersistError::DanglingReference { source_serial, target }) => {
                        report.dangling += 1;
                        match policy {
                            DanglingPolicy::Drop => {
                                tracing::trace!(
                                    "[world] [validate] dropped {} reference {} -> {}",
                                    type_name,
                                    source_serial,
                                    target
                                );
                            }
                            DanglingPolicy::LogAndDrop => {
                                tracing::warn!(
                                    "[world] [validate] {} {} references missing object {}, dropped",
                                    type_name,
                                    source_serial,
                                    target
                                );
                            }
                            DanglingPolicy::Fail => {
                                return Err(PersistError::DanglingReference {
                                    source_serial,
                                    target,
                                });
                            }
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::object::Serial;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn dangling(_world: &mut WorldState) -> Result<(), PersistError> {
        Err(PersistError::DanglingReference {
            source_serial: Serial(1),
            target: Serial(2),
        })
    }

    #[test]
    fn test_drain_order_by_type_then_fifo() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut queue = ValidationQueue::new();
        for (ty, tag) in [("Zeta", 1), ("Alpha", 2), ("Zeta", 3), ("Alpha", 4)] {
            let log = Arc::clone(&log);
            queue.enqueue(
                ty,
                Box::new(move |_w| {
                    log.lock().unwrap().push(tag);
                    Ok(())
                }),
            );
        }
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.pending_for("Zeta"), 2);

        let mut world = WorldState::new();
        let report = queue.drain(&mut world, DanglingPolicy::Fail).unwrap();
        assert_eq!(report.run, 4);
        assert_eq!(*log.lock().unwrap(), vec![2, 4, 1, 3]);
    }

    #[test]
    fn test_dangling_dropped() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut queue = ValidationQueue::new();
        queue.enqueue("Door", Box::new(dangling));
        let counter = Arc::clone(&ran);
        queue.enqueue(
            "Door",
            Box::new(move |_w| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let mut world = WorldState::new();
        let report = queue.drain(&mut world, DanglingPolicy::LogAndDrop).unwrap();
        assert_eq!(report, DrainReport { run: 2, dangling: 1 });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dangling_fails_under_strict_policy() {
        let mut queue = ValidationQueue::new();
        queue.enqueue("Door", Box::new(dangling));
        let mut world = WorldState::new();
        assert!(matches!(
            queue.drain(&mut world, DanglingPolicy::Fail),
            Err(PersistError::DanglingReference { .. })
        ));
    }

    #[test]
    fn test_other_errors_abort() {
        let mut queue = ValidationQueue::new();
        queue.enqueue("Door", Box::new(|_w| Err(PersistError::UnknownType("X".into()))));
        let mut world = WorldState::new();
        assert!(queue.drain(&mut world, DanglingPolicy::Drop).is_err());
    }
}
