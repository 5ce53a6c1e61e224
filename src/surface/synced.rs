//! Synced extensions
//!
//! Protocol extensions that add double-buffered state to a surface register
//! a [`SyncedExtension`] on it. The registry then shadows every state in the
//! surface's queue with one slot owned by the extension, and the slots ride
//! along through the whole cache/squash/commit dance: when two surface
//! states merge, the paired slots merge through
//! [`SyncedExtension::squash_state`].
//!
//! The invariant maintained here is strict: for every state in the queue
//! there is exactly one slot per registered extension, and the slot vectors
//! are ordered like the registry itself.

use std::rc::Rc;

use downcast_rs::{impl_downcast, Downcast};

use super::state::SurfaceState;

/// A shadow state slot owned by a synced extension
///
/// The registry treats slots as opaque; extensions downcast to their
/// concrete type inside [`SyncedExtension::squash_state`] and friends.
/// Releasing a slot is plain `Drop`.
pub trait SyncedSlot: Downcast {}
impl_downcast!(SyncedSlot);

/// The vtable of a synced extension
pub trait SyncedExtension: Downcast {
    /// Allocate a slot shadowing a newly created surface state
    ///
    /// Returning `None` signals allocation failure. The registry undoes any
    /// partial work before reporting the failure to the caller.
    fn create_state(&self) -> Option<Box<dyn SyncedSlot>>;

    /// Merge `src` into `dst`, mirroring the squash of the host states
    fn squash_state(&self, dst: &mut dyn SyncedSlot, src: &mut dyn SyncedSlot);

    /// Invoked right before `next` is merged into the current slot
    fn precommit(&self, _current: &mut dyn SyncedSlot, _next: &mut dyn SyncedSlot) {}
}
impl_downcast!(SyncedExtension);

crate::utils::ids::id_gen!(synced_id);

/// Identifies one registered extension on one surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncedHandle {
    pub(crate) id: usize,
}

pub(crate) struct SyncedEntry {
    pub(crate) id: usize,
    pub(crate) extension: Rc<dyn SyncedExtension>,
}

impl Drop for SyncedEntry {
    fn drop(&mut self) {
        synced_id::remove(self.id);
    }
}

/// The per-surface list of registered extensions
///
/// Slot storage lives inside the states themselves (`SurfaceState::synced`),
/// index-paired with `entries`.
#[derive(Default)]
pub(crate) struct SyncedRegistry {
    pub(crate) entries: Vec<SyncedEntry>,
}

impl std::fmt::Debug for SyncedRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncedRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl SyncedRegistry {
    /// Register an extension, shadowing every state already in the queue
    ///
    /// On allocation failure of any slot the already created slots are torn
    /// down again and `None` is returned.
    pub fn register<'a>(
        &mut self,
        extension: Rc<dyn SyncedExtension>,
        states: impl Iterator<Item = &'a mut SurfaceState>,
    ) -> Option<SyncedHandle> {
        let mut shadowed: Vec<&mut SurfaceState> = Vec::new();
        let mut failed = false;
        for state in states {
            match extension.create_state() {
                Some(slot) => {
                    state.synced.push(slot);
                    shadowed.push(state);
                }
                None => {
                    failed = true;
                    break;
                }
            }
        }
        if failed {
            for state in shadowed {
                let _ = state.synced.pop();
            }
            return None;
        }

        let id = synced_id::next();
        self.entries.push(SyncedEntry { id, extension });
        Some(SyncedHandle { id })
    }

    /// Unregister an extension, tearing down its slot in every state
    pub fn unregister<'a>(
        &mut self,
        handle: SyncedHandle,
        states: impl Iterator<Item = &'a mut SurfaceState>,
    ) {
        let Some(index) = self.index_of(handle) else {
            return;
        };
        self.entries.remove(index);
        for state in states {
            state.synced.remove(index);
        }
    }

    pub fn index_of(&self, handle: SyncedHandle) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == handle.id)
    }
}
