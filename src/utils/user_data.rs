//! Per-object storage for host data
//!
//! Compositor hosts routinely need to hang their own bookkeeping off a
//! surface (shell metadata, render caches, ...). [`UserDataMap`] is an
//! append-only typemap for that purpose: each type can be inserted once and
//! is kept alive until the owning object is torn down.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use appendlist::AppendList;

/// A typemap-like container for user-defined data
///
/// Values are keyed by their type and initialized lazily. The stored values
/// are shared: retrieving a value hands out a clone of its `Rc`.
pub struct UserDataMap {
    list: RefCell<AppendList<Rc<dyn Any>>>,
}

impl Default for UserDataMap {
    fn default() -> Self {
        UserDataMap {
            list: RefCell::new(AppendList::new()),
        }
    }
}

impl std::fmt::Debug for UserDataMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserDataMap").finish_non_exhaustive()
    }
}

impl UserDataMap {
    /// Create a new, empty map
    pub fn new() -> UserDataMap {
        Default::default()
    }

    /// Insert a value for type `T` if none is stored yet
    ///
    /// Returns `true` if the value was inserted, `false` if a value of this
    /// type was already present (in which case `init` is not invoked).
    pub fn insert_if_missing<T: 'static, F: FnOnce() -> T>(&self, init: F) -> bool {
        if self.get::<T>().is_some() {
            return false;
        }
        self.list.borrow().push(Rc::new(init()));
        true
    }

    /// Retrieve the value of type `T` if any is stored
    pub fn get<T: 'static>(&self) -> Option<Rc<T>> {
        let list = self.list.borrow();
        for value in &*list {
            if let Ok(value) = value.clone().downcast::<T>() {
                return Some(value);
            }
        }
        None
    }

    /// Drop every stored value
    ///
    /// Invoked as part of the owning object's destroy sequence.
    pub(crate) fn clear(&self) {
        *self.list.borrow_mut() = AppendList::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let map = UserDataMap::new();
        assert!(map.insert_if_missing(|| 42u32));
        assert!(!map.insert_if_missing(|| 43u32));
        assert_eq!(*map.get::<u32>().unwrap(), 42);
        assert!(map.get::<String>().is_none());
    }

    #[test]
    fn clear_drops_values() {
        let map = UserDataMap::new();
        let value = Rc::new(());
        let weak = Rc::downgrade(&value);
        map.insert_if_missing(|| value);
        map.clear();
        assert!(weak.upgrade().is_none());
    }
}
