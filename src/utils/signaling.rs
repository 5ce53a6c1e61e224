//! A general purpose signaling mechanism
//!
//! Surfaces and compositors expose their lifecycle events ([`Signaler`]
//! values) through this mechanism. It is synchronous and non-threadsafe,
//! matching the single-threaded cooperative model of the rest of the crate:
//! all callbacks run on the calling thread before the outermost
//! [`Signaler::signal`] call returns.
//!
//! The commit pipeline emits signals from within signal handlers (a parent
//! commit releases child commits, which emit on the child), so delivery has
//! to cope with re-entrancy. The rule is simple: signals sent while one is
//! being delivered are queued and dispatched by the outermost `signal`
//! call, in sending order. A callback registered during delivery does not
//! see the in-flight signal, only later ones.

use std::{
    any::Any,
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt,
    rc::{Rc, Weak},
};

/// A signaler, main type for signaling
///
/// It serves both as a message sending facility and a way to register new
/// callbacks for these messages. It can be cloned and passed around with
/// `Rc`-like semantics.
pub struct Signaler<S> {
    inner: Rc<SignalInner<S>>,
}

impl<S> fmt::Debug for Signaler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signaler").finish_non_exhaustive()
    }
}

// Manual clone impl because of the type parameter
impl<S> Clone for Signaler<S> {
    fn clone(&self) -> Signaler<S> {
        Signaler {
            inner: self.inner.clone(),
        }
    }
}

impl<S> Signaler<S> {
    /// Create a new signaler for given signal type
    pub fn new() -> Signaler<S> {
        Signaler {
            inner: Rc::new(SignalInner::new()),
        }
    }

    /// Register a new callback to this signaler
    ///
    /// This method returns a [`SignalToken`], which you must keep as long as
    /// you need your callback to remain in place. Dropping it disables the
    /// callback, even for a signal currently being delivered.
    #[must_use]
    pub fn register<F: FnMut(&S) + 'static>(&self, f: F) -> SignalToken {
        let rc = Rc::new(RefCell::new(f));
        let weak = Rc::downgrade(&rc) as Weak<RefCell<dyn FnMut(&S)>>;
        self.inner.callbacks.borrow_mut().push(weak);
        SignalToken { signal: rc }
    }

    /// Signal the callbacks
    ///
    /// All registered callbacks are invoked with a reference to the value
    /// provided here, after which that value is dropped.
    ///
    /// If this method is invoked from within a callback of the same
    /// signaler, the value is queued and delivered once the current signal
    /// is fully dispatched; this method then returns immediately.
    pub fn signal(&self, signal: S) {
        self.inner.send(signal);
    }
}

impl<S> Default for Signaler<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// A token associated with a callback registered to a [`Signaler`]
///
/// Dropping it disables and drops the callback it is associated with. If you
/// never plan to disable the callback, [`SignalToken::leak`] safely gets rid
/// of this value.
#[derive(Debug)]
pub struct SignalToken {
    signal: Rc<dyn Any>,
}

impl SignalToken {
    /// Destroy the token without disabling the associated callback
    pub fn leak(self) {
        // leak the Rc, so that it is never deallocated
        let _ = Rc::into_raw(self.signal);
    }
}

type WeakCallback<S> = Weak<RefCell<dyn FnMut(&S)>>;

struct SignalInner<S> {
    callbacks: RefCell<Vec<WeakCallback<S>>>,
    queue: RefCell<VecDeque<S>>,
    dispatching: Cell<bool>,
}

impl<S> SignalInner<S> {
    fn new() -> SignalInner<S> {
        SignalInner {
            callbacks: RefCell::new(Vec::new()),
            queue: RefCell::new(VecDeque::new()),
            dispatching: Cell::new(false),
        }
    }

    fn send(&self, event: S) {
        self.queue.borrow_mut().push_back(event);
        if self.dispatching.replace(true) {
            // A send further up the stack owns the queue and will deliver
            // this event once the current one is dispatched
            return;
        }

        loop {
            let next_event = self.queue.borrow_mut().pop_front();
            let Some(event) = next_event else {
                break;
            };

            // Deliver to a snapshot of the callback list. No borrow is held
            // across the calls, so callbacks are free to register new ones;
            // those only see events queued after this one.
            let snapshot: Vec<WeakCallback<S>> = self.callbacks.borrow().clone();
            for weak in snapshot {
                if let Some(callback) = weak.upgrade() {
                    (*callback.borrow_mut())(&event);
                }
            }

            self.callbacks
                .borrow_mut()
                .retain(|weak| weak.strong_count() > 0);
        }

        self.dispatching.set(false);
    }
}
