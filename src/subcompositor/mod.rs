//! Sub-surfaces
//!
//! A [`Subsurface`] attaches one surface as a child of another, at a
//! position relative to the parent and with a place in the parent's
//! stacking order. Its defining feature is the synchronized mode (the
//! default): while synchronized, a child commit is invisible until the
//! parent commits, which lets clients assemble multi-surface frames that
//! appear atomically.
//!
//! The mechanics reuse the surface's own machinery. Position and stacking
//! are double-buffered *on the parent*: each sub-surface registers a synced
//! extension there, so every parent state carries a (x, y) slot for it and
//! the stacking lists ride along the parent's squash. Synchronization
//! reuses the state queue locks: a synchronized child commit locks its own
//! pending state and the parent commit releases it.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::surface::{
    ProtocolError, Surface, SurfaceRole, SyncedExtension, SyncedHandle, SyncedSlot,
};
use crate::utils::signaling::{SignalToken, Signaler};
use crate::utils::{Logical, Point};

/// The role assigned to surfaces that become sub-surfaces
pub static SUBSURFACE_ROLE: SurfaceRole = SurfaceRole {
    name: "subsurface",
    precommit: None,
    commit: Some(subsurface_role_commit),
};

fn subsurface_role_commit(surface: &Rc<Surface>) {
    if let Some(subsurface) = Subsurface::from_surface(surface) {
        subsurface.consider_map();
    }
}

/// The sub-surface state living in each parent state
///
/// Contrary to the child's own state it is applied on *parent* commit.
#[derive(Debug, Default)]
pub struct SubsurfaceParentState {
    /// Position of the child's top-left corner relative to the parent's
    pub x: i32,
    /// See `x`
    pub y: i32,
}

impl SyncedSlot for SubsurfaceParentState {}

struct SubsurfaceSynced;

impl SyncedExtension for SubsurfaceSynced {
    fn create_state(&self) -> Option<Box<dyn SyncedSlot>> {
        Some(Box::new(SubsurfaceParentState::default()))
    }

    fn squash_state(&self, dst: &mut dyn SyncedSlot, src: &mut dyn SyncedSlot) {
        let src = src
            .downcast_ref::<SubsurfaceParentState>()
            .expect("subsurface slot type mismatch");
        let dst = dst
            .downcast_mut::<SubsurfaceParentState>()
            .expect("subsurface slot type mismatch");
        dst.x = src.x;
        dst.y = src.y;
    }
}

/// Signals emitted by a [`Subsurface`]
#[derive(Debug, Default)]
pub struct SubsurfaceEvents {
    /// The sub-surface relation is being torn down
    pub destroy: Signaler<Rc<Subsurface>>,
    /// The sub-surface became visible
    pub map: Signaler<Rc<Subsurface>>,
    /// The sub-surface stopped being visible
    pub unmap: Signaler<Rc<Subsurface>>,
}

/// A surface attached as a child of another surface
pub struct Subsurface {
    weak: Weak<Subsurface>,
    surface: Weak<Surface>,
    parent: RefCell<Option<Weak<Surface>>>,
    handle: SyncedHandle,

    synchronized: Cell<bool>,
    has_cache: Cell<bool>,
    cached_seq: Cell<u32>,

    mapped: Cell<bool>,
    added: Cell<bool>,
    reordered: Cell<bool>,
    destroyed: Cell<bool>,
    previous: Cell<(i32, i32)>,

    events: SubsurfaceEvents,
    client_commit_token: RefCell<Option<SignalToken>>,
}

impl fmt::Debug for Subsurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subsurface")
            .field("synchronized", &self.synchronized.get())
            .field("mapped", &self.mapped.get())
            .field("has_cache", &self.has_cache.get())
            .finish_non_exhaustive()
    }
}

impl Subsurface {
    /// The sub-surface relation of a surface carrying the subsurface role
    pub fn from_surface(surface: &Rc<Surface>) -> Option<Rc<Subsurface>> {
        surface
            .role_data()
            .and_then(|data| data.downcast::<Subsurface>().ok())
    }

    /// The child surface of this relation
    ///
    /// `None` once the child surface has been destroyed.
    pub fn surface(&self) -> Option<Rc<Surface>> {
        self.surface.upgrade()
    }

    /// The parent surface of this relation
    ///
    /// `None` once the parent surface has been destroyed.
    pub fn parent(&self) -> Option<Rc<Surface>> {
        self.parent.borrow().as_ref().and_then(Weak::upgrade)
    }

    /// The signals of this sub-surface
    pub fn events(&self) -> &SubsurfaceEvents {
        &self.events
    }

    /// Whether the sub-surface is currently visible
    ///
    /// A sub-surface is mapped iff its surface has contents, it is linked to
    /// a live parent and its parent chain is mapped.
    pub fn is_mapped(&self) -> bool {
        self.mapped.get()
    }

    /// Whether this sub-surface is in synchronized mode itself
    pub fn is_synchronized(&self) -> bool {
        self.synchronized.get()
    }

    /// Whether commits are effectively synchronized, taking ancestors into
    /// account
    pub fn is_effectively_synchronized(self: &Rc<Self>) -> bool {
        let mut subsurface = self.clone();
        loop {
            if subsurface.synchronized.get() {
                return true;
            }
            let Some(parent) = subsurface.parent() else {
                return false;
            };
            match Subsurface::from_surface(&parent) {
                Some(parent_subsurface) => subsurface = parent_subsurface,
                None => return false,
            }
        }
    }

    /// The position in the parent's current state
    pub fn current_position(&self) -> Point<i32, Logical> {
        match self.parent() {
            Some(parent) => parent.with_synced_current::<SubsurfaceParentState, _>(
                self.handle,
                |slot| (slot.x, slot.y).into(),
            ),
            None => Default::default(),
        }
    }

    /// Stage a new position, applied on the next parent commit
    pub fn set_position(&self, x: i32, y: i32) {
        if let Some(parent) = self.parent() {
            parent.with_synced_pending::<SubsurfaceParentState, _>(self.handle, |slot| {
                slot.x = x;
                slot.y = y;
            });
        }
    }

    /// Place this sub-surface directly above a sibling (or the parent) in
    /// the pending stacking order
    pub fn place_above(self: &Rc<Self>, sibling: &Rc<Surface>) -> Result<(), ProtocolError> {
        self.reorder(sibling, true)
    }

    /// Place this sub-surface directly below a sibling (or the parent) in
    /// the pending stacking order
    pub fn place_below(self: &Rc<Self>, sibling: &Rc<Surface>) -> Result<(), ProtocolError> {
        self.reorder(sibling, false)
    }

    fn reorder(self: &Rc<Self>, sibling: &Rc<Surface>, place_above: bool) -> Result<(), ProtocolError> {
        let parent = self.parent().ok_or(ProtocolError::BadSurface)?;
        parent.reorder_subsurface(self, sibling, place_above)?;
        self.reordered.set(true);
        Ok(())
    }

    /// Switch to synchronized mode
    pub fn set_sync(&self) {
        self.synchronized.set(true);
    }

    /// Switch to desynchronized mode
    ///
    /// If no ancestor keeps the chain synchronized, a held-back commit is
    /// released immediately.
    pub fn set_desync(self: &Rc<Self>) {
        if self.synchronized.replace(false) && !self.is_effectively_synchronized() {
            self.release_cache();
        }
    }

    fn release_cache(&self) {
        if self.has_cache.replace(false) {
            if let Some(surface) = self.surface() {
                surface.unlock_cached(self.cached_seq.get());
            }
        }
    }

    /// Child finished a commit. While effectively synchronized the pending
    /// state is locked instead of being applied.
    fn handle_client_commit(self: &Rc<Self>) {
        if self.parent().is_none() || !self.is_effectively_synchronized() {
            return;
        }
        if !self.has_cache.get() {
            if let Some(surface) = self.surface() {
                self.has_cache.set(true);
                self.cached_seq.set(surface.lock_pending());
            }
        }
    }

    /// The parent committed: release a held-back child state and announce
    /// the sub-surface on its first appearance
    pub(crate) fn parent_commit_notify(self: &Rc<Self>) {
        if self.synchronized.get() && self.has_cache.get() {
            self.has_cache.set(false);
            if let Some(surface) = self.surface() {
                surface.unlock_cached(self.cached_seq.get());
            }
        }

        if !self.added.get() {
            self.added.set(true);
            if let Some(parent) = self.parent() {
                parent.events().new_subsurface.signal(self.clone());
            }
        }

        let position = self.current_position();
        self.previous.set((position.x, position.y));
        self.reordered.set(false);

        self.consider_map();
    }

    pub(crate) fn consider_map(self: &Rc<Self>) {
        let mut should_map = false;
        if let (Some(surface), Some(parent)) = (self.surface(), self.parent()) {
            should_map = surface.has_buffer();
            if should_map {
                if let Some(parent_subsurface) = Subsurface::from_surface(&parent) {
                    should_map = parent_subsurface.is_mapped();
                }
            }
        }

        if should_map && !self.mapped.get() {
            self.map();
        } else if !should_map && self.mapped.get() {
            self.unmap();
        }
    }

    fn map(self: &Rc<Self>) {
        self.mapped.set(true);
        self.events.map.signal(self.clone());
        for child in self.children() {
            child.consider_map();
        }
    }

    fn unmap(self: &Rc<Self>) {
        self.mapped.set(false);
        self.events.unmap.signal(self.clone());
        for child in self.children() {
            if child.is_mapped() {
                child.unmap();
            }
        }
    }

    fn children(&self) -> Vec<Rc<Subsurface>> {
        let Some(surface) = self.surface() else {
            return Vec::new();
        };
        surface.with_current(|current| {
            current
                .subsurfaces_above
                .iter()
                .chain(&current.subsurfaces_below)
                .filter_map(Weak::upgrade)
                .collect()
        })
    }

    /// Tear the sub-surface relation down
    ///
    /// The child surface stays alive (and keeps its role), but is no longer
    /// part of the parent's tree.
    pub fn destroy(self: &Rc<Self>) {
        if self.destroyed.replace(true) {
            return;
        }

        if self.mapped.get() {
            self.unmap();
        }
        self.release_cache();

        self.events.destroy.signal(self.clone());

        let parent = self.parent.borrow_mut().take().and_then(|weak| weak.upgrade());
        if let Some(parent) = parent {
            parent.remove_synced(self.handle);
            parent.remove_subsurface_links(self);
        }

        *self.client_commit_token.borrow_mut() = None;
    }

    pub(crate) fn handle_parent_destroy(self: &Rc<Self>) {
        self.destroy();
    }
}

/// Whether a surface currently acts as a sub-surface
pub fn is_subsurface(surface: &Rc<Surface>) -> bool {
    Subsurface::from_surface(surface).is_some()
}

/// Walk up the sub-surface chain to the root surface
pub fn get_root_surface(surface: &Rc<Surface>) -> Rc<Surface> {
    let mut surface = surface.clone();
    loop {
        let Some(parent) = Subsurface::from_surface(&surface).and_then(|sub| sub.parent()) else {
            return surface;
        };
        surface = parent;
    }
}

fn is_ancestor(surface: &Rc<Surface>, of: &Rc<Surface>) -> bool {
    let mut candidate = of.clone();
    loop {
        let Some(parent) = Subsurface::from_surface(&candidate).and_then(|sub| sub.parent()) else {
            return false;
        };
        if Rc::ptr_eq(&parent, surface) {
            return true;
        }
        candidate = parent;
    }
}

/// Signals emitted by a [`Subcompositor`]
#[derive(Debug, Default)]
pub struct SubcompositorEvents {
    /// The subcompositor global is going away
    pub destroy: Signaler<()>,
}

/// Entry point for turning surfaces into sub-surfaces
#[derive(Debug, Default)]
pub struct Subcompositor {
    events: SubcompositorEvents,
}

impl Subcompositor {
    /// Advertised version of the subcompositor global
    pub const VERSION: u32 = 1;

    /// Create a new subcompositor
    pub fn new() -> Subcompositor {
        Default::default()
    }

    /// The signals of this subcompositor
    pub fn events(&self) -> &SubcompositorEvents {
        &self.events
    }

    /// Attach `surface` as a sub-surface of `parent`
    ///
    /// Fails with [`ProtocolError::RoleConflict`] if the surface already has
    /// another role and with [`ProtocolError::BadParent`] if the relation
    /// would create a loop.
    pub fn get_subsurface(
        &self,
        surface: &Rc<Surface>,
        parent: &Rc<Surface>,
    ) -> Result<Rc<Subsurface>, ProtocolError> {
        if Rc::ptr_eq(surface, parent) || is_ancestor(surface, parent) {
            return Err(ProtocolError::BadParent);
        }

        // Claim the role before touching the parent, so a conflict leaves
        // everything untouched
        surface.set_role(&SUBSURFACE_ROLE, None)?;

        let handle = parent.add_synced(Rc::new(SubsurfaceSynced))?;

        let subsurface = Rc::new_cyclic(|weak| Subsurface {
            weak: weak.clone(),
            surface: surface.weak(),
            parent: RefCell::new(Some(parent.weak())),
            handle,
            synchronized: Cell::new(true),
            has_cache: Cell::new(false),
            cached_seq: Cell::new(0),
            mapped: Cell::new(false),
            added: Cell::new(false),
            reordered: Cell::new(false),
            destroyed: Cell::new(false),
            previous: Cell::new((0, 0)),
            events: Default::default(),
            client_commit_token: RefCell::new(None),
        });

        let weak = subsurface.weak.clone();
        let token = surface.events().client_commit.register(move |_| {
            if let Some(subsurface) = weak.upgrade() {
                subsurface.handle_client_commit();
            }
        });
        *subsurface.client_commit_token.borrow_mut() = Some(token);

        surface
            .set_role(&SUBSURFACE_ROLE, Some(subsurface.clone() as Rc<dyn Any>))
            .expect("role was just claimed");

        // New sub-surfaces start as the topmost sibling, above the parent
        parent.push_pending_subsurface(&subsurface);

        debug!(surface = ?Rc::as_ptr(surface), parent = ?Rc::as_ptr(parent), "New subsurface");
        Ok(subsurface)
    }

    /// Announce the removal of the subcompositor global
    pub fn destroy(&self) {
        self.events.destroy.signal(());
    }
}
