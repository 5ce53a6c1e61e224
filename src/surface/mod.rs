//! Surfaces and their state machinery
//!
//! A [`Surface`] is the drawing primitive clients hand content to. All
//! client requests stage changes into the *pending* state; a commit
//! atomically promotes them. In between, states can be held back:
//! [`Surface::lock_pending`] defers a commit until a matching
//! [`Surface::unlock_cached`], which is how synchronized sub-surfaces and
//! similar protocols make updates across surfaces atomic.
//!
//! The queue of states only ever moves forward by *squashing*: a state is
//! merged into its predecessor field by field, gated on which fields the
//! client actually committed. When the predecessor is the applied `current`
//! state, the merge runs the full commit pipeline: damage is transformed
//! into buffer coordinates, the attached buffer is uploaded (or patched in
//! place through the renderer's damage fast path), derived regions are
//! recomputed and the commit is propagated to sub-surfaces and role
//! handlers.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use tracing::{debug, error};

use crate::buffer::{ClientBuffer, RenderBuffer, Renderer};
use crate::output::Output;
use crate::subcompositor::Subsurface;
use crate::utils::signaling::{SignalToken, Signaler};
use crate::utils::{
    BufferCoords, Logical, Point, Rectangle, Region, RegionAttributes, Size, Tracer, Transform,
    UserDataMap,
};

mod state;
mod synced;

pub use self::state::{Committed, FrameCallback, SurfaceState, Viewport};
pub(crate) use self::state::StateQueue;
pub use self::synced::{SyncedExtension, SyncedHandle, SyncedSlot};
use self::synced::SyncedRegistry;

/// An error to be reported on the offending resource, terminating the client
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// `set_buffer_transform` with a value outside the protocol enum
    #[error("Specified transform value ({0}) is invalid")]
    InvalidTransform(i32),
    /// `set_buffer_scale` with a non-positive value
    #[error("Specified scale value ({0}) is not positive")]
    InvalidScale(i32),
    /// The surface already has a different role (or its role object is
    /// still alive)
    #[error("Cannot assign role {requested} to surface, already has role {existing}")]
    RoleConflict {
        /// The role that was requested
        requested: &'static str,
        /// The role the surface already carries
        existing: &'static str,
    },
    /// The requested parent relation would create a loop
    #[error("Surface would be an ancestor of itself")]
    BadParent,
    /// The referenced surface is not a sibling or the parent
    #[error("Surface is not a sibling or the parent")]
    BadSurface,
    /// Allocation failure; partial work has been undone
    #[error("Allocation failure")]
    NoMemory,
}

/// A role giving a surface additional semantics
///
/// Roles are identified by the address of their static vtable; assigning two
/// different roles to one surface is a protocol error.
pub struct SurfaceRole {
    /// Protocol name of the role
    pub name: &'static str,
    /// Observer invoked right before `next` is merged into the current state
    pub precommit: Option<fn(&Rc<Surface>, &SurfaceState)>,
    /// Invoked at the end of the commit pipeline
    pub commit: Option<fn(&Rc<Surface>)>,
}

impl fmt::Debug for SurfaceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceRole").field("name", &self.name).finish()
    }
}

/// Signals emitted by a [`Surface`]
#[derive(Debug, Default)]
pub struct SurfaceEvents {
    /// The client finished a commit; pending state is finalized but not yet
    /// squashed
    pub client_commit: Signaler<Rc<Surface>>,
    /// The current state was just updated
    pub commit: Signaler<Rc<Surface>>,
    /// The surface is being torn down
    pub destroy: Signaler<Rc<Surface>>,
    /// A sub-surface of this surface became active on a commit
    pub new_subsurface: Signaler<Rc<Subsurface>>,
    /// The surface started overlapping an output
    pub enter: Signaler<Rc<Output>>,
    /// The surface stopped overlapping an output
    pub leave: Signaler<Rc<Output>>,
}

/// What the last applied state looked like, as far as resize-precise damage
/// accounting needs to know
#[derive(Debug, Default, Clone)]
struct PreviousState {
    size: Size<i32, Logical>,
    viewport_src: Option<Rectangle<f64, Logical>>,
}

struct OutputRecord {
    id: usize,
    output: Weak<Output>,
    gone: Rc<Cell<bool>>,
    _destroy_token: SignalToken,
}

struct SurfaceInner {
    queue: StateQueue,
    synced: SyncedRegistry,
    role: Option<&'static SurfaceRole>,
    role_data: Option<Rc<dyn Any>>,

    renderer: Rc<dyn Renderer>,
    buffer: Option<Rc<dyn RenderBuffer>>,

    buffer_damage: Region<BufferCoords>,
    external_damage: Region<Logical>,
    opaque_region: Region<Logical>,
    input_region: Region<Logical>,

    sx: i32,
    sy: i32,
    previous: PreviousState,

    outputs: Vec<OutputRecord>,
    destroyed: bool,
}

/// A client drawing surface
///
/// Created through [`Compositor::create_surface`](crate::compositor::Compositor::create_surface)
/// and torn down with [`Surface::destroy`].
pub struct Surface {
    weak: Weak<Surface>,
    events: SurfaceEvents,
    user_data: UserDataMap,
    tracer: Tracer,
    inner: RefCell<SurfaceInner>,
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("role", &self.inner.borrow().role.map(|role| role.name))
            .finish_non_exhaustive()
    }
}

impl Surface {
    pub(crate) fn new(renderer: Rc<dyn Renderer>, tracer: Tracer) -> Rc<Surface> {
        let surface = Rc::new_cyclic(|weak| Surface {
            weak: weak.clone(),
            events: Default::default(),
            user_data: UserDataMap::new(),
            tracer,
            inner: RefCell::new(SurfaceInner {
                queue: StateQueue::new(),
                synced: Default::default(),
                role: None,
                role_data: None,
                renderer,
                buffer: None,
                buffer_damage: Region::new(),
                external_damage: Region::new(),
                opaque_region: Region::new(),
                input_region: Region::new(),
                sx: 0,
                sy: 0,
                previous: Default::default(),
                outputs: Vec::new(),
                destroyed: false,
            }),
        });
        debug!(surface = ?Rc::as_ptr(&surface), "New surface");
        surface
    }

    /// The signals of this surface
    pub fn events(&self) -> &SurfaceEvents {
        &self.events
    }

    /// Host data attached to this surface
    pub fn user_data(&self) -> &UserDataMap {
        &self.user_data
    }

    /// Access the pending state
    pub fn with_pending<T>(&self, f: impl FnOnce(&mut SurfaceState) -> T) -> T {
        f(self.inner.borrow_mut().queue.pending_mut())
    }

    /// Access the current state
    pub fn with_current<T>(&self, f: impl FnOnce(&SurfaceState) -> T) -> T {
        f(self.inner.borrow().queue.current())
    }

    /// The logical size of the current state
    pub fn current_size(&self) -> Size<i32, Logical> {
        self.inner.borrow().queue.current().size
    }

    /// The uploaded buffer backing this surface, if any
    ///
    /// This is what the renderer samples from; it is `None` until the first
    /// buffer commit and after a commit that detached the buffer.
    pub fn buffer(&self) -> Option<Rc<dyn RenderBuffer>> {
        self.inner.borrow().buffer.clone()
    }

    /// Whether the surface currently has uploaded contents
    pub fn has_buffer(&self) -> bool {
        self.inner.borrow().buffer.is_some()
    }

    /// Accumulated damage of the uploaded buffer, in buffer coordinates
    pub fn buffer_damage(&self) -> Region<BufferCoords> {
        self.inner.borrow().buffer_damage.clone()
    }

    /// The derived opaque region of the current state
    pub fn opaque_region(&self) -> Region<Logical> {
        self.inner.borrow().opaque_region.clone()
    }

    /// The derived input region of the current state
    pub fn input_region(&self) -> Region<Logical> {
        self.inner.borrow().input_region.clone()
    }

    /// Accumulated surface-local offset of buffer attach positions
    pub fn offset(&self) -> Point<i32, Logical> {
        let inner = self.inner.borrow();
        (inner.sx, inner.sy).into()
    }

    #[cfg(test)]
    pub(crate) fn queue_len(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    /*
     * Client requests
     */

    /// Attach a buffer (or detach with `None`), offset by (dx, dy) relative
    /// to the previous buffer
    pub fn attach(&self, buffer: Option<Rc<dyn ClientBuffer>>, dx: i32, dy: i32) {
        let mut inner = self.inner.borrow_mut();
        let pending = inner.queue.pending_mut();
        pending.committed |= Committed::BUFFER;
        pending.dx = dx;
        pending.dy = dy;
        pending.buffer = buffer;
    }

    /// Add surface-local damage to the pending state
    ///
    /// Negative dimensions are silently ignored.
    pub fn damage(&self, x: i32, y: i32, width: i32, height: i32) {
        if width < 0 || height < 0 {
            return;
        }
        let mut inner = self.inner.borrow_mut();
        let pending = inner.queue.pending_mut();
        pending.committed |= Committed::SURFACE_DAMAGE;
        pending
            .surface_damage
            .union_rect(Rectangle::new((x, y).into(), (width, height).into()));
    }

    /// Add buffer-local damage to the pending state
    ///
    /// Negative dimensions are silently ignored.
    pub fn damage_buffer(&self, x: i32, y: i32, width: i32, height: i32) {
        if width < 0 || height < 0 {
            return;
        }
        let mut inner = self.inner.borrow_mut();
        let pending = inner.queue.pending_mut();
        pending.committed |= Committed::BUFFER_DAMAGE;
        pending
            .buffer_damage
            .union_rect(Rectangle::new((x, y).into(), (width, height).into()));
    }

    /// Queue a frame callback on the pending state
    pub fn frame(&self, callback: FrameCallback) {
        let mut inner = self.inner.borrow_mut();
        let pending = inner.queue.pending_mut();
        pending.committed |= Committed::FRAME_CALLBACK_LIST;
        pending.frame_callbacks.push(callback);
    }

    /// Set the pending opaque region, `None` resetting it to empty
    pub fn set_opaque_region(&self, region: Option<&RegionAttributes>) {
        let mut inner = self.inner.borrow_mut();
        let pending = inner.queue.pending_mut();
        pending.committed |= Committed::OPAQUE_REGION;
        match region {
            Some(attributes) => pending.opaque = attributes.to_region(),
            None => pending.opaque.clear(),
        }
    }

    /// Set the pending input region, `None` resetting it to unbounded
    pub fn set_input_region(&self, region: Option<&RegionAttributes>) {
        let mut inner = self.inner.borrow_mut();
        let pending = inner.queue.pending_mut();
        pending.committed |= Committed::INPUT_REGION;
        pending.input = region.map(RegionAttributes::to_region);
    }

    /// Set the pending buffer transform from its wire value
    pub fn set_buffer_transform(&self, transform: i32) -> Result<(), ProtocolError> {
        let transform =
            Transform::try_from(transform).map_err(|err| ProtocolError::InvalidTransform(err.0))?;
        let mut inner = self.inner.borrow_mut();
        let pending = inner.queue.pending_mut();
        pending.committed |= Committed::TRANSFORM;
        pending.transform = transform;
        Ok(())
    }

    /// Set the pending buffer scale
    pub fn set_buffer_scale(&self, scale: i32) -> Result<(), ProtocolError> {
        if scale <= 0 {
            return Err(ProtocolError::InvalidScale(scale));
        }
        let mut inner = self.inner.borrow_mut();
        let pending = inner.queue.pending_mut();
        pending.committed |= Committed::SCALE;
        pending.scale = scale;
        Ok(())
    }

    /// Set the pending viewport crop and scale
    pub fn set_viewport(&self, viewport: Viewport) {
        let mut inner = self.inner.borrow_mut();
        let pending = inner.queue.pending_mut();
        pending.committed |= Committed::VIEWPORT;
        pending.viewport = viewport;
    }

    /// Atomically apply the pending state
    ///
    /// If the pending state carries locks it is detached into a cached state
    /// instead, to be applied by the matching [`Surface::unlock_cached`]
    /// calls.
    pub fn commit(self: &Rc<Self>) -> Result<(), ProtocolError> {
        let ctx = self.tracer.begin_ctx("surface_commit");
        let result = self.commit_inner();
        self.tracer.end_ctx(ctx, "surface_commit");
        result
    }

    fn commit_inner(self: &Rc<Self>) -> Result<(), ProtocolError> {
        self.finalize_pending();

        self.events.client_commit.signal(self.clone());

        {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            if inner.queue.pending().n_locks > 0 {
                let mut cached = SurfaceState::new();
                for entry in &inner.synced.entries {
                    match entry.extension.create_state() {
                        Some(slot) => cached.synced.push(slot),
                        // Partial slots die with `cached` here
                        None => return Err(ProtocolError::NoMemory),
                    }
                }
                let pending = inner.queue.pending_mut();
                cached.seq = pending.seq;
                cached.n_locks = pending.n_locks;
                pending.n_locks = 0;
                inner.queue.insert_cached(cached);
            }
            let pending = inner.queue.pending_mut();
            pending.seq = pending.seq.wrapping_add(1);
        }

        let pending_index = self.inner.borrow().queue.pending_index();
        self.squash(pending_index);
        Ok(())
    }

    fn finalize_pending(&self) {
        let mut inner = self.inner.borrow_mut();
        let pending = inner.queue.pending_mut();

        if pending.committed.contains(Committed::BUFFER) {
            pending.buffer_size = pending
                .buffer
                .as_ref()
                .map(|buffer| buffer.size())
                .unwrap_or_default();
        }

        if pending.viewport.src.is_none()
            && (pending.buffer_size.w % pending.scale != 0
                || pending.buffer_size.h % pending.scale != 0)
        {
            // Accepted regardless: upstream has not yet settled on making
            // this an INVALID_SIZE error
            debug!(
                "Client bug: submitted a buffer whose size ({}x{}) is not divisible by scale ({})",
                pending.buffer_size.w, pending.buffer_size.h, pending.scale
            );
        }

        if let Some(dst) = pending.viewport.dst {
            if pending.buffer_size.w == 0 && pending.buffer_size.h == 0 {
                pending.size = Default::default();
            } else {
                pending.size = dst;
            }
        } else {
            pending.size = pending.viewport_src_size();
        }

        let bounds = Rectangle::from_size(pending.size);
        pending.surface_damage.intersect_rect(bounds);
        let buffer_bounds = Rectangle::from_size(pending.buffer_size);
        pending.buffer_damage.intersect_rect(buffer_bounds);
    }

    /*
     * State queue & locks
     */

    /// Prevent the pending state from being applied on its next commit
    ///
    /// Returns the sequence number to pass to [`Surface::unlock_cached`].
    /// Each lock must be released exactly once.
    pub fn lock_pending(&self) -> u32 {
        let mut inner = self.inner.borrow_mut();
        let pending = inner.queue.pending_mut();
        pending.n_locks += 1;
        pending.seq
    }

    /// Release a lock taken with [`Surface::lock_pending`]
    ///
    /// Once the last lock on a cached state is released, the state is
    /// squashed forward, which applies it if every older state has already
    /// been applied.
    ///
    /// Panics if no cached state carries the given sequence number; an
    /// unbalanced unlock is a caller bug.
    pub fn unlock_cached(self: &Rc<Self>, seq: u32) {
        let squash_index = {
            let mut inner = self.inner.borrow_mut();
            let index = inner
                .queue
                .find_seq(seq)
                .expect("Can't find a state to unlock");
            let pending_index = inner.queue.pending_index();
            let state = inner.queue.get_mut(index);
            assert!(state.n_locks > 0);
            state.n_locks -= 1;
            (state.n_locks == 0 && index != pending_index).then_some(index)
        };
        if let Some(index) = squash_index {
            self.squash(index);
        }
    }

    /// Merge the state at `index` into its predecessor and pop it off the
    /// queue (unless it is the reusable pending slot). When the predecessor
    /// is the current state this runs the commit pipeline.
    fn squash(self: &Rc<Self>, index: usize) {
        let into_current = index == 1;

        if into_current {
            self.precommit();
        }

        {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            let extensions: Vec<Rc<dyn SyncedExtension>> = inner
                .synced
                .entries
                .iter()
                .map(|entry| entry.extension.clone())
                .collect();
            let is_pending = index == inner.queue.pending_index();
            let (dst, src) = inner.queue.squash_pair_mut(index);

            dst.size = src.size;
            dst.buffer_size = src.buffer_size;

            if src.committed.contains(Committed::SCALE) {
                dst.scale = src.scale;
            }
            if src.committed.contains(Committed::TRANSFORM) {
                dst.transform = src.transform;
            }
            if src.committed.contains(Committed::BUFFER) {
                // Surface damage is in surface-local coordinates, so take
                // the surface movement into account
                dst.surface_damage.translate((-src.dx, -src.dy).into());

                dst.dx += src.dx;
                dst.dy += src.dy;
                src.dx = 0;
                src.dy = 0;

                dst.buffer = src.buffer.take();
            } else {
                dst.dx = 0;
                dst.dy = 0;
            }
            if src.committed.contains(Committed::SURFACE_DAMAGE) {
                dst.surface_damage = std::mem::take(&mut src.surface_damage);
            } else {
                dst.surface_damage.clear();
            }
            if src.committed.contains(Committed::BUFFER_DAMAGE) {
                dst.buffer_damage = std::mem::take(&mut src.buffer_damage);
            } else {
                dst.buffer_damage.clear();
            }
            if src.committed.contains(Committed::OPAQUE_REGION) {
                dst.opaque = src.opaque.clone();
            }
            if src.committed.contains(Committed::INPUT_REGION) {
                dst.input = src.input.clone();
            }
            if src.committed.contains(Committed::VIEWPORT) {
                dst.viewport = src.viewport;
            }
            if src.committed.contains(Committed::FRAME_CALLBACK_LIST) {
                dst.frame_callbacks.extend(src.frame_callbacks.drain(..));
            }

            // The source's sub-surface order wins
            dst.subsurfaces_above = src.subsurfaces_above.clone();
            dst.subsurfaces_below = src.subsurfaces_below.clone();

            dst.committed |= src.committed;
            src.committed = Committed::empty();

            for (slot_index, extension) in extensions.iter().enumerate() {
                extension.squash_state(
                    dst.synced[slot_index].as_mut(),
                    src.synced[slot_index].as_mut(),
                );
            }

            if !is_pending {
                drop(inner.queue.remove(index));
            }
        }

        if into_current {
            self.surface_commit();
        }
    }

    /// Snapshot `current` into `previous` and clear its transient fields,
    /// then give role and extensions a look at the state about to land
    fn precommit(self: &Rc<Self>) {
        let role = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;

            let snapshot = {
                let current = inner.queue.current();
                PreviousState {
                    size: current.size,
                    viewport_src: current.viewport.src,
                }
            };
            inner.previous = snapshot;

            let current = inner.queue.current_mut();
            current.dx = 0;
            current.dy = 0;
            current.surface_damage.clear();
            current.buffer_damage.clear();
            current.committed = Committed::empty();

            inner.role
        };

        if let Some(hook) = role.and_then(|role| role.precommit) {
            let guard = self.inner.borrow();
            hook(self, guard.queue.get(1));
        }

        {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            let extensions: Vec<Rc<dyn SyncedExtension>> = inner
                .synced
                .entries
                .iter()
                .map(|entry| entry.extension.clone())
                .collect();
            let (current, next) = inner.queue.squash_pair_mut(1);
            for (slot_index, extension) in extensions.iter().enumerate() {
                extension.precommit(
                    current.synced[slot_index].as_mut(),
                    next.synced[slot_index].as_mut(),
                );
            }
        }
    }

    /*
     * Commit pipeline
     */

    fn surface_commit(self: &Rc<Self>) {
        let (subsurfaces, role) = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;

            let (dx, dy) = {
                let current = inner.queue.current();
                (current.dx, current.dy)
            };
            inner.sx += dx;
            inner.sy += dy;

            Self::update_damage(inner);

            inner.external_damage.clear();
            let (size, committed) = {
                let current = inner.queue.current();
                (current.size, current.committed)
            };
            if inner.previous.size.w > size.w
                || inner.previous.size.h > size.h
                || dx != 0
                || dy != 0
            {
                inner
                    .external_damage
                    .union_rect(Rectangle::new((-dx, -dy).into(), inner.previous.size));
            }

            if committed.contains(Committed::BUFFER) {
                Self::apply_buffer(inner);
            }
            Self::update_opaque_region(inner);
            Self::update_input_region(inner);

            let pending = inner.queue.pending();
            let subsurfaces: Vec<Rc<Subsurface>> = pending
                .subsurfaces_above
                .iter()
                .rev()
                .chain(pending.subsurfaces_below.iter().rev())
                .filter_map(Weak::upgrade)
                .collect();
            (subsurfaces, inner.role)
        };

        for subsurface in subsurfaces {
            subsurface.parent_commit_notify();
        }

        if let Some(hook) = role.and_then(|role| role.commit) {
            hook(self);
        }

        self.events.commit.signal(self.clone());

        self.inner.borrow_mut().queue.current_mut().committed = Committed::empty();
    }

    /// Transform the current state's damage into buffer coordinates and
    /// accumulate it
    fn update_damage(inner: &mut SurfaceInner) {
        inner.buffer_damage.clear();

        let current = inner.queue.current();
        let previous = &inner.previous;

        if current.size != previous.size || current.viewport.src != previous.viewport_src {
            // Damage the whole buffer on resize or viewport source change
            let whole = Rectangle::from_size(current.buffer_size);
            inner.buffer_damage.union_rect(whole);
        } else {
            let mut damage = current.surface_damage.clone();

            if let Some(dst) = current.viewport.dst {
                let src_size = current.viewport_src_size();
                let scale_x = dst.w as f64 / src_size.w as f64;
                let scale_y = dst.h as f64 / src_size.h as f64;
                damage = damage.scale_xy(1.0 / scale_x, 1.0 / scale_y);
            }
            if let Some(src) = current.viewport.src {
                // Lossy: best-effort conversion of the fractional crop origin
                damage.translate((src.loc.x.floor() as i32, src.loc.y.floor() as i32).into());
            }

            damage = damage.scale(current.scale as f64);

            let transformed = current.transformed_buffer_size();
            let area: Size<i32, Logical> = (transformed.w, transformed.h).into();
            let damage: Region<BufferCoords> = damage.transform(current.transform.invert(), area);

            let mut accumulated = current.buffer_damage.clone();
            accumulated.union(&damage);
            inner.buffer_damage = accumulated;
        }
    }

    /// Move the committed client buffer into an upload, patching the
    /// existing one when the renderer can
    fn apply_buffer(inner: &mut SurfaceInner) {
        let Some(next) = inner.queue.current_mut().buffer.take() else {
            // Null commit, the surface contents are removed
            inner.buffer = None;
            return;
        };

        if let Some(existing) = &inner.buffer {
            if inner.renderer.apply_damage(existing, &next, &inner.buffer_damage) {
                return;
            }
        }

        match inner.renderer.create_buffer(&next) {
            Ok(upload) => {
                inner.buffer = Some(upload);
            }
            Err(_) => {
                // Keep displaying the previous upload
                error!("Failed to upload buffer");
            }
        }
    }

    fn update_opaque_region(inner: &mut SurfaceInner) {
        match &inner.buffer {
            None => inner.opaque_region.clear(),
            Some(buffer) if buffer.is_opaque() => {
                let bounds = Rectangle::from_size(inner.queue.current().size);
                inner.opaque_region = Region::from_rect(bounds);
            }
            Some(_) => {
                let current = inner.queue.current();
                let mut region = current.opaque.clone();
                region.intersect_rect(Rectangle::from_size(current.size));
                inner.opaque_region = region;
            }
        }
    }

    fn update_input_region(inner: &mut SurfaceInner) {
        let current = inner.queue.current();
        let bounds = Rectangle::from_size(current.size);
        inner.input_region = match &current.input {
            Some(region) => {
                let mut region = region.clone();
                region.intersect_rect(bounds);
                region
            }
            None => Region::from_rect(bounds),
        };
    }

    /*
     * Roles
     */

    /// Assign a role to this surface
    ///
    /// Assigning a different role than the current one, or re-assigning the
    /// same role while its role object is still alive with different data,
    /// fails with [`ProtocolError::RoleConflict`].
    pub fn set_role(
        &self,
        role: &'static SurfaceRole,
        role_data: Option<Rc<dyn Any>>,
    ) -> Result<(), ProtocolError> {
        let mut inner = self.inner.borrow_mut();
        if let Some(existing) = inner.role {
            if !std::ptr::eq(existing, role) {
                return Err(ProtocolError::RoleConflict {
                    requested: role.name,
                    existing: existing.name,
                });
            }
        }
        if let Some(existing_data) = &inner.role_data {
            let same = role_data
                .as_ref()
                .map(|data| Rc::ptr_eq(existing_data, data))
                .unwrap_or(false);
            if !same {
                return Err(ProtocolError::RoleConflict {
                    requested: role.name,
                    existing: role.name,
                });
            }
        }
        inner.role = Some(role);
        if role_data.is_some() {
            inner.role_data = role_data;
        }
        Ok(())
    }

    /// The name of the currently assigned role, if any
    pub fn role_name(&self) -> Option<&'static str> {
        self.inner.borrow().role.map(|role| role.name)
    }

    /// The data object of the currently assigned role, if any
    pub fn role_data(&self) -> Option<Rc<dyn Any>> {
        self.inner.borrow().role_data.clone()
    }

    /*
     * Synced extensions
     */

    /// Register a synced extension, shadowing every state in the queue
    pub fn add_synced(&self, extension: Rc<dyn SyncedExtension>) -> Result<SyncedHandle, ProtocolError> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        inner
            .synced
            .register(extension, inner.queue.iter_mut())
            .ok_or(ProtocolError::NoMemory)
    }

    /// Unregister a synced extension, tearing down all its shadow slots
    pub fn remove_synced(&self, handle: SyncedHandle) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        inner.synced.unregister(handle, inner.queue.iter_mut());
    }

    /// Access the extension's shadow slot of the pending state
    pub fn with_synced_pending<T: SyncedSlot, R>(
        &self,
        handle: SyncedHandle,
        f: impl FnOnce(&mut T) -> R,
    ) -> R {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let index = inner.synced.index_of(handle).expect("unknown synced extension");
        let slot = inner.queue.pending_mut().synced[index]
            .downcast_mut::<T>()
            .expect("synced slot type mismatch");
        f(slot)
    }

    /// Access the extension's shadow slot of the current state
    pub fn with_synced_current<T: SyncedSlot, R>(
        &self,
        handle: SyncedHandle,
        f: impl FnOnce(&T) -> R,
    ) -> R {
        let guard = self.inner.borrow();
        let index = guard.synced.index_of(handle).expect("unknown synced extension");
        let slot = guard.queue.current().synced[index]
            .downcast_ref::<T>()
            .expect("synced slot type mismatch");
        f(slot)
    }

    #[cfg(test)]
    pub(crate) fn synced_slot_counts(&self) -> Vec<usize> {
        self.inner
            .borrow()
            .queue
            .iter()
            .map(|state| state.synced.len())
            .collect()
    }

    /*
     * Sub-surface plumbing
     */

    pub(crate) fn push_pending_subsurface(&self, subsurface: &Rc<Subsurface>) {
        let mut inner = self.inner.borrow_mut();
        inner
            .queue
            .pending_mut()
            .subsurfaces_above
            .push(Rc::downgrade(subsurface));
    }

    pub(crate) fn remove_subsurface_links(&self, subsurface: &Rc<Subsurface>) {
        let target = Rc::as_ptr(subsurface);
        let mut inner = self.inner.borrow_mut();
        for state in inner.queue.iter_mut() {
            state.subsurfaces_above.retain(|weak| weak.as_ptr() != target);
            state.subsurfaces_below.retain(|weak| weak.as_ptr() != target);
        }
    }

    /// Move a sub-surface right above or below a sibling (or the surface
    /// itself) in the pending order
    pub(crate) fn reorder_subsurface(
        self: &Rc<Self>,
        subsurface: &Rc<Subsurface>,
        sibling: &Rc<Surface>,
        place_above: bool,
    ) -> Result<(), ProtocolError> {
        let target = Rc::as_ptr(subsurface);
        let mut inner = self.inner.borrow_mut();
        let pending = inner.queue.pending_mut();

        let sibling_of = |weak: &Weak<Subsurface>| {
            weak.upgrade()
                .and_then(|sub| sub.surface())
                .map(|surface| Rc::ptr_eq(&surface, sibling))
                .unwrap_or(false)
        };

        // Locate the insertion point before touching anything
        let position = if Rc::ptr_eq(sibling, self) {
            // Relative to the parent plane itself
            if place_above {
                Some((true, 0))
            } else {
                Some((false, pending.subsurfaces_below.len()))
            }
        } else if let Some(index) = pending.subsurfaces_above.iter().position(|weak| sibling_of(weak)) {
            Some((true, if place_above { index + 1 } else { index }))
        } else if let Some(index) = pending.subsurfaces_below.iter().position(|weak| sibling_of(weak)) {
            Some((false, if place_above { index + 1 } else { index }))
        } else {
            None
        };
        let Some((in_above, mut index)) = position else {
            return Err(ProtocolError::BadSurface);
        };

        // Unlink, adjusting the insertion point if the removal shifted it
        if in_above {
            if let Some(old) = pending
                .subsurfaces_above
                .iter()
                .position(|weak| weak.as_ptr() == target)
            {
                pending.subsurfaces_above.remove(old);
                if old < index {
                    index -= 1;
                }
            } else {
                pending
                    .subsurfaces_below
                    .retain(|weak| weak.as_ptr() != target);
            }
            pending
                .subsurfaces_above
                .insert(index, Rc::downgrade(subsurface));
        } else {
            if let Some(old) = pending
                .subsurfaces_below
                .iter()
                .position(|weak| weak.as_ptr() == target)
            {
                pending.subsurfaces_below.remove(old);
                if old < index {
                    index -= 1;
                }
            } else {
                pending
                    .subsurfaces_above
                    .retain(|weak| weak.as_ptr() != target);
            }
            pending
                .subsurfaces_below
                .insert(index, Rc::downgrade(subsurface));
        }
        Ok(())
    }

    /*
     * Hit testing & traversal
     */

    /// Whether the given surface-local point is inside the surface bounds
    /// and its input region
    pub fn point_accepts_input(&self, sx: f64, sy: f64) -> bool {
        let inner = self.inner.borrow();
        let current = inner.queue.current();
        sx >= 0.0
            && sx < current.size.w as f64
            && sy >= 0.0
            && sy < current.size.h as f64
            && current
                .input
                .as_ref()
                .map(|region| region.contains((sx.floor() as i32, sy.floor() as i32).into()))
                .unwrap_or(true)
    }

    /// Find the topmost mapped surface of this surface's tree accepting
    /// input at the given surface-local coordinates
    ///
    /// Returns the surface and the coordinates relative to it.
    pub fn surface_at(self: &Rc<Self>, sx: f64, sy: f64) -> Option<(Rc<Surface>, Point<f64, Logical>)> {
        let (above, below) = self.current_child_lists();

        for subsurface in above.iter().rev() {
            if !subsurface.is_mapped() {
                continue;
            }
            let position = subsurface.current_position();
            let Some(child) = subsurface.surface() else {
                continue;
            };
            if let Some(found) = child.surface_at(sx - position.x as f64, sy - position.y as f64) {
                return Some(found);
            }
        }

        if self.point_accepts_input(sx, sy) {
            return Some((self.clone(), (sx, sy).into()));
        }

        for subsurface in below.iter().rev() {
            if !subsurface.is_mapped() {
                continue;
            }
            let position = subsurface.current_position();
            let Some(child) = subsurface.surface() else {
                continue;
            };
            if let Some(found) = child.surface_at(sx - position.x as f64, sy - position.y as f64) {
                return Some(found);
            }
        }

        None
    }

    fn current_child_lists(&self) -> (Vec<Rc<Subsurface>>, Vec<Rc<Subsurface>>) {
        let inner = self.inner.borrow();
        let current = inner.queue.current();
        (
            current
                .subsurfaces_above
                .iter()
                .filter_map(Weak::upgrade)
                .collect(),
            current
                .subsurfaces_below
                .iter()
                .filter_map(Weak::upgrade)
                .collect(),
        )
    }

    /// Visit this surface and all its mapped sub-surfaces in paint order,
    /// bottom-most first
    ///
    /// The visitor receives each surface along with its position relative to
    /// this surface.
    pub fn for_each_surface<F: FnMut(&Rc<Surface>, Point<i32, Logical>)>(self: &Rc<Self>, f: &mut F) {
        self.for_each_from((0, 0).into(), f);
    }

    fn for_each_from<F: FnMut(&Rc<Surface>, Point<i32, Logical>)>(
        self: &Rc<Self>,
        location: Point<i32, Logical>,
        f: &mut F,
    ) {
        let (above, below) = self.current_child_lists();

        for subsurface in &below {
            if !subsurface.is_mapped() {
                continue;
            }
            let position = subsurface.current_position();
            if let Some(child) = subsurface.surface() {
                child.for_each_from(location + position, f);
            }
        }

        f(self, location);

        for subsurface in &above {
            if !subsurface.is_mapped() {
                continue;
            }
            let position = subsurface.current_position();
            if let Some(child) = subsurface.surface() {
                child.for_each_from(location + position, f);
            }
        }
    }

    /// The bounding box of this surface and all its mapped sub-surfaces, in
    /// surface-local coordinates
    pub fn get_extends(self: &Rc<Self>) -> Rectangle<i32, Logical> {
        let size = self.current_size();
        let mut min: Point<i32, Logical> = (0, 0).into();
        let mut max: Point<i32, Logical> = (size.w, size.h).into();

        self.for_each_surface(&mut |surface, location| {
            let size = surface.current_size();
            min.x = min.x.min(location.x);
            min.y = min.y.min(location.y);
            max.x = max.x.max(location.x + size.w);
            max.y = max.y.max(location.y + size.h);
        });

        Rectangle::from_extremities(min, max)
    }

    /*
     * Damage views
     */

    /// The accumulated damage expressed in surface-local coordinates
    ///
    /// This undoes the buffer transform, scale and viewport of the current
    /// state and adds the external damage caused by resizes and moves.
    pub fn effective_damage(&self) -> Region<Logical> {
        let inner = self.inner.borrow();
        let current = inner.queue.current();

        let mut damage: Region<Logical> = inner
            .buffer_damage
            .transform(current.transform, current.buffer_size);
        damage = damage.scale(1.0 / current.scale as f64);

        if let Some(src) = current.viewport.src {
            let src_box = Rectangle::new(
                (src.loc.x.floor() as i32, src.loc.y.floor() as i32).into(),
                (src.size.w.ceil() as i32, src.size.h.ceil() as i32).into(),
            );
            damage = damage.cropped(src_box);
        }
        if let Some(dst) = current.viewport.dst {
            let src_size = current.viewport_src_size();
            let scale_x = dst.w as f64 / src_size.w as f64;
            let scale_y = dst.h as f64 / src_size.h as f64;
            damage = damage.scale_xy(scale_x, scale_y);
        }

        damage.union(&inner.external_damage);
        damage
    }

    /// The part of the buffer the surface samples from, in buffer
    /// coordinates
    pub fn buffer_source_box(&self) -> Rectangle<f64, BufferCoords> {
        let inner = self.inner.borrow();
        let current = inner.queue.current();

        let Some(src) = current.viewport.src else {
            return Rectangle::from_size(current.buffer_size).to_f64();
        };

        let scale = current.scale as f64;
        let scaled: Rectangle<f64, Logical> = Rectangle::new(
            (src.loc.x * scale, src.loc.y * scale).into(),
            (src.size.w * scale, src.size.h * scale).into(),
        );
        let transformed = current.transformed_buffer_size();
        let area: Size<f64, Logical> = (transformed.w as f64, transformed.h as f64).into();
        let out = current.transform.invert().transform_rect_in(scaled, &area);
        Rectangle::new((out.loc.x, out.loc.y).into(), (out.size.w, out.size.h).into())
    }

    /*
     * Outputs & frame callbacks
     */

    fn prune_outputs(&self) {
        self.inner
            .borrow_mut()
            .outputs
            .retain(|record| !record.gone.get() && record.output.strong_count() > 0);
    }

    /// Record that this surface entered an output; idempotent
    pub fn send_enter(&self, output: &Rc<Output>) {
        self.prune_outputs();
        {
            let mut inner = self.inner.borrow_mut();
            if inner.outputs.iter().any(|record| record.id == output.id()) {
                return;
            }
            let gone = Rc::new(Cell::new(false));
            let flag = gone.clone();
            let token = output.events().destroy.register(move |_| flag.set(true));
            inner.outputs.push(OutputRecord {
                id: output.id(),
                output: Rc::downgrade(output),
                gone,
                _destroy_token: token,
            });
        }
        self.events.enter.signal(output.clone());
    }

    /// Record that this surface left an output; idempotent
    pub fn send_leave(&self, output: &Rc<Output>) {
        self.prune_outputs();
        let removed = {
            let mut inner = self.inner.borrow_mut();
            let before = inner.outputs.len();
            inner.outputs.retain(|record| record.id != output.id());
            before != inner.outputs.len()
        };
        if removed {
            self.events.leave.signal(output.clone());
        }
    }

    /// The outputs this surface currently overlaps
    pub fn outputs(&self) -> Vec<Rc<Output>> {
        self.prune_outputs();
        self.inner
            .borrow()
            .outputs
            .iter()
            .filter_map(|record| record.output.upgrade())
            .collect()
    }

    /// Fire and destroy every frame callback of the current state
    pub fn send_frame_done(&self, time_ms: u32) {
        let callbacks: SmallVec<[FrameCallback; 2]> = {
            let mut inner = self.inner.borrow_mut();
            std::mem::take(&mut inner.queue.current_mut().frame_callbacks)
        };
        for callback in callbacks {
            callback.done(time_ms);
        }
    }

    /*
     * Teardown
     */

    /// Tear the surface down
    ///
    /// Per-output records are dropped, the `destroy` signal fires, host data
    /// and extensions are torn down, then every state of the queue (cached
    /// first, then pending, then current), releasing buffers and unfired
    /// frame callbacks.
    pub fn destroy(self: &Rc<Self>) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            inner.outputs.clear();
        }

        self.events.destroy.signal(self.clone());

        self.user_data.clear();

        if let Some(subsurface) = Subsurface::from_surface(self) {
            subsurface.destroy();
        }

        let children: Vec<Rc<Subsurface>> = {
            let inner = self.inner.borrow();
            let mut children: Vec<Rc<Subsurface>> = Vec::new();
            for state in inner.queue.iter() {
                for weak in state.subsurfaces_above.iter().chain(&state.subsurfaces_below) {
                    if let Some(subsurface) = weak.upgrade() {
                        if !children.iter().any(|c| Rc::ptr_eq(c, &subsurface)) {
                            children.push(subsurface);
                        }
                    }
                }
            }
            children
        };
        for child in children {
            child.handle_parent_destroy();
        }

        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        // Extensions may keep pointers into states, finalize them first
        inner.synced.entries.clear();
        for state in inner.queue.iter_mut() {
            state.synced.clear();
        }
        inner.queue.teardown();
        inner.buffer_damage.clear();
        inner.external_damage.clear();
        inner.opaque_region.clear();
        inner.input_region.clear();
        inner.role = None;
        inner.role_data = None;
        inner.buffer = None;
    }

    pub(crate) fn weak(&self) -> Weak<Surface> {
        self.weak.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::buffer::test::{TestBuffer, TestRenderer};
    use crate::output::Output;

    use super::*;

    fn test_surface() -> (Rc<Surface>, Rc<TestRenderer>) {
        let renderer = TestRenderer::new();
        let surface = Surface::new(renderer.clone(), Tracer::disabled());
        (surface, renderer)
    }

    fn commit_counter(surface: &Rc<Surface>) -> (Rc<Cell<usize>>, SignalToken) {
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        let token = surface
            .events()
            .commit
            .register(move |_| counter.set(counter.get() + 1));
        (count, token)
    }

    fn rect(x: i32, y: i32, w: i32, h: i32) -> Rectangle<i32, Logical> {
        Rectangle::new((x, y).into(), (w, h).into())
    }

    #[test]
    fn attach_damage_commit() {
        let (surface, renderer) = test_surface();
        let (commits, _token) = commit_counter(&surface);

        surface.attach(Some(TestBuffer::new(256, 256)), 0, 0);
        surface.damage(0, 0, 256, 256);
        surface.commit().unwrap();

        assert_eq!(surface.current_size(), (256, 256).into());
        assert_eq!(
            surface.buffer_damage().extents(),
            Rectangle::new((0, 0).into(), (256, 256).into())
        );
        assert_eq!(commits.get(), 1);
        assert!(surface.has_buffer());
        assert_eq!(renderer.uploads.get(), 1);
    }

    #[test]
    fn incremental_upload_via_apply_damage() {
        let (surface, renderer) = test_surface();
        renderer.accept_apply_damage.set(true);

        surface.attach(Some(TestBuffer::new(256, 256)), 0, 0);
        surface.damage(0, 0, 256, 256);
        surface.commit().unwrap();
        assert_eq!(renderer.uploads.get(), 1);
        assert!(renderer.apply_damage_calls.borrow().is_empty());

        surface.attach(Some(TestBuffer::new(256, 256)), 0, 0);
        surface.damage(10, 10, 20, 20);
        surface.commit().unwrap();

        let calls = renderer.apply_damage_calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec![Rectangle::new((10, 10).into(), (20, 20).into())]);
        // The existing upload was reused
        assert_eq!(renderer.uploads.get(), 1);
        drop(calls);

        assert_eq!(
            surface.buffer_damage().extents(),
            Rectangle::new((10, 10).into(), (20, 20).into())
        );
    }

    #[test]
    fn buffer_not_divisible_by_scale_is_accepted() {
        let (surface, _renderer) = test_surface();
        surface.set_buffer_scale(2).unwrap();
        surface.attach(Some(TestBuffer::new(100, 100)), 0, 0);
        surface.commit().unwrap();

        assert_eq!(surface.current_size(), (50, 50).into());
    }

    #[test]
    fn invalid_transform_is_rejected() {
        let (surface, _renderer) = test_surface();
        assert!(matches!(
            surface.set_buffer_transform(99),
            Err(ProtocolError::InvalidTransform(99))
        ));
        surface.with_pending(|pending| {
            assert_eq!(pending.committed, Committed::empty());
            assert_eq!(pending.transform, Transform::Normal);
        });
    }

    #[test]
    fn invalid_scale_is_rejected() {
        let (surface, _renderer) = test_surface();
        assert!(matches!(
            surface.set_buffer_scale(0),
            Err(ProtocolError::InvalidScale(0))
        ));
        assert!(matches!(
            surface.set_buffer_scale(-3),
            Err(ProtocolError::InvalidScale(-3))
        ));
    }

    #[test]
    fn locked_states_apply_in_seq_order() {
        let (surface, _renderer) = test_surface();
        let (commits, _token) = commit_counter(&surface);

        let seq_a = surface.lock_pending();
        surface.attach(Some(TestBuffer::new(16, 16)), 0, 0);
        surface.commit().unwrap();

        let seq_b = surface.lock_pending();
        surface.attach(Some(TestBuffer::new(32, 32)), 0, 0);
        surface.commit().unwrap();

        assert_ne!(seq_a, seq_b);
        // current + two cached + pending
        assert_eq!(surface.queue_len(), 4);
        assert_eq!(commits.get(), 0);

        // Unlocking the newer state first merges it into the older one
        surface.unlock_cached(seq_b);
        assert_eq!(surface.queue_len(), 3);
        assert_eq!(commits.get(), 0);

        surface.unlock_cached(seq_a);
        assert_eq!(surface.queue_len(), 2);
        assert_eq!(commits.get(), 1);
        assert_eq!(surface.current_size(), (32, 32).into());
    }

    #[test]
    #[should_panic(expected = "Can't find a state to unlock")]
    fn unbalanced_unlock_is_a_caller_bug() {
        let (surface, _renderer) = test_surface();
        let seq = surface.lock_pending();
        surface.attach(Some(TestBuffer::new(16, 16)), 0, 0);
        surface.commit().unwrap();
        surface.unlock_cached(seq);
        surface.unlock_cached(seq);
    }

    #[test]
    fn split_commits_match_combined_commit() {
        let (split, _r1) = test_surface();
        split.set_buffer_scale(2).unwrap();
        split.commit().unwrap();
        split.set_buffer_transform(1).unwrap();
        split.commit().unwrap();
        split.attach(Some(TestBuffer::new(100, 50)), 3, 4);
        split.commit().unwrap();

        let (combined, _r2) = test_surface();
        combined.set_buffer_scale(2).unwrap();
        combined.set_buffer_transform(1).unwrap();
        combined.attach(Some(TestBuffer::new(100, 50)), 3, 4);
        combined.commit().unwrap();

        let snapshot = |surface: &Rc<Surface>| {
            surface.with_current(|current| (current.scale, current.transform, current.size))
        };
        assert_eq!(snapshot(&split), snapshot(&combined));
        assert_eq!(split.offset(), combined.offset());
        assert_eq!(split.offset(), (3, 4).into());
    }

    struct CountingSlot {
        value: i32,
    }
    impl SyncedSlot for CountingSlot {}

    #[derive(Default)]
    struct CountingExtension {
        squashes: Cell<usize>,
    }

    impl SyncedExtension for CountingExtension {
        fn create_state(&self) -> Option<Box<dyn SyncedSlot>> {
            Some(Box::new(CountingSlot { value: 0 }))
        }

        fn squash_state(&self, dst: &mut dyn SyncedSlot, src: &mut dyn SyncedSlot) {
            let src = src.downcast_ref::<CountingSlot>().unwrap();
            let dst = dst.downcast_mut::<CountingSlot>().unwrap();
            dst.value = src.value;
            self.squashes.set(self.squashes.get() + 1);
        }
    }

    struct FailingExtension;

    impl SyncedExtension for FailingExtension {
        fn create_state(&self) -> Option<Box<dyn SyncedSlot>> {
            None
        }

        fn squash_state(&self, _dst: &mut dyn SyncedSlot, _src: &mut dyn SyncedSlot) {}
    }

    #[test]
    fn synced_extension_shadows_every_state() {
        let (surface, _renderer) = test_surface();
        let extension = Rc::new(CountingExtension::default());
        let handle = surface.add_synced(extension.clone()).unwrap();

        assert_eq!(surface.synced_slot_counts(), vec![1, 1]);

        surface.with_synced_pending::<CountingSlot, _>(handle, |slot| slot.value = 7);

        let seq = surface.lock_pending();
        surface.commit().unwrap();
        assert_eq!(surface.synced_slot_counts(), vec![1, 1, 1]);

        surface.unlock_cached(seq);
        assert_eq!(surface.synced_slot_counts(), vec![1, 1]);
        assert!(extension.squashes.get() >= 2);
        assert_eq!(
            surface.with_synced_current::<CountingSlot, _>(handle, |slot| slot.value),
            7
        );

        surface.remove_synced(handle);
        assert_eq!(surface.synced_slot_counts(), vec![0, 0]);
    }

    #[test]
    fn failing_extension_registration_is_undone() {
        let (surface, _renderer) = test_surface();
        let counting = surface.add_synced(Rc::new(CountingExtension::default())).unwrap();
        let _ = counting;

        assert!(matches!(
            surface.add_synced(Rc::new(FailingExtension)),
            Err(ProtocolError::NoMemory)
        ));
        assert_eq!(surface.synced_slot_counts(), vec![1, 1]);
    }

    #[test]
    fn frame_callbacks_fire_on_frame_done() {
        let (surface, _renderer) = test_surface();
        let fired = Rc::new(Cell::new(None));

        let cell = fired.clone();
        surface.frame(FrameCallback::new(move |time| cell.set(Some(time))));
        surface.commit().unwrap();
        assert_eq!(fired.get(), None);

        surface.send_frame_done(42);
        assert_eq!(fired.get(), Some(42));

        // One-shot: nothing fires twice
        fired.set(None);
        surface.send_frame_done(43);
        assert_eq!(fired.get(), None);
    }

    #[test]
    fn frame_callbacks_accumulate_in_order() {
        let (surface, _renderer) = test_surface();
        let order = Rc::new(RefCell::new(Vec::new()));

        let first = order.clone();
        surface.frame(FrameCallback::new(move |_| first.borrow_mut().push(1)));
        surface.commit().unwrap();

        let second = order.clone();
        surface.frame(FrameCallback::new(move |_| second.borrow_mut().push(2)));
        surface.commit().unwrap();

        surface.send_frame_done(0);
        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    #[test]
    fn frame_callbacks_die_with_the_surface() {
        let (surface, _renderer) = test_surface();
        let fired = Rc::new(Cell::new(false));

        let cell = fired.clone();
        surface.frame(FrameCallback::new(move |_| cell.set(true)));
        surface.commit().unwrap();
        surface.destroy();

        assert!(!fired.get());
    }

    #[test]
    fn null_commit_removes_contents() {
        let (surface, _renderer) = test_surface();
        surface.attach(Some(TestBuffer::new(64, 64)), 0, 0);
        surface.commit().unwrap();
        assert!(surface.has_buffer());

        surface.attach(None, 0, 0);
        surface.commit().unwrap();
        assert!(!surface.has_buffer());
        assert_eq!(surface.current_size(), (0, 0).into());
    }

    #[test]
    fn failed_upload_keeps_previous_contents() {
        let (surface, renderer) = test_surface();
        surface.attach(Some(TestBuffer::new(64, 64)), 0, 0);
        surface.commit().unwrap();
        let upload = surface.buffer().unwrap();

        renderer.fail_uploads.set(true);
        surface.attach(Some(TestBuffer::new(128, 128)), 0, 0);
        surface.commit().unwrap();

        assert!(surface.has_buffer());
        assert!(Rc::ptr_eq(&surface.buffer().unwrap(), &upload));
    }

    #[test]
    fn opaque_region_derivation() {
        let (surface, _renderer) = test_surface();
        let attributes = RegionAttributes {
            rects: vec![(
                crate::utils::RectangleKind::Add,
                rect(0, 0, 50, 50),
            )],
        };
        surface.attach(Some(TestBuffer::new(100, 100)), 0, 0);
        surface.set_opaque_region(Some(&attributes));
        surface.commit().unwrap();
        assert_eq!(surface.opaque_region().extents(), rect(0, 0, 50, 50));

        // An opaque texture makes the whole surface opaque
        let (surface, _renderer) = test_surface();
        surface.attach(Some(TestBuffer::new_opaque(100, 100)), 0, 0);
        surface.commit().unwrap();
        assert_eq!(surface.opaque_region().extents(), rect(0, 0, 100, 100));
    }

    #[test]
    fn input_region_defaults_to_whole_surface() {
        let (surface, _renderer) = test_surface();
        surface.attach(Some(TestBuffer::new(100, 100)), 0, 0);
        surface.commit().unwrap();

        assert!(surface.point_accepts_input(50.0, 50.0));
        assert!(surface.point_accepts_input(0.0, 99.9));
        assert!(!surface.point_accepts_input(100.0, 50.0));
        assert!(!surface.point_accepts_input(-0.1, 50.0));
    }

    #[test]
    fn input_region_restricts_hits() {
        let (surface, _renderer) = test_surface();
        let attributes = RegionAttributes {
            rects: vec![(
                crate::utils::RectangleKind::Add,
                rect(0, 0, 10, 10),
            )],
        };
        surface.attach(Some(TestBuffer::new(100, 100)), 0, 0);
        surface.set_input_region(Some(&attributes));
        surface.commit().unwrap();

        assert!(surface.point_accepts_input(5.0, 5.0));
        assert!(!surface.point_accepts_input(50.0, 50.0));

        let (hit, local) = surface.surface_at(5.0, 5.0).unwrap();
        assert!(Rc::ptr_eq(&hit, &surface));
        assert_eq!(local, (5.0, 5.0).into());
        assert!(surface.surface_at(50.0, 50.0).is_none());
    }

    #[test]
    fn effective_damage_is_empty_without_contents() {
        let (surface, _renderer) = test_surface();
        assert!(surface.effective_damage().is_empty());
        surface.commit().unwrap();
        assert!(surface.effective_damage().is_empty());
    }

    #[test]
    fn shrinking_surface_produces_external_damage() {
        let (surface, _renderer) = test_surface();
        surface.attach(Some(TestBuffer::new(100, 100)), 0, 0);
        surface.commit().unwrap();

        surface.attach(Some(TestBuffer::new(40, 40)), 0, 0);
        surface.commit().unwrap();

        let damage = surface.effective_damage();
        assert!(damage.extents().contains_rect(rect(0, 0, 100, 100)));
    }

    #[test]
    fn viewport_destination_scales_damage() {
        let (surface, _renderer) = test_surface();
        surface.attach(Some(TestBuffer::new(100, 100)), 0, 0);
        surface.set_viewport(Viewport {
            src: None,
            dst: Some((200, 200).into()),
        });
        surface.commit().unwrap();
        assert_eq!(surface.current_size(), (200, 200).into());

        surface.damage(0, 0, 20, 20);
        surface.commit().unwrap();
        assert_eq!(surface.buffer_damage().extents(), Rectangle::new((0, 0).into(), (10, 10).into()));
    }

    #[test]
    fn buffer_transform_maps_damage_into_buffer_space() {
        let (surface, _renderer) = test_surface();
        surface.set_buffer_transform(1).unwrap();
        surface.attach(Some(TestBuffer::new(100, 50)), 0, 0);
        surface.commit().unwrap();
        assert_eq!(surface.current_size(), (50, 100).into());

        surface.damage(0, 0, 10, 20);
        surface.commit().unwrap();
        assert_eq!(
            surface.buffer_damage().extents(),
            Rectangle::new((0, 40).into(), (20, 10).into())
        );
    }

    #[test]
    fn buffer_source_box_follows_the_viewport() {
        let (surface, _renderer) = test_surface();
        surface.attach(Some(TestBuffer::new(100, 100)), 0, 0);
        surface.commit().unwrap();
        assert_eq!(
            surface.buffer_source_box(),
            Rectangle::new((0.0, 0.0).into(), (100.0, 100.0).into())
        );

        surface.set_buffer_scale(2).unwrap();
        surface.set_viewport(Viewport {
            src: Some(Rectangle::new((10.0, 10.0).into(), (20.0, 20.0).into())),
            dst: None,
        });
        surface.commit().unwrap();
        assert_eq!(
            surface.buffer_source_box(),
            Rectangle::new((20.0, 20.0).into(), (40.0, 40.0).into())
        );
    }

    static ROLE_A: SurfaceRole = SurfaceRole {
        name: "role_a",
        precommit: None,
        commit: None,
    };
    static ROLE_B: SurfaceRole = SurfaceRole {
        name: "role_b",
        precommit: None,
        commit: None,
    };

    #[test]
    fn conflicting_roles_are_rejected() {
        let (surface, _renderer) = test_surface();
        surface.set_role(&ROLE_A, None).unwrap();
        // Re-assigning the same role succeeds
        surface.set_role(&ROLE_A, None).unwrap();
        assert!(matches!(
            surface.set_role(&ROLE_B, None),
            Err(ProtocolError::RoleConflict { .. })
        ));
        assert_eq!(surface.role_name(), Some("role_a"));
    }

    #[test]
    fn role_data_must_match_on_reassignment() {
        let (surface, _renderer) = test_surface();
        let data: Rc<dyn Any> = Rc::new(1u32);
        surface.set_role(&ROLE_A, Some(data.clone())).unwrap();
        surface.set_role(&ROLE_A, Some(data)).unwrap();

        let other: Rc<dyn Any> = Rc::new(2u32);
        assert!(matches!(
            surface.set_role(&ROLE_A, Some(other)),
            Err(ProtocolError::RoleConflict { .. })
        ));
    }

    static ROLE_HOOK_COMMITS: AtomicUsize = AtomicUsize::new(0);
    static ROLE_HOOK_PRECOMMITS: AtomicUsize = AtomicUsize::new(0);

    fn hook_commit(_surface: &Rc<Surface>) {
        ROLE_HOOK_COMMITS.fetch_add(1, Ordering::SeqCst);
    }

    fn hook_precommit(_surface: &Rc<Surface>, next: &SurfaceState) {
        assert!(next.committed.contains(Committed::BUFFER));
        ROLE_HOOK_PRECOMMITS.fetch_add(1, Ordering::SeqCst);
    }

    static HOOKED_ROLE: SurfaceRole = SurfaceRole {
        name: "hooked",
        precommit: Some(hook_precommit),
        commit: Some(hook_commit),
    };

    #[test]
    fn role_hooks_run_during_commit() {
        let (surface, _renderer) = test_surface();
        surface.set_role(&HOOKED_ROLE, None).unwrap();

        let commits_before = ROLE_HOOK_COMMITS.load(Ordering::SeqCst);
        let precommits_before = ROLE_HOOK_PRECOMMITS.load(Ordering::SeqCst);

        surface.attach(Some(TestBuffer::new(8, 8)), 0, 0);
        surface.commit().unwrap();

        assert_eq!(ROLE_HOOK_COMMITS.load(Ordering::SeqCst), commits_before + 1);
        assert_eq!(ROLE_HOOK_PRECOMMITS.load(Ordering::SeqCst), precommits_before + 1);
    }

    #[test]
    fn output_enter_and_leave_are_idempotent() {
        let (surface, _renderer) = test_surface();
        let output = Output::new("HDMI-A-1");

        let enters = Rc::new(Cell::new(0));
        let counter = enters.clone();
        let _enter_token = surface
            .events()
            .enter
            .register(move |_| counter.set(counter.get() + 1));

        surface.send_enter(&output);
        surface.send_enter(&output);
        assert_eq!(enters.get(), 1);
        assert_eq!(surface.outputs().len(), 1);

        let leaves = Rc::new(Cell::new(0));
        let counter = leaves.clone();
        let _leave_token = surface
            .events()
            .leave
            .register(move |_| counter.set(counter.get() + 1));

        surface.send_leave(&output);
        surface.send_leave(&output);
        assert_eq!(leaves.get(), 1);
        assert!(surface.outputs().is_empty());
    }

    #[test]
    fn output_destruction_drops_enter_records() {
        let (surface, _renderer) = test_surface();
        let output = Output::new("DP-1");
        surface.send_enter(&output);
        assert_eq!(surface.outputs().len(), 1);

        output.destroy();
        assert!(surface.outputs().is_empty());
    }

    #[test]
    fn destroy_emits_signal_once() {
        let (surface, _renderer) = test_surface();
        let destroys = Rc::new(Cell::new(0));
        let counter = destroys.clone();
        let _token = surface
            .events()
            .destroy
            .register(move |_| counter.set(counter.get() + 1));

        surface.destroy();
        surface.destroy();
        assert_eq!(destroys.get(), 1);
    }

    #[test]
    fn committed_mask_is_clear_after_commit() {
        let (surface, _renderer) = test_surface();
        surface.attach(Some(TestBuffer::new(8, 8)), 0, 0);
        surface.damage(0, 0, 8, 8);
        surface.commit().unwrap();
        surface.with_current(|current| assert_eq!(current.committed, Committed::empty()));
        surface.with_pending(|pending| assert_eq!(pending.committed, Committed::empty()));
    }
}
