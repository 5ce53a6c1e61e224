//! The double-buffered surface state record and its queue
//!
//! A surface owns an ordered queue of [`SurfaceState`]s: the applied
//! `current` state at the head, the staging `pending` state at the tail, and
//! any number of `cached` states in between, held back by locks. Commits
//! merge a state into its predecessor ("squash"), so the queue only ever
//! shrinks from the middle.

use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::buffer::ClientBuffer;
use crate::subcompositor::Subsurface;
use crate::surface::synced::SyncedSlot;
use crate::utils::{BufferCoords, Logical, Rectangle, Region, Size, Transform};

bitflags! {
    /// Which fields of a pending state the client touched since the last
    /// commit
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Committed: u32 {
        /// `attach` was called
        const BUFFER = 1 << 0;
        /// `damage` was called
        const SURFACE_DAMAGE = 1 << 1;
        /// `damage_buffer` was called
        const BUFFER_DAMAGE = 1 << 2;
        /// `set_opaque_region` was called
        const OPAQUE_REGION = 1 << 3;
        /// `set_input_region` was called
        const INPUT_REGION = 1 << 4;
        /// `set_buffer_transform` was called
        const TRANSFORM = 1 << 5;
        /// `set_buffer_scale` was called
        const SCALE = 1 << 6;
        /// `frame` was called
        const FRAME_CALLBACK_LIST = 1 << 7;
        /// the viewport changed
        const VIEWPORT = 1 << 8;
    }
}

/// Optional crop and scale between the buffer and the surface size
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Viewport {
    /// Source rectangle sampled out of the buffer, in buffer-local logical
    /// coordinates (post scale and transform)
    pub src: Option<Rectangle<f64, Logical>>,
    /// Size the sampled source is scaled to
    pub dst: Option<Size<i32, Logical>>,
}

/// A one-shot frame presentation callback
///
/// Fired with the presentation time when the state it was committed with is
/// displayed, dropped silently when that state is destroyed instead.
pub struct FrameCallback {
    done: Box<dyn FnOnce(u32)>,
}

impl fmt::Debug for FrameCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCallback").finish_non_exhaustive()
    }
}

impl FrameCallback {
    /// Wrap the client notification to run when the frame is presented
    pub fn new<F: FnOnce(u32) + 'static>(done: F) -> FrameCallback {
        FrameCallback { done: Box::new(done) }
    }

    pub(crate) fn done(self, time_ms: u32) {
        (self.done)(time_ms)
    }
}

/// One snapshot of a surface's attributes
pub struct SurfaceState {
    /// Fields the client touched since this state was last squashed
    pub committed: Committed,
    pub(crate) seq: u32,
    pub(crate) n_locks: u32,

    /// Buffer attached to the surface, if any
    pub buffer: Option<Rc<dyn ClientBuffer>>,
    /// Offset of the new buffer relative to the previous one
    pub dx: i32,
    /// See `dx`
    pub dy: i32,
    /// Scale of the buffer contents
    pub scale: i32,
    /// Transform under which to interpret the buffer contents
    pub transform: Transform,
    /// Crop and scale of the buffer contents
    pub viewport: Viewport,

    /// Dimensions of the attached buffer
    pub buffer_size: Size<i32, BufferCoords>,
    /// Logical dimensions derived from buffer, scale, transform and viewport
    pub size: Size<i32, Logical>,

    /// Damage accumulated in surface-local coordinates
    pub surface_damage: Region<Logical>,
    /// Damage accumulated in buffer-local coordinates
    pub buffer_damage: Region<BufferCoords>,
    /// Region of the surface guaranteed to be opaque
    pub opaque: Region<Logical>,
    /// Region of the surface accepting input, `None` meaning unbounded
    pub input: Option<Region<Logical>>,

    pub(crate) frame_callbacks: SmallVec<[FrameCallback; 2]>,
    pub(crate) subsurfaces_above: Vec<Weak<Subsurface>>,
    pub(crate) subsurfaces_below: Vec<Weak<Subsurface>>,

    pub(crate) synced: Vec<Box<dyn SyncedSlot>>,
}

impl fmt::Debug for SurfaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceState")
            .field("committed", &self.committed)
            .field("seq", &self.seq)
            .field("n_locks", &self.n_locks)
            .field("buffer", &self.buffer)
            .field("size", &self.size)
            .field("buffer_size", &self.buffer_size)
            .field("scale", &self.scale)
            .field("transform", &self.transform)
            .finish_non_exhaustive()
    }
}

impl SurfaceState {
    pub(crate) fn new() -> SurfaceState {
        SurfaceState {
            committed: Committed::empty(),
            seq: 0,
            n_locks: 0,
            buffer: None,
            dx: 0,
            dy: 0,
            scale: 1,
            transform: Transform::Normal,
            viewport: Viewport::default(),
            buffer_size: Default::default(),
            size: Default::default(),
            surface_damage: Region::new(),
            buffer_damage: Region::new(),
            opaque: Region::new(),
            input: None,
            frame_callbacks: SmallVec::new(),
            subsurfaces_above: Vec::new(),
            subsurfaces_below: Vec::new(),
            synced: Vec::new(),
        }
    }

    /// The sequence number of this state
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Buffer dimensions with the buffer transform applied
    pub fn transformed_buffer_size(&self) -> Size<i32, BufferCoords> {
        self.transform.transform_size(self.buffer_size)
    }

    /// The surface size after scale, transform and viewport cropping, but
    /// before viewport destination scaling
    pub fn viewport_src_size(&self) -> Size<i32, Logical> {
        if self.buffer_size.w == 0 && self.buffer_size.h == 0 {
            return Default::default();
        }

        if let Some(src) = self.viewport.src {
            (src.size.w as i32, src.size.h as i32).into()
        } else {
            let transformed = self.transformed_buffer_size();
            (transformed.w / self.scale, transformed.h / self.scale).into()
        }
    }
}

/// The per-surface queue of states, `current` first and `pending` last
pub(crate) struct StateQueue {
    states: VecDeque<SurfaceState>,
}

impl fmt::Debug for StateQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.states.iter()).finish()
    }
}

impl StateQueue {
    pub fn new() -> StateQueue {
        let mut pending = SurfaceState::new();
        pending.seq = 1;
        StateQueue {
            states: VecDeque::from([SurfaceState::new(), pending]),
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn pending_index(&self) -> usize {
        self.states.len() - 1
    }

    pub fn current(&self) -> &SurfaceState {
        &self.states[0]
    }

    pub fn current_mut(&mut self) -> &mut SurfaceState {
        &mut self.states[0]
    }

    pub fn pending(&self) -> &SurfaceState {
        self.states.back().unwrap()
    }

    pub fn pending_mut(&mut self) -> &mut SurfaceState {
        self.states.back_mut().unwrap()
    }

    pub fn get(&self, index: usize) -> &SurfaceState {
        &self.states[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut SurfaceState {
        &mut self.states[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &SurfaceState> {
        self.states.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SurfaceState> {
        self.states.iter_mut()
    }

    /// Insert a freshly created cached state right before `pending`
    pub fn insert_cached(&mut self, state: SurfaceState) {
        let index = self.pending_index();
        self.states.insert(index, state);
    }

    /// Remove a cached state from the queue
    pub fn remove(&mut self, index: usize) -> SurfaceState {
        debug_assert!(index != 0 && index != self.pending_index());
        self.states.remove(index).unwrap()
    }

    /// Find the queue index of the state with the given seq, excluding
    /// `current`
    pub fn find_seq(&self, seq: u32) -> Option<usize> {
        self.states
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, state)| state.seq == seq)
            .map(|(index, _)| index)
    }

    /// Mutably borrow a state and its predecessor at the same time
    ///
    /// Returns `(dst, src)` where `dst` sits at `index - 1`.
    pub fn squash_pair_mut(&mut self, index: usize) -> (&mut SurfaceState, &mut SurfaceState) {
        assert!(index > 0 && index < self.states.len());
        let slice = self.states.make_contiguous();
        let (head, tail) = slice.split_at_mut(index);
        (&mut head[index - 1], &mut tail[0])
    }

    /// Drop every state, releasing buffers and unfired frame callbacks
    ///
    /// Cached states go first, then pending, then current, matching the
    /// surface destroy ordering.
    pub fn teardown(&mut self) {
        while self.states.len() > 2 {
            let _ = self.states.remove(1);
        }
        let _ = self.states.pop_back();
        let _ = self.states.pop_front();
    }
}
