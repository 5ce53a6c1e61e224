//! The compositor façade
//!
//! [`Compositor`] is the entry point clients reach first: it creates
//! surfaces and regions. It owns the handles every surface needs — the
//! renderer used to upload buffers and the kernel tracer — and announces
//! new surfaces to the host.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::buffer::Renderer;
use crate::surface::Surface;
use crate::utils::signaling::Signaler;
use crate::utils::{Logical, Rectangle, RegionAttributes, RectangleKind, Tracer};

/// Signals emitted by a [`Compositor`]
#[derive(Debug, Default)]
pub struct CompositorEvents {
    /// A client created a new surface
    pub new_surface: Signaler<Rc<Surface>>,
    /// The compositor global is going away
    pub destroy: Signaler<()>,
}

/// The global surfaces and regions are created from
pub struct Compositor {
    renderer: Rc<dyn Renderer>,
    tracer: Tracer,
    events: CompositorEvents,
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor").finish_non_exhaustive()
    }
}

impl Compositor {
    /// Advertised version of the compositor global
    pub const VERSION: u32 = 4;
    /// Advertised version of frame callback objects
    pub const CALLBACK_VERSION: u32 = 1;

    /// Create a new compositor using the given renderer for buffer uploads
    pub fn new(renderer: Rc<dyn Renderer>) -> Compositor {
        Compositor::with_tracer(renderer, Tracer::disabled())
    }

    /// Create a new compositor that emits kernel trace markers
    pub fn with_tracer(renderer: Rc<dyn Renderer>, tracer: Tracer) -> Compositor {
        Compositor {
            renderer,
            tracer,
            events: Default::default(),
        }
    }

    /// The signals of this compositor
    pub fn events(&self) -> &CompositorEvents {
        &self.events
    }

    /// Create a new surface on behalf of a client
    pub fn create_surface(&self) -> Rc<Surface> {
        let surface = Surface::new(self.renderer.clone(), self.tracer.clone());
        self.events.new_surface.signal(surface.clone());
        surface
    }

    /// Create a new region on behalf of a client
    pub fn create_region(&self) -> Rc<ClientRegion> {
        debug!("New region");
        Rc::new(ClientRegion::default())
    }

    /// Announce the removal of the compositor global
    pub fn destroy(&self) {
        self.events.destroy.signal(());
    }
}

/// A region a client builds out of added and subtracted rectangles
///
/// Passed to [`Surface::set_opaque_region`] and
/// [`Surface::set_input_region`] by snapshotting its
/// [`attributes`](ClientRegion::attributes).
#[derive(Debug, Default)]
pub struct ClientRegion {
    attributes: RefCell<RegionAttributes>,
}

impl ClientRegion {
    /// Add a rectangle to the region
    pub fn add(&self, x: i32, y: i32, width: i32, height: i32) {
        self.attributes.borrow_mut().rects.push((
            RectangleKind::Add,
            Rectangle::<i32, Logical>::new((x, y).into(), (width, height).into()),
        ));
    }

    /// Subtract a rectangle from the region
    pub fn subtract(&self, x: i32, y: i32, width: i32, height: i32) {
        self.attributes.borrow_mut().rects.push((
            RectangleKind::Subtract,
            Rectangle::<i32, Logical>::new((x, y).into(), (width, height).into()),
        ));
    }

    /// Snapshot the accumulated description
    pub fn attributes(&self) -> RegionAttributes {
        self.attributes.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use crate::buffer::test::TestRenderer;

    use super::*;

    #[test]
    fn advertised_versions() {
        assert_eq!(Compositor::VERSION, 4);
        assert_eq!(Compositor::CALLBACK_VERSION, 1);
        assert_eq!(crate::subcompositor::Subcompositor::VERSION, 1);
    }

    #[test]
    fn create_surface_announces_it() {
        let compositor = Compositor::new(TestRenderer::new());

        let announced = Rc::new(RefCell::new(Vec::new()));
        let sink = announced.clone();
        let _token = compositor
            .events()
            .new_surface
            .register(move |surface| sink.borrow_mut().push(Rc::as_ptr(surface)));

        let surface = compositor.create_surface();
        assert_eq!(*announced.borrow(), vec![Rc::as_ptr(&surface)]);
    }

    #[test]
    fn client_regions_evaluate_in_request_order() {
        let compositor = Compositor::new(TestRenderer::new());
        let region = compositor.create_region();
        region.add(0, 0, 100, 100);
        region.subtract(25, 25, 50, 50);

        let computed = region.attributes().to_region();
        assert!(computed.contains((10, 10).into()));
        assert!(!computed.contains((50, 50).into()));
    }

    #[test]
    fn compositor_destroy_signal() {
        let compositor = Compositor::new(TestRenderer::new());
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        let _token = compositor.events().destroy.register(move |_| flag.set(true));
        compositor.destroy();
        assert!(fired.get());
    }
}
