//! Buffer contracts between the surface pipeline and its providers
//!
//! The surface state engine never touches pixels itself. Clients hand it
//! [`ClientBuffer`]s, and a [`Renderer`] turns those into [`RenderBuffer`]s
//! it can sample from. Both sides are trait objects so shared-memory pools,
//! DMA-BUF importers and test doubles can plug in equally.

use std::fmt;
use std::rc::Rc;

use downcast_rs::{impl_downcast, Downcast};

use crate::utils::{BufferCoords, Region, Size};

/// An immutable rectangle of pixels produced by a client
///
/// The handle is reference-shared with its provider; dropping the last
/// reference releases the buffer back to the client. Renderers downcast to
/// the concrete buffer types they know how to import; a buffer type no
/// renderer recognizes is a protocol error on the buffer resource.
pub trait ClientBuffer: Downcast + fmt::Debug {
    /// Pixel dimensions of the buffer
    fn size(&self) -> Size<i32, BufferCoords>;
}
impl_downcast!(ClientBuffer);

/// A client buffer uploaded for rendering
pub trait RenderBuffer: Downcast + fmt::Debug {
    /// Pixel dimensions of the upload
    fn size(&self) -> Size<i32, BufferCoords>;

    /// Whether every pixel of the upload is fully opaque
    fn is_opaque(&self) -> bool;
}
impl_downcast!(RenderBuffer);

/// The upload could not be completed
#[derive(Debug, thiserror::Error)]
#[error("failed to upload client buffer contents")]
pub struct UploadError;

/// Upload provider consumed by the commit pipeline
pub trait Renderer {
    /// Upload a client buffer into a fresh [`RenderBuffer`]
    fn create_buffer(&self, source: &Rc<dyn ClientBuffer>) -> Result<Rc<dyn RenderBuffer>, UploadError>;

    /// Try to reuse an existing upload by re-uploading only the damaged region
    ///
    /// Returns `true` if `existing` now reflects the contents of `source`.
    /// Returning `false` makes the pipeline fall back to
    /// [`Renderer::create_buffer`]. Implementations typically refuse when the
    /// dimensions changed or the existing resource cannot be written in
    /// place.
    fn apply_damage(
        &self,
        existing: &Rc<dyn RenderBuffer>,
        source: &Rc<dyn ClientBuffer>,
        damage: &Region<BufferCoords>,
    ) -> bool;
}

#[cfg(test)]
pub(crate) mod test {
    use std::cell::{Cell, RefCell};

    use crate::utils::Rectangle;

    use super::*;

    #[derive(Debug)]
    pub(crate) struct TestBuffer {
        size: Size<i32, BufferCoords>,
        pub(crate) opaque: bool,
    }

    impl TestBuffer {
        pub(crate) fn new(w: i32, h: i32) -> Rc<dyn ClientBuffer> {
            Rc::new(TestBuffer {
                size: (w, h).into(),
                opaque: false,
            })
        }

        pub(crate) fn new_opaque(w: i32, h: i32) -> Rc<dyn ClientBuffer> {
            Rc::new(TestBuffer {
                size: (w, h).into(),
                opaque: true,
            })
        }
    }

    impl ClientBuffer for TestBuffer {
        fn size(&self) -> Size<i32, BufferCoords> {
            self.size
        }
    }

    #[derive(Debug)]
    pub(crate) struct TestRenderBuffer {
        size: Size<i32, BufferCoords>,
        opaque: bool,
    }

    impl RenderBuffer for TestRenderBuffer {
        fn size(&self) -> Size<i32, BufferCoords> {
            self.size
        }

        fn is_opaque(&self) -> bool {
            self.opaque
        }
    }

    /// Renderer double recording every `apply_damage` consultation
    #[derive(Default)]
    pub(crate) struct TestRenderer {
        pub(crate) accept_apply_damage: Cell<bool>,
        pub(crate) fail_uploads: Cell<bool>,
        pub(crate) uploads: Cell<usize>,
        pub(crate) apply_damage_calls: RefCell<Vec<Vec<Rectangle<i32, BufferCoords>>>>,
    }

    impl TestRenderer {
        pub(crate) fn new() -> Rc<TestRenderer> {
            Rc::new(TestRenderer::default())
        }
    }

    impl Renderer for TestRenderer {
        fn create_buffer(
            &self,
            source: &Rc<dyn ClientBuffer>,
        ) -> Result<Rc<dyn RenderBuffer>, UploadError> {
            if self.fail_uploads.get() {
                return Err(UploadError);
            }
            self.uploads.set(self.uploads.get() + 1);
            let opaque = source.downcast_ref::<TestBuffer>().map(|b| b.opaque).unwrap_or(false);
            Ok(Rc::new(TestRenderBuffer {
                size: source.size(),
                opaque,
            }))
        }

        fn apply_damage(
            &self,
            existing: &Rc<dyn RenderBuffer>,
            source: &Rc<dyn ClientBuffer>,
            damage: &Region<BufferCoords>,
        ) -> bool {
            self.apply_damage_calls
                .borrow_mut()
                .push(damage.rects().to_vec());
            self.accept_apply_damage.get() && existing.size() == source.size()
        }
    }
}
