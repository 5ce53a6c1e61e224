//! Minimal output handles
//!
//! The surface engine only needs enough of an output to keep per-output
//! enter/leave records: an identity and a destruction signal. Mode setting,
//! physical properties and frame scheduling belong to the host.

use std::rc::Rc;

use crate::utils::signaling::Signaler;

crate::utils::ids::id_gen!(output_id);

/// Signals emitted by an [`Output`]
#[derive(Debug, Default)]
pub struct OutputEvents {
    /// The output is going away
    pub destroy: Signaler<()>,
}

/// A display surfaces can enter and leave
#[derive(Debug)]
pub struct Output {
    id: usize,
    name: String,
    events: OutputEvents,
}

impl Output {
    /// Create a new output with the given name
    pub fn new(name: impl Into<String>) -> Rc<Output> {
        Rc::new(Output {
            id: output_id::next(),
            name: name.into(),
            events: Default::default(),
        })
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// The name of this output
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The signals of this output
    pub fn events(&self) -> &OutputEvents {
        &self.events
    }

    /// Announce the removal of this output
    ///
    /// Surfaces drop their enter records for it in response.
    pub fn destroy(&self) {
        self.events.destroy.signal(());
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        output_id::remove(self.id);
    }
}
