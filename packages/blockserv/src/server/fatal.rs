//! Fatal error reporting from helper threads.

use std::sync::Arc;
use parking_lot::Mutex;


/// Slot through which any thread can declare a fatal server error.
///
/// The tick loop checks it at each tick boundary and shuts the server down by returning the
/// recorded error. The first error wins; later ones are logged and dropped. Clone-shareable.
#[derive(Clone, Default)]
pub struct FatalSink(Arc<Mutex<Option<String>>>);

impl FatalSink {
    /// Construct with nothing recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fatal error, to take effect at the next tick boundary.
    pub fn set(&self, msg: impl Into<String>) {
        let msg = msg.into();
        let mut slot = self.0.lock();
        if let Some(first) = slot.as_ref() {
            error!(dropped=%msg, first=%first, "second fatal error reported, keeping the first");
        } else {
            *slot = Some(msg);
        }
    }

    /// Take the recorded fatal error, if any.
    pub fn take(&self) -> Option<String> {
        self.0.lock().take()
    }
}


#[test]
fn first_error_wins() {
    let sink = FatalSink::new();
    assert_eq!(sink.take(), None);
    sink.set("disk on fire");
    sink.set("also the network");
    assert_eq!(sink.take(), Some("disk on fire".to_owned()));
    assert_eq!(sink.take(), None);
}
