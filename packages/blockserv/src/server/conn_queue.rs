//! Queue of connection lifecycle events from the network layer.

use crate::server::ClientId;
use std::{
    collections::VecDeque,
    sync::Arc,
    mem::take,
};
use parking_lot::Mutex;


/// A connection lifecycle change reported by the network layer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnEvent {
    /// The peer connected.
    Added { client: ClientId },
    /// The peer disconnected. `timed_out` distinguishes a timeout from an orderly close.
    Removed { client: ClientId, timed_out: bool },
}

/// FIFO queue decoupling connection callbacks from the server tick.
///
/// The network layer pushes from whatever thread its callbacks run on; pushing only ever takes
/// the queue's own brief lock. The server tick drains it in full, which is the one place
/// connection lifecycle mutates the client table. Clone-shareable.
#[derive(Clone, Default)]
pub struct ConnEventQueue(Arc<Mutex<VecDeque<ConnEvent>>>);

impl ConnEventQueue {
    /// Construct empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn push(&self, event: ConnEvent) {
        self.0.lock().push_back(event);
    }

    /// Take every queued event, in arrival order.
    pub fn drain(&self) -> VecDeque<ConnEvent> {
        take(&mut *self.0.lock())
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Whether no events are queued.
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}


#[test]
fn drains_in_arrival_order() {
    let queue = ConnEventQueue::new();
    let a = ClientId(1);
    let b = ClientId(2);
    queue.push(ConnEvent::Added { client: a });
    queue.push(ConnEvent::Added { client: b });
    queue.push(ConnEvent::Removed { client: a, timed_out: true });
    assert_eq!(queue.len(), 3);
    let drained = queue.drain().into_iter().collect::<Vec<_>>();
    assert_eq!(drained, vec![
        ConnEvent::Added { client: a },
        ConnEvent::Added { client: b },
        ConnEvent::Removed { client: a, timed_out: true },
    ]);
    assert!(queue.is_empty());
    assert!(queue.drain().is_empty());
}

#[test]
fn pushes_from_other_threads_arrive() {
    let queue = ConnEventQueue::new();
    std::thread::scope(|scope| {
        for n in 0..4 {
            let queue = queue.clone();
            scope.spawn(move || {
                queue.push(ConnEvent::Added { client: ClientId(n) });
            });
        }
    });
    assert_eq!(queue.drain().len(), 4);
}
