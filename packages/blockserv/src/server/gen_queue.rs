//! Queue of pending chunk generation requests.

use crate::util_dedup_queue::PriorityDedupQueue;
use vek::*;


/// A pending request for the content producer to generate the chunk at `cc`.
///
/// Greater priority means more urgent. The scheduler derives priorities by negating ring
/// distance, so they top out at 0.0 for a chunk a client is standing in.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GenRequest {
    pub cc: Vec3<i64>,
    pub priority: f32,
}

/// Pending generation requests, at most one per chunk.
///
/// Requesting an already queued chunk keeps the queued request unless the new one is strictly
/// more urgent, in which case it takes the queued request's place at its better rank. Requests
/// never expire; the queue is bounded by the number of distinct chunks requested.
#[derive(Default)]
pub struct GenQueue {
    queue: PriorityDedupQueue<Vec3<i64>, ()>,
}

impl GenQueue {
    /// Construct empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request generation of the chunk at `cc`, or raise the urgency of the queued request.
    pub fn request(&self, cc: Vec3<i64>, priority: f32) {
        self.queue.upsert(cc, priority, (), |(queued, ()), (incoming, ())| incoming > queued);
    }

    /// Take the most urgent pending request, if any. Never blocks.
    pub fn take_next(&self) -> Option<GenRequest> {
        self.queue.pop_highest().map(|(cc, priority, ())| GenRequest { cc, priority })
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether no requests are pending.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}


#[cfg(test)]
fn cc(x: i64, y: i64, z: i64) -> Vec3<i64> {
    Vec3 { x, y, z }
}

#[test]
fn repeat_request_keeps_more_urgent() {
    let queue = GenQueue::new();
    queue.request(cc(0, 0, 0), 5.0);
    queue.request(cc(0, 0, 0), 2.0);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.take_next(), Some(GenRequest { cc: cc(0, 0, 0), priority: 5.0 }));
    assert_eq!(queue.take_next(), None);
}

#[test]
fn repeat_request_can_raise_urgency() {
    let queue = GenQueue::new();
    queue.request(cc(0, 0, 0), -8.0);
    queue.request(cc(1, 0, 0), -2.0);
    queue.request(cc(0, 0, 0), -1.0);
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.take_next(), Some(GenRequest { cc: cc(0, 0, 0), priority: -1.0 }));
    assert_eq!(queue.take_next(), Some(GenRequest { cc: cc(1, 0, 0), priority: -2.0 }));
}

#[test]
fn equal_urgency_does_not_replace() {
    let queue = GenQueue::new();
    queue.request(cc(3, 0, 0), 1.0);
    queue.request(cc(3, 0, 0), 1.0);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.take_next(), Some(GenRequest { cc: cc(3, 0, 0), priority: 1.0 }));
}

#[test]
fn takes_most_urgent_first() {
    let queue = GenQueue::new();
    queue.request(cc(0, 0, 1), -1.0);
    queue.request(cc(0, 0, 3), -3.0);
    queue.request(cc(0, 0, 0), 0.0);
    queue.request(cc(0, 0, 2), -2.0);
    let order = std::iter::from_fn(|| queue.take_next())
        .map(|req| req.cc.z)
        .collect::<Vec<_>>();
    assert_eq!(order, vec![0, 1, 2, 3]);
}
