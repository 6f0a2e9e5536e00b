//! Queue of pending chunk transmissions.

use crate::{
    server::ClientId,
    util_dedup_queue::PriorityDedupQueue,
};
use std::time::Instant;
use vek::*;


/// A pending transmission of the chunk at `cc` to one client.
///
/// Exists from when the scheduler picks the chunk until it is sent, superseded, or its deadline
/// lapses. A lapsed transmission is dropped quietly; if the client still needs the chunk a later
/// scan picks it again.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SendRequest {
    pub client: ClientId,
    pub cc: Vec3<i64>,
    pub priority: f32,
    pub deadline: Instant,
}

/// Pending chunk transmissions across all clients, at most one per client and chunk.
///
/// Re-queueing a pending transmission replaces it only if the newcomer has strictly better
/// priority, or no worse priority and a later deadline; anything else leaves the queued one
/// alone.
#[derive(Default)]
pub struct SendQueue {
    queue: PriorityDedupQueue<(ClientId, Vec3<i64>), Instant>,
}

impl SendQueue {
    /// Construct empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the transmission of `cc` to `client`, or offer to improve the queued one.
    pub fn upsert(&self, client: ClientId, cc: Vec3<i64>, priority: f32, deadline: Instant) {
        self.queue.upsert(
            (client, cc),
            priority,
            deadline,
            |(queued_priority, &queued_deadline), (priority, &deadline)| {
                priority > queued_priority
                    || (priority >= queued_priority && deadline > queued_deadline)
            },
        );
    }

    /// Take the most urgent pending transmission, if any. Never blocks.
    ///
    /// The caller owes the deadline check; entries are not expired while queued.
    pub fn take_next(&self) -> Option<SendRequest> {
        self.queue.pop_highest().map(|((client, cc), priority, deadline)| SendRequest {
            client,
            cc,
            priority,
            deadline,
        })
    }

    /// Drop every pending transmission to `client`.
    pub fn purge_client(&self, client: ClientId) {
        self.queue.remove_where(|&(queued_client, _)| queued_client == client);
    }

    /// Number of pending transmissions.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether no transmissions are pending.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}


#[cfg(test)]
fn cc(x: i64, y: i64, z: i64) -> Vec3<i64> {
    Vec3 { x, y, z }
}

#[test]
fn one_entry_per_client_and_chunk() {
    let queue = SendQueue::new();
    let now = Instant::now();
    queue.upsert(ClientId(1), cc(0, 0, 0), -1.0, now);
    queue.upsert(ClientId(1), cc(0, 0, 0), -1.0, now);
    queue.upsert(ClientId(2), cc(0, 0, 0), -1.0, now);
    queue.upsert(ClientId(1), cc(1, 0, 0), -1.0, now);
    assert_eq!(queue.len(), 3);
}

#[test]
fn better_priority_replaces() {
    let queue = SendQueue::new();
    let now = Instant::now();
    // the replacement sticks even with an earlier deadline
    queue.upsert(ClientId(1), cc(0, 0, 0), -5.0, now + std::time::Duration::from_secs(9));
    queue.upsert(ClientId(1), cc(0, 0, 0), -1.0, now);
    let req = queue.take_next().unwrap();
    assert_eq!(req.priority, -1.0);
    assert_eq!(req.deadline, now);
}

#[test]
fn later_deadline_replaces_at_equal_priority() {
    let queue = SendQueue::new();
    let now = Instant::now();
    let later = now + std::time::Duration::from_secs(5);
    queue.upsert(ClientId(1), cc(0, 0, 0), -1.0, now);
    queue.upsert(ClientId(1), cc(0, 0, 0), -1.0, later);
    let req = queue.take_next().unwrap();
    assert_eq!(req.deadline, later);
}

#[test]
fn neither_better_is_rejected() {
    let queue = SendQueue::new();
    let now = Instant::now();
    let later = now + std::time::Duration::from_secs(5);
    queue.upsert(ClientId(1), cc(0, 0, 0), -1.0, later);
    // worse priority, even with a later deadline
    queue.upsert(ClientId(1), cc(0, 0, 0), -2.0, later + std::time::Duration::from_secs(5));
    // equal priority, earlier deadline
    queue.upsert(ClientId(1), cc(0, 0, 0), -1.0, now);
    let req = queue.take_next().unwrap();
    assert_eq!(req.priority, -1.0);
    assert_eq!(req.deadline, later);
    assert_eq!(queue.take_next(), None);
}

#[test]
fn takes_most_urgent_across_clients() {
    let queue = SendQueue::new();
    let now = Instant::now();
    queue.upsert(ClientId(1), cc(0, 0, 2), -2.0, now);
    queue.upsert(ClientId(2), cc(0, 0, 0), 0.0, now);
    queue.upsert(ClientId(1), cc(0, 0, 1), -1.0, now);
    let order = std::iter::from_fn(|| queue.take_next())
        .map(|req| (req.client, req.cc.z))
        .collect::<Vec<_>>();
    assert_eq!(order, vec![(ClientId(2), 0), (ClientId(1), 1), (ClientId(1), 2)]);
}

#[test]
fn purge_client_leaves_others() {
    let queue = SendQueue::new();
    let now = Instant::now();
    for z in 0..5 {
        queue.upsert(ClientId(1), cc(0, 0, z), 0.0, now);
        queue.upsert(ClientId(2), cc(0, 0, z), 0.0, now);
    }
    queue.purge_client(ClientId(1));
    assert_eq!(queue.len(), 5);
    while let Some(req) = queue.take_next() {
        assert_eq!(req.client, ClientId(2));
    }
}
