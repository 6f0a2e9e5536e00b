//! Per-client chunk streaming state.

use crate::server::ObjectId;
use chunk_space::ring_distance;
use std::{
    collections::HashSet,
    time::{
        Instant,
        Duration,
    },
};
use vek::*;


/// Latest chunk serialization version this server can emit.
pub const SER_VERSION_LATEST: u8 = 1;


/// Streaming state of one connected client.
///
/// Records which chunks and which dynamic objects the client is known to already have, and the
/// state of the outward scan that picks what it gets next: the committed view center, how far out
/// the scan has searched, and the back-off bookkeeping for clients with nothing left to send.
/// Owned by the client table; created and destroyed by the connection event drain.
pub struct ClientStream {
    known_chunks: HashSet<Vec3<i64>>,
    known_objects: HashSet<ObjectId>,
    // scan center the client has settled on, None until the first view report
    view_center: Option<Vec3<i64>>,
    // moved center waiting out the hysteresis interval before it becomes the scan center
    candidate: Option<Candidate>,
    // ring of the scan center the scan is currently searching
    cursor: i64,
    empty_scans: u32,
    paused_until: Option<Instant>,
    ser_version: u8,
}

#[derive(Debug, Copy, Clone)]
struct Candidate {
    center: Vec3<i64>,
    since: Instant,
}

impl ClientStream {
    /// Construct for a freshly connected client. It knows nothing and has reported no view yet.
    pub fn new() -> Self {
        ClientStream {
            known_chunks: HashSet::new(),
            known_objects: HashSet::new(),
            view_center: None,
            candidate: None,
            cursor: 0,
            empty_scans: 0,
            paused_until: None,
            ser_version: SER_VERSION_LATEST,
        }
    }

    /// The client's negotiated chunk serialization version.
    pub fn ser_version(&self) -> u8 {
        self.ser_version
    }

    /// Set the client's negotiated chunk serialization version, as of its handshake.
    pub fn set_ser_version(&mut self, ser_version: u8) {
        self.ser_version = ser_version;
    }

    /// Record that the client now has the chunk at `cc`. Returns whether that was news.
    pub fn mark_known(&mut self, cc: Vec3<i64>) -> bool {
        self.known_chunks.insert(cc)
    }

    /// Whether the client is known to have the chunk at `cc`.
    pub fn is_known(&self, cc: Vec3<i64>) -> bool {
        self.known_chunks.contains(&cc)
    }

    /// Record that the client no longer has the chunk at `cc`, restarting the scan so it can be
    /// re-sent. Returns false if it was never known to have it, which from the client is a
    /// protocol violation.
    pub fn forget(&mut self, cc: Vec3<i64>) -> bool {
        let known = self.known_chunks.remove(&cc);
        if known {
            self.restart_scan();
        }
        known
    }

    /// Number of chunks the client is known to have.
    pub fn known_chunk_count(&self) -> usize {
        self.known_chunks.len()
    }

    /// Record that the client now tracks the dynamic object `id`. Returns whether that was news.
    pub fn mark_object_known(&mut self, id: ObjectId) -> bool {
        self.known_objects.insert(id)
    }

    /// Whether the client tracks the dynamic object `id`.
    pub fn is_object_known(&self, id: ObjectId) -> bool {
        self.known_objects.contains(&id)
    }

    /// Record that the client no longer tracks the dynamic object `id`. Returns false if it never
    /// tracked it, which from the client is a protocol violation.
    pub fn forget_object(&mut self, id: ObjectId) -> bool {
        self.known_objects.remove(&id)
    }

    /// The committed view center the scan searches around, if the client has reported one.
    pub fn view_center(&self) -> Option<Vec3<i64>> {
        self.view_center
    }

    /// Report where the client is looking, as a chunk coordinate.
    ///
    /// The first report commits immediately. After that, movement within `hysteresis` chunks of
    /// the committed center is jitter and changes nothing, and a real move only commits once it
    /// has stayed put for `stable`; committing restarts the scan at the new center.
    pub fn update_view_center(
        &mut self,
        center: Vec3<i64>,
        now: Instant,
        hysteresis: i64,
        stable: Duration,
    ) {
        let committed = match self.view_center {
            Some(committed) => committed,
            None => {
                self.view_center = Some(center);
                self.restart_scan();
                return;
            }
        };
        if ring_distance(center, committed) <= hysteresis {
            self.candidate = None;
            return;
        }
        match self.candidate {
            Some(candidate) if ring_distance(center, candidate.center) <= hysteresis => {
                if now.duration_since(candidate.since) >= stable {
                    self.view_center = Some(center);
                    self.candidate = None;
                    self.restart_scan();
                }
            }
            _ => self.candidate = Some(Candidate { center, since: now }),
        }
    }

    /// Restart the outward scan from ring zero, unpaused.
    pub fn restart_scan(&mut self) {
        self.cursor = 0;
        self.empty_scans = 0;
        self.paused_until = None;
    }

    /// Ring of the view center the scan is currently searching.
    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    /// Whether the scan is paused at `now`, clearing the pause once it has lapsed.
    pub fn check_paused(&mut self, now: Instant) -> bool {
        match self.paused_until {
            Some(until) if now < until => true,
            Some(_) => {
                self.paused_until = None;
                false
            }
            None => false,
        }
    }

    /// Record the outcome of one scan of the cursor ring.
    ///
    /// An empty scan moves the cursor out a ring, or once the cursor is at `max_radius`, counts
    /// toward the empty-scan threshold; `threshold` empty full scans in a row pause scanning for
    /// `pause`.
    pub fn note_scan(
        &mut self,
        found_any: bool,
        now: Instant,
        max_radius: i64,
        threshold: u32,
        pause: Duration,
    ) {
        if found_any {
            self.empty_scans = 0;
            return;
        }
        if self.cursor < max_radius {
            self.cursor += 1;
            return;
        }
        self.empty_scans += 1;
        if self.empty_scans >= threshold {
            self.empty_scans = 0;
            self.paused_until = Some(now + pause);
        }
    }
}

impl Default for ClientStream {
    fn default() -> Self {
        ClientStream::new()
    }
}


#[cfg(test)]
fn cc(x: i64, y: i64, z: i64) -> Vec3<i64> {
    Vec3 { x, y, z }
}

#[test]
fn known_chunks_idempotent_until_forgotten() {
    let mut stream = ClientStream::new();
    assert!(!stream.is_known(cc(1, 2, 3)));
    assert!(stream.mark_known(cc(1, 2, 3)));
    assert!(!stream.mark_known(cc(1, 2, 3)));
    assert!(stream.is_known(cc(1, 2, 3)));
    assert_eq!(stream.known_chunk_count(), 1);
    assert!(stream.forget(cc(1, 2, 3)));
    assert!(!stream.is_known(cc(1, 2, 3)));
    assert!(!stream.forget(cc(1, 2, 3)));
}

#[test]
fn known_objects_mirror_chunk_behavior() {
    let mut stream = ClientStream::new();
    assert!(stream.mark_object_known(ObjectId(9)));
    assert!(!stream.mark_object_known(ObjectId(9)));
    assert!(stream.is_object_known(ObjectId(9)));
    assert!(stream.forget_object(ObjectId(9)));
    assert!(!stream.forget_object(ObjectId(9)));
}

#[test]
fn first_view_report_commits_immediately() {
    let mut stream = ClientStream::new();
    assert_eq!(stream.view_center(), None);
    stream.update_view_center(cc(5, 0, 5), Instant::now(), 1, Duration::from_secs(2));
    assert_eq!(stream.view_center(), Some(cc(5, 0, 5)));
}

#[test]
fn jitter_does_not_recenter() {
    let mut stream = ClientStream::new();
    let now = Instant::now();
    stream.update_view_center(cc(0, 0, 0), now, 1, Duration::from_secs(2));
    stream.cursor = 4;
    for step in 0..100 {
        let wobble = cc((step % 2) as i64, 0, -((step % 2) as i64));
        stream.update_view_center(wobble, now + Duration::from_secs(step), 1, Duration::from_secs(2));
    }
    assert_eq!(stream.view_center(), Some(cc(0, 0, 0)));
    assert_eq!(stream.cursor(), 4);
}

#[test]
fn real_move_commits_only_after_stable_interval() {
    let mut stream = ClientStream::new();
    let start = Instant::now();
    let stable = Duration::from_secs(2);
    stream.update_view_center(cc(0, 0, 0), start, 1, stable);
    stream.cursor = 4;

    // a far move does not commit right away
    stream.update_view_center(cc(10, 0, 0), start + Duration::from_millis(100), 1, stable);
    assert_eq!(stream.view_center(), Some(cc(0, 0, 0)));
    assert_eq!(stream.cursor(), 4);

    // nor while the stable interval is still running
    stream.update_view_center(cc(10, 0, 1), start + Duration::from_millis(900), 1, stable);
    assert_eq!(stream.view_center(), Some(cc(0, 0, 0)));

    // once it has held still long enough it commits and the scan restarts
    stream.update_view_center(cc(10, 0, 0), start + Duration::from_millis(2200), 1, stable);
    assert_eq!(stream.view_center(), Some(cc(10, 0, 0)));
    assert_eq!(stream.cursor(), 0);
}

#[test]
fn abandoned_move_restarts_the_clock() {
    let mut stream = ClientStream::new();
    let start = Instant::now();
    let stable = Duration::from_secs(2);
    stream.update_view_center(cc(0, 0, 0), start, 1, stable);

    // candidate at one place, then a jump somewhere else entirely
    stream.update_view_center(cc(10, 0, 0), start + Duration::from_secs(1), 1, stable);
    stream.update_view_center(cc(-10, 0, 0), start + Duration::from_secs(2), 1, stable);
    // old candidate's elapsed time must not count for the new one
    stream.update_view_center(cc(-10, 0, 0), start + Duration::from_millis(3500), 1, stable);
    assert_eq!(stream.view_center(), Some(cc(0, 0, 0)));
    stream.update_view_center(cc(-10, 0, 0), start + Duration::from_millis(4100), 1, stable);
    assert_eq!(stream.view_center(), Some(cc(-10, 0, 0)));
}

#[test]
fn empty_scans_escalate_to_pause() {
    let mut stream = ClientStream::new();
    let now = Instant::now();
    let pause = Duration::from_secs(2);
    stream.update_view_center(cc(0, 0, 0), now, 1, Duration::from_secs(2));

    // empty scans below max radius just push the cursor out
    stream.note_scan(false, now, 2, 3, pause);
    stream.note_scan(false, now, 2, 3, pause);
    assert_eq!(stream.cursor(), 2);
    assert!(!stream.check_paused(now));

    // at max radius they count toward the pause threshold instead
    stream.note_scan(false, now, 2, 3, pause);
    stream.note_scan(false, now, 2, 3, pause);
    assert!(!stream.check_paused(now));
    stream.note_scan(false, now, 2, 3, pause);
    assert!(stream.check_paused(now));
    assert!(stream.check_paused(now + Duration::from_millis(1900)));
    assert!(!stream.check_paused(now + Duration::from_millis(2100)));

    // a found chunk clears the streak
    stream.note_scan(false, now, 2, 3, pause);
    stream.note_scan(true, now, 2, 3, pause);
    stream.note_scan(false, now, 2, 3, pause);
    stream.note_scan(false, now, 2, 3, pause);
    assert!(!stream.check_paused(now));
}

#[test]
fn forget_restarts_a_paused_scan() {
    let mut stream = ClientStream::new();
    let now = Instant::now();
    stream.update_view_center(cc(0, 0, 0), now, 1, Duration::from_secs(2));
    stream.mark_known(cc(0, 0, 0));
    for _ in 0..3 {
        stream.note_scan(false, now, 0, 3, Duration::from_secs(2));
    }
    assert!(stream.check_paused(now));
    assert!(stream.forget(cc(0, 0, 0)));
    assert!(!stream.check_paused(now));
    assert_eq!(stream.cursor(), 0);
}
