//! Deciding what each client is sent next.

use crate::{
    settings::Settings,
    server::{
        ClientId,
        client_stream::ClientStream,
        gen_queue::GenQueue,
        locks::{WorldState, ClientTable},
        send_queue::SendQueue,
    },
    transport::Transport,
};
use chunk_space::ring;
use std::{
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};


/// Drives chunk streaming: scans outward around each client's view center for chunks it lacks,
/// keeps the send queue and the generation queue fed, and drains the send queue at the per-tick
/// budget.
///
/// All knobs come from `Settings` at construction and stay fixed.
pub struct StreamMgr {
    gen_queue: Arc<GenQueue>,
    send_queue: Arc<SendQueue>,
    send_radius: i64,
    min_chunk_y: i64,
    max_chunk_y: i64,
    send_timeout: Duration,
    max_sends_per_tick: u32,
    empty_scan_threshold: u32,
    empty_scan_pause: Duration,
}

impl StreamMgr {
    /// Construct from settings.
    pub fn new(settings: &Settings, gen_queue: Arc<GenQueue>, send_queue: Arc<SendQueue>) -> Self {
        StreamMgr {
            gen_queue,
            send_queue,
            send_radius: i64::max(settings.send_radius, 0),
            min_chunk_y: settings.min_chunk_y,
            max_chunk_y: settings.max_chunk_y,
            send_timeout: Duration::from_secs_f32(f32::max(settings.send_timeout_secs, 0.0)),
            max_sends_per_tick: settings.max_sends_per_tick,
            empty_scan_threshold: settings.empty_scan_threshold,
            empty_scan_pause: Duration::from_secs_f32(f32::max(settings.empty_scan_pause_secs, 0.0)),
        }
    }

    /// Run one scheduling pass over every connected client.
    ///
    /// Each client's cursor ring is scanned for chunks it lacks: chunks the world has become
    /// queued transmissions, chunks it lacks become generation requests. A scan that queues
    /// nothing moves the cursor out a ring, until at the full streaming radius repeated empty
    /// scans pause the client's scanning instead.
    pub fn schedule(&self, now: Instant, world: &WorldState, clients: &mut ClientTable) {
        for (&client, stream) in clients.clients.iter_mut() {
            self.schedule_client(now, world, client, stream);
        }
    }

    fn schedule_client(
        &self,
        now: Instant,
        world: &WorldState,
        client: ClientId,
        stream: &mut ClientStream,
    ) {
        // nothing to do for clients that have not told us where they are
        let center = match stream.view_center() {
            Some(center) => center,
            None => return,
        };
        if stream.check_paused(now) {
            return;
        }

        let d = stream.cursor();
        let priority = -(d as f32);
        let mut found_any = false;
        for cc in ring(center, d) {
            if cc.y < self.min_chunk_y || cc.y > self.max_chunk_y {
                continue;
            }
            if stream.is_known(cc) {
                continue;
            }
            if world.chunks.contains(cc) {
                self.send_queue.upsert(client, cc, priority, now + self.send_timeout);
            } else {
                self.gen_queue.request(cc, priority);
            }
            found_any = true;
        }
        stream.note_scan(
            found_any,
            now,
            self.send_radius,
            self.empty_scan_threshold,
            self.empty_scan_pause,
        );
    }

    /// Drain the send queue, transmitting up to the per-tick budget of chunks.
    ///
    /// Pops most urgent first across all clients. Entries whose deadline has lapsed or whose
    /// client is gone are dropped without costing budget. A transport error costs the entry and
    /// the budget but marks nothing, so a later scan re-reaches the chunk.
    pub fn drain(
        &self,
        now: Instant,
        world: &WorldState,
        clients: &mut ClientTable,
        transport: &dyn Transport,
    ) {
        let mut sent = 0;
        while sent < self.max_sends_per_tick {
            let request = match self.send_queue.take_next() {
                Some(request) => request,
                None => break,
            };
            if request.deadline < now {
                trace!(?request.client, cc=?request.cc, "dropping expired queued send");
                continue;
            }
            let stream = match clients.get_mut(request.client) {
                Some(stream) => stream,
                None => continue,
            };
            let blocks = match world.chunks.get(request.cc) {
                Some(blocks) => blocks,
                None => {
                    trace!(cc=?request.cc, "queued send of a chunk no longer loaded, dropping");
                    continue;
                }
            };
            sent += 1;
            match transport.send(request.client, request.cc, blocks, stream.ser_version()) {
                Ok(()) => {
                    stream.mark_known(request.cc);
                    trace!(?request.client, cc=?request.cc, "sent chunk");
                }
                Err(e) => {
                    warn!(%e, ?request.client, cc=?request.cc, "transport failed to send chunk");
                }
            }
        }
    }

    /// Queue depths, for status logging.
    pub fn queue_depths(&self) -> (usize, usize) {
        (self.gen_queue.len(), self.send_queue.len())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::send_queue::SendRequest;
    use chunk_space::ChunkBlocks;
    use anyhow::{Result, bail};
    use parking_lot::Mutex;
    use vek::*;

    fn cc(x: i64, y: i64, z: i64) -> Vec3<i64> {
        Vec3 { x, y, z }
    }

    fn test_settings() -> Settings {
        Settings {
            send_radius: 2,
            min_chunk_y: -2,
            max_chunk_y: 2,
            max_sends_per_tick: 4,
            ..Settings::default()
        }
    }

    struct Rig {
        mgr: StreamMgr,
        gen_queue: Arc<GenQueue>,
        send_queue: Arc<SendQueue>,
        world: WorldState,
        clients: ClientTable,
    }

    fn rig(settings: Settings) -> Rig {
        let gen_queue = Arc::new(GenQueue::new());
        let send_queue = Arc::new(SendQueue::new());
        let mgr = StreamMgr::new(&settings, Arc::clone(&gen_queue), Arc::clone(&send_queue));
        Rig {
            mgr,
            gen_queue,
            send_queue,
            world: WorldState::default(),
            clients: ClientTable::default(),
        }
    }

    fn add_client(rig: &mut Rig, client: ClientId, center: Vec3<i64>) {
        let mut stream = ClientStream::new();
        stream.update_view_center(center, Instant::now(), 1, Duration::ZERO);
        rig.clients.clients.insert(client, stream);
    }

    #[derive(Default)]
    struct CollectingTransport(Mutex<Vec<(ClientId, Vec3<i64>)>>);

    impl Transport for CollectingTransport {
        fn send(&self, client: ClientId, cc: Vec3<i64>, _: &ChunkBlocks, _: u8) -> Result<()> {
            self.0.lock().push((client, cc));
            Ok(())
        }
    }

    struct FailingTransport;

    impl Transport for FailingTransport {
        fn send(&self, _: ClientId, cc: Vec3<i64>, _: &ChunkBlocks, _: u8) -> Result<()> {
            bail!("wire fell out near {:?}", cc)
        }
    }

    #[test]
    fn schedules_present_chunks_to_send_and_missing_to_generate() {
        let mut rig = rig(test_settings());
        add_client(&mut rig, ClientId(1), cc(0, 0, 0));
        rig.world.chunks.insert(cc(0, 0, 0), ChunkBlocks::new());

        rig.mgr.schedule(Instant::now(), &rig.world, &mut rig.clients);
        // ring 0 is just the center chunk, which the world has
        assert_eq!(rig.send_queue.len(), 1);
        assert_eq!(rig.gen_queue.len(), 0);

        // once sent, an empty pass moves the cursor out, and the pass after scans ring 1, none
        // of which exists yet
        let transport = CollectingTransport::default();
        rig.mgr.drain(Instant::now(), &rig.world, &mut rig.clients, &transport);
        rig.mgr.schedule(Instant::now(), &rig.world, &mut rig.clients);
        assert_eq!(rig.gen_queue.len(), 0);
        rig.mgr.schedule(Instant::now(), &rig.world, &mut rig.clients);
        assert_eq!(rig.send_queue.len(), 0);
        // ring 1 around y=0 fits the height limits whole
        assert_eq!(rig.gen_queue.len(), 26);
    }

    #[test]
    fn cursor_advances_only_past_fully_handled_rings() {
        let mut rig = rig(test_settings());
        add_client(&mut rig, ClientId(1), cc(0, 0, 0));
        let now = Instant::now();

        // nothing exists and nothing can be sent, but requesting generation counts as progress,
        // so the cursor holds at ring 0 waiting for it
        rig.mgr.schedule(now, &rig.world, &mut rig.clients);
        assert_eq!(rig.clients.get_mut(ClientId(1)).unwrap().cursor(), 0);

        // the chunk appears and gets sent; only once ring 0 is fully known does the scan move on
        rig.world.chunks.insert(cc(0, 0, 0), ChunkBlocks::new());
        rig.mgr.schedule(now, &rig.world, &mut rig.clients);
        let transport = CollectingTransport::default();
        rig.mgr.drain(now, &rig.world, &mut rig.clients, &transport);
        rig.mgr.schedule(now, &rig.world, &mut rig.clients);
        assert_eq!(rig.clients.get_mut(ClientId(1)).unwrap().cursor(), 1);
    }

    #[test]
    fn height_limits_clip_the_scan() {
        let settings = Settings {
            min_chunk_y: 0,
            max_chunk_y: 0,
            ..test_settings()
        };
        let mut rig = rig(settings);
        add_client(&mut rig, ClientId(1), cc(0, 0, 0));
        rig.world.chunks.insert(cc(0, 0, 0), ChunkBlocks::new());

        let now = Instant::now();
        rig.mgr.schedule(now, &rig.world, &mut rig.clients);
        let transport = CollectingTransport::default();
        rig.mgr.drain(now, &rig.world, &mut rig.clients, &transport);
        // one empty pass to step the cursor out, then the ring 1 scan
        rig.mgr.schedule(now, &rig.world, &mut rig.clients);
        rig.mgr.schedule(now, &rig.world, &mut rig.clients);
        // ring 1 has 26 chunks but only the 8 at y=0 are in the world
        assert_eq!(rig.gen_queue.len(), 8);
    }

    #[test]
    fn paused_and_viewless_clients_are_skipped() {
        let mut rig = rig(test_settings());
        // never reported a view
        rig.clients.clients.insert(ClientId(1), ClientStream::new());
        // reported, then scanned itself into a pause
        add_client(&mut rig, ClientId(2), cc(0, 0, 0));
        let now = Instant::now();
        let stream = rig.clients.get_mut(ClientId(2)).unwrap();
        for cc in chunk_space::cube(cc(0, 0, 0), 2) {
            stream.mark_known(cc);
        }
        for _ in 0..5 {
            rig.mgr.schedule(now, &rig.world, &mut rig.clients);
        }
        assert!(rig.clients.get_mut(ClientId(2)).unwrap().check_paused(now));

        rig.mgr.schedule(now, &rig.world, &mut rig.clients);
        assert_eq!(rig.gen_queue.len(), 0);
        assert_eq!(rig.send_queue.len(), 0);
    }

    #[test]
    fn drain_respects_budget_and_keeps_the_rest() {
        let mut rig = rig(test_settings());
        add_client(&mut rig, ClientId(1), cc(0, 0, 0));
        let now = Instant::now();
        let later = now + Duration::from_secs(60);
        for x in 0..6 {
            rig.world.chunks.insert(cc(x, 0, 0), ChunkBlocks::new());
            rig.send_queue.upsert(ClientId(1), cc(x, 0, 0), -(x as f32), later);
        }

        let transport = CollectingTransport::default();
        rig.mgr.drain(now, &rig.world, &mut rig.clients, &transport);
        let sent = transport.0.into_inner();
        assert_eq!(sent.len(), 4);
        // most urgent went first
        assert_eq!(sent[0].1, cc(0, 0, 0));
        assert_eq!(rig.send_queue.len(), 2);
    }

    #[test]
    fn expired_sends_are_dropped_not_delivered() {
        let mut rig = rig(test_settings());
        add_client(&mut rig, ClientId(1), cc(0, 0, 0));
        let now = Instant::now();
        rig.world.chunks.insert(cc(0, 0, 0), ChunkBlocks::new());
        rig.world.chunks.insert(cc(1, 0, 0), ChunkBlocks::new());
        rig.send_queue.upsert(ClientId(1), cc(0, 0, 0), 0.0, now - Duration::from_millis(1));
        rig.send_queue.upsert(ClientId(1), cc(1, 0, 0), -1.0, now + Duration::from_secs(60));

        let transport = CollectingTransport::default();
        rig.mgr.drain(now, &rig.world, &mut rig.clients, &transport);
        let sent = transport.0.into_inner();
        assert_eq!(sent, vec![(ClientId(1), cc(1, 0, 0))]);
        // the expired chunk was not marked known, so a later scan can pick it again
        assert!(!rig.clients.get_mut(ClientId(1)).unwrap().is_known(cc(0, 0, 0)));
        assert!(rig.clients.get_mut(ClientId(1)).unwrap().is_known(cc(1, 0, 0)));
    }

    #[test]
    fn sends_to_gone_clients_are_dropped() {
        let mut rig = rig(test_settings());
        let now = Instant::now();
        rig.world.chunks.insert(cc(0, 0, 0), ChunkBlocks::new());
        rig.send_queue.upsert(ClientId(9), cc(0, 0, 0), 0.0, now + Duration::from_secs(60));

        let transport = CollectingTransport::default();
        rig.mgr.drain(now, &rig.world, &mut rig.clients, &transport);
        assert!(transport.0.into_inner().is_empty());
        assert!(rig.send_queue.is_empty());
    }

    #[test]
    fn transport_failure_consumes_entry_but_marks_nothing() {
        let mut rig = rig(test_settings());
        add_client(&mut rig, ClientId(1), cc(0, 0, 0));
        let now = Instant::now();
        rig.world.chunks.insert(cc(0, 0, 0), ChunkBlocks::new());
        rig.send_queue.upsert(ClientId(1), cc(0, 0, 0), 0.0, now + Duration::from_secs(60));

        rig.mgr.drain(now, &rig.world, &mut rig.clients, &FailingTransport);
        assert!(rig.send_queue.is_empty());
        let stream = rig.clients.get_mut(ClientId(1)).unwrap();
        assert!(!stream.is_known(cc(0, 0, 0)));

        // the next scan re-queues it
        rig.mgr.schedule(now, &rig.world, &mut rig.clients);
        assert_eq!(
            rig.send_queue.take_next().map(|SendRequest { client, cc, .. }| (client, cc)),
            Some((ClientId(1), cc(0, 0, 0))),
        );
    }
}
