//! Tests that drive a whole `Server` tick by tick, plus a few through a running `ServerHandle`.

use super::*;
use crate::transport::LogTransport;
use std::collections::HashMap;
use anyhow::Result;
use parking_lot::Mutex;


fn cc(x: i64, y: i64, z: i64) -> Vec3<i64> {
    Vec3 { x, y, z }
}

fn test_settings() -> Settings {
    Settings {
        tick_ms: 5,
        send_radius: 2,
        min_chunk_y: -2,
        max_chunk_y: 2,
        send_timeout_secs: 10.0,
        max_sends_per_tick: 64,
        view_hysteresis_chunks: 1,
        view_stable_secs: 0.0,
        empty_scan_threshold: 3,
        empty_scan_pause_secs: 60.0,
        initial_generate_radius: 1,
        world_seed: Some(1),
        status_interval_secs: 1000.0,
    }
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(2));
    }
}

/// Producer that counts how many times each chunk was asked for.
#[derive(Default)]
struct CountingProducer {
    calls: Mutex<HashMap<Vec3<i64>, u32>>,
}

impl CountingProducer {
    fn calls_for(&self, cc: Vec3<i64>) -> u32 {
        self.calls.lock().get(&cc).copied().unwrap_or(0)
    }
}

impl ContentProducer for CountingProducer {
    fn produce(&self, cc: Vec3<i64>) -> Result<ChunkBlocks> {
        *self.calls.lock().entry(cc).or_insert(0) += 1;
        Ok(ChunkBlocks::new())
    }
}

/// Transport that records every handoff.
#[derive(Default)]
struct CollectingTransport {
    sent: Mutex<Vec<(ClientId, Vec3<i64>)>>,
}

impl CollectingTransport {
    fn recipients_of(&self, cc: Vec3<i64>) -> Vec<ClientId> {
        let mut recipients = self.sent.lock().iter()
            .filter(|&&(_, sent_cc)| sent_cc == cc)
            .map(|&(client, _)| client)
            .collect::<Vec<_>>();
        recipients.sort();
        recipients
    }
}

impl Transport for CollectingTransport {
    fn send(
        &self,
        client: ClientId,
        cc: Vec3<i64>,
        _blocks: &ChunkBlocks,
        _ser_version: u8,
    ) -> Result<()> {
        self.sent.lock().push((client, cc));
        Ok(())
    }
}

/// A `Server` with its ticks driven by hand rather than by `run`.
struct Rig {
    server: Server,
    producer: Arc<CountingProducer>,
    transport: Arc<CollectingTransport>,
    _stop_send: Sender<()>,
}

fn rig(settings: Settings) -> Rig {
    let producer = Arc::new(CountingProducer::default());
    let transport = Arc::new(CollectingTransport::default());
    let (stop_send, stop_recv) = bounded(1);
    let server = Server::new(
        settings,
        Arc::new(Shared::new()),
        ConnEventQueue::new(),
        FatalSink::new(),
        stop_recv,
        Arc::clone(&producer),
        Arc::clone(&transport) as Arc<dyn Transport>,
    );
    Rig {
        server,
        producer,
        transport,
        _stop_send: stop_send,
    }
}

impl Rig {
    fn tick(&mut self) {
        self.server.do_tick(Instant::now());
    }

    /// Add the client, tick so the event applies, then give it a view.
    fn connect(&mut self, client: ClientId, center: Vec3<i64>) {
        self.server.conn_events.push(ConnEvent::Added { client });
        self.tick();
        self.server.shared.clients_only().get_mut(client).unwrap()
            .update_view_center(center, Instant::now(), 1, Duration::ZERO);
    }

    fn wait_for_chunk(&self, cc: Vec3<i64>) {
        let shared = Arc::clone(&self.server.shared);
        wait_until(|| shared.world().chunks.contains(cc));
    }
}

#[test]
fn a_chunk_needed_by_two_clients_is_generated_once_and_sent_to_each() {
    let mut rig = rig(test_settings());
    let center = cc(1, 0, 0);
    rig.connect(ClientId(1), center);
    rig.connect(ClientId(2), center);

    rig.tick();
    rig.wait_for_chunk(center);
    rig.tick();
    rig.tick();

    assert_eq!(rig.producer.calls_for(center), 1);
    assert_eq!(rig.transport.recipients_of(center), vec![ClientId(1), ClientId(2)]);

    // once a client holds a chunk it is never sent again unprompted
    rig.tick();
    rig.tick();
    assert_eq!(rig.transport.recipients_of(center), vec![ClientId(1), ClientId(2)]);
}

#[test]
fn removing_a_client_purges_its_queued_sends_and_state() {
    let mut rig = rig(Settings {
        max_sends_per_tick: 1,
        send_radius: 1,
        ..test_settings()
    });
    {
        let mut world = rig.server.shared.world();
        for chunk_cc in cube(cc(0, 0, 0), 1) {
            world.chunks.insert(chunk_cc, ChunkBlocks::new());
        }
    }
    rig.connect(ClientId(1), cc(0, 0, 0));

    // ring 0 sent, an empty pass steps the cursor out, ring 1 queues 26 and sends 1
    rig.tick();
    rig.tick();
    rig.tick();
    assert_eq!(rig.server.send_queue.len(), 25);

    rig.server.conn_events.push(ConnEvent::Removed {
        client: ClientId(1),
        timed_out: false,
    });
    rig.tick();

    assert!(rig.server.send_queue.is_empty());
    assert!(rig.server.shared.clients_only().clients.is_empty());
    assert_eq!(rig.transport.sent.lock().len(), 2);
}

#[test]
fn queued_sends_past_their_deadline_are_dropped_not_delivered() {
    let mut rig = rig(test_settings());
    rig.server.conn_events.push(ConnEvent::Added { client: ClientId(1) });
    rig.tick();
    rig.server.shared.world().chunks.insert(cc(0, 0, 0), ChunkBlocks::new());

    // queued with a one second deadline, drained two simulated seconds later
    let now = Instant::now();
    rig.server.send_queue.upsert(ClientId(1), cc(0, 0, 0), 0.0, now + Duration::from_secs(1));
    rig.server.do_tick(now + Duration::from_secs(2));

    assert!(rig.transport.sent.lock().is_empty());
    assert!(rig.server.send_queue.is_empty());
}

#[test]
fn editing_a_chunk_resends_it_to_clients_that_have_it() {
    let transport = Arc::new(CollectingTransport::default());
    let server = ServerHandle::start(
        Settings {
            send_radius: 0,
            initial_generate_radius: 0,
            ..test_settings()
        },
        Arc::new(CountingProducer::default()),
        Arc::clone(&transport),
    );
    let events = server.conn_events();
    events.push(ConnEvent::Added { client: ClientId(7) });
    {
        let shared = Arc::clone(&server.shared);
        wait_until(move || !shared.clients_only().clients.is_empty());
    }
    server.client_view_update(ClientId(7), cc(0, 0, 0));
    {
        let transport = Arc::clone(&transport);
        wait_until(move || transport.sent.lock().len() == 1);
    }

    assert_eq!(server.edit_chunk(cc(9, 9, 9), |_| ()), None);
    let edited = server.edit_chunk(cc(0, 0, 0), |blocks| {
        blocks.set(Vec3 { x: 0, y: 0, z: 0 }, 9);
        9
    });
    assert_eq!(edited, Some(9));

    {
        let transport = Arc::clone(&transport);
        wait_until(move || transport.sent.lock().len() == 2);
    }
    assert_eq!(transport.sent.lock()[1], (ClientId(7), cc(0, 0, 0)));
    server.stop();
}

#[test]
fn spawn_area_is_generated_at_startup() {
    let server = ServerHandle::start(
        test_settings(),
        Arc::new(CountingProducer::default()),
        LogTransport,
    );
    {
        let shared = Arc::clone(&server.shared);
        wait_until(move || shared.world().chunks.len() >= 27);
    }
    assert_eq!(server.shared.world().chunks.len(), 27);
    server.stop();
}

#[test]
fn a_fatal_error_stops_the_server() {
    let server = ServerHandle::start(
        test_settings(),
        Arc::new(CountingProducer::default()),
        LogTransport,
    );
    server.fatal().set("chunk store corrupted");
    {
        let thread = server.thread.as_ref().unwrap();
        wait_until(|| thread.is_finished());
    }
    server.stop();
}
