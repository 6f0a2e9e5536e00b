//! The server: tick loop, shared state, and the embedder-facing handle.

pub mod client_stream;
pub mod conn_queue;
pub mod fatal;
pub mod gen_queue;
pub mod gen_worker;
pub mod locks;
pub mod send_queue;
pub mod stream_mgr;
pub mod tick_clock;

#[cfg(test)]
mod stream_tests;

use self::{
    client_stream::ClientStream,
    conn_queue::{ConnEvent, ConnEventQueue},
    fatal::FatalSink,
    gen_queue::GenQueue,
    gen_worker::GenWorker,
    locks::{Shared, WorldClientsGuard},
    send_queue::SendQueue,
    stream_mgr::StreamMgr,
    tick_clock::TickClock,
};
use crate::{
    producer::ContentProducer,
    settings::Settings,
    transport::Transport,
};
use chunk_space::{
    ChunkBlocks,
    cube,
    ring_distance,
};
use std::{
    sync::Arc,
    thread::{
        self,
        JoinHandle,
    },
    time::{
        Duration,
        Instant,
    },
};
use anyhow::{bail, Result};
use crossbeam_channel::{
    bounded,
    Receiver,
    RecvTimeoutError,
    Sender,
};
use vek::*;


/// Identifier of a connected client. Allocated by the connection layer; the server only ever
/// repeats it back.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ClientId(pub u64);

/// Identifier of a dynamic world object, as the world simulation numbers them.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ObjectId(pub u64);


/// Handle to a running server thread.
///
/// The connection layer reports peers through `conn_events` and client messages through the
/// `client_*` methods; the world simulation edits chunks through `edit_chunk`. Dropping the
/// handle stops the server.
pub struct ServerHandle {
    thread: Option<JoinHandle<()>>,
    stop_send: Sender<()>,

    shared: Arc<Shared>,
    conn_events: ConnEventQueue,
    fatal: FatalSink,

    view_hysteresis: i64,
    view_stable: Duration,
}

impl ServerHandle {
    /// Start the server thread and its generation worker.
    pub fn start(
        settings: Settings,
        producer: impl ContentProducer,
        transport: impl Transport,
    ) -> Self {
        let shared = Arc::new(Shared::new());
        let conn_events = ConnEventQueue::new();
        let fatal = FatalSink::new();
        let (stop_send, stop_recv) = bounded(1);
        let view_hysteresis = i64::max(settings.view_hysteresis_chunks, 0);
        let view_stable = Duration::from_secs_f32(f32::max(settings.view_stable_secs, 0.0));
        let thread = thread::spawn({
            let shared = Arc::clone(&shared);
            let conn_events = conn_events.clone();
            let fatal = fatal.clone();
            move || {
                let mut server = Server::new(
                    settings,
                    shared,
                    conn_events,
                    fatal,
                    stop_recv,
                    producer,
                    Arc::new(transport),
                );
                if let Err(e) = server.run() {
                    error!(%e, "server terminated abnormally");
                }
            }
        });
        ServerHandle {
            thread: Some(thread),
            stop_send,
            shared,
            conn_events,
            fatal,
            view_hysteresis,
            view_stable,
        }
    }

    /// Stop the server cleanly and wait for it to shut down.
    pub fn stop(mut self) {
        self.inner_stop();
    }

    fn inner_stop(&mut self) {
        let _ = self.stop_send.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("server thread panicked");
            }
        }
    }

    /// The queue the connection layer reports peer lifecycle events into.
    pub fn conn_events(&self) -> ConnEventQueue {
        self.conn_events.clone()
    }

    /// The sink through which any helper thread can declare a fatal server error.
    pub fn fatal(&self) -> FatalSink {
        self.fatal.clone()
    }

    /// Report where a client is looking, as a chunk coordinate. Streaming recenters on it once
    /// it has moved meaningfully and held still.
    pub fn client_view_update(&self, client: ClientId, center_cc: Vec3<i64>) {
        let mut clients = self.shared.clients_only();
        match clients.get_mut(client) {
            Some(stream) => stream.update_view_center(
                center_cc,
                Instant::now(),
                self.view_hysteresis,
                self.view_stable,
            ),
            None => trace!(?client, "view update for unknown client"),
        }
    }

    /// Record the chunk serialization version a client negotiated in its handshake.
    pub fn client_set_ser_version(&self, client: ClientId, ser_version: u8) {
        let mut clients = self.shared.clients_only();
        match clients.get_mut(client) {
            Some(stream) => stream.set_ser_version(ser_version),
            None => trace!(?client, "serialization version for unknown client"),
        }
    }

    /// A client reports having evicted chunks from its cache; they become eligible for
    /// re-sending. Claiming to evict a chunk it was never sent is a protocol violation and is
    /// logged and ignored.
    pub fn client_deleted_chunks(&self, client: ClientId, ccs: &[Vec3<i64>]) {
        let mut clients = self.shared.clients_only();
        let stream = match clients.get_mut(client) {
            Some(stream) => stream,
            None => {
                trace!(?client, "deleted chunks report for unknown client");
                return;
            }
        };
        for &cc in ccs {
            if !stream.forget(cc) {
                warn!(?client, ?cc, "client claims to have deleted a chunk it was never sent");
            }
        }
    }

    /// Record that a client has been told about dynamic objects.
    pub fn client_gained_objects(&self, client: ClientId, ids: &[ObjectId]) {
        let mut clients = self.shared.clients_only();
        match clients.get_mut(client) {
            Some(stream) => {
                for &id in ids {
                    stream.mark_object_known(id);
                }
            }
            None => trace!(?client, "gained objects report for unknown client"),
        }
    }

    /// Record that a client no longer tracks dynamic objects. Dropping an object it never
    /// tracked is a protocol violation and is logged and ignored.
    pub fn client_forgot_objects(&self, client: ClientId, ids: &[ObjectId]) {
        let mut clients = self.shared.clients_only();
        let stream = match clients.get_mut(client) {
            Some(stream) => stream,
            None => {
                trace!(?client, "forgot objects report for unknown client");
                return;
            }
        };
        for &id in ids {
            if !stream.forget_object(id) {
                warn!(?client, ?id, "client claims to have dropped an object it never tracked");
            }
        }
    }

    /// Edit the content of a loaded chunk under the world lock, then invalidate every client's
    /// copy of it so the next scans re-send it. Returns `None` if the chunk is not loaded.
    pub fn edit_chunk<R>(
        &self,
        cc: Vec3<i64>,
        edit: impl FnOnce(&mut ChunkBlocks) -> R,
    ) -> Option<R> {
        let mut world = self.shared.world();
        let result = match world.chunks.get_mut(cc) {
            Some(blocks) => edit(blocks),
            None => {
                trace!(?cc, "edit of a chunk that is not loaded");
                return None;
            }
        };
        let mut both = world.clients();
        let mut invalidated = 0;
        for stream in both.clients.clients.values_mut() {
            if stream.forget(cc) {
                invalidated += 1;
            }
        }
        debug!(?cc, invalidated, "chunk edited");
        Some(result)
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            warn!("ServerHandle dropped without being stopped (stopping now)");
            self.inner_stop();
        }
    }
}


struct Server {
    settings: Settings,
    shared: Arc<Shared>,
    conn_events: ConnEventQueue,
    fatal: FatalSink,
    stop_recv: Receiver<()>,

    gen_queue: Arc<GenQueue>,
    send_queue: Arc<SendQueue>,
    stream_mgr: StreamMgr,
    gen_worker: GenWorker,
    transport: Arc<dyn Transport>,

    clock: TickClock,
    next_status: Instant,
}

impl Server {
    /// Construct, spawning the generation worker. This is expected to be immediately followed by
    /// `run`, or by hand-driven ticks in tests.
    fn new(
        settings: Settings,
        shared: Arc<Shared>,
        conn_events: ConnEventQueue,
        fatal: FatalSink,
        stop_recv: Receiver<()>,
        producer: impl ContentProducer,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let gen_queue = Arc::new(GenQueue::new());
        let send_queue = Arc::new(SendQueue::new());
        let stream_mgr = StreamMgr::new(
            &settings,
            Arc::clone(&gen_queue),
            Arc::clone(&send_queue),
        );
        let gen_worker = GenWorker::spawn(
            Arc::clone(&gen_queue),
            Arc::clone(&shared),
            producer,
        );
        let clock = TickClock::new(Duration::from_millis(u64::max(settings.tick_ms, 1)));
        Server {
            settings,
            shared,
            conn_events,
            fatal,
            stop_recv,
            gen_queue,
            send_queue,
            stream_mgr,
            gen_worker,
            transport,
            clock,
            next_status: Instant::now(),
        }
    }

    /// Run the server until told to stop or a fatal error is reported.
    fn run(&mut self) -> Result<()> {
        self.request_initial_generation();

        loop {
            if let Some(msg) = self.fatal.take() {
                bail!("fatal server error: {}", msg);
            }
            self.do_tick(Instant::now());
            self.clock.on_tick_done();
            match self.stop_recv.recv_deadline(self.clock.next_tick()) {
                Ok(()) => {
                    info!("server stopping (stop requested)");
                    return Ok(());
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("server stopping (handle gone)");
                    return Ok(());
                }
            }
        }
    }

    /// Do a tick: apply connection changes, run the streaming scheduler and drain, and kick the
    /// generation worker if it has work.
    fn do_tick(&mut self, now: Instant) {
        let shared = Arc::clone(&self.shared);
        let mut world = shared.world();
        let mut both = world.clients();

        self.apply_conn_events(&mut both);
        self.stream_mgr.schedule(now, both.world, &mut both.clients);
        self.stream_mgr.drain(now, both.world, &mut both.clients, &*self.transport);
        self.maybe_log_status(now, &both);

        drop(both);
        drop(world);

        if !self.gen_queue.is_empty() {
            self.gen_worker.trigger();
        }
    }

    /// Drain the connection event queue, creating and destroying client streaming state. The one
    /// place connection lifecycle mutates the client table.
    fn apply_conn_events(&mut self, both: &mut WorldClientsGuard<'_, '_>) {
        for event in self.conn_events.drain() {
            match event {
                ConnEvent::Added { client } => {
                    info!(?client, "client connected");
                    let prev = both.clients.clients.insert(client, ClientStream::new());
                    if prev.is_some() {
                        warn!(?client, "client connected while already connected, resetting it");
                        self.send_queue.purge_client(client);
                    }
                }
                ConnEvent::Removed { client, timed_out } => {
                    if both.clients.clients.remove(&client).is_some() {
                        if timed_out {
                            info!(?client, "client timed out");
                        } else {
                            info!(?client, "client disconnected");
                        }
                        self.send_queue.purge_client(client);
                    } else {
                        warn!(?client, "removal of a client that was never added");
                    }
                }
            }
        }
    }

    /// Request generation of the spawn area, nearest chunks first, and kick the worker.
    fn request_initial_generation(&self) {
        let radius = i64::max(self.settings.initial_generate_radius, 0);
        let origin = Vec3::zero();
        let mut ccs = cube(origin, radius)
            .filter(|cc| cc.y >= self.settings.min_chunk_y && cc.y <= self.settings.max_chunk_y)
            .collect::<Vec<_>>();
        ccs.sort_by_key(|&cc| ring_distance(origin, cc));
        let count = ccs.len();
        for cc in ccs {
            self.gen_queue.request(cc, -(ring_distance(origin, cc) as f32));
        }
        if count > 0 {
            self.gen_worker.trigger();
        }
        info!(count, "requested spawn area generation");
    }

    fn maybe_log_status(&mut self, now: Instant, both: &WorldClientsGuard<'_, '_>) {
        if now < self.next_status {
            return;
        }
        let interval = Duration::from_secs_f32(f32::max(self.settings.status_interval_secs, 0.0));
        self.next_status = now + interval;
        let (pending_gen, pending_send) = self.stream_mgr.queue_depths();
        info!(
            uptime_secs = self.clock.uptime().as_secs(),
            clients = both.clients.clients.len(),
            loaded_chunks = both.world.chunks.len(),
            pending_gen,
            pending_send,
            "server status",
        );
    }
}
