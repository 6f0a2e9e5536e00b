//! Background thread that produces chunk content.

use crate::{
    producer::ContentProducer,
    server::{
        gen_queue::{GenQueue, GenRequest},
        locks::Shared,
    },
};
use std::{
    sync::Arc,
    thread::{
        self,
        JoinHandle,
    },
    panic::{
        catch_unwind,
        AssertUnwindSafe,
    },
};
use parking_lot::{
    Mutex,
    Condvar,
};


// what the worker thread is up to, as far as signalling is concerned
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum RunState {
    /// Asleep on the condvar, waiting for a trigger.
    Idle,
    /// Woken or about to be, will start draining.
    Triggered,
    /// Draining the queue.
    Running,
}

struct Signal {
    state: Mutex<SignalState>,
    cvar: Condvar,
}

struct SignalState {
    run_state: RunState,
    // a trigger arrived while running; re-check the queue before going idle
    pending: bool,
    stop: bool,
}

/// Handle to the generation worker thread.
///
/// The worker sleeps until triggered, then drains the generation queue most urgent first, calling
/// the content producer for each request with no locks held and publishing each produced chunk
/// under the world lock. A producer error or panic costs only its own request. Joined on stop or
/// drop.
pub struct GenWorker {
    signal: Arc<Signal>,
    thread: Option<JoinHandle<()>>,
}

impl GenWorker {
    /// Spawn the worker thread, idle until first triggered.
    pub fn spawn<P: ContentProducer>(
        queue: Arc<GenQueue>,
        shared: Arc<Shared>,
        producer: P,
    ) -> Self {
        let signal = Arc::new(Signal {
            state: Mutex::new(SignalState {
                run_state: RunState::Idle,
                pending: false,
                stop: false,
            }),
            cvar: Condvar::new(),
        });
        let thread = thread::spawn({
            let signal = Arc::clone(&signal);
            move || worker_body(&signal, &queue, &shared, &producer)
        });
        GenWorker {
            signal,
            thread: Some(thread),
        }
    }

    /// Wake the worker if it is idle, or have it re-check the queue before sleeping if it is
    /// already draining. Callable from any thread, cheap when redundant.
    pub fn trigger(&self) {
        let mut state = self.signal.state.lock();
        match state.run_state {
            RunState::Idle => {
                state.run_state = RunState::Triggered;
                self.signal.cvar.notify_one();
            }
            RunState::Triggered => {}
            RunState::Running => state.pending = true,
        }
    }

    /// Stop the worker and wait for it to finish its current request and exit.
    pub fn stop(mut self) {
        self.inner_stop();
    }

    fn inner_stop(&mut self) {
        {
            let mut state = self.signal.state.lock();
            state.stop = true;
            self.signal.cvar.notify_one();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("generation worker thread panicked");
            }
        }
    }
}

impl Drop for GenWorker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.inner_stop();
        }
    }
}

fn worker_body<P: ContentProducer>(
    signal: &Signal,
    queue: &GenQueue,
    shared: &Shared,
    producer: &P,
) {
    trace!("generation worker up");
    loop {
        // sleep until triggered or stopped
        {
            let mut state = signal.state.lock();
            loop {
                if state.stop {
                    trace!("generation worker stopping");
                    return;
                }
                if state.run_state == RunState::Triggered {
                    break;
                }
                signal.cvar.wait(&mut state);
            }
            state.run_state = RunState::Running;
            state.pending = false;
        }

        // drain, re-checking for triggers that raced the end of the drain
        loop {
            while let Some(request) = queue.take_next() {
                generate_one(request, shared, producer);
                if signal.state.lock().stop {
                    trace!("generation worker stopping mid-drain");
                    return;
                }
            }
            let mut state = signal.state.lock();
            if state.stop {
                trace!("generation worker stopping");
                return;
            }
            if state.pending {
                state.pending = false;
                continue;
            }
            state.run_state = RunState::Idle;
            break;
        }
    }
}

// produce one requested chunk and publish it, containing any failure to this request
fn generate_one<P: ContentProducer>(request: GenRequest, shared: &Shared, producer: &P) {
    let GenRequest { cc, priority } = request;

    // somebody else may have published it since the request was queued
    if shared.world().chunks.contains(cc) {
        trace!(?cc, "skipping generation of already present chunk");
        return;
    }

    match catch_unwind(AssertUnwindSafe(|| producer.produce(cc))) {
        Ok(Ok(blocks)) => {
            shared.world().chunks.insert(cc, blocks);
            trace!(?cc, priority, "generated chunk");
        }
        Ok(Err(e)) => {
            warn!(%e, ?cc, "content producer failed, dropping request");
        }
        Err(_) => {
            error!(?cc, "content producer panicked, dropping request");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use chunk_space::ChunkBlocks;
    use std::time::{Duration, Instant};
    use anyhow::{Result, bail};
    use vek::*;

    fn cc(x: i64, y: i64, z: i64) -> Vec3<i64> {
        Vec3 { x, y, z }
    }

    struct FlakyProducer;

    impl ContentProducer for FlakyProducer {
        fn produce(&self, cc: Vec3<i64>) -> Result<ChunkBlocks> {
            match cc.x {
                1 => bail!("refusing to generate {:?}", cc),
                2 => panic!("exploding on {:?}", cc),
                _ => Ok(ChunkBlocks::new()),
            }
        }
    }

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let give_up = Instant::now() + deadline;
        while Instant::now() < give_up {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        done()
    }

    #[test]
    fn trigger_drains_queue_into_world() {
        let queue = Arc::new(GenQueue::new());
        let shared = Arc::new(Shared::new());
        let worker = GenWorker::spawn(Arc::clone(&queue), Arc::clone(&shared), FlakyProducer);

        queue.request(cc(0, 0, 0), 0.0);
        queue.request(cc(3, 0, 0), -3.0);
        worker.trigger();
        assert!(wait_until(Duration::from_secs(5), || {
            queue.is_empty() && shared.world().chunks.len() == 2
        }));
        assert!(shared.world().chunks.contains(cc(0, 0, 0)));
        assert!(shared.world().chunks.contains(cc(3, 0, 0)));
        worker.stop();
    }

    #[test]
    fn failures_and_panics_cost_only_their_own_request() {
        let queue = Arc::new(GenQueue::new());
        let shared = Arc::new(Shared::new());
        let worker = GenWorker::spawn(Arc::clone(&queue), Arc::clone(&shared), FlakyProducer);

        queue.request(cc(1, 0, 0), 0.0);
        queue.request(cc(2, 0, 0), -1.0);
        queue.request(cc(3, 0, 0), -2.0);
        worker.trigger();
        assert!(wait_until(Duration::from_secs(5), || queue.is_empty()));
        // the worker survives both kinds of failure and still serves later triggers
        queue.request(cc(4, 0, 0), 0.0);
        worker.trigger();
        assert!(wait_until(Duration::from_secs(5), || {
            shared.world().chunks.contains(cc(4, 0, 0))
        }));
        assert!(shared.world().chunks.contains(cc(3, 0, 0)));
        assert!(!shared.world().chunks.contains(cc(1, 0, 0)));
        assert!(!shared.world().chunks.contains(cc(2, 0, 0)));
        worker.stop();
    }

    #[test]
    fn triggers_during_drain_are_not_lost() {
        let queue = Arc::new(GenQueue::new());
        let shared = Arc::new(Shared::new());
        let worker = GenWorker::spawn(Arc::clone(&queue), Arc::clone(&shared), FlakyProducer);

        // hammer requests and triggers from several threads; every chunk must come out generated
        std::thread::scope(|scope| {
            for t in 0..4i64 {
                let queue = &queue;
                let worker = &worker;
                scope.spawn(move || {
                    for i in 0..25i64 {
                        queue.request(cc(10 + t * 100 + i, 0, 0), -i as f32);
                        worker.trigger();
                    }
                });
            }
        });
        assert!(wait_until(Duration::from_secs(10), || {
            queue.is_empty() && shared.world().chunks.len() == 100
        }));
        worker.stop();
    }
}
