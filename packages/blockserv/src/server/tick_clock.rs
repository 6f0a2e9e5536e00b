//! See `TickClock`.

use std::time::{
    Instant,
    Duration,
};


/// Manages ticks, uptime, and the passage of time.
pub struct TickClock {
    tick_duration: Duration,
    tick: u64,
    started: Instant,
    next_tick: Instant,
}

impl TickClock {
    /// Construct, starting the uptime counter now.
    pub fn new(tick_duration: Duration) -> Self {
        let now = Instant::now();
        TickClock {
            tick_duration,
            tick: 0,
            started: now,
            next_tick: now,
        }
    }

    /// Get the number of the current tick.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Get the time the next tick is scheduled to begin ideally. The tick loop sleeps until this
    /// instant after finishing a tick.
    pub fn next_tick(&self) -> Instant {
        self.next_tick
    }

    /// Time the server has been running.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Call after doing a tick, to update timing information and schedule the next tick.
    ///
    /// If tick processing has fallen more than a whole tick behind schedule, the missed ticks are
    /// skipped rather than run back to back.
    pub fn on_tick_done(&mut self) {
        self.tick += 1;

        self.next_tick += self.tick_duration;
        let now = Instant::now();
        if self.next_tick < now {
            let behind_nanos = (now - self.next_tick).as_nanos();
            let tick_nanos = self.tick_duration.as_nanos();
            let behind_ticks = behind_nanos.div_ceil(tick_nanos);
            let behind_ticks = u32::try_from(behind_ticks).expect("tick clock overflow");
            warn!("tick processing falling behind, skipping {behind_ticks} ticks");
            self.next_tick += self.tick_duration * behind_ticks;
        }
    }
}


#[test]
fn ticks_advance_schedule() {
    let mut clock = TickClock::new(Duration::from_millis(50));
    assert_eq!(clock.tick(), 0);
    let first_deadline = clock.next_tick();
    clock.on_tick_done();
    assert_eq!(clock.tick(), 1);
    assert!(clock.next_tick() >= first_deadline + Duration::from_millis(50));
}

#[test]
fn falling_behind_skips_ticks() {
    let mut clock = TickClock::new(Duration::from_millis(1));
    let scheduled = clock.next_tick();
    std::thread::sleep(Duration::from_millis(20));
    clock.on_tick_done();
    // on time it would advance exactly one tick; behind, the missed ticks get skipped too
    assert!(clock.next_tick() > scheduled + Duration::from_millis(2));
}
