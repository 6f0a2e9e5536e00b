//! Block world dedicated server core.
//!
//! Streams chunks of a voxel world to connected clients and schedules world generation: for every
//! client and every missing chunk, deciding what to send or generate next under priority,
//! deadline, and rate constraints. The network wire format, the terrain algorithm, and game rules
//! live behind the traits in `producer` and `transport`; this crate is the part in between.

#[macro_use]
extern crate tracing;

pub mod logging;
pub mod settings;
pub mod util_dedup_queue;
pub mod producer;
pub mod transport;
pub mod server;
