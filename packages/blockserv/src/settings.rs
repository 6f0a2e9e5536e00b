
use std::{
    path::Path,
    fs::File,
    io::{
        BufReader,
        BufWriter,
    },
};
use serde::{Serialize, Deserialize};
use anyhow::*;


pub const SETTINGS_FILE_NAME: &'static str = "server_settings.json";


/// Server settings. Read once at startup; the running server does not watch for changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Duration of one server tick, milliseconds.
    pub tick_ms: u64,
    /// Furthest ring of chunks streamed around a client's view center.
    pub send_radius: i64,
    /// Lowest chunk y coordinate that exists.
    pub min_chunk_y: i64,
    /// Highest chunk y coordinate that exists.
    pub max_chunk_y: i64,
    /// How long a queued chunk transmission stays valid before it is quietly dropped, seconds.
    pub send_timeout_secs: f32,
    /// Most chunk transmissions handed to the transport in one tick.
    pub max_sends_per_tick: u32,
    /// View center movement below this many chunks is jitter and does not restart streaming.
    pub view_hysteresis_chunks: i64,
    /// How long a moved view center must hold still before streaming recenters on it, seconds.
    pub view_stable_secs: f32,
    /// Consecutive empty streaming scans of a client before its scanning pauses.
    pub empty_scan_threshold: u32,
    /// How long an idle client's streaming scan pauses, seconds.
    pub empty_scan_pause_secs: f32,
    /// Ring radius of chunks generated around the origin at startup.
    pub initial_generate_radius: i64,
    /// World generation seed. Absent means pick one at random at startup.
    pub world_seed: Option<u64>,
    /// Interval between periodic status log lines, seconds.
    pub status_interval_secs: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            tick_ms: 50,
            send_radius: 8,
            min_chunk_y: -4,
            max_chunk_y: 3,
            send_timeout_secs: 10.0,
            max_sends_per_tick: 16,
            view_hysteresis_chunks: 1,
            view_stable_secs: 2.0,
            empty_scan_threshold: 3,
            empty_scan_pause_secs: 2.0,
            initial_generate_radius: 2,
            world_seed: None,
            status_interval_secs: 10.0,
        }
    }
}

impl Settings {
    pub fn try_read(path: impl AsRef<Path>) -> Result<Self> {
        Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), self)?;
        Ok(())
    }
}
