//! The space of chunks: coordinate math, per-chunk block storage, and a table of loaded chunks.
//!
//! A chunk is a fixed-size cube of blocks addressed by an integer chunk coordinate ("cc"). This
//! crate knows nothing about clients, scheduling, or generation; it is the vocabulary the server
//! speaks in.

mod pos;
mod blocks;
mod table;

pub use self::{
    pos::{
        ring_distance,
        ring,
        cube,
    },
    blocks::{
        CHUNK_EXTENT,
        NUM_BLOCKS,
        BlockId,
        AIR,
        lbc_to_lbi,
        ChunkBlocks,
    },
    table::ChunkTable,
};
