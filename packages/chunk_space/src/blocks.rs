//! Per-chunk block storage.

use vek::*;


/// Edge length of a chunk, in blocks, along each axis.
pub const CHUNK_EXTENT: i64 = 16;

/// Number of blocks in a chunk.
pub const NUM_BLOCKS: usize = (CHUNK_EXTENT * CHUNK_EXTENT * CHUNK_EXTENT) as usize;

/// Block ID. The server stores and ships these; what they mean is the content producer's and the
/// client's business.
pub type BlockId = u16;

/// The air block, the content of a freshly allocated chunk.
pub const AIR: BlockId = 0;


/// Convert a local (in-chunk) block coordinate to an index into chunk storage.
///
/// All components must lie in `0..CHUNK_EXTENT`.
pub fn lbc_to_lbi(lbc: Vec3<i64>) -> usize {
    debug_assert!(lbc.x >= 0 && lbc.x < CHUNK_EXTENT, "lbc x out of range");
    debug_assert!(lbc.y >= 0 && lbc.y < CHUNK_EXTENT, "lbc y out of range");
    debug_assert!(lbc.z >= 0 && lbc.z < CHUNK_EXTENT, "lbc z out of range");
    (lbc.x + lbc.z * CHUNK_EXTENT + lbc.y * CHUNK_EXTENT * CHUNK_EXTENT) as usize
}


/// Dense storage of the block IDs of one chunk.
#[derive(Clone, PartialEq, Eq)]
pub struct ChunkBlocks {
    blocks: Box<[BlockId]>,
}

impl ChunkBlocks {
    /// Construct filled with air.
    pub fn new() -> Self {
        ChunkBlocks {
            blocks: vec![AIR; NUM_BLOCKS].into_boxed_slice(),
        }
    }

    /// Get the block at the given local coordinate.
    pub fn get(&self, lbc: Vec3<i64>) -> BlockId {
        self.blocks[lbc_to_lbi(lbc)]
    }

    /// Set the block at the given local coordinate.
    pub fn set(&mut self, lbc: Vec3<i64>, bid: BlockId) {
        self.blocks[lbc_to_lbi(lbc)] = bid;
    }

    /// View the raw block ID array, `lbc_to_lbi`-indexed.
    pub fn raw(&self) -> &[BlockId] {
        &self.blocks
    }
}

impl Default for ChunkBlocks {
    fn default() -> Self {
        ChunkBlocks::new()
    }
}

impl std::fmt::Debug for ChunkBlocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let non_air = self.blocks.iter().filter(|&&bid| bid != AIR).count();
        f.debug_struct("ChunkBlocks").field("non_air", &non_air).finish()
    }
}


#[test]
fn new_chunk_is_air() {
    let blocks = ChunkBlocks::new();
    assert!(blocks.raw().iter().all(|&bid| bid == AIR));
    assert_eq!(blocks.raw().len(), NUM_BLOCKS);
}

#[test]
fn get_set_roundtrip() {
    let mut blocks = ChunkBlocks::new();
    let a = Vec3 { x: 0, y: 0, z: 0 };
    let b = Vec3 { x: 15, y: 3, z: 7 };
    blocks.set(a, 2);
    blocks.set(b, 9);
    assert_eq!(blocks.get(a), 2);
    assert_eq!(blocks.get(b), 9);
    assert_eq!(blocks.get(Vec3 { x: 1, y: 0, z: 0 }), AIR);
}

#[test]
fn lbi_is_dense_and_distinct() {
    let mut seen = vec![false; NUM_BLOCKS];
    for y in 0..CHUNK_EXTENT {
        for z in 0..CHUNK_EXTENT {
            for x in 0..CHUNK_EXTENT {
                let lbi = lbc_to_lbi(Vec3 { x, y, z });
                assert!(!seen[lbi]);
                seen[lbi] = true;
            }
        }
    }
    assert!(seen.into_iter().all(|s| s));
}
