//! Producing chunk content.

use chunk_space::{
    ChunkBlocks,
    BlockId,
    CHUNK_EXTENT,
};
use anyhow::*;
use vek::*;
use bracket_noise::prelude::FastNoise;


/// Source of world content, driven by the generation worker.
///
/// Called on the worker thread with no server locks held, so it may take long. One call per
/// chunk; an error or panic is confined to that chunk.
pub trait ContentProducer: Send + Sync + 'static {
    /// Produce the content of the chunk at `cc`.
    fn produce(&self, cc: Vec3<i64>) -> Result<ChunkBlocks>;
}

impl<P: ContentProducer + ?Sized> ContentProducer for std::sync::Arc<P> {
    fn produce(&self, cc: Vec3<i64>) -> Result<ChunkBlocks> {
        (**self).produce(cc)
    }
}


const BID_STONE: BlockId = 1;

/// Heightfield terrain producer backed by fractal noise. The built-in producer of the dedicated
/// server binary.
#[derive(Debug, Clone)]
pub struct NoiseProducer {
    seed: u64,
}

impl NoiseProducer {
    /// Construct for a world seed.
    pub fn new(seed: u64) -> Self {
        NoiseProducer { seed }
    }
}

impl ContentProducer for NoiseProducer {
    fn produce(&self, cc: Vec3<i64>) -> Result<ChunkBlocks> {
        let mut blocks = ChunkBlocks::new();
        let mut noise = FastNoise::seeded(self.seed);
        noise.set_frequency(1.0 / 75.0);
        for x in 0..CHUNK_EXTENT {
            for z in 0..CHUNK_EXTENT {
                let height =
                    noise.get_noise(
                        (x + cc.x * CHUNK_EXTENT) as f32,
                        (z + cc.z * CHUNK_EXTENT) as f32,
                    )
                    / 2.0
                    * 20.0
                    + 40.0
                    - (cc.y * CHUNK_EXTENT) as f32;
                let height = height.floor() as i64;

                for y in 0..i64::min(height, CHUNK_EXTENT) {
                    blocks.set(Vec3 { x, y, z }, BID_STONE);
                }
            }
        }
        Ok(blocks)
    }
}


#[test]
fn noise_producer_is_deterministic() {
    let producer = NoiseProducer::new(0xb10c);
    let cc = Vec3 { x: 3, y: 0, z: -2 };
    let once = producer.produce(cc).unwrap();
    let twice = producer.produce(cc).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn noise_producer_fills_deep_chunks() {
    let producer = NoiseProducer::new(1);
    // far enough below the surface that every column is solid
    let deep = producer.produce(Vec3 { x: 0, y: -4, z: 0 }).unwrap();
    assert!(deep.raw().iter().all(|&bid| bid == BID_STONE));
    // far enough above that every column is air
    let high = producer.produce(Vec3 { x: 0, y: 10, z: 0 }).unwrap();
    assert!(high.raw().iter().all(|&bid| bid == chunk_space::AIR));
}
