//! Transmitting chunk content to clients.

use crate::server::ClientId;
use chunk_space::ChunkBlocks;
use anyhow::*;
use vek::*;


/// Sink through which the server transmits chunks to clients.
///
/// Implementations encode for the given serialization version and hand off to their own
/// connection machinery. Called from the server tick with server locks held, so `send` must not
/// block on the network and must not call back into the server; queueing onto a per-connection
/// buffer is the intended shape. An error marks this transmission failed and is not retried.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        client: ClientId,
        cc: Vec3<i64>,
        blocks: &ChunkBlocks,
        ser_version: u8,
    ) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn send(
        &self,
        client: ClientId,
        cc: Vec3<i64>,
        blocks: &ChunkBlocks,
        ser_version: u8,
    ) -> Result<()> {
        (**self).send(client, cc, blocks, ser_version)
    }
}


/// Transport that only logs. Lets the dedicated server run without any network layer attached.
#[derive(Debug, Copy, Clone, Default)]
pub struct LogTransport;

impl Transport for LogTransport {
    fn send(
        &self,
        client: ClientId,
        cc: Vec3<i64>,
        blocks: &ChunkBlocks,
        ser_version: u8,
    ) -> Result<()> {
        debug!(?client, ?cc, ?blocks, ser_version, "would send chunk");
        Ok(())
    }
}
