//! Shared server state and its lock ordering.
//!
//! Two mutexes protect the state shared between the tick loop, the generation worker, and
//! embedder threads: the world lock and the client lock. Whenever both are held they must have
//! been taken world first. The guard types encode that order: the only way to hold both is
//! `WorldGuard::clients`, and `ClientsOnlyGuard` offers no route onward to the world lock, so an
//! acquisition in the wrong order has no type that expresses it.

use crate::server::{
    ClientId,
    client_stream::ClientStream,
};
use chunk_space::{
    ChunkBlocks,
    ChunkTable,
};
use std::collections::HashMap;
use parking_lot::{
    Mutex,
    MutexGuard,
};
use vek::*;


/// State behind the world lock: the loaded chunk space.
#[derive(Default)]
pub struct WorldState {
    pub chunks: ChunkTable<ChunkBlocks>,
}

/// State behind the client lock: streaming state per connected client.
#[derive(Default)]
pub struct ClientTable {
    pub clients: HashMap<ClientId, ClientStream>,
}

impl ClientTable {
    /// Get the streaming state of a client, if connected.
    pub fn get_mut(&mut self, client: ClientId) -> Option<&mut ClientStream> {
        self.clients.get_mut(&client)
    }
}

/// The two-lock shared server state.
pub struct Shared {
    world: Mutex<WorldState>,
    clients: Mutex<ClientTable>,
}

impl Shared {
    /// Construct with an empty world and no clients.
    pub fn new() -> Self {
        Shared {
            world: Mutex::new(WorldState::default()),
            clients: Mutex::new(ClientTable::default()),
        }
    }

    /// Lock the world. The first of the two locks; the client lock can be added on top of the
    /// returned guard.
    pub fn world(&self) -> WorldGuard<'_> {
        WorldGuard {
            world: self.world.lock(),
            shared: self,
        }
    }

    /// Lock only the client table.
    ///
    /// There is no way from the returned guard to the world lock; code needing both must start
    /// from `world`.
    pub fn clients_only(&self) -> ClientsOnlyGuard<'_> {
        ClientsOnlyGuard(self.clients.lock())
    }
}

impl Default for Shared {
    fn default() -> Self {
        Shared::new()
    }
}

/// Holds the world lock. Derefs to `WorldState`.
pub struct WorldGuard<'a> {
    world: MutexGuard<'a, WorldState>,
    shared: &'a Shared,
}

impl<'a> WorldGuard<'a> {
    /// Additionally take the client lock, world already held, which is the required order.
    pub fn clients(&mut self) -> WorldClientsGuard<'a, '_> {
        WorldClientsGuard {
            clients: self.shared.clients.lock(),
            world: &mut *self.world,
        }
    }
}

impl<'a> std::ops::Deref for WorldGuard<'a> {
    type Target = WorldState;

    fn deref(&self) -> &WorldState {
        &self.world
    }
}

impl<'a> std::ops::DerefMut for WorldGuard<'a> {
    fn deref_mut(&mut self) -> &mut WorldState {
        &mut self.world
    }
}

/// Holds both locks, taken in order.
pub struct WorldClientsGuard<'a, 'b> {
    pub world: &'b mut WorldState,
    pub clients: MutexGuard<'a, ClientTable>,
}

/// Holds only the client lock. Derefs to `ClientTable`.
pub struct ClientsOnlyGuard<'a>(MutexGuard<'a, ClientTable>);

impl<'a> std::ops::Deref for ClientsOnlyGuard<'a> {
    type Target = ClientTable;

    fn deref(&self) -> &ClientTable {
        &self.0
    }
}

impl<'a> std::ops::DerefMut for ClientsOnlyGuard<'a> {
    fn deref_mut(&mut self) -> &mut ClientTable {
        &mut self.0
    }
}


#[test]
fn both_guards_reach_both_states() {
    let shared = Shared::new();
    {
        let mut world = shared.world();
        let mut both = world.clients();
        both.world.chunks.insert(Vec3 { x: 0, y: 0, z: 0 }, ChunkBlocks::new());
        both.clients.clients.insert(ClientId(1), ClientStream::new());
    }
    assert_eq!(shared.world().chunks.len(), 1);
    assert_eq!(shared.clients_only().clients.len(), 1);
}

#[test]
fn clients_only_does_not_block_world_takers() {
    // a thread holding only the client lock must leave the world lock takeable
    let shared = std::sync::Arc::new(Shared::new());
    let guard = shared.clients_only();
    let shared2 = std::sync::Arc::clone(&shared);
    let taken = std::thread::spawn(move || {
        let _world = shared2.world();
        true
    }).join().unwrap();
    assert!(taken);
    drop(guard);
}
