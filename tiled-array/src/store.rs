//! The owner-resident distributed tile container.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::warn;
use parking_lot::Mutex;
use std::collections::HashMap;

use tiled_runtime::{ActiveObject, ObjectId, Payload, Rank, RuntimeError, TaskFuture, World};
use tiled_tile::Tile;
use tiled_traits::Scalar;

use crate::pmap::ProcessMap;

const SHARDS: usize = 16;

enum Slot<T> {
    Ready(Tile<T>),
    /// Finds that raced ahead of the insert; resolved by the next insert.
    Waiting(Vec<TaskFuture<Tile<T>>>),
}

enum StoreMsg<T> {
    Insert { key: usize, tile: Tile<T> },
    Find { key: usize, from: Rank, fut: u64 },
    Probe { key: usize, from: Rank, fut: u64 },
    Erase { key: usize },
}

struct StoreInner<T: Scalar> {
    world: World,
    pmap: Arc<dyn ProcessMap>,
    ntiles: usize,
    obj: AtomicU64,
    shards: Vec<Mutex<HashMap<usize, Slot<T>>>>,
}

impl<T: Scalar> StoreInner<T> {
    fn shard(&self, key: usize) -> &Mutex<HashMap<usize, Slot<T>>> {
        &self.shards[key % SHARDS]
    }

    fn local_insert(&self, key: usize, tile: Tile<T>) {
        let waiters = {
            let mut shard = self.shard(key).lock();
            match shard.insert(key, Slot::Ready(tile.clone())) {
                None => Vec::new(),
                Some(Slot::Waiting(waiters)) => waiters,
                Some(Slot::Ready(_)) => {
                    warn!("tile {key} overwritten; one set per evaluation is the contract");
                    Vec::new()
                }
            }
        };
        for waiter in waiters {
            waiter.set(tile.clone());
        }
    }

    /// Owner-side find: resolved now when present, by a later insert
    /// otherwise.
    fn local_find(&self, key: usize) -> TaskFuture<Tile<T>> {
        let mut shard = self.shard(key).lock();
        match shard.get_mut(&key) {
            Some(Slot::Ready(tile)) => TaskFuture::ready(tile.clone()),
            Some(Slot::Waiting(waiters)) => {
                let fut = TaskFuture::new();
                waiters.push(fut.clone());
                fut
            }
            None => {
                let fut = TaskFuture::new();
                shard.insert(key, Slot::Waiting(vec![fut.clone()]));
                fut
            }
        }
    }

    fn local_probe(&self, key: usize) -> bool {
        matches!(self.shard(key).lock().get(&key), Some(Slot::Ready(_)))
    }

    fn local_erase(&self, key: usize) {
        let mut shard = self.shard(key).lock();
        if matches!(shard.get(&key), Some(Slot::Ready(_))) {
            shard.remove(&key);
        }
    }
}

/// Message shim registered with the world; holds the store weakly so a
/// dropped store stops handling traffic.
struct StoreShim<T: Scalar> {
    inner: Weak<StoreInner<T>>,
}

impl<T: Scalar> ActiveObject for StoreShim<T> {
    fn on_message(&self, world: &World, payload: Payload) {
        let inner = match self.inner.upgrade() {
            Some(inner) => inner,
            None => return,
        };
        let msg: StoreMsg<T> = payload
            .downcast()
            .unwrap_or_else(|_| panic!("malformed tile store message"));
        match msg {
            StoreMsg::Insert { key, tile } => inner.local_insert(key, tile),
            StoreMsg::Find { key, from, fut } => {
                let world = world.clone();
                inner.local_find(key).on_ready(move |result| match result {
                    Ok(tile) => world.resolve_remote(from, fut, Payload::new(tile.clone())),
                    Err(err) => world.resolve_remote(from, fut, Payload::new(err.clone())),
                });
            }
            StoreMsg::Probe { key, from, fut } => {
                world.resolve_remote(from, fut, Payload::new(inner.local_probe(key)));
            }
            StoreMsg::Erase { key } => inner.local_erase(key),
        }
    }
}

/// A process-mapped associative container of tiles.
///
/// Only the owner of a key holds its buffer; non-owners reach tiles
/// through request/response messages carrying remote-settable futures.
/// Local buckets are sharded under fine-grained locks.
pub struct TileStore<T: Scalar> {
    inner: Arc<StoreInner<T>>,
}

impl<T: Scalar> Clone for TileStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Scalar> TileStore<T> {
    /// Create and register the store with its world. Collective: every
    /// rank must construct its stores in the same order so object ids
    /// agree.
    pub fn new(world: &World, ntiles: usize, pmap: Arc<dyn ProcessMap>) -> Self {
        let inner = Arc::new(StoreInner {
            world: world.clone(),
            pmap,
            ntiles,
            obj: AtomicU64::new(u64::MAX),
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        });
        let obj = world.register(Arc::new(StoreShim {
            inner: Arc::downgrade(&inner),
        }));
        inner.obj.store(obj, Ordering::SeqCst);
        Self { inner }
    }

    pub fn world(&self) -> &World {
        &self.inner.world
    }

    pub fn ntiles(&self) -> usize {
        self.inner.ntiles
    }

    pub fn pmap(&self) -> &Arc<dyn ProcessMap> {
        &self.inner.pmap
    }

    fn object_id(&self) -> ObjectId {
        self.inner.obj.load(Ordering::SeqCst)
    }

    /// `true` when both handles refer to one registered container.
    pub fn same_store(&self, other: &TileStore<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn owner(&self, key: usize) -> Rank {
        self.inner.pmap.owner(key)
    }

    pub fn is_local(&self, key: usize) -> bool {
        self.owner(key) == self.inner.world.rank()
    }

    /// Store a tile under `key`. The owner stores locally (waking pending
    /// finds); a non-owner forwards the tile to the owner without
    /// blocking.
    pub fn insert(&self, key: usize, tile: Tile<T>) {
        assert!(key < self.inner.ntiles, "tile key {key} out of range");
        if self.is_local(key) {
            self.inner.local_insert(key, tile);
        } else {
            self.inner.world.send(
                self.owner(key),
                self.object_id(),
                Payload::new(StoreMsg::Insert { key, tile }),
            );
        }
    }

    /// A future for the tile under `key`.
    ///
    /// Resolves immediately on the owner when the tile is present; a find
    /// that races an insert resolves when the insert reaches the owner.
    pub fn find(&self, key: usize) -> TaskFuture<Tile<T>> {
        assert!(key < self.inner.ntiles, "tile key {key} out of range");
        if self.is_local(key) {
            return self.inner.local_find(key);
        }
        let fut = TaskFuture::new();
        let result = fut.clone();
        let id = self.inner.world.pend_future(move |payload| {
            match payload.downcast::<Tile<T>>() {
                Ok(tile) => result.set(tile),
                Err(other) => match other.downcast::<RuntimeError>() {
                    Ok(err) => result.fail(err),
                    Err(_) => panic!("malformed tile response"),
                },
            }
        });
        self.inner.world.send(
            self.owner(key),
            self.object_id(),
            Payload::new::<StoreMsg<T>>(StoreMsg::Find {
                key,
                from: self.inner.world.rank(),
                fut: id,
            }),
        );
        fut
    }

    /// Whether `key` is set on its owner at probe time.
    pub fn probe(&self, key: usize) -> TaskFuture<bool> {
        assert!(key < self.inner.ntiles, "tile key {key} out of range");
        if self.is_local(key) {
            return TaskFuture::ready(self.inner.local_probe(key));
        }
        let fut = TaskFuture::new();
        let result = fut.clone();
        let id = self.inner.world.pend_future(move |payload| {
            result.set(payload.downcast::<bool>().ok().expect("probe response"));
        });
        self.inner.world.send(
            self.owner(key),
            self.object_id(),
            Payload::new::<StoreMsg<T>>(StoreMsg::Probe {
                key,
                from: self.inner.world.rank(),
                fut: id,
            }),
        );
        fut
    }

    /// Release the buffer under `key`; pending finds are kept.
    pub fn erase(&self, key: usize) {
        if self.is_local(key) {
            self.inner.local_erase(key);
        } else {
            self.inner.world.send(
                self.owner(key),
                self.object_id(),
                Payload::new(StoreMsg::<T>::Erase { key }),
            );
        }
    }

    /// Drop every locally stored tile. Local operation; run it on every
    /// rank to clear the whole container.
    pub fn clear(&self) {
        for shard in &self.inner.shards {
            shard
                .lock()
                .retain(|_, slot| matches!(slot, Slot::Waiting(_)));
        }
    }

    /// Keys of locally stored tiles, ascending.
    pub fn local_ordinals(&self) -> Vec<usize> {
        let mut keys: Vec<usize> = self
            .inner
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .lock()
                    .iter()
                    .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
                    .map(|(&k, _)| k)
                    .collect::<Vec<_>>()
            })
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Visit locally stored tiles in ascending key order.
    pub fn for_each_local<F: FnMut(usize, &Tile<T>)>(&self, mut f: F) {
        for key in self.local_ordinals() {
            let shard = self.inner.shard(key).lock();
            if let Some(Slot::Ready(tile)) = shard.get(&key) {
                f(key, tile);
            }
        }
    }

    /// Number of locally stored tiles.
    pub fn local_len(&self) -> usize {
        self.inner
            .shards
            .iter()
            .map(|shard| {
                shard
                    .lock()
                    .values()
                    .filter(|slot| matches!(slot, Slot::Ready(_)))
                    .count()
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiled_range::BlockRange;
    use tiled_runtime::WorldGroup;

    use crate::pmap::CyclicMap;

    fn tile_of(value: f64) -> Tile<f64> {
        Tile::new(BlockRange::from_extents(&[2, 2]), value)
    }

    fn store(world: &World, ntiles: usize) -> TileStore<f64> {
        TileStore::new(world, ntiles, Arc::new(CyclicMap::new(world.size())))
    }

    #[test]
    fn local_insert_find_probe() {
        WorldGroup::run_single(|world| {
            let store = store(&world, 4);
            assert!(!store.probe(1).wait().unwrap());
            store.insert(1, tile_of(3.0));
            assert!(store.probe(1).wait().unwrap());
            let tile = store.find(1).wait().unwrap();
            assert_eq!(tile.get(&[0, 0]), 3.0);
            assert_eq!(store.local_ordinals(), vec![1]);
        });
    }

    #[test]
    fn find_before_insert_resolves_later() {
        WorldGroup::run_single(|world| {
            let store = store(&world, 2);
            let fut = store.find(0);
            assert!(!fut.probe());
            store.insert(0, tile_of(7.0));
            assert_eq!(fut.wait().unwrap().get(&[1, 1]), 7.0);
        });
    }

    #[test]
    fn remote_find_roundtrip() {
        WorldGroup::run(2, |world| {
            let store = store(&world, 4);
            // Cyclic map: rank 0 owns {0, 2}, rank 1 owns {1, 3}.
            for key in 0..4 {
                if store.is_local(key) {
                    store.insert(key, tile_of(key as f64));
                }
            }
            world.fence();
            // Fetch a remote tile.
            let remote_key = if world.rank() == 0 { 1 } else { 0 };
            let tile = store.find(remote_key).wait().unwrap();
            assert_eq!(tile.get(&[0, 0]), remote_key as f64);
            world.fence();
        });
    }

    #[test]
    fn remote_insert_routes_to_owner() {
        WorldGroup::run(2, |world| {
            let store = store(&world, 2);
            if world.rank() == 1 {
                // Key 0 is owned by rank 0; this send is non-blocking.
                store.insert(0, tile_of(5.0));
            }
            world.fence();
            if world.rank() == 0 {
                assert!(store.is_local(0));
                assert_eq!(store.find(0).wait().unwrap().get(&[0, 0]), 5.0);
                assert_eq!(store.local_len(), 1);
            } else {
                assert_eq!(store.local_len(), 0);
            }
            world.fence();
        });
    }

    #[test]
    fn remote_probe() {
        WorldGroup::run(2, |world| {
            let store = store(&world, 2);
            if world.rank() == 1 {
                store.insert(1, tile_of(1.0));
            }
            world.fence();
            assert!(store.probe(1).wait().unwrap());
            assert!(!store.probe(0).wait().unwrap());
            world.fence();
        });
    }

    #[test]
    fn erase_and_clear() {
        WorldGroup::run_single(|world| {
            let store = store(&world, 4);
            store.insert(0, tile_of(1.0));
            store.insert(2, tile_of(2.0));
            store.erase(0);
            assert_eq!(store.local_ordinals(), vec![2]);
            store.clear();
            assert_eq!(store.local_len(), 0);
        });
    }

    #[test]
    fn find_races_remote_insert() {
        WorldGroup::run(2, |world| {
            let store = store(&world, 2);
            // Rank 1 requests rank 0's tile before anyone inserted it.
            if world.rank() == 1 {
                let fut = store.find(0);
                store.insert(0, tile_of(9.0));
                assert_eq!(fut.wait().unwrap().get(&[0, 0]), 9.0);
            }
            world.fence();
        });
    }
}
