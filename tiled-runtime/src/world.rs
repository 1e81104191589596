//! The process-group facade.
//!
//! A [`World`] is an explicit context handle for one rank of a process
//! group: it spawns dependency-driven tasks on a shared worker pool,
//! routes messages to objects registered under stable SPMD-deterministic
//! ids, resolves remote-settable futures, and provides the collective
//! `all_reduce` and `fence` operations. [`WorldGroup::run`] executes an
//! SPMD closure on an in-process group of ranks connected by channels,
//! with one communication thread per rank.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{mpsc, Arc, Barrier};
use std::time::Duration;

use log::trace;
use parking_lot::{Condvar, Mutex};

use crate::future::{join_all, TaskFuture};
#[cfg(test)]
use crate::RuntimeError;
use crate::Result;

/// Process rank within a world.
pub type Rank = usize;

/// Stable identifier of a registered world object; identical across ranks
/// when registration order is identical (the SPMD contract).
pub type ObjectId = u64;

/// Identifier of a pending remote-settable future, local to the requester.
pub type FutureId = u64;

/// An opaque message body moved between ranks.
pub struct Payload(Box<dyn Any + Send>);

impl Payload {
    pub fn new<M: Any + Send>(message: M) -> Self {
        Self(Box::new(message))
    }

    /// Recover the concrete message type; mismatches are a protocol error.
    pub fn downcast<M: Any>(self) -> std::result::Result<M, Payload> {
        match self.0.downcast::<M>() {
            Ok(m) => Ok(*m),
            Err(b) => Err(Payload(b)),
        }
    }
}

/// A world object receiving messages dispatched by object id.
pub trait ActiveObject: Send + Sync {
    fn on_message(&self, world: &World, payload: Payload);
}

enum Envelope {
    Object { obj: ObjectId, payload: Payload },
    SetFuture { id: FutureId, payload: Payload },
    Stop,
}

type PendingSetter = Box<dyn FnOnce(Payload) + Send>;

/// State shared by every rank of a group.
struct GroupShared {
    size: usize,
    /// Messages sent *to* each rank.
    sent: Vec<AtomicU64>,
    /// Messages processed *by* each rank.
    processed: Vec<AtomicU64>,
    /// Outstanding tasks per rank.
    tasks: Vec<AtomicU64>,
    barrier: Barrier,
    fence_done: AtomicBool,
    idle: Mutex<()>,
    idle_cv: Condvar,
    reduce_slots: Mutex<Vec<Option<Box<dyn Any + Send>>>>,
    pool: rayon::ThreadPool,
}

impl GroupShared {
    fn new(size: usize) -> Self {
        Self {
            size,
            sent: (0..size).map(|_| AtomicU64::new(0)).collect(),
            processed: (0..size).map(|_| AtomicU64::new(0)).collect(),
            tasks: (0..size).map(|_| AtomicU64::new(0)).collect(),
            barrier: Barrier::new(size),
            fence_done: AtomicBool::new(false),
            idle: Mutex::new(()),
            idle_cv: Condvar::new(),
            reduce_slots: Mutex::new((0..size).map(|_| None).collect()),
            pool: rayon::ThreadPoolBuilder::new()
                .build()
                .expect("failed to build the worker pool"),
        }
    }

    fn notify_idle(&self) {
        let _guard = self.idle.lock();
        self.idle_cv.notify_all();
    }
}

/// Per-rank state shared between a rank's world handles.
struct RankLocal {
    registry: Mutex<Vec<Arc<dyn ActiveObject>>>,
    /// Messages for objects that have not been registered yet; drained by
    /// the next matching [`World::register`] call.
    deferred: Mutex<Vec<(ObjectId, Payload)>>,
    pending: Mutex<HashMap<FutureId, PendingSetter>>,
    next_future: AtomicU64,
}

/// One rank's handle to a process group. Cheap to clone; clones share the
/// rank's registry and pending-future table.
///
/// The per-destination senders sit behind mutexes so a `World` can be held
/// inside shared (`Sync`) containers such as a distributed tile store.
pub struct World {
    rank: Rank,
    senders: Arc<Vec<Mutex<Sender<Envelope>>>>,
    shared: Arc<GroupShared>,
    local: Arc<RankLocal>,
}

impl Clone for World {
    fn clone(&self) -> Self {
        Self {
            rank: self.rank,
            senders: Arc::clone(&self.senders),
            shared: Arc::clone(&self.shared),
            local: Arc::clone(&self.local),
        }
    }
}

impl World {
    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    fn task_begin(&self) {
        self.shared.tasks[self.rank].fetch_add(1, Ordering::SeqCst);
    }

    fn task_end(&self) {
        self.shared.tasks[self.rank].fetch_sub(1, Ordering::SeqCst);
        self.shared.notify_idle();
    }

    /// Run `f` on a worker thread; the returned future resolves with its
    /// outcome.
    pub fn spawn<R, F>(&self, f: F) -> TaskFuture<R>
    where
        R: Clone + Send + 'static,
        F: FnOnce() -> Result<R> + Send + 'static,
    {
        let fut = TaskFuture::new();
        let out = fut.clone();
        let world = self.clone();
        self.task_begin();
        self.shared.pool.spawn(move || {
            match f() {
                Ok(v) => out.set(v),
                Err(e) => out.fail(e),
            }
            world.task_end();
        });
        fut
    }

    /// Run `f` on a worker thread once every input future has resolved.
    ///
    /// Task bodies never block on in-process futures: the dependency list
    /// is a continuation and the body starts only when all inputs are
    /// ready. A failed input fails the output without running `f`.
    pub fn spawn_when<D, R, F>(&self, deps: Vec<TaskFuture<D>>, f: F) -> TaskFuture<R>
    where
        D: Clone + Send + 'static,
        R: Clone + Send + 'static,
        F: FnOnce(Vec<D>) -> Result<R> + Send + 'static,
    {
        let fut = TaskFuture::new();
        let out = fut.clone();
        let world = self.clone();
        self.task_begin();
        join_all(deps).on_ready(move |inputs| match inputs {
            Err(e) => {
                out.fail(e.clone());
                world.task_end();
            }
            Ok(values) => {
                let values = values.clone();
                let inner_world = world.clone();
                world.shared.pool.spawn(move || {
                    match f(values) {
                        Ok(v) => out.set(v),
                        Err(e) => out.fail(e),
                    }
                    inner_world.task_end();
                });
            }
        });
        fut
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    /// Register a message handler under the next object id. Ranks must
    /// register their objects in the same order (SPMD) so ids agree.
    /// Messages that arrived before registration are delivered here.
    pub fn register(&self, handler: Arc<dyn ActiveObject>) -> ObjectId {
        let id = {
            let mut registry = self.local.registry.lock();
            registry.push(Arc::clone(&handler));
            (registry.len() - 1) as ObjectId
        };
        let held: Vec<Payload> = {
            let mut deferred = self.local.deferred.lock();
            let mut held = Vec::new();
            let mut i = 0;
            while i < deferred.len() {
                if deferred[i].0 == id {
                    held.push(deferred.swap_remove(i).1);
                } else {
                    i += 1;
                }
            }
            held
        };
        for payload in held {
            handler.on_message(self, payload);
            self.shared.processed[self.rank].fetch_add(1, Ordering::SeqCst);
            self.shared.notify_idle();
        }
        id
    }

    /// Send a message to the object `obj` on rank `dest` (non-blocking).
    pub fn send(&self, dest: Rank, obj: ObjectId, payload: Payload) {
        trace!("rank {} -> rank {} object {}", self.rank, dest, obj);
        self.shared.sent[dest].fetch_add(1, Ordering::SeqCst);
        self.senders[dest]
            .lock()
            .send(Envelope::Object { obj, payload })
            .expect("destination rank has stopped");
    }

    /// Install a setter for a remote-settable future and return its id.
    /// The setter runs on the communication thread when the owner answers.
    pub fn pend_future<F: FnOnce(Payload) + Send + 'static>(&self, setter: F) -> FutureId {
        let id = self.local.next_future.fetch_add(1, Ordering::SeqCst);
        self.local.pending.lock().insert(id, Box::new(setter));
        id
    }

    /// Answer a remote-settable future on `dest`.
    pub fn resolve_remote(&self, dest: Rank, id: FutureId, payload: Payload) {
        trace!("rank {} resolves future {} on rank {}", self.rank, id, dest);
        self.shared.sent[dest].fetch_add(1, Ordering::SeqCst);
        self.senders[dest]
            .lock()
            .send(Envelope::SetFuture { id, payload })
            .expect("destination rank has stopped");
    }

    // ------------------------------------------------------------------
    // Collectives
    // ------------------------------------------------------------------

    /// Collective reduction: every rank contributes a value, rank order
    /// gives the deterministic fold order, and all ranks receive the
    /// folded result.
    pub fn all_reduce<V, F>(&self, value: V, combine: F) -> V
    where
        V: Clone + Send + 'static,
        F: Fn(V, V) -> V,
    {
        self.shared.reduce_slots.lock()[self.rank] = Some(Box::new(value));
        self.shared.barrier.wait();
        if self.rank == 0 {
            let mut slots = self.shared.reduce_slots.lock();
            let folded = slots
                .iter_mut()
                .map(|slot| {
                    *slot
                        .take()
                        .expect("missing reduction contribution")
                        .downcast::<V>()
                        .expect("mismatched reduction type")
                })
                .reduce(&combine)
                .expect("reduction over an empty world");
            for slot in slots.iter_mut() {
                *slot = Some(Box::new(folded.clone()));
            }
        }
        self.shared.barrier.wait();
        let out = *self.shared.reduce_slots.lock()[self.rank]
            .take()
            .expect("missing reduction result")
            .downcast::<V>()
            .expect("mismatched reduction type");
        self.shared.barrier.wait();
        out
    }

    /// Collective barrier-with-drain.
    ///
    /// Returns only once every task spawned before the fence, on any rank,
    /// has completed and every message those tasks produced has been
    /// processed. Rank 0 takes the termination decision from the group's
    /// sent/processed/task counters between two barriers, so all ranks
    /// agree on it.
    pub fn fence(&self) {
        let mut round = 0u32;
        loop {
            self.quiesce_local();
            self.shared.barrier.wait();
            self.quiesce_local();
            self.shared.barrier.wait();
            if self.rank == 0 {
                let sent: u64 = self.shared.sent.iter().map(|c| c.load(Ordering::SeqCst)).sum();
                let processed: u64 = self
                    .shared
                    .processed
                    .iter()
                    .map(|c| c.load(Ordering::SeqCst))
                    .sum();
                let tasks: u64 = self.shared.tasks.iter().map(|c| c.load(Ordering::SeqCst)).sum();
                let done = sent == processed && tasks == 0;
                trace!("fence round {round}: sent={sent} processed={processed} tasks={tasks}");
                self.shared.fence_done.store(done, Ordering::SeqCst);
            }
            self.shared.barrier.wait();
            if self.shared.fence_done.load(Ordering::SeqCst) {
                return;
            }
            round += 1;
        }
    }

    /// Wait until this rank has no outstanding tasks and a drained inbox.
    fn quiesce_local(&self) {
        let mut guard = self.shared.idle.lock();
        loop {
            let busy_tasks = self.shared.tasks[self.rank].load(Ordering::SeqCst) != 0;
            let inbox = self.shared.sent[self.rank].load(Ordering::SeqCst)
                != self.shared.processed[self.rank].load(Ordering::SeqCst);
            if !busy_tasks && !inbox {
                return;
            }
            // Timed wait: a notification can race the counter check.
            self.shared
                .idle_cv
                .wait_for(&mut guard, Duration::from_millis(1));
        }
    }
}

fn comm_loop(world: World, inbox: Receiver<Envelope>) {
    for envelope in inbox {
        match envelope {
            Envelope::Stop => break,
            Envelope::Object { obj, payload } => {
                let handler = {
                    let registry = world.local.registry.lock();
                    registry.get(obj as usize).cloned()
                };
                match handler {
                    Some(handler) => {
                        handler.on_message(&world, payload);
                        world.shared.processed[world.rank].fetch_add(1, Ordering::SeqCst);
                        world.shared.notify_idle();
                    }
                    // Early message for an object this rank has not
                    // registered yet; held until registration.
                    None => world.local.deferred.lock().push((obj, payload)),
                }
            }
            Envelope::SetFuture { id, payload } => {
                let setter = world
                    .local
                    .pending
                    .lock()
                    .remove(&id)
                    .expect("response for an unknown future");
                setter(payload);
                world.shared.processed[world.rank].fetch_add(1, Ordering::SeqCst);
                world.shared.notify_idle();
            }
        }
    }
}

/// In-process SPMD harness: `run(n, f)` executes `f` once per rank on its
/// own thread, connected into one group.
pub struct WorldGroup;

impl WorldGroup {
    /// Run `f` on `size` ranks and return the per-rank results in rank
    /// order. An implicit fence and barrier precede shutdown, so all
    /// cross-rank traffic drains before the communication threads stop.
    pub fn run<F, R>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(World) -> R + Send + Sync,
        R: Send,
    {
        assert!(size > 0, "world size must be at least one");
        let shared = Arc::new(GroupShared::new(size));
        let mut senders = Vec::with_capacity(size);
        let mut receivers = Vec::with_capacity(size);
        for _ in 0..size {
            let (tx, rx) = mpsc::channel();
            senders.push(Mutex::new(tx));
            receivers.push(rx);
        }
        let senders = Arc::new(senders);

        let results: Mutex<Vec<Option<R>>> = Mutex::new((0..size).map(|_| None).collect());
        std::thread::scope(|scope| {
            for (rank, inbox) in receivers.into_iter().enumerate() {
                let world = World {
                    rank,
                    senders: Arc::clone(&senders),
                    shared: Arc::clone(&shared),
                    local: Arc::new(RankLocal {
                        registry: Mutex::new(Vec::new()),
                        deferred: Mutex::new(Vec::new()),
                        pending: Mutex::new(HashMap::new()),
                        next_future: AtomicU64::new(0),
                    }),
                };
                let comm_world = world.clone();
                scope.spawn(move || comm_loop(comm_world, inbox));

                let f = &f;
                let results = &results;
                scope.spawn(move || {
                    let outcome =
                        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(world.clone())));
                    match outcome {
                        Ok(out) => {
                            world.fence();
                            world.shared.barrier.wait();
                            // Nothing is in flight past the fence: stop our inbox.
                            world.senders[world.rank]
                                .lock()
                                .send(Envelope::Stop)
                                .expect("communication thread has stopped");
                            results.lock()[rank] = Some(out);
                        }
                        Err(panic) => {
                            // Crash-fast: release our communication thread so
                            // the scope can unwind, then re-raise.
                            let _ = world.senders[world.rank].lock().send(Envelope::Stop);
                            std::panic::resume_unwind(panic);
                        }
                    }
                });
            }
        });

        results
            .into_inner()
            .into_iter()
            .map(|slot| slot.expect("rank produced no result"))
            .collect()
    }

    /// Run `f` in a one-rank world.
    pub fn run_single<F, R>(f: F) -> R
    where
        F: Fn(World) -> R + Send + Sync,
        R: Send,
    {
        Self::run(1, f)
            .into_iter()
            .next()
            .expect("single-rank run produced no result")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_and_size() {
        let ranks = WorldGroup::run(3, |world| {
            assert_eq!(world.size(), 3);
            world.rank()
        });
        assert_eq!(ranks, vec![0, 1, 2]);
    }

    #[test]
    fn spawn_runs_on_pool() {
        WorldGroup::run_single(|world| {
            let fut = world.spawn(|| Ok(6 * 7));
            assert_eq!(fut.wait().unwrap(), 42);
        });
    }

    #[test]
    fn spawn_when_waits_for_inputs() {
        WorldGroup::run_single(|world| {
            let a: TaskFuture<i32> = TaskFuture::new();
            let b: TaskFuture<i32> = TaskFuture::new();
            let sum = world.spawn_when(vec![a.clone(), b.clone()], |vals| {
                Ok(vals.iter().sum::<i32>())
            });
            assert!(!sum.probe());
            a.set(40);
            b.set(2);
            assert_eq!(sum.wait().unwrap(), 42);
        });
    }

    #[test]
    fn spawn_when_propagates_input_errors() {
        WorldGroup::run_single(|world| {
            let a: TaskFuture<i32> = TaskFuture::new();
            let out = world.spawn_when(vec![a.clone()], |_| Ok(0));
            a.fail(RuntimeError::Task("input".into()));
            assert!(out.wait().is_err());
            world.fence();
        });
    }

    #[test]
    fn fence_drains_tasks() {
        WorldGroup::run(2, |world| {
            let futs: Vec<TaskFuture<usize>> = (0..16)
                .map(|i| world.spawn(move || Ok(i)))
                .collect();
            world.fence();
            for (i, fut) in futs.iter().enumerate() {
                assert!(fut.probe());
                assert_eq!(fut.wait().unwrap(), i);
            }
        });
    }

    #[test]
    fn all_reduce_folds_in_rank_order() {
        let sums = WorldGroup::run(4, |world| {
            world.all_reduce(vec![world.rank() as f64, 1.0], |a, b| {
                vec![a[0] + b[0], a[1] + b[1]]
            })
        });
        for sum in sums {
            assert_eq!(sum, vec![6.0, 4.0]);
        }
    }

    /// Echo object: answers each request by resolving the sender's future
    /// with its rank.
    struct Echo;

    struct EchoRequest {
        from: Rank,
        fut: FutureId,
    }

    impl ActiveObject for Echo {
        fn on_message(&self, world: &World, payload: Payload) {
            let req: EchoRequest = payload.downcast().ok().expect("echo request");
            world.resolve_remote(req.from, req.fut, Payload::new(world.rank()));
        }
    }

    #[test]
    fn remote_future_roundtrip() {
        WorldGroup::run(2, |world| {
            let obj = world.register(Arc::new(Echo));
            let peer = 1 - world.rank();
            let fut: TaskFuture<Rank> = TaskFuture::new();
            let fut2 = fut.clone();
            let id = world.pend_future(move |payload| {
                fut2.set(payload.downcast().ok().expect("echo reply"));
            });
            world.send(
                peer,
                obj,
                Payload::new(EchoRequest {
                    from: world.rank(),
                    fut: id,
                }),
            );
            assert_eq!(fut.wait().unwrap(), peer);
            world.fence();
        });
    }

    #[test]
    fn messages_before_registration_are_held() {
        WorldGroup::run(2, |world| {
            if world.rank() == 0 {
                // Register late: rank 1's request may arrive first.
                std::thread::sleep(Duration::from_millis(20));
            }
            let obj = world.register(Arc::new(Echo));
            if world.rank() == 1 {
                let fut: TaskFuture<Rank> = TaskFuture::new();
                let fut2 = fut.clone();
                let id = world.pend_future(move |payload| {
                    fut2.set(payload.downcast().ok().expect("echo reply"));
                });
                world.send(
                    0,
                    obj,
                    Payload::new(EchoRequest {
                        from: world.rank(),
                        fut: id,
                    }),
                );
                assert_eq!(fut.wait().unwrap(), 0);
            }
            world.fence();
        });
    }
}
