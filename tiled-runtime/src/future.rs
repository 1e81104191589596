//! Single-assignment futures with forward chaining.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::{Result, RuntimeError};

type Callback<T> = Box<dyn FnOnce(&Result<T>) + Send>;

enum State<T> {
    Pending(Vec<Callback<T>>),
    Done(Result<T>),
}

struct Cell<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

/// A single-assignment cell observable by blocking wait or forward-chained
/// callbacks.
///
/// A future resolves exactly once, to either a value or a
/// [`RuntimeError`]; errors propagate to every consumer. Clones share the
/// cell, so a future can be handed to the producer and any number of
/// consumers. Remote producers resolve a future through the owning world's
/// pending-future table.
pub struct TaskFuture<T> {
    cell: Arc<Cell<T>>,
}

impl<T> Clone for TaskFuture<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: Clone + Send + 'static> Default for TaskFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> TaskFuture<T> {
    /// A pending future.
    pub fn new() -> Self {
        Self {
            cell: Arc::new(Cell {
                state: Mutex::new(State::Pending(Vec::new())),
                ready: Condvar::new(),
            }),
        }
    }

    /// An already-resolved future.
    pub fn ready(value: T) -> Self {
        let fut = Self::new();
        fut.set(value);
        fut
    }

    /// An already-failed future.
    pub fn failed(err: RuntimeError) -> Self {
        let fut = Self::new();
        fut.fail(err);
        fut
    }

    /// Resolve with a value. Panics on double assignment.
    pub fn set(&self, value: T) {
        self.resolve(Ok(value));
    }

    /// Resolve with an error, propagating it to all consumers.
    pub fn fail(&self, err: RuntimeError) {
        self.resolve(Err(err));
    }

    fn resolve(&self, result: Result<T>) {
        let callbacks = {
            let mut state = self.cell.state.lock();
            let callbacks = match &mut *state {
                State::Pending(cbs) => std::mem::take(cbs),
                State::Done(_) => panic!("future resolved twice"),
            };
            *state = State::Done(result.clone());
            self.cell.ready.notify_all();
            callbacks
        };
        for cb in callbacks {
            cb(&result);
        }
    }

    /// `true` once the future has resolved (with value or error).
    pub fn probe(&self) -> bool {
        matches!(&*self.cell.state.lock(), State::Done(_))
    }

    /// Block until resolved and return a clone of the outcome.
    pub fn wait(&self) -> Result<T> {
        let mut state = self.cell.state.lock();
        loop {
            if let State::Done(result) = &*state {
                return result.clone();
            }
            self.cell.ready.wait(&mut state);
        }
    }

    /// Run `f` when the future resolves; immediately if it already has.
    /// The callback runs on the resolving thread.
    pub fn on_ready<F: FnOnce(&Result<T>) + Send + 'static>(&self, f: F) {
        let mut state = self.cell.state.lock();
        match &mut *state {
            State::Pending(cbs) => {
                cbs.push(Box::new(f));
            }
            State::Done(result) => {
                let result = result.clone();
                drop(state);
                f(&result);
            }
        }
    }
}

/// Combine a list of futures into one that resolves with all values (in
/// input order) once every input has resolved, or with the first error
/// found.
pub fn join_all<T: Clone + Send + 'static>(futures: Vec<TaskFuture<T>>) -> TaskFuture<Vec<T>> {
    let out = TaskFuture::new();
    let n = futures.len();
    if n == 0 {
        out.set(Vec::new());
        return out;
    }

    let slots: Arc<Mutex<Vec<Option<Result<T>>>>> =
        Arc::new(Mutex::new((0..n).map(|_| None).collect()));
    let remaining = Arc::new(AtomicUsize::new(n));

    for (i, fut) in futures.iter().enumerate() {
        let out = out.clone();
        let slots = Arc::clone(&slots);
        let remaining = Arc::clone(&remaining);
        fut.on_ready(move |result| {
            slots.lock()[i] = Some(result.clone());
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                let mut filled = slots.lock();
                let mut values = Vec::with_capacity(filled.len());
                for slot in filled.iter_mut() {
                    match slot.take().expect("input future unresolved") {
                        Ok(v) => values.push(v),
                        Err(e) => {
                            out.fail(e);
                            return;
                        }
                    }
                }
                out.set(values);
            }
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn set_then_wait() {
        let f = TaskFuture::new();
        f.set(42);
        assert!(f.probe());
        assert_eq!(f.wait().unwrap(), 42);
        // Waiting twice is fine; the value is cloned out.
        assert_eq!(f.wait().unwrap(), 42);
    }

    #[test]
    fn wait_across_threads() {
        let f: TaskFuture<String> = TaskFuture::new();
        let producer = f.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            producer.set("done".to_string());
        });
        assert_eq!(f.wait().unwrap(), "done");
        handle.join().unwrap();
    }

    #[test]
    fn callbacks_fire_once_each() {
        let f = TaskFuture::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        f.on_ready(move |r| {
            assert_eq!(*r.as_ref().unwrap(), 7);
            h.fetch_add(1, Ordering::SeqCst);
        });
        f.set(7);
        // Registered after resolution: runs immediately.
        let h = Arc::clone(&hits);
        f.on_ready(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn errors_propagate() {
        let f: TaskFuture<i32> = TaskFuture::failed(RuntimeError::Task("boom".into()));
        assert!(f.probe());
        assert!(matches!(f.wait(), Err(RuntimeError::Task(_))));

        let seen = Arc::new(AtomicBool::new(false));
        let s = Arc::clone(&seen);
        f.on_ready(move |r| {
            assert!(r.is_err());
            s.store(true, Ordering::SeqCst);
        });
        assert!(seen.load(Ordering::SeqCst));
    }

    #[test]
    #[should_panic(expected = "future resolved twice")]
    fn double_set_panics() {
        let f = TaskFuture::new();
        f.set(1);
        f.set(2);
    }

    #[test]
    fn join_all_collects_in_order() {
        let futs: Vec<TaskFuture<usize>> = (0..4).map(|_| TaskFuture::new()).collect();
        let joined = join_all(futs.clone());
        assert!(!joined.probe());
        // Resolve out of order.
        futs[2].set(2);
        futs[0].set(0);
        futs[3].set(3);
        assert!(!joined.probe());
        futs[1].set(1);
        assert_eq!(joined.wait().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn join_all_empty_is_ready() {
        let joined = join_all(Vec::<TaskFuture<i32>>::new());
        assert_eq!(joined.wait().unwrap(), Vec::<i32>::new());
    }

    #[test]
    fn join_all_propagates_first_error() {
        let futs: Vec<TaskFuture<i32>> = (0..2).map(|_| TaskFuture::new()).collect();
        let joined = join_all(futs.clone());
        futs[1].fail(RuntimeError::Task("bad input".into()));
        futs[0].set(5);
        assert!(joined.wait().is_err());
    }
}
