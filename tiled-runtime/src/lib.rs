//! Task, future and process-group primitives.
//!
//! This crate is the thin facade between the tensor engine and whatever
//! runs it: a [`World`] exposes rank and size, dependency-driven task
//! spawning on a worker pool, message dispatch to registered objects,
//! remote-settable futures, a collective reduction and a
//! barrier-with-drain [`World::fence`]. The in-process
//! [`WorldGroup`] transport connects ranks with channels and one
//! communication thread per rank; payloads are moved, wire serialization
//! being a transport concern behind this facade.

pub mod future;
pub mod world;

pub use future::{join_all, TaskFuture};
pub use world::{ActiveObject, ObjectId, Payload, Rank, World, WorldGroup};

/// Errors surfaced through futures and tasks.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    #[error("task failed: {0}")]
    Task(String),

    #[error("world stopped before the operation completed")]
    WorldStopped,
}

/// Convenience alias for `Result<T, RuntimeError>`.
pub type Result<T> = std::result::Result<T, RuntimeError>;
