//! `ta-runtime` - Process-group runtime for tile-array.
//!
//! A group of cooperating processes, each running on its own thread with a
//! private task queue and mailbox. Processes share nothing but messages.
//!
//! This crate provides:
//! - `Cluster`, which starts a group and runs a program on every process
//! - `World`, a process's handle: tasks, messages, registered objects, fences
//! - `Future`, a single-assignment value with completion callbacks
//! - `CleanupRegistry` and `ReleaseGuard` for releasing objects at the next fence

pub mod cleanup;
pub mod cluster;
pub mod config;
pub mod error;
mod fabric;
pub mod future;
mod task;
pub mod world;

pub use cleanup::{CleanupRegistry, ReleaseGuard};
pub use cluster::Cluster;
pub use config::RuntimeConfig;
pub use error::{Result, RuntimeError};
pub use future::{Dependency, Future};
pub use world::{ObjectId, World};
