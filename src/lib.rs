//! Spawngate routes - routing and activity state for a scale-to-zero proxy
//!
//! This library holds the state a dynamic reverse proxy needs to route
//! traffic and to decide when backends can be shut down:
//! - Maps each host to the set of backend targets serving it
//! - Tracks last activity and in-flight requests per host and per target
//! - Stores an idle flag per host so the proxy knows when to wake a backend
//! - Finds stale hosts whose host and targets have all gone quiet
//!
//! The router calls [`Storage::request_begin`] and [`Storage::request_end`]
//! around every request; a reaper periodically calls [`Storage::stale`].

pub mod activity;
pub mod config;
pub mod error;
pub mod idle;
pub mod routes;
pub mod storage;

pub use error::{StorageError, StorageResult};
pub use storage::{open_storage, track, MemoryStorage, RequestGuard, SharedStorage, Storage};
