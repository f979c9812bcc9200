//! Offline cache and background-sync controller.
//!
//! Routes each intercepted request to a cache-first or network-first strategy
//! by class (page, static asset, API call), keeps versioned response
//! partitions, and tells connected clients to resume queued writes when
//! background sync fires.

pub mod cache;
pub mod classify;
pub mod config;
pub mod controller;
pub mod http;
pub mod network;
pub mod sync;

#[cfg(test)]
mod testing;

pub use controller::{Controller, FetchOutcome, WorkerState};
