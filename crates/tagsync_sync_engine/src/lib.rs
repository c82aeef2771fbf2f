//! # TagSync Sync Engine
//!
//! Moves local changes to the sync server and server changes back.
//!
//! This crate provides:
//! - `SyncOrchestrator`, the session state machine
//!   (`Idle → Uploading → Conflict → Downloading → Idle`, or `Error`)
//! - Chunked, compressed, hash-verified transfers over an `HttpClient`
//! - Conflict detection with automatic merge or user resolution
//! - `LocalStore` and `HttpClient` seams, with in-memory implementations
//!   for tests and host simulators
//!
//! ## Threading
//!
//! A session runs on a named worker thread that takes one step per
//! `tick_interval`. With `manual_ticks` no thread is spawned and the host
//! drives the session through `SyncOrchestrator::tick`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod callbacks;
mod config;
mod error;
mod http;
mod orchestrator;
mod remote;
mod state;
mod store;
mod transport;

pub use callbacks::{ConflictMerger, ProgressListener, RejectMerge};
pub use config::{SyncConfig, DEFAULT_MAX_ITEM_SIZE};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpResponse};
pub use orchestrator::{SyncOrchestrator, SYNC_WORKER_NAME};
pub use remote::MemoryRemote;
pub use state::{SyncBookkeeping, SyncSession, SyncState, SyncStats};
pub use store::{LocalStore, MemoryLocalStore};
pub use transport::{ChunkTransport, Downloaded, UploadOutcome};

pub use tagsync_sync_protocol::{Conflict, ResolveStrategy, SyncItem};
