//! # TagSync Core
//!
//! Local buffering for TagSync devices.
//!
//! This crate provides:
//! - A bounded write-behind metric cache with drain, compaction and a
//!   revision-guarded dirty flag
//! - A priority batch pipeline with admission filters, payload compression
//!   and retry-limited uploads
//! - Named polling workers and an injectable millisecond clock
//!
//! ## Concurrency
//!
//! Each component keeps its state behind a single `parking_lot` mutex. Public
//! operations are atomic with respect to each other. Callbacks (drain sinks,
//! processors, uploaders) run while that lock is held and must not re-enter
//! the component that called them.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod clock;
mod error;
mod lock;
mod pipeline;
mod worker;

pub use cache::{CacheCheckpoint, CacheConfig, DrainSink, MetricCache, MetricEntry};
pub use clock::{millis, Clock, ManualClock, SystemClock};
pub use error::{CoreError, CoreResult};
pub use lock::acquire;
pub use pipeline::{
    Admission, Batch, Filter, Item, ItemKind, ItemPredicate, Pipeline, PipelineConfig,
    PipelineStats, PipelineWorker, Processor, RejectReason, TickOutcome, Uploader,
    PIPELINE_WORKER_NAME,
};
pub use worker::{BackgroundWorker, WorkerControl};
