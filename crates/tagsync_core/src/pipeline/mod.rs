//! Priority batching of gameplay events.
//!
//! Items are admitted through a [`Filter`], ordered by priority, compressed
//! when that saves space, handed one by one to a [`Processor`] and finally
//! shipped as a [`Batch`] by an [`Uploader`]. A [`PipelineWorker`] drives the
//! flush policy from a background thread.

mod batcher;
mod filter;
mod item;
mod worker;

pub use batcher::{
    Admission, Pipeline, PipelineConfig, PipelineStats, Processor, RejectReason, TickOutcome,
    Uploader,
};
pub use filter::{Filter, ItemPredicate};
pub use item::{Batch, Item, ItemKind};
pub use worker::{PipelineWorker, PIPELINE_WORKER_NAME};
