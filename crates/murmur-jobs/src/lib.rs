//! # murmur-jobs
//!
//! The durable single-worker job pipeline. A worker with a stable
//! identity polls the store on a fixed tick, leases one entry at a time,
//! and advances it through normalization, transcription, the review
//! gates, generation, and the atomic note write. Crash recovery rests on
//! heartbeats: a stage interrupted mid-flight leaves a stale heartbeat,
//! gets reset to the queue, and re-runs (stages are idempotent).

pub mod children;
pub mod worker;

pub use children::ChildRegistry;
pub use worker::{JobWorker, WorkerConfig, WorkerHandle};
