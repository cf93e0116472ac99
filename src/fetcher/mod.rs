//! Fetching download counts from the API
//!
//! This module handles:
//! - Pacing requests per worker and sharing the server's cooldown (`gate`)
//! - Talking to the download-count endpoint (`client`)
//! - Mapping reply statuses to worker actions (`classify`)
//! - Draining the work queue with a pool of tasks (`worker`)

mod classify;
mod client;
mod gate;
mod worker;

pub use classify::{classify_bulk, classify_single, Verdict};
pub use client::{
    build_http_client, parse_bulk_counts, parse_single_count, ApiReply, DownloadsClient,
};
pub use gate::{parse_retry_after, Backoff, CooldownDeadline, RateGate, RateLimited, WorkerPacer};
pub use worker::{FetchOutcome, FetchPool, FetchReport, FetchSettings};
