//! OpenAQ fetch log ingestion
//!
//! Tracks object-storage keys in the `fetchlogs` table and drains them into
//! the database category by category.
//!
//! # Overview
//!
//! - **Fetch log** ([`fetchlog`]): durable queue, one row per key, pending
//!   while `completed_datetime` is null
//! - **Categories** ([`category`]): key substring routing to a loader
//! - **Ingress** ([`ingress`]): object-created notifications become pending rows
//! - **Drain scheduler** ([`scheduler`]): time-boxed, per-category draining
//!   with a stall guard
//! - **Loaders** ([`loader`]): claim, fetch, decompress and apply one batch
//! - **Dispatch** ([`handler`]): routes a raw trigger payload
//!
//! Neither entry point returns an error to its caller. Failures are logged
//! at the component boundary and reported in the returned outcome.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use aq_ingest::{
//!     config::DrainConfig, fetchlog::MemoryFetchLogStore, loader::LoaderSet,
//!     scheduler::DrainScheduler,
//! };
//!
//! # async fn run() {
//! let scheduler = DrainScheduler::new(Arc::new(MemoryFetchLogStore::new()), LoaderSet::new());
//! let report = scheduler.run(&DrainConfig::default()).await;
//! println!("processed {}", report.total_processed());
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod category;
pub mod cli;
pub mod config;
pub mod crawl;
pub mod error;
pub mod event;
pub mod fetchlog;
pub mod handler;
pub mod ingress;
pub mod loader;
pub mod runner;
pub mod scheduler;
pub mod storage;

pub use category::{classify, Category};
pub use error::{IngestError, Result};
pub use handler::{HandlerOutcome, IngestHandler};
