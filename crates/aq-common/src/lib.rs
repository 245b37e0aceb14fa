//! OpenAQ ingest common library
//!
//! Shared error handling, environment parsing and logging for the ingest
//! workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`AqError`] and the [`Result`] alias
//! - **Environment**: typed environment variable lookups with defaults
//! - **Logging**: one-time `tracing` subscriber setup for binaries
//!
//! # Example
//!
//! ```no_run
//! use aq_common::env::parse_or;
//! use aq_common::Result;
//!
//! fn timeout_secs() -> Result<u64> {
//!     parse_or("INGEST_TIMEOUT", 900)
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod env;
pub mod error;
pub mod logging;

pub use error::{AqError, Result};
