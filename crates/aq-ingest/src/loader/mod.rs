//! Per-category loaders
//!
//! A loader claims up to `limit` pending rows of its category, applies them
//! and completes them itself. The scheduler only sees the returned count.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::category::Category;
use crate::error::Result;

pub mod claiming;
pub mod sink;

pub use claiming::ClaimingLoader;
pub use sink::{RecordSink, StagingSink};

#[async_trait]
pub trait Loader: Send + Sync {
    /// Process one batch and return how many rows it took off the queue.
    ///
    /// Must be idempotent: a row may be handed out again after a crash.
    async fn load(&self, limit: u32, ascending: bool) -> Result<u64>;
}

/// One loader per category
#[derive(Clone, Default)]
pub struct LoaderSet {
    loaders: HashMap<Category, Arc<dyn Loader>>,
}

impl LoaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, category: Category, loader: Arc<dyn Loader>) -> Self {
        self.loaders.insert(category, loader);
        self
    }

    pub fn get(&self, category: Category) -> Option<&Arc<dyn Loader>> {
        self.loaders.get(&category)
    }
}
