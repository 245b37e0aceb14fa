//! Work categories and key classification
//!
//! Every fetch log key is routed to a loader by substring. The predicates are
//! independent: a key containing both `measures` and `versions` belongs to
//! both categories and is drained by both loaders.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Class of ingested object, each with its own loader and batch limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Station/sensor metadata files
    Metadata,
    /// Realtime measurement fetches
    Realtime,
    /// Versioned records
    Versions,
    /// Bulk measurement files from the ETL pipeline
    Pipeline,
}

impl Category {
    /// Order in which a cron drain visits the categories.
    pub const DRAIN_ORDER: [Category; 4] = [
        Category::Metadata,
        Category::Realtime,
        Category::Versions,
        Category::Pipeline,
    ];

    /// Key fragment that selects this category.
    pub fn pattern(self) -> &'static str {
        match self {
            Category::Metadata => "stations",
            Category::Realtime => "realtime",
            Category::Versions => "versions",
            Category::Pipeline => "measures",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Metadata => "metadata",
            Category::Realtime => "realtime",
            Category::Versions => "versions",
            Category::Pipeline => "pipeline",
        }
    }

    /// Case-insensitive substring match, mirroring `key ~* pattern` in SQL.
    pub fn matches(self, key: &str) -> bool {
        crate::fetchlog::pattern_matches(self.pattern(), key)
    }
}

/// All categories a key belongs to, in drain order.
pub fn classify(key: &str) -> Vec<Category> {
    Category::DRAIN_ORDER
        .into_iter()
        .filter(|category| category.matches(key))
        .collect()
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "metadata" | "stations" => Ok(Category::Metadata),
            "realtime" => Ok(Category::Realtime),
            "versions" => Ok(Category::Versions),
            "pipeline" | "measures" => Ok(Category::Pipeline),
            other => Err(format!("unknown category: {other}")),
        }
    }
}
