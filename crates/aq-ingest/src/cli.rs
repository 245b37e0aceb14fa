//! Command-line interface of the `aq-ingest` binary

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::category::Category;
use crate::config::DrainConfig;

/// OpenAQ fetch log ingestion
#[derive(Parser, Debug)]
#[command(name = "aq-ingest")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Dispatch one trigger payload (object notification or scheduler tick)
    Handle {
        /// JSON file holding the event; stdin when omitted
        #[arg(short, long)]
        event: Option<PathBuf>,
    },

    /// Run one drain of every category
    Drain(DrainArgs),

    /// Drain on a fixed interval until interrupted
    Run,

    /// Register existing `.gz` objects under a bucket prefix
    Crawl {
        #[arg(long)]
        bucket: String,

        #[arg(long)]
        prefix: String,

        /// Only objects modified after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },

    /// Mark fetch logs completed, or reset them to pending
    Mark {
        #[command(flatten)]
        target: MarkTarget,

        /// Reset to pending instead of completing
        #[arg(long)]
        reset: bool,

        #[arg(short, long)]
        message: Option<String>,
    },

    /// List fetch logs whose last message is an error
    Errors {
        #[arg(short, long, default_value_t = 10)]
        limit: i64,
    },

    /// List fetch logs whose key matches a pattern
    Logs {
        /// Case-insensitive regular expression
        #[arg(short, long)]
        pattern: String,

        #[arg(short, long, default_value_t = 10)]
        limit: i64,
    },

    /// Pending count per category
    Status,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct MarkTarget {
    /// Exact keys (repeatable)
    #[arg(short, long)]
    pub key: Vec<String>,

    /// Case-insensitive regular expression over keys
    #[arg(short, long)]
    pub pattern: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct DrainArgs {
    /// Oldest files first
    #[arg(long)]
    pub ascending: bool,

    #[arg(long)]
    pub metadata_limit: Option<u32>,

    #[arg(long)]
    pub realtime_limit: Option<u32>,

    #[arg(long)]
    pub versions_limit: Option<u32>,

    #[arg(long)]
    pub pipeline_limit: Option<u32>,
}

impl DrainArgs {
    pub fn apply(&self, drain: &mut DrainConfig) {
        if self.ascending {
            drain.ascending = true;
        }
        let overrides = [
            (Category::Metadata, self.metadata_limit),
            (Category::Realtime, self.realtime_limit),
            (Category::Versions, self.versions_limit),
            (Category::Pipeline, self.pipeline_limit),
        ];
        for (category, limit) in overrides {
            if let Some(limit) = limit {
                drain.limits.set(category, limit);
            }
        }
    }
}
