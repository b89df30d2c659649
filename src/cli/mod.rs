//! CLI command implementations.
//!
//! Each submodule implements one group of commands. Handlers write their
//! output to the supplied writer and return `anyhow::Result` so the binary
//! can print a context chain.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `inc` | Increment the configured counter |
//! | `get` | Print the current value |
//! | `reset` | Reset counter and version (sqlite, postgres) |
//! | `stress` | In-process concurrent increments with a consistency check |
//! | `bench` | Concurrency-control benchmark (sqlite, postgres) |
//! | `config` | Show the effective configuration |
//! | `serve` | HTTP counter server |
//! | `load` | HTTP load client |
//!
//! # Example Usage
//!
//! ```bash
//! tally --config counter.toml bench --strategy all --workers 10 --transactions 1000
//! tally stress --workers 8 --increments 10000
//! tally serve --port 8000 &
//! tally load --clients 1 --clients 10 --requests 500
//! ```

mod bench;
mod config;
mod counter;
mod serve;

pub use bench::{StrategySelection, cmd_bench};
pub use config::cmd_config;
pub use counter::{cmd_get, cmd_inc, cmd_reset, cmd_stress};
pub use serve::{cmd_load, cmd_serve};

/// Output format for reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text (default).
    #[default]
    Text,
    /// One JSON document.
    Json,
}

impl OutputFormat {
    /// Parses output format from string; anything unknown is text.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}
