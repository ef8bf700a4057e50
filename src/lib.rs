//! siteaudit: audit a website through a fixed sequence of phases.
//!
//! An audit crawls a site (or takes a single page), collects structured data
//! per page, fans one job per (page, check) pair out to a durable queue, waits
//! on a polling barrier for the results and finally aggregates category
//! scores. Orchestrator and workers only share the SQLite database.

pub mod ai;
pub mod checks;
pub mod collect;
pub mod config;
pub mod errors;
pub mod logging;
pub mod pipeline;
pub mod queue;
pub mod store;
pub mod util;
