//! Shared domain types for the siteaudit pipeline.
//!
//! The root crate owns persistence and orchestration; this crate only holds
//! the vocabulary both sides agree on: audits, pages, collected artifacts,
//! check definitions and results, plus the async traits for the external
//! collaborators (crawler, prioritizer, collector, AI provider, aggregator).

pub mod artifact;
pub mod collaborators;
pub mod models;

pub use artifact::*;
pub use collaborators::*;
pub use models::*;
