//! SQLite persistence: audits, pages, artifacts, the check catalog, results
//! and the durable job table the worker pool drains.

mod db;
mod models;

pub use db::{AuditDb, DbHandle};
pub use models::*;
