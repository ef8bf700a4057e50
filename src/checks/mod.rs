//! The check battery: registry of strategies, deterministic rules, the data
//! context handed to each check, AI prompt handling and the executor.

pub mod context;
pub mod executor;
pub mod prompt;
pub mod registry;
pub mod rules;

pub use context::{DataContext, DataContextResolver, DataSource};
pub use executor::CheckExecutor;
pub use registry::{CheckRegistry, PromptTemplate, Strategy};
