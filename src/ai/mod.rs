//! AI provider clients.

mod openai;

pub use openai::OpenAiInvoker;
