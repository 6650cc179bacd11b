// OpenAI Driver Implementation
//
// This crate provides an OpenAI-compatible LLM driver implementation.
// It implements the LlmDriver trait from slackline-core, enabling the
// orchestrator to call OpenAI or Azure OpenAI chat completions.

mod driver;
mod types;


pub use driver::{create_driver, OpenAIChatDriver};
pub use types::{ChatMessage, ChatRequest, ChatResponse};

// Re-export core types for convenience
pub use slackline_core::llm::LlmDriver;
