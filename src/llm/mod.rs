// src/llm/mod.rs
// LLM chat client module

mod chat;
mod http_client;
mod types;

pub use chat::{ChatModel, OpenAiChatClient};
pub use http_client::LlmHttpClient;
pub use types::{ChatMessage, ChatResult, Usage};
