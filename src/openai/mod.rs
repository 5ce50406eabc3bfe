//! Minimal client for the hosted assistants service: typed wire shapes, a
//! retrying HTTP client behind the [`AssistantsApi`] trait, and SSE stream
//! handling for streamed runs.

pub mod client;
pub mod stream;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{ApiError, ApiKey, AssistantsApi, OpenAiClient};
pub use stream::RunEvent;
