//! LLM Provider implementations for Convoke.
//!
//! All providers implement the `convoke_core::Provider` trait.
//! `RetryingProvider` wraps any of them with timeouts and bounded retries.

pub mod openai_compat;
pub mod retry;

pub use openai_compat::OpenAiCompatProvider;
pub use retry::{RetryPolicy, RetryingProvider};
