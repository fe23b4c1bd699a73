//! Generation-service client with multi-provider support (Anthropic, OpenAI).
//!
//! Provides the `ProviderAdapter` trait, `DynProvider` wrapper, middleware chain,
//! model catalog, transport retry, and `LlmClient` for routing requests by provider.

#[cfg(feature = "providers")]
mod anthropic;
mod client;
#[cfg(feature = "providers")]
mod openai;
mod provider;
pub mod retry;
mod types;

#[cfg(feature = "providers")]
pub use anthropic::AnthropicAdapter;
pub use client::*;
#[cfg(feature = "providers")]
pub use openai::OpenAiAdapter;
pub use provider::*;
pub use retry::BackoffPolicy;
pub use types::*;
