//! Language-model transport.
//!
//! The core reduces every model to one contract, `LLMClient::complete`
//! (`Complete(prompt, max_tokens) -> text`, with token usage and cost
//! attached). Everything else here is the adapter that makes that contract
//! real against Anthropic, plus the ambient pricing table and prompt-cache
//! key scheme the adapter and the cost ledger both draw on.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rlm_core::llm::{AnthropicClient, ClientConfig, CompletionRequest, ChatMessage};
//!
//! let client = AnthropicClient::new(
//!     ClientConfig::new("your-api-key")
//!         .with_default_model("claude-3-5-sonnet-20241022"),
//! );
//!
//! let request = CompletionRequest::new().with_message(ChatMessage::user("Hello"));
//! let response = client.complete(request).await?;
//! ```

mod cache;
mod client;
mod types;

pub use cache::{apply_cache_markers, find_cache_breakpoints, CacheEntry, CacheKey, CacheStats, PromptCache};
pub use client::{AnthropicClient, ClientConfig, LLMClient};
pub use types::{
    CacheControl, ChatMessage, ChatRole, CompletionRequest, CompletionResponse, CostTracker,
    EmbeddingRequest, EmbeddingResponse, ModelCosts, ModelSpec, ModelTier, Provider, StopReason,
    TierBreakdown, TierCosts, TokenUsage,
};
