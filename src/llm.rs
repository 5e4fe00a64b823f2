//! Completion backend capability
//!
//! The compressor treats the language model as an opaque prompt-in,
//! text-plus-token-count-out capability. Implementations may error or
//! return empty results; callers degrade to best-effort output.

use async_trait::async_trait;

use crate::error::Result;

/// Abstract completion capability
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Complete a prompt within a token budget, returning the text and the
    /// number of tokens it occupies
    async fn complete(&self, prompt: &str, max_tokens: i64) -> Result<(String, i64)>;
}
