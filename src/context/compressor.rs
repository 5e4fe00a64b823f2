//! Conversation compression
//!
//! Reduces a message list under a token budget. Summaries come from an
//! abstract [`CompletionClient`]; without one configured the compressor
//! emits deterministic placeholder summaries and never fails.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::context::events::{CompressionStats, EntityData, MessageData};
use crate::error::{MnemoError, Result};
use crate::llm::CompletionClient;

/// How a conversation gets reduced under its token budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompressionStrategy {
    /// Keep a recent window, summarize everything older into one message
    #[serde(alias = "window")]
    WindowSummary,
    /// Keep entity-bearing messages plus the recent window, drop the rest
    #[serde(alias = "entity")]
    EntityGraph,
    /// One condensed summary plus a short recent tail
    Full,
    /// Entity pass, then window, then full as last resort
    #[default]
    Hybrid,
}

impl std::fmt::Display for CompressionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionStrategy::WindowSummary => write!(f, "window_summary"),
            CompressionStrategy::EntityGraph => write!(f, "entity_graph"),
            CompressionStrategy::Full => write!(f, "full"),
            CompressionStrategy::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl std::str::FromStr for CompressionStrategy {
    type Err = MnemoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "window_summary" | "window" => Ok(CompressionStrategy::WindowSummary),
            "entity_graph" | "entity" => Ok(CompressionStrategy::EntityGraph),
            "full" => Ok(CompressionStrategy::Full),
            "hybrid" => Ok(CompressionStrategy::Hybrid),
            other => Err(MnemoError::Config(format!(
                "unknown compression strategy: {}",
                other
            ))),
        }
    }
}

/// Compressor tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub strategy: CompressionStrategy,
    /// Messages kept verbatim at the end of the conversation
    pub window_size: usize,
    /// Token budget granted to generated summaries
    pub summary_max_tokens: i64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            strategy: CompressionStrategy::default(),
            window_size: 10,
            summary_max_tokens: 512,
        }
    }
}

/// Reduces message lists under a token budget
pub struct ContextCompressor {
    client: Option<Arc<dyn CompletionClient>>,
    config: CompressionConfig,
}

impl ContextCompressor {
    pub fn new(client: Option<Arc<dyn CompletionClient>>, config: CompressionConfig) -> Self {
        Self { client, config }
    }

    /// Compress with the configured default strategy
    pub async fn compress(
        &self,
        messages: &[MessageData],
        entities: &[EntityData],
        max_tokens: i64,
    ) -> Result<(Vec<MessageData>, CompressionStats)> {
        self.compress_with_strategy(messages, entities, max_tokens, self.config.strategy)
            .await
    }

    /// Compress with an explicit strategy
    pub async fn compress_with_strategy(
        &self,
        messages: &[MessageData],
        entities: &[EntityData],
        max_tokens: i64,
        strategy: CompressionStrategy,
    ) -> Result<(Vec<MessageData>, CompressionStats)> {
        let started = Instant::now();
        let original_tokens = total_tokens(messages);

        let compressed = match strategy {
            CompressionStrategy::WindowSummary => self.window_pass(messages).await,
            CompressionStrategy::EntityGraph => self.entity_pass(messages, entities),
            CompressionStrategy::Full => self.full_pass(messages).await?,
            CompressionStrategy::Hybrid => {
                let mut reduced = self.entity_pass(messages, entities);
                if total_tokens(&reduced) > max_tokens {
                    reduced = self.window_pass(&reduced).await;
                }
                if total_tokens(&reduced) > max_tokens {
                    reduced = self.full_pass(&reduced).await?;
                }
                reduced
            }
        };

        let compressed_tokens = total_tokens(&compressed);
        let stats = CompressionStats {
            strategy: strategy.to_string(),
            original_messages: messages.len(),
            compressed_messages: compressed.len(),
            original_tokens,
            compressed_tokens,
            compression_ratio: ratio(compressed_tokens, original_tokens),
            quality_estimate: quality_estimate(&compressed, entities),
            duration_ms: started.elapsed().as_millis() as i64,
        };
        tracing::info!(
            strategy = %stats.strategy,
            original_messages = stats.original_messages,
            compressed_messages = stats.compressed_messages,
            ratio = stats.compression_ratio,
            "compressed conversation"
        );
        Ok((compressed, stats))
    }

    /// Keep the recent window; summarize the older remainder into one
    /// system message. A failed summary keeps the originals.
    async fn window_pass(&self, messages: &[MessageData]) -> Vec<MessageData> {
        let window = self.config.window_size.min(messages.len());
        let split = messages.len() - window;
        if split == 0 {
            return messages.to_vec();
        }
        let older = &messages[..split];
        let summary = match self.summarize(older).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(error = %e, "summary failed, keeping original messages");
                return messages.to_vec();
            }
        };

        let mut reduced = Vec::with_capacity(window + 1);
        reduced.push(summary_message("window-summary", summary, older));
        reduced.extend_from_slice(&messages[split..]);
        reduced
    }

    /// Keep entity-bearing messages and the recent window; drop the rest
    fn entity_pass(&self, messages: &[MessageData], entities: &[EntityData]) -> Vec<MessageData> {
        if entities.is_empty() {
            return messages.to_vec();
        }
        let window_start = messages.len().saturating_sub(self.config.window_size);
        messages
            .iter()
            .enumerate()
            .filter(|(i, message)| *i >= window_start || mentions_any(&message.content, entities))
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// One condensed summary plus a short recent tail. Summary errors
    /// propagate; callers decide whether to fall back.
    async fn full_pass(&self, messages: &[MessageData]) -> Result<Vec<MessageData>> {
        let tail = (self.config.window_size / 2).max(1).min(messages.len());
        let split = messages.len() - tail;
        if split == 0 {
            return Ok(messages.to_vec());
        }
        let older = &messages[..split];
        let summary = self.summarize(older).await?;

        let mut reduced = Vec::with_capacity(tail + 1);
        reduced.push(summary_message("full-summary", summary, older));
        reduced.extend_from_slice(&messages[split..]);
        Ok(reduced)
    }

    /// Summarize messages through the client, or deterministically when
    /// no client is configured
    async fn summarize(&self, messages: &[MessageData]) -> Result<String> {
        let fallback = format!("[Summary of {} messages]", messages.len());
        let client = match &self.client {
            Some(client) => client,
            None => return Ok(fallback),
        };

        let prompt = summary_prompt(messages);
        let (text, _) = client
            .complete(&prompt, self.config.summary_max_tokens)
            .await
            .map_err(|e| MnemoError::Compression(format!("summary completion failed: {}", e)))?;
        if text.trim().is_empty() {
            Ok(fallback)
        } else {
            Ok(text)
        }
    }
}

fn summary_prompt(messages: &[MessageData]) -> String {
    let mut prompt = String::from(
        "Summarize the following conversation excerpt, preserving decisions, \
         facts and named entities:\n\n",
    );
    for message in messages {
        prompt.push_str(&message.role);
        prompt.push_str(": ");
        prompt.push_str(&message.content);
        prompt.push('\n');
    }
    prompt
}

fn summary_message(id: &str, content: String, summarized: &[MessageData]) -> MessageData {
    MessageData {
        message_id: id.to_string(),
        role: "system".to_string(),
        content,
        tokens: 0,
        model: None,
        // Summary stands where the last summarized message stood
        created_at: summarized
            .last()
            .map(|m| m.created_at)
            .unwrap_or_else(chrono::Utc::now),
    }
}

fn total_tokens(messages: &[MessageData]) -> i64 {
    messages.iter().map(MessageData::count_tokens).sum()
}

fn ratio(compressed_tokens: i64, original_tokens: i64) -> f64 {
    if original_tokens <= 0 {
        return 1.0;
    }
    let ratio = compressed_tokens as f64 / original_tokens as f64;
    ratio.clamp(f64::MIN_POSITIVE, 1.0)
}

fn mentions_any(content: &str, entities: &[EntityData]) -> bool {
    let content = content.to_lowercase();
    entities.iter().any(|entity| {
        (!entity.name.is_empty() && content.contains(&entity.name.to_lowercase()))
            || (!entity.value.is_empty() && content.contains(&entity.value.to_lowercase()))
    })
}

/// Share of known entities still mentioned by the retained messages
fn quality_estimate(compressed: &[MessageData], entities: &[EntityData]) -> f64 {
    if entities.is_empty() {
        return 1.0;
    }
    let preserved = entities
        .iter()
        .filter(|entity| {
            compressed
                .iter()
                .any(|message| mentions_any(&message.content, std::slice::from_ref(entity)))
        })
        .count();
    preserved as f64 / entities.len() as f64
}
