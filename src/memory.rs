//! Conversation Memory
//!
//! Rolling summary plus a raw tail of recent exchanges. When the tail grows
//! past the token budget, the oldest exchanges are folded into the summary
//! by a summarization request.

use crate::error::{ChatError, Result};
use crate::llm::CompletionService;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub input: String,
    pub output: String,
}

impl Exchange {
    fn render(&self) -> String {
        format!("Human: {}\nAI: {}", self.input, self.output)
    }

    fn tokens(&self) -> usize {
        estimate_tokens(&self.input) + estimate_tokens(&self.output)
    }
}

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

#[derive(Debug, Clone)]
pub struct ConversationMemory {
    summary: String,
    buffer: VecDeque<Exchange>,
    max_token_limit: usize,
}

impl ConversationMemory {
    pub fn new(max_token_limit: usize) -> Self {
        Self {
            summary: String::new(),
            buffer: VecDeque::new(),
            max_token_limit,
        }
    }

    pub fn max_token_limit(&self) -> usize {
        self.max_token_limit
    }

    pub fn is_empty(&self) -> bool {
        self.summary.is_empty() && self.buffer.is_empty()
    }

    pub fn buffered(&self) -> impl Iterator<Item = &Exchange> {
        self.buffer.iter()
    }

    pub fn buffer_tokens(&self) -> usize {
        self.buffer.iter().map(Exchange::tokens).sum()
    }

    /// Current memory as prompt text, or `NONE` when nothing is remembered.
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "NONE".to_string();
        }
        let mut parts = Vec::with_capacity(self.buffer.len() + 1);
        if !self.summary.is_empty() {
            parts.push(format!("System: {}", self.summary));
        }
        parts.extend(self.buffer.iter().map(Exchange::render));
        parts.join("\n")
    }

    /// Append one exchange and fold overflow into the summary.
    ///
    /// If summarization fails the exchange is still kept and the summary is
    /// untouched; the tail stays over budget until a later call succeeds.
    pub async fn record(
        &mut self,
        summarizer: &dyn CompletionService,
        input_text: &str,
        output_text: &str,
    ) -> Result<()> {
        self.buffer.push_back(Exchange {
            input: input_text.to_string(),
            output: output_text.to_string(),
        });

        let mut pruned = Vec::new();
        while self.buffer_tokens() > self.max_token_limit {
            match self.buffer.pop_front() {
                Some(exchange) => pruned.push(exchange),
                None => break,
            }
        }

        if pruned.is_empty() {
            return Ok(());
        }

        debug!(
            "Memory over budget, summarizing {} exchanges ({} tokens kept)",
            pruned.len(),
            self.buffer_tokens()
        );

        let prompt = build_summary_prompt(&self.summary, &pruned);
        match summarizer.complete(&prompt, false).await {
            Ok(new_summary) => {
                self.summary = new_summary.trim().to_string();
                info!("Folded {} exchanges into the conversation summary", pruned.len());
                Ok(())
            }
            Err(e) => {
                warn!("Summarization failed, keeping raw exchanges: {}", e);
                for exchange in pruned.into_iter().rev() {
                    self.buffer.push_front(exchange);
                }
                Err(ChatError::Memory(format!("summarization failed: {}", e)))
            }
        }
    }

    pub fn clear(&mut self) {
        self.summary.clear();
        self.buffer.clear();
    }
}

fn build_summary_prompt(current_summary: &str, new_lines: &[Exchange]) -> String {
    let lines = new_lines
        .iter()
        .map(Exchange::render)
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"Progressively summarize the lines of conversation provided, adding onto the previous summary and returning a new summary.
Keep table names, column names, filters and any SQL that worked, since later questions may refer back to them.

Current summary:
{}

New lines of conversation:
{}

New summary:"#,
        if current_summary.is_empty() { "NONE" } else { current_summary },
        lines
    )
}
