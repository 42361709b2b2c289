//! Completion service boundary
//!
//! Everything that talks to the language model goes through
//! [`CompletionService`]. [`LlmClient`] is the production implementation for
//! OpenAI-compatible `/chat/completions` endpoints; tests substitute scripted
//! services.

use crate::config::LlmConfig;
use crate::error::{ChatError, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Lazy, finite sequence of text fragments for one completion request.
pub type TokenStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Single non-streaming request.
    async fn predict(&self, prompt: &str) -> Result<String>;

    /// Streaming request. Every call starts a fresh stream.
    async fn stream(&self, prompt: &str) -> Result<TokenStream>;

    /// Full response text. Streaming responses are accumulated to the end
    /// before returning, so callers never see partial output.
    async fn complete(&self, prompt: &str, stream: bool) -> Result<String> {
        if stream {
            let tokens = self.stream(prompt).await?;
            collect_stream(tokens).await
        } else {
            self.predict(prompt).await
        }
    }
}

/// Drain a token stream into one string, failing on the first bad fragment.
pub async fn collect_stream(mut tokens: TokenStream) -> Result<String> {
    let mut text = String::new();
    while let Some(fragment) = tokens.next().await {
        text.push_str(&fragment?);
    }
    Ok(text)
}

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: Option<f32>,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, prompt: &str, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "stream": stream,
        });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        body
    }

    async fn send(&self, prompt: &str, stream: bool) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(prompt, stream))
            .send()
            .await
            .map_err(|e| ChatError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ChatError::Llm(format!("LLM API error ({}): {}", status, error_text)));
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn predict(&self, prompt: &str) -> Result<String> {
        debug!(model = %self.model, "Sending completion request");
        let response = self.send(prompt, false).await?;

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChatError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        parse_completion_body(&response_json)
    }

    async fn stream(&self, prompt: &str) -> Result<TokenStream> {
        debug!(model = %self.model, "Opening streaming completion");
        let response = self.send(prompt, true).await?;

        let state = SseState {
            bytes: response
                .bytes_stream()
                .map(|chunk| chunk.map(|b| b.to_vec()))
                .boxed(),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            finished: false,
        };

        Ok(stream::unfold(state, next_fragment).boxed())
    }
}

/// Extract the message content from a non-streaming completion body.
fn parse_completion_body(body: &serde_json::Value) -> Result<String> {
    if let Some(error) = body.get("error") {
        return Err(ChatError::Llm(format!("LLM API error: {}", error)));
    }

    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| ChatError::Llm(format!("No choices in LLM response: {}", body)))?;

    match choice.get("finish_reason").and_then(|r| r.as_str()) {
        Some("length") => warn!("LLM response was truncated due to length limit"),
        Some("content_filter") => {
            return Err(ChatError::Llm(
                "LLM response was filtered by content policy".to_string(),
            ))
        }
        _ => {}
    }

    choice["message"]["content"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| ChatError::Llm(format!("No content in LLM response: {}", body)))
}

struct SseState {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    finished: bool,
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Fragment(String),
    Done,
    Skip,
}

impl SseState {
    /// Move every complete line out of the buffer into `pending`.
    fn drain_lines(&mut self, flush: bool) -> Result<()> {
        loop {
            let line = match self.buffer.iter().position(|b| *b == b'\n') {
                Some(pos) => self.buffer.drain(..=pos).collect::<Vec<u8>>(),
                None if flush && !self.buffer.is_empty() => std::mem::take(&mut self.buffer),
                None => return Ok(()),
            };
            match parse_sse_line(&String::from_utf8_lossy(&line))? {
                SseLine::Fragment(text) => self.pending.push_back(text),
                SseLine::Done => {
                    self.finished = true;
                    self.buffer.clear();
                    return Ok(());
                }
                SseLine::Skip => {}
            }
        }
    }
}

async fn next_fragment(mut state: SseState) -> Option<(Result<String>, SseState)> {
    loop {
        if let Some(fragment) = state.pending.pop_front() {
            return Some((Ok(fragment), state));
        }
        if state.finished {
            return None;
        }
        match state.bytes.next().await {
            Some(Ok(chunk)) => {
                state.buffer.extend_from_slice(&chunk);
                if let Err(e) = state.drain_lines(false) {
                    state.finished = true;
                    return Some((Err(e), state));
                }
            }
            Some(Err(e)) => {
                state.finished = true;
                return Some((Err(ChatError::Llm(format!("LLM stream failed: {}", e))), state));
            }
            None => {
                let flushed = state.drain_lines(true);
                state.finished = true;
                if let Err(e) = flushed {
                    return Some((Err(e), state));
                }
            }
        }
    }
}

/// Interpret one server-sent-event line from a streaming completion.
fn parse_sse_line(line: &str) -> Result<SseLine> {
    let line = line.trim();
    let payload = match line.strip_prefix("data:") {
        Some(p) => p.trim(),
        None => return Ok(SseLine::Skip),
    };
    if payload == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let event: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| ChatError::Llm(format!("Malformed stream event: {}", e)))?;
    if let Some(error) = event.get("error") {
        return Err(ChatError::Llm(format!("LLM API error: {}", error)));
    }

    match event["choices"][0]["delta"]["content"].as_str() {
        Some(text) if !text.is_empty() => Ok(SseLine::Fragment(text.to_string())),
        _ => Ok(SseLine::Skip),
    }
}
