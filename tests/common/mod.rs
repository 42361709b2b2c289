//! Scripted collaborators for driving the agent without a network or database.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use sqlchat::db::{ExecutionError, QueryExecutor};
use sqlchat::execution::TabularResult;
use sqlchat::llm::{CompletionService, TokenStream};
use sqlchat::{ChatError, Result};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replies are consumed in order: `predict` (classifier, summarizer) and
/// `stream` (loops, conversation) have separate queues.
#[derive(Default)]
pub struct ScriptedLlm {
    predict_replies: Mutex<VecDeque<String>>,
    stream_replies: Mutex<VecDeque<String>>,
    predict_prompts: Mutex<Vec<String>>,
    stream_prompts: Mutex<Vec<String>>,
    /// Reply used once the stream queue is empty, if set.
    stream_fallback: Mutex<Option<String>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_predict(self, replies: &[&str]) -> Self {
        self.predict_replies
            .lock()
            .unwrap()
            .extend(replies.iter().map(|r| r.to_string()));
        self
    }

    pub fn with_stream(self, replies: &[&str]) -> Self {
        self.stream_replies
            .lock()
            .unwrap()
            .extend(replies.iter().map(|r| r.to_string()));
        self
    }

    pub fn always_stream(self, reply: &str) -> Self {
        *self.stream_fallback.lock().unwrap() = Some(reply.to_string());
        self
    }

    pub fn push_predict(&self, reply: &str) {
        self.predict_replies.lock().unwrap().push_back(reply.to_string());
    }

    pub fn push_stream(&self, reply: &str) {
        self.stream_replies.lock().unwrap().push_back(reply.to_string());
    }

    pub fn predict_calls(&self) -> usize {
        self.predict_prompts.lock().unwrap().len()
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_prompts.lock().unwrap().len()
    }

    pub fn predict_prompts(&self) -> Vec<String> {
        self.predict_prompts.lock().unwrap().clone()
    }

    pub fn stream_prompts(&self) -> Vec<String> {
        self.stream_prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedLlm {
    async fn predict(&self, prompt: &str) -> Result<String> {
        self.predict_prompts.lock().unwrap().push(prompt.to_string());
        self.predict_replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ChatError::Llm("no scripted predict reply".to_string()))
    }

    async fn stream(&self, prompt: &str) -> Result<TokenStream> {
        self.stream_prompts.lock().unwrap().push(prompt.to_string());
        let reply = self
            .stream_replies
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.stream_fallback.lock().unwrap().clone())
            .ok_or_else(|| ChatError::Llm("no scripted stream reply".to_string()))?;

        // Deliver in small fragments so callers must accumulate.
        let chars: Vec<char> = reply.chars().collect();
        let fragments: Vec<Result<String>> = chars
            .chunks(7)
            .map(|c| Ok(c.iter().collect::<String>()))
            .collect();
        Ok(futures::stream::iter(fragments).boxed())
    }
}

/// Executor that replays queued results and records every statement.
#[derive(Default)]
pub struct ScriptedExecutor {
    results: Mutex<VecDeque<std::result::Result<TabularResult, ExecutionError>>>,
    statements: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_ok(self, table: TabularResult) -> Self {
        self.results.lock().unwrap().push_back(Ok(table));
        self
    }

    pub fn then_err(self, message: &str) -> Self {
        self.results
            .lock()
            .unwrap()
            .push_back(Err(ExecutionError::with_code(message, "42703")));
        self
    }

    pub fn push_ok(&self, table: TabularResult) {
        self.results.lock().unwrap().push_back(Ok(table));
    }

    pub fn calls(&self) -> usize {
        self.statements.lock().unwrap().len()
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(&self, sql: &str) -> std::result::Result<TabularResult, ExecutionError> {
        self.statements.lock().unwrap().push(sql.to_string());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(ExecutionError::with_code(
                    "syntax error at or near \"SELEC\"",
                    "42601",
                ))
            })
    }
}

pub fn enrollments() -> TabularResult {
    TabularResult::new(
        vec![
            "Enrollment ID".to_string(),
            "Facility State".to_string(),
            "Plan".to_string(),
        ],
        vec![
            vec![json!(1), json!("TX"), json!("Gold")],
            vec![json!(7), json!("TX"), json!("Silver")],
        ],
    )
}

pub fn monthly_revenue() -> TabularResult {
    TabularResult::new(
        vec!["Month".to_string(), "Revenue".to_string()],
        vec![
            vec![json!("Jan"), json!(1200.0)],
            vec![json!("Feb"), json!(1350.5)],
            vec![json!("Mar"), json!(990.25)],
        ],
    )
}

pub fn sql_reply(sql: &str) -> String {
    format!("Here is the query:\n```sql\n{}\n```\nIt filters by state.", sql)
}
