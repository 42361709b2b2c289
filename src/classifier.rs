//! Intent Classifier
//!
//! One non-streaming completion per utterance, decoded tolerantly into a
//! [`Label`]. Any failure degrades to [`Label::Converse`].

use crate::llm::CompletionService;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Label {
    /// Generate and run a fresh SQL query.
    NewQuery,
    /// Plot the most recent table.
    Visualize,
    /// Plain conversation.
    Converse,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::NewQuery => write!(f, "NEW_QUERY"),
            Label::Visualize => write!(f, "VISUALIZE"),
            Label::Converse => write!(f, "CONVERSE"),
        }
    }
}

/// Decode a classifier reply.
///
/// "SQL" is checked before "PLOT", so a reply containing both is a new
/// query. Anything else is conversation.
pub fn parse_label(response: &str) -> Label {
    let normalized = response.trim().to_uppercase();
    if normalized.contains("SQL") {
        Label::NewQuery
    } else if normalized.contains("PLOT") {
        Label::Visualize
    } else {
        if !normalized.contains("CHAT") {
            debug!("Ambiguous classifier reply '{}', defaulting to CONVERSE", response.trim());
        }
        Label::Converse
    }
}

pub fn build_classification_prompt(utterance: &str, history_summary: &str) -> String {
    format!(
        r#"You are a text classifier that must categorize the user's request as one of these three categories only:
1) SQL  - The user wants a new SQL query or fresh data from the DB or has SQL query they want to run.
2) PLOT - The user wants to plot or visualize the last known data.
3) CHAT - The user is simply chatting or clarifying, with no need for SQL or plotting.

Conversation so far:
{}

User's request: {}

Return ONLY one word, either 'SQL', 'PLOT', or 'CHAT'."#,
        history_summary, utterance
    )
}

#[derive(Debug, Default, Clone)]
pub struct IntentClassifier;

impl IntentClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Label one utterance. Never fails and never retries.
    pub async fn classify(
        &self,
        llm: &dyn CompletionService,
        utterance: &str,
        history_summary: &str,
    ) -> Label {
        let prompt = build_classification_prompt(utterance, history_summary);
        let label = match llm.complete(&prompt, false).await {
            Ok(reply) => parse_label(&reply),
            Err(e) => {
                warn!("Classifier request failed, defaulting to CONVERSE: {}", e);
                Label::Converse
            }
        };
        info!("Classified request as {}", label);
        label
    }
}
