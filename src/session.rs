//! Session - one conversation with its transcript, memory, and collaborators
//!
//! Each call to [`Session::handle_turn`] fully resolves one utterance:
//! classification, the matching loop, then exactly one transcript append per
//! role and one memory update. Failures become the assistant's text for that
//! turn; they never escape the turn.

use crate::chart::ChartInstruction;
use crate::classifier::{IntentClassifier, Label};
use crate::config::AgentConfig;
use crate::db::QueryExecutor;
use crate::error::ChatError;
use crate::execution::TabularResult;
use crate::execution_loop::{
    AttemptReport, ChartTerminal, SelfCorrectingQueryLoop, VisualizationLoop,
};
use crate::llm::CompletionService;
use crate::memory::ConversationMemory;
use crate::prompt::PromptTemplate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const MEMORY_PREVIEW_ROWS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Payload attached to an assistant message. A chart never travels without
/// the table it was computed against.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Attachment {
    #[default]
    None,
    Table(Arc<TabularResult>),
    TableWithChart {
        table: Arc<TabularResult>,
        chart: ChartInstruction,
    },
}

impl Attachment {
    pub fn table(&self) -> Option<&Arc<TabularResult>> {
        match self {
            Attachment::None => None,
            Attachment::Table(table) | Attachment::TableWithChart { table, .. } => Some(table),
        }
    }

    pub fn chart(&self) -> Option<&ChartInstruction> {
        match self {
            Attachment::TableWithChart { chart, .. } => Some(chart),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    role: Role,
    text: String,
    attachment: Attachment,
    created_at: DateTime<Utc>,
}

impl TranscriptEntry {
    fn new(role: Role, text: String, attachment: Attachment) -> Self {
        Self {
            role,
            text,
            attachment,
            created_at: Utc::now(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// What the presentation layer needs to render one resolved turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub label: Label,
    pub display_text: String,
    pub attachment: Attachment,
    /// Completion requests spent inside the loop (0 for plain conversation).
    pub attempts: usize,
    /// Progress and warning lines from failed attempts.
    pub notes: Vec<String>,
}

impl TurnOutcome {
    pub fn table(&self) -> Option<&TabularResult> {
        self.attachment.table().map(|t| t.as_ref())
    }

    pub fn chart(&self) -> Option<&ChartInstruction> {
        self.attachment.chart()
    }
}

pub struct Session {
    id: Uuid,
    llm: Arc<dyn CompletionService>,
    executor: Arc<dyn QueryExecutor>,
    classifier: IntentClassifier,
    query_loop: SelfCorrectingQueryLoop,
    chart_loop: VisualizationLoop,
    memory: ConversationMemory,
    transcript: Vec<TranscriptEntry>,
    template: PromptTemplate,
    display_formatted_prompt: bool,
}

impl Session {
    pub fn new(
        llm: Arc<dyn CompletionService>,
        executor: Arc<dyn QueryExecutor>,
        config: &AgentConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            llm,
            executor,
            classifier: IntentClassifier::new(),
            query_loop: SelfCorrectingQueryLoop::new(config.max_sql_attempts),
            chart_loop: VisualizationLoop::new(config.max_plot_attempts),
            memory: ConversationMemory::new(config.memory_token_limit),
            transcript: Vec::new(),
            template: PromptTemplate::default(),
            display_formatted_prompt: false,
        }
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn set_template(&mut self, template: PromptTemplate) {
        self.template = template;
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// Show the fully formatted prompt as the user's transcript text.
    pub fn set_display_formatted_prompt(&mut self, enabled: bool) {
        self.display_formatted_prompt = enabled;
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    /// Most recent table attached to an assistant message.
    pub fn last_table(&self) -> Option<Arc<TabularResult>> {
        self.transcript
            .iter()
            .rev()
            .filter(|e| e.role == Role::Assistant)
            .find_map(|e| e.attachment.table().cloned())
    }

    /// Clear transcript and memory together.
    pub fn reset(&mut self) {
        self.transcript.clear();
        self.memory.clear();
        info!(session = %self.id, "Session reset");
    }

    pub async fn handle_turn(&mut self, utterance: &str) -> TurnOutcome {
        let summary = self.memory.summary();
        let label = self
            .classifier
            .classify(self.llm.as_ref(), utterance, &summary)
            .await;

        let formatted_prompt = self.template.render(&summary, utterance);
        let user_text = if self.display_formatted_prompt {
            formatted_prompt.clone()
        } else {
            utterance.to_string()
        };
        self.transcript
            .push(TranscriptEntry::new(Role::User, user_text, Attachment::None));

        let (outcome, memory_output) = match label {
            Label::NewQuery => self.run_query(&formatted_prompt).await,
            Label::Visualize => self.run_chart(utterance).await,
            Label::Converse => self.run_conversation(&formatted_prompt).await,
        };
        let outcome = TurnOutcome { label, ..outcome };

        self.transcript.push(TranscriptEntry::new(
            Role::Assistant,
            outcome.display_text.clone(),
            outcome.attachment.clone(),
        ));

        if let Err(e) = self
            .memory
            .record(self.llm.as_ref(), utterance, &memory_output)
            .await
        {
            warn!(session = %self.id, "Memory update deferred: {}", e);
        }

        outcome
    }

    async fn run_query(&self, prompt: &str) -> (TurnOutcome, String) {
        match self
            .query_loop
            .resolve_query(self.llm.as_ref(), self.executor.as_ref(), prompt)
            .await
        {
            Ok(result) => {
                let notes = self.query_notes(&result.failures);
                let memory_output = match &result.table {
                    Some(table) => format!(
                        "{}\n{}",
                        result.text,
                        table.render_preview(MEMORY_PREVIEW_ROWS)
                    ),
                    None => result.text.clone(),
                };
                let attachment = match result.table {
                    Some(table) => Attachment::Table(Arc::new(table)),
                    None => Attachment::None,
                };
                (
                    TurnOutcome {
                        label: Label::NewQuery,
                        display_text: result.text,
                        attachment,
                        attempts: result.attempts,
                        notes,
                    },
                    memory_output,
                )
            }
            Err(aborted) => {
                let notes = self.query_notes(&aborted.failures);
                failed_turn(Label::NewQuery, &aborted.error, aborted.attempts, notes)
            }
        }
    }

    fn query_notes(&self, failures: &[AttemptReport]) -> Vec<String> {
        failures
            .iter()
            .map(|f| {
                format!(
                    "SQL Error: {} (attempt {} of {})",
                    f.error.message,
                    f.attempt,
                    self.query_loop.max_attempts()
                )
            })
            .collect()
    }

    async fn run_chart(&self, utterance: &str) -> (TurnOutcome, String) {
        let table = self.last_table();
        match self
            .chart_loop
            .resolve_chart(self.llm.as_ref(), table.as_deref(), utterance)
            .await
        {
            Ok(result) => {
                let notes = result.notes();
                let attachment = match (result.terminal, table, result.instruction) {
                    (ChartTerminal::Resolved, Some(table), Some(chart)) => {
                        Attachment::TableWithChart { table, chart }
                    }
                    _ => Attachment::None,
                };
                let memory_output = result.text.clone();
                (
                    TurnOutcome {
                        label: Label::Visualize,
                        display_text: result.text,
                        attachment,
                        attempts: result.attempts,
                        notes,
                    },
                    memory_output,
                )
            }
            Err(aborted) => {
                let notes = aborted.notes();
                failed_turn(Label::Visualize, &aborted.error, aborted.attempts, notes)
            }
        }
    }

    async fn run_conversation(&self, prompt: &str) -> (TurnOutcome, String) {
        match self.llm.complete(prompt, true).await {
            Ok(text) => (
                TurnOutcome {
                    label: Label::Converse,
                    display_text: text.clone(),
                    attachment: Attachment::None,
                    attempts: 0,
                    notes: Vec::new(),
                },
                text,
            ),
            Err(e) => failed_turn(Label::Converse, &e, 0, Vec::new()),
        }
    }
}

/// Turn ended by a completion failure. Attempts and notes gathered before
/// the failure are kept.
fn failed_turn(
    label: Label,
    error: &ChatError,
    attempts: usize,
    notes: Vec<String>,
) -> (TurnOutcome, String) {
    warn!("Turn failed ({}) after {} attempts: {}", label, attempts, error);
    let text = format!("Sorry, this request could not be completed: {}", error);
    (
        TurnOutcome {
            label,
            display_text: text.clone(),
            attachment: Attachment::None,
            attempts,
            notes,
        },
        text,
    )
}
