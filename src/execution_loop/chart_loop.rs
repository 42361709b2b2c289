//! Visualization Loop
//!
//! Asks the model for a chart instruction for the last table, retrying on
//! unparseable output or unusable column references.

use crate::chart::{extract_chart_instruction, ChartInstruction, ChartRenderError};
use crate::error::ChatError;
use crate::execution::TabularResult;
use crate::llm::CompletionService;
use thiserror::Error;
use tracing::{info, warn};

pub const NO_DATA_TEXT: &str = "No recent data found to plot. Please run a query first.";
pub const CHART_EXHAUSTED_TEXT: &str = "Plotting instructions could not be determined.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartTerminal {
    Resolved,
    /// No table to plot; the model was never asked.
    NoDataAvailable,
    Exhausted,
}

/// Why one attempt did not produce a usable instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum ChartAttemptFailure {
    ParseFailure,
    RenderFailure {
        instruction: ChartInstruction,
        error: ChartRenderError,
    },
}

#[derive(Debug, Clone)]
pub struct ChartOutcome {
    pub terminal: ChartTerminal,
    pub text: String,
    pub instruction: Option<ChartInstruction>,
    /// Completion requests issued.
    pub attempts: usize,
    /// Per-attempt failures, in order.
    pub failures: Vec<(usize, ChartAttemptFailure)>,
}

impl ChartOutcome {
    /// User-facing progress lines, one per failed attempt.
    pub fn notes(&self) -> Vec<String> {
        failure_notes(&self.failures)
    }
}

/// Completion-service failure that stopped the loop early.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ChartAborted {
    #[source]
    pub error: ChatError,
    pub attempts: usize,
    pub failures: Vec<(usize, ChartAttemptFailure)>,
}

impl ChartAborted {
    pub fn notes(&self) -> Vec<String> {
        failure_notes(&self.failures)
    }
}

fn failure_notes(failures: &[(usize, ChartAttemptFailure)]) -> Vec<String> {
    failures
        .iter()
        .map(|(attempt, failure)| match failure {
            ChartAttemptFailure::ParseFailure => format!(
                "Could not parse chart instructions on attempt {}. Retrying...",
                attempt
            ),
            ChartAttemptFailure::RenderFailure { error, .. } => {
                format!("Chart plotting failed on attempt {}: {}", attempt, error)
            }
        })
        .collect()
}

enum LoopState {
    Requesting,
    Parsing { response: String },
    Validating { instruction: ChartInstruction },
    Resolved { instruction: ChartInstruction },
    Exhausted,
}

pub fn build_chart_prompt(table: &TabularResult, user_input: &str) -> String {
    format!(
        r#"You must return a JSON object specifying how to plot the table below.

Table columns: {:?}

Return a JSON object with this format:
{{
  "chart_type": "bar" | "line" | "scatter",
  "x": "<column name for x-axis>",
  "y": "<column name or list of columns for y-axis>"
}}

No additional text, only JSON. If you can't produce a valid specification, say so.

here is the user input: {}"#,
        table.columns, user_input
    )
}

pub struct VisualizationLoop {
    max_attempts: usize,
}

impl VisualizationLoop {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub async fn resolve_chart(
        &self,
        llm: &dyn CompletionService,
        table: Option<&TabularResult>,
        user_input: &str,
    ) -> Result<ChartOutcome, ChartAborted> {
        let table = match table {
            Some(t) if !t.is_empty() => t,
            _ => {
                info!("Visualization requested with no data available");
                return Ok(ChartOutcome {
                    terminal: ChartTerminal::NoDataAvailable,
                    text: NO_DATA_TEXT.to_string(),
                    instruction: None,
                    attempts: 0,
                    failures: Vec::new(),
                });
            }
        };

        let prompt = build_chart_prompt(table, user_input);
        let mut attempt = 0;
        let mut failures = Vec::new();
        let mut state = LoopState::Requesting;

        loop {
            state = match state {
                LoopState::Requesting => {
                    if attempt >= self.max_attempts {
                        LoopState::Exhausted
                    } else {
                        attempt += 1;
                        info!("Chart instruction attempt {} of {}", attempt, self.max_attempts);
                        match llm.complete(&prompt, true).await {
                            Ok(response) => LoopState::Parsing { response },
                            Err(error) => {
                                warn!("Completion failed on chart attempt {}: {}", attempt, error);
                                return Err(ChartAborted {
                                    error,
                                    attempts: attempt,
                                    failures,
                                });
                            }
                        }
                    }
                }

                LoopState::Parsing { response } => match extract_chart_instruction(&response) {
                    Some(instruction) => LoopState::Validating { instruction },
                    None => {
                        warn!("Could not parse chart instructions on attempt {}", attempt);
                        failures.push((attempt, ChartAttemptFailure::ParseFailure));
                        LoopState::Requesting
                    }
                },

                LoopState::Validating { instruction } => match instruction.validate(table) {
                    Ok(()) => LoopState::Resolved { instruction },
                    Err(error) => {
                        warn!("Chart plotting failed on attempt {}: {}", attempt, error);
                        failures.push((
                            attempt,
                            ChartAttemptFailure::RenderFailure { instruction, error },
                        ));
                        LoopState::Requesting
                    }
                },

                LoopState::Resolved { instruction } => {
                    let text = instruction.describe();
                    info!("{}", text);
                    return Ok(ChartOutcome {
                        terminal: ChartTerminal::Resolved,
                        text,
                        instruction: Some(instruction),
                        attempts: attempt,
                        failures,
                    });
                }

                LoopState::Exhausted => {
                    warn!("Visualization loop exhausted after {} attempts", attempt);
                    return Ok(ChartOutcome {
                        terminal: ChartTerminal::Exhausted,
                        text: CHART_EXHAUSTED_TEXT.to_string(),
                        instruction: None,
                        attempts: attempt,
                        failures,
                    });
                }
            };
        }
    }
}
