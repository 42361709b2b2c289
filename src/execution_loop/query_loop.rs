//! Self-Correcting Query Loop
//!
//! Bounded state machine: ask the model for SQL, run it, and on a database
//! error replace the prompt with the error text so the model can fix its
//! statement.

use crate::db::{ExecutionError, QueryExecutor};
use crate::error::ChatError;
use crate::execution::TabularResult;
use crate::execution_loop::error_classifier::{ErrorClassifier, SqlErrorClass};
use crate::llm::CompletionService;
use crate::sql_extractor::extract_sql;
use thiserror::Error;
use tracing::{debug, info, warn};

/// How a query turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTerminal {
    /// A statement ran, or the model answered without one.
    Success,
    /// Every attempt produced SQL that failed.
    Exhausted,
}

/// One failed execution.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptReport {
    pub attempt: usize,
    pub sql: String,
    pub error: ExecutionError,
    pub class: SqlErrorClass,
}

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub terminal: QueryTerminal,
    /// Text for the transcript.
    pub text: String,
    pub table: Option<TabularResult>,
    /// The statement that produced `table`.
    pub sql: Option<String>,
    /// Completion requests issued.
    pub attempts: usize,
    pub failures: Vec<AttemptReport>,
}

/// Completion-service failure that stopped the loop early. Carries the
/// attempts already spent so callers can still report them.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct QueryAborted {
    #[source]
    pub error: ChatError,
    pub attempts: usize,
    pub failures: Vec<AttemptReport>,
}

enum LoopState {
    Generating { prompt: String },
    Extracting { response: String },
    Executing { response: String, sql: String },
    Retry { sql: String, error: ExecutionError },
    Success { text: String, table: Option<TabularResult>, sql: Option<String> },
    Exhausted,
}

/// Prompt that replaces the conversation after a failed statement.
pub fn build_correction_prompt(error: &ExecutionError) -> String {
    format!(
        "The SQL query caused an error:\n```\n{}\n```\nPlease provide a corrected SQL query.",
        error.message
    )
}

pub fn success_text(response: &str) -> String {
    format!("{}\n\n**SQL Results:**\n\nData retrieved successfully.", response)
}

pub fn exhausted_text(max_attempts: usize) -> String {
    format!(
        "Unable to produce a working SQL query after {} attempts.",
        max_attempts
    )
}

pub struct SelfCorrectingQueryLoop {
    max_attempts: usize,
    error_classifier: ErrorClassifier,
}

impl SelfCorrectingQueryLoop {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            error_classifier: ErrorClassifier::new(),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Drive the loop to a terminal state.
    ///
    /// Completion-service errors abort the loop and are returned with the
    /// failures seen so far; database errors are consumed as retries.
    pub async fn resolve_query(
        &self,
        llm: &dyn CompletionService,
        executor: &dyn QueryExecutor,
        prompt: &str,
    ) -> Result<QueryOutcome, QueryAborted> {
        let mut attempt = 0;
        let mut failures: Vec<AttemptReport> = Vec::new();
        let mut state = LoopState::Generating {
            prompt: prompt.to_string(),
        };

        loop {
            state = match state {
                LoopState::Generating { prompt } => {
                    attempt += 1;
                    info!("SQL generation attempt {} of {}", attempt, self.max_attempts);
                    match llm.complete(&prompt, true).await {
                        Ok(response) => LoopState::Extracting { response },
                        Err(error) => {
                            warn!("Completion failed on attempt {}: {}", attempt, error);
                            return Err(QueryAborted {
                                error,
                                attempts: attempt,
                                failures,
                            });
                        }
                    }
                }

                LoopState::Extracting { response } => match extract_sql(&response) {
                    Some(sql) => LoopState::Executing { response, sql },
                    None => {
                        info!("No SQL block in response, answering conversationally");
                        LoopState::Success {
                            text: response,
                            table: None,
                            sql: None,
                        }
                    }
                },

                LoopState::Executing { response, sql } => {
                    debug!("Executing extracted SQL: {}", sql);
                    match executor.execute(&sql).await {
                        Ok(table) => LoopState::Success {
                            text: success_text(&response),
                            table: Some(table),
                            sql: Some(sql),
                        },
                        Err(error) => LoopState::Retry { sql, error },
                    }
                }

                LoopState::Retry { sql, error } => {
                    let class = self.error_classifier.classify(&error);
                    warn!(
                        "SQL error ({}) on attempt {} of {}: {}",
                        class, attempt, self.max_attempts, error.message
                    );
                    let next_prompt = build_correction_prompt(&error);
                    failures.push(AttemptReport {
                        attempt,
                        sql,
                        error,
                        class,
                    });
                    if attempt >= self.max_attempts {
                        LoopState::Exhausted
                    } else {
                        LoopState::Generating {
                            prompt: next_prompt,
                        }
                    }
                }

                LoopState::Success { text, table, sql } => {
                    info!("✅ Query loop succeeded after {} attempts", attempt);
                    return Ok(QueryOutcome {
                        terminal: QueryTerminal::Success,
                        text,
                        table,
                        sql,
                        attempts: attempt,
                        failures,
                    });
                }

                LoopState::Exhausted => {
                    warn!("Query loop exhausted after {} attempts", attempt);
                    return Ok(QueryOutcome {
                        terminal: QueryTerminal::Exhausted,
                        text: exhausted_text(self.max_attempts),
                        table: None,
                        sql: None,
                        attempts: attempt,
                        failures,
                    });
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correction_prompt_embeds_message_verbatim() {
        let error = ExecutionError::new("column \"state\" does not exist");
        let prompt = build_correction_prompt(&error);
        assert!(prompt.starts_with("The SQL query caused an error:"));
        assert!(prompt.contains("```\ncolumn \"state\" does not exist\n```"));
        assert!(prompt.ends_with("Please provide a corrected SQL query."));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(SelfCorrectingQueryLoop::new(0).max_attempts(), 1);
    }

    #[test]
    fn test_terminal_texts() {
        assert!(success_text("Here it is").ends_with("Data retrieved successfully."));
        assert_eq!(
            exhausted_text(5),
            "Unable to produce a working SQL query after 5 attempts."
        );
    }
}
