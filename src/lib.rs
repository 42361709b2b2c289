pub mod chart;
pub mod classifier;
pub mod config;
pub mod error;
pub mod execution;
pub mod execution_loop;
pub mod llm;
pub mod memory;
pub mod prompt;
pub mod session;
pub mod sql_extractor;

// Database module for PostgreSQL
pub mod db;

pub use error::{ChatError, Result};
pub use session::{Attachment, Role, Session, TranscriptEntry, TurnOutcome};
