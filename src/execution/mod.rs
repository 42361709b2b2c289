//! Execution output types shared by the executor, loops, and session.

pub mod result;

pub use result::TabularResult;
