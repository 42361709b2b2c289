pub mod chart_loop;
pub mod error_classifier;
pub mod query_loop;

pub use chart_loop::*;
pub use error_classifier::*;
pub use query_loop::*;
