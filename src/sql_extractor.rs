//! SQL Extractor
//!
//! Finds the first fenced ```sql block in model output.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SQL_BLOCK: Regex = Regex::new(r"(?is)```sql\s*(.*?)\s*```").unwrap();
}

/// Trimmed body of the first ```sql fenced block, or `None`.
///
/// Later blocks are ignored. A block that is empty after trimming counts as
/// no SQL at all.
pub fn extract_sql(response_text: &str) -> Option<String> {
    SQL_BLOCK
        .captures(response_text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|sql| !sql.is_empty())
}
