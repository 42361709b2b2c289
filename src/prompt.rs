//! Prompt templates
//!
//! A template is markdown text with `{conversation_summary}` and
//! `{user_input}` placeholders.

use crate::error::{ChatError, Result};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::fs;
use std::path::{Path, PathBuf};

pub const SUMMARY_PLACEHOLDER: &str = "{conversation_summary}";
pub const INPUT_PLACEHOLDER: &str = "{user_input}";

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{(conversation_summary|user_input)\}").unwrap();
}

const DEFAULT_TEMPLATE: &str = "{conversation_summary}\n\nUser says: {user_input}\n\nAssistant:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    name: String,
    text: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            text: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    pub fn from_text(name: impl Into<String>, text: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let text = text.into();
        if !text.contains(SUMMARY_PLACEHOLDER) && !text.contains(INPUT_PLACEHOLDER) {
            return Err(ChatError::Template(format!(
                "template '{}' has neither {} nor {}",
                name, SUMMARY_PLACEHOLDER, INPUT_PLACEHOLDER
            )));
        }
        Ok(Self { name, text })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            ChatError::Template(format!("cannot read {}: {}", path.display(), e))
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_text(name, text)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fill both placeholders in one pass over the template. An empty
    /// summary renders as `NONE`; substituted text is never rescanned.
    pub fn render(&self, conversation_summary: &str, user_input: &str) -> String {
        let summary = if conversation_summary.trim().is_empty() {
            "NONE"
        } else {
            conversation_summary
        };
        PLACEHOLDER
            .replace_all(&self.text, |caps: &Captures| match &caps[1] {
                "conversation_summary" => summary.to_string(),
                _ => user_input.to_string(),
            })
            .into_owned()
    }
}

/// Markdown templates in `dir`, sorted by file name.
pub fn list_templates(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().map(|ext| ext == "md").unwrap_or(false))
        .collect();
    paths.sort();
    Ok(paths)
}

/// Template selected by name from `dir`. `default` (or `none`) selects the
/// built-in template; a missing `.md` extension is added.
pub fn resolve_template(dir: &Path, name: &str) -> Result<PromptTemplate> {
    let name = name.trim();
    if name.eq_ignore_ascii_case("default") || name.eq_ignore_ascii_case("none") {
        return Ok(PromptTemplate::default());
    }
    let file_name = if name.ends_with(".md") {
        name.to_string()
    } else {
        format!("{}.md", name)
    };
    PromptTemplate::load(&dir.join(file_name))
}
