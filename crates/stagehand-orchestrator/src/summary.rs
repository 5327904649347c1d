//! Structured action summary emitted at the end of agent output.
//!
//! Generated text is untrusted: parsing never fails loudly, it yields `None`
//! and callers fall back to embedding the raw text.

use serde::{Deserialize, Serialize};

/// Opens a summary block.
pub const SUMMARY_OPEN: &str = "<<<SUMMARY";
/// Closes a summary block.
pub const SUMMARY_CLOSE: &str = "SUMMARY>>>";

/// Self-reported effort of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// A single quick step.
    Low,
    /// A few steps.
    Medium,
    /// Long or multi-part work.
    High,
}

/// What an agent did, as reported in its summary block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSummary {
    /// Steps taken, in order.
    pub actions: Vec<String>,
    /// The fact worth remembering.
    pub key_info: String,
    /// Kind of response, e.g. `code_fix`.
    pub response_type: String,
    /// Reported effort.
    pub complexity: Complexity,
}

impl ActionSummary {
    fn is_well_formed(&self) -> bool {
        !self.response_type.trim().is_empty() && self.actions.iter().all(|a| !a.trim().is_empty())
    }

    /// Text used for memory write-back.
    pub fn to_memory_text(&self) -> String {
        let mut text = format!("[{}] {}", self.response_type, self.key_info.trim());
        if !self.actions.is_empty() {
            text.push_str("\nActions: ");
            text.push_str(&self.actions.join("; "));
        }
        text
    }
}

/// Parse the last well-formed summary block in `output`.
pub fn parse_summary(output: &str) -> Option<ActionSummary> {
    blocks(output)
        .into_iter()
        .rev()
        .find_map(|body| {
            serde_json::from_str::<ActionSummary>(body.trim())
                .ok()
                .filter(ActionSummary::is_well_formed)
        })
}

/// `output` with every summary block removed and surrounding whitespace trimmed.
pub fn strip_summary(output: &str) -> String {
    let mut text = String::with_capacity(output.len());
    let mut rest = output;
    while let Some(start) = rest.find(SUMMARY_OPEN) {
        let after_open = &rest[start + SUMMARY_OPEN.len()..];
        let Some(end) = after_open.find(SUMMARY_CLOSE) else {
            break;
        };
        text.push_str(&rest[..start]);
        rest = &after_open[end + SUMMARY_CLOSE.len()..];
    }
    text.push_str(rest);
    text.trim().to_string()
}

fn blocks(output: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = output;
    while let Some(start) = rest.find(SUMMARY_OPEN) {
        let after_open = &rest[start + SUMMARY_OPEN.len()..];
        let Some(end) = after_open.find(SUMMARY_CLOSE) else {
            break;
        };
        found.push(&after_open[..end]);
        rest = &after_open[end + SUMMARY_CLOSE.len()..];
    }
    found
}
