use crate::rules;
use crate::types::{Backend, Lane};
use serde::Serialize;
use stagehand_core::{Event, Priority};

/// Coarse content category of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    /// Programming, debugging and other technical requests.
    Coding,
    /// Poems, songs, stories.
    Creative,
    /// Traffic from a social platform.
    Social,
    /// Scheduled triggers and dashboard commands.
    Operational,
    /// Chat-like traffic.
    Conversation,
    /// Anything else.
    General,
}

impl ContentCategory {
    /// Lowercase tag, as serialized.
    pub fn as_str(self) -> &'static str {
        match self {
            ContentCategory::Coding => "coding",
            ContentCategory::Creative => "creative",
            ContentCategory::Social => "social",
            ContentCategory::Operational => "operational",
            ContentCategory::Conversation => "conversation",
            ContentCategory::General => "general",
        }
    }
}

/// Result of [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// Lane the event is scheduled on.
    pub lane: Lane,
    /// Content category driving the lane choice.
    pub category: ContentCategory,
}

impl Classification {
    /// Whether the event falls in the category named by `tag`.
    pub fn is_content_category(&self, tag: &str) -> bool {
        self.category.as_str().eq_ignore_ascii_case(tag.trim())
    }
}

/// Assign a lane and content category. Pure and deterministic.
///
/// Coding content always goes to the standard lane. Otherwise an event is
/// latency-sensitive when speech is requested, when it is critical and speech
/// is not suppressed, or when it is conversational and would not be handled by
/// the reasoning agent. Anything else stays standard.
pub fn classify(event: &Event) -> Classification {
    let text = event.text();
    let category = categorize(event, text);

    let lane = if category == ContentCategory::Coding {
        Lane::Standard
    } else if event.payload.speak == Some(true) {
        Lane::LatencySensitive
    } else if event.priority == Priority::Critical && event.payload.speak != Some(false) {
        Lane::LatencySensitive
    } else if rules::is_conversational(event)
        && rules::predict_backend(event) != Backend::ReasoningAgent
    {
        Lane::LatencySensitive
    } else {
        Lane::Standard
    };

    Classification { lane, category }
}

fn categorize(event: &Event, text: &str) -> ContentCategory {
    if rules::has_coding_vocabulary(text) {
        ContentCategory::Coding
    } else if rules::is_operational(event) {
        ContentCategory::Operational
    } else if rules::has_creative_vocabulary(text) {
        ContentCategory::Creative
    } else if rules::is_social_source(&event.source) {
        ContentCategory::Social
    } else if rules::is_conversational(event) {
        ContentCategory::Conversation
    } else {
        ContentCategory::General
    }
}
