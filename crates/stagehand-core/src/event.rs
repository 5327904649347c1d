use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ordered event priority. Variants are declared lowest first so the derived
/// `Ord` gives `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work, processed when nothing else is pending.
    Low,
    /// Default priority for ordinary events.
    #[default]
    Medium,
    /// User-facing events that should be handled promptly.
    High,
    /// Urgent events; these are spoken unless speech is suppressed.
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" | "normal" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" | "urgent" => Ok(Priority::Critical),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// Structured event payload. Only `message`, `user` and `speak` are
/// interpreted by the core; everything else is carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Free-text content of the event, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Originating user or account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// `Some(true)` requests synthesized speech, `Some(false)` suppresses it.
    #[serde(
        default,
        alias = "requires_tts",
        alias = "requiresTTS",
        skip_serializing_if = "Option::is_none"
    )]
    pub speak: Option<bool>,
    /// Any other source-specific fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EventPayload {
    /// Payload carrying only a text message.
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            message: Some(text.into()),
            ..Self::default()
        }
    }

    /// Set the originating user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the speech flag.
    pub fn with_speak(mut self, speak: bool) -> Self {
        self.speak = Some(speak);
        self
    }
}

/// Normalized unit of work submitted to the orchestration core.
///
/// Events are immutable once enqueued; a retry is a clone produced by
/// [`Event::next_attempt`], never an in-place mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique id assigned by the producer.
    #[serde(default = "generate_id")]
    pub id: String,
    /// Origin tag (`chat`, `twitter`, `scheduler`, `dashboard`, ...).
    pub source: String,
    /// Event type (`chat_message`, `mention`, `scheduled_task`, ...).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Processing priority.
    #[serde(default)]
    pub priority: Priority,
    /// Structured payload.
    #[serde(default)]
    pub payload: EventPayload,
    /// Optional opaque upstream context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    /// Explicit tool override list.
    #[serde(
        default,
        rename = "requiredTools",
        alias = "required_tools",
        skip_serializing_if = "Option::is_none"
    )]
    pub required_tools: Option<Vec<String>>,
    /// Creation time.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Zero for the first processing attempt, incremented on each retry.
    #[serde(default)]
    pub attempt: u32,
}

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

impl Event {
    /// Create a new event with a generated id and the current timestamp.
    pub fn new(
        source: impl Into<String>,
        event_type: impl Into<String>,
        priority: Priority,
        payload: EventPayload,
    ) -> Self {
        Self {
            id: generate_id(),
            source: source.into(),
            event_type: event_type.into(),
            priority,
            payload,
            context: None,
            required_tools: None,
            timestamp: Utc::now(),
            attempt: 0,
        }
    }

    /// Replace the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Attach upstream context.
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Attach an explicit tool override list.
    pub fn with_required_tools(mut self, tools: Vec<String>) -> Self {
        self.required_tools = Some(tools);
        self
    }

    /// The free-text message, or an empty string.
    pub fn text(&self) -> &str {
        self.payload.message.as_deref().unwrap_or_default()
    }

    /// Clone of this event for the next processing attempt.
    pub fn next_attempt(&self) -> Self {
        let mut next = self.clone();
        next.attempt = self.attempt.saturating_add(1);
        next
    }
}
