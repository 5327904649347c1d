//! Deterministic keyword and source rules.
//!
//! Used by the classifier to predict a backend and by the router whenever the
//! agent-based decision is unavailable. Nothing here performs I/O.

use crate::types::{Backend, DecisionSource, RoutingDecision};
use regex::Regex;
use stagehand_core::Event;
use std::sync::LazyLock;

/// Technical and coding context.
pub const PARTITION_CODE: &str = "code";
/// Everyday chat history.
pub const PARTITION_CONVERSATION: &str = "conversation";
/// Replies on social platforms.
pub const PARTITION_SOCIAL: &str = "social";
/// Creative writing.
pub const PARTITION_CREATIVE: &str = "creative";
/// Everything else.
pub const PARTITION_GENERAL: &str = "general";

/// Partitions a decision may name unless configured otherwise.
pub const DEFAULT_PARTITIONS: [&str; 5] = [
    PARTITION_CODE,
    PARTITION_CONVERSATION,
    PARTITION_SOCIAL,
    PARTITION_CREATIVE,
    PARTITION_GENERAL,
];

/// Tool names the fast-path dispatcher and spawned agents know about.
pub const TOOL_SPEAK: &str = "speak";
/// Avatar expression tool.
pub const TOOL_SET_EXPRESSION: &str = "set_expression";
/// Platform reply tool.
pub const TOOL_SEND_REPLY: &str = "send_reply";
/// Memory lookup tool served by the dispatcher itself.
pub const TOOL_RECALL_MEMORY: &str = "recall_memory";

static CODING: LazyLock<Regex> = LazyLock::new(|| {
    word_regex(&[
        "code",
        "coding",
        "bug",
        "bugs",
        "debug",
        "debugging",
        "function",
        "compile",
        "compiler",
        "stack trace",
        "stacktrace",
        "null pointer",
        "nullpointer",
        "segfault",
        "exception",
        "refactor",
        "regex",
        "sql",
        "api",
        "endpoint",
        "git",
        "commit",
        "pull request",
        "unit test",
        "python",
        "rust",
        "javascript",
        "typescript",
        "syntax",
    ])
});

static CREATIVE: LazyLock<Regex> = LazyLock::new(|| {
    word_regex(&[
        "poem", "song", "lyrics", "story", "rap", "haiku", "write me", "compose", "sing",
    ])
});

static URGENT: LazyLock<Regex> = LazyLock::new(|| {
    word_regex(&["urgent", "emergency", "asap", "right now", "immediately"])
});

#[allow(clippy::expect_used)]
fn word_regex(words: &[&str]) -> Regex {
    let alternation = words
        .iter()
        .map(|w| regex::escape(w).replace(' ', r"\s+"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).expect("static vocabulary regex")
}

/// Content containing technical or coding vocabulary.
pub fn has_coding_vocabulary(text: &str) -> bool {
    CODING.is_match(text)
}

/// Content asking for creative writing.
pub fn has_creative_vocabulary(text: &str) -> bool {
    CREATIVE.is_match(text)
}

/// Content signalling urgency.
pub fn has_urgent_vocabulary(text: &str) -> bool {
    URGENT.is_match(text)
}

/// Source tags of social platforms.
pub fn is_social_source(source: &str) -> bool {
    matches!(
        source.to_ascii_lowercase().as_str(),
        "twitter" | "x" | "mastodon" | "bluesky" | "social" | "reddit"
    )
}

/// Scheduled triggers and dashboard commands.
pub fn is_operational(event: &Event) -> bool {
    let source = event.source.to_ascii_lowercase();
    source == "scheduler" || source == "dashboard" || event.event_type == "scheduled_task"
}

/// Chat-like traffic: direct messages, mentions, replies.
pub fn is_conversational(event: &Event) -> bool {
    let kind = event.event_type.to_ascii_lowercase();
    !is_operational(event)
        && kind
            .split(|c: char| matches!(c, '_' | '-' | '.' | ':' | ' '))
            .any(|token| CONVERSATIONAL_TOKENS.contains(&token))
}

/// Event-type segments that mark chat-like traffic.
const CONVERSATIONAL_TOKENS: &[&str] = &[
    "chat", "message", "messages", "mention", "mentions", "reply", "replies", "comment",
    "comments", "dm", "dms", "whisper",
];

/// Backend the rules would pick, without building a full decision.
pub fn predict_backend(event: &Event) -> Backend {
    let text = event.text();
    if has_coding_vocabulary(text) || is_operational(event) {
        Backend::ReasoningAgent
    } else if has_creative_vocabulary(text) {
        Backend::Creative
    } else if is_conversational(event) || is_social_source(&event.source) {
        Backend::FastChat
    } else {
        Backend::ReasoningAgent
    }
}

/// Full rule-based decision for `event`.
pub fn fallback_decision(event: &Event) -> RoutingDecision {
    let text = event.text();
    let backend = predict_backend(event);

    let (use_case, partition, reason) = if has_coding_vocabulary(text) {
        ("coding", PARTITION_CODE, "coding vocabulary")
    } else if event.source.eq_ignore_ascii_case("scheduler") || event.event_type == "scheduled_task" {
        ("scheduled_task", PARTITION_GENERAL, "scheduled trigger")
    } else if event.source.eq_ignore_ascii_case("dashboard") {
        ("admin_command", PARTITION_GENERAL, "dashboard command")
    } else if backend == Backend::Creative {
        ("creative", PARTITION_CREATIVE, "creative request")
    } else if is_social_source(&event.source) {
        ("social_reply", PARTITION_SOCIAL, "social platform source")
    } else if backend == Backend::FastChat {
        ("chat", PARTITION_CONVERSATION, "conversational message")
    } else {
        ("general", PARTITION_GENERAL, "no specific rule matched")
    };

    let required_tools = match &event.required_tools {
        Some(tools) => tools.clone(),
        None => default_tools(event, use_case),
    };

    RoutingDecision {
        backend,
        use_case: use_case.to_string(),
        memory_partition: partition.to_string(),
        required_tools,
        reason: format!("rules: {reason}"),
        priority: event.priority,
        source: DecisionSource::Rules,
    }
}

fn default_tools(event: &Event, use_case: &str) -> Vec<String> {
    let mut tools = Vec::new();
    if event.payload.speak == Some(true) {
        tools.push(TOOL_SPEAK.to_string());
        tools.push(TOOL_SET_EXPRESSION.to_string());
    }
    if use_case == "social_reply" {
        tools.push(TOOL_SEND_REPLY.to_string());
    }
    tools
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use stagehand_core::{EventPayload, Priority};

    fn event(source: &str, kind: &str, text: &str) -> Event {
        Event::new(source, kind, Priority::Medium, EventPayload::message(text))
    }

    #[test]
    fn test_coding_vocabulary_word_boundaries() {
        assert!(has_coding_vocabulary("can you debug this function?"));
        assert!(has_coding_vocabulary("fix this null   pointer bug"));
        assert!(!has_coding_vocabulary("what a lovely bugle"));
        assert!(!has_coding_vocabulary("good morning chat"));
    }

    #[test]
    fn test_debug_this_function_routes_to_code_from_any_source() {
        for source in ["chat", "twitter", "dashboard", "scheduler", "discord"] {
            let decision = fallback_decision(&event(source, "chat_message", "please debug this function"));
            assert_eq!(decision.backend, Backend::ReasoningAgent, "source {source}");
            assert_eq!(decision.memory_partition, PARTITION_CODE);
            assert_eq!(decision.source, DecisionSource::Rules);
        }
    }

    #[test]
    fn test_social_reply_gets_reply_tool() {
        let decision = fallback_decision(&event("twitter", "mention", "love the stream!"));
        assert_eq!(decision.backend, Backend::FastChat);
        assert_eq!(decision.use_case, "social_reply");
        assert_eq!(decision.required_tools, vec![TOOL_SEND_REPLY]);
    }

    #[test]
    fn test_creative_and_chat() {
        let poem = fallback_decision(&event("chat", "chat_message", "write me a poem about cats"));
        assert_eq!(poem.backend, Backend::Creative);
        assert_eq!(poem.memory_partition, PARTITION_CREATIVE);

        let chat = fallback_decision(&event("chat", "chat_message", "how are you today?"));
        assert_eq!(chat.backend, Backend::FastChat);
        assert_eq!(chat.memory_partition, PARTITION_CONVERSATION);
    }

    #[test]
    fn test_scheduled_task_goes_to_agent() {
        let decision = fallback_decision(&event("scheduler", "scheduled_task", "daily recap"));
        assert_eq!(decision.backend, Backend::ReasoningAgent);
        assert_eq!(decision.use_case, "scheduled_task");
    }

    #[test]
    fn test_explicit_tools_override_and_speech_tools() {
        let mut e = event("chat", "chat_message", "hello").with_required_tools(vec!["wave".into()]);
        assert_eq!(fallback_decision(&e).required_tools, vec!["wave"]);

        e.required_tools = None;
        e.payload.speak = Some(true);
        assert_eq!(
            fallback_decision(&e).required_tools,
            vec![TOOL_SPEAK, TOOL_SET_EXPRESSION]
        );
    }

    #[test]
    fn test_conversational_matches_whole_segments() {
        for kind in ["chat_message", "dm", "twitter.dm", "direct-message", "reply", "comment_created"] {
            assert!(is_conversational(&event("api", kind, "hey")), "kind {kind}");
        }
        for kind in ["admin_reset", "admin_command", "chatops_deploy", "readme_update"] {
            assert!(!is_conversational(&event("api", kind, "hey")), "kind {kind}");
        }
        let admin = fallback_decision(&event("api", "admin_reset", "reset the overlay"));
        assert_eq!(admin.backend, Backend::ReasoningAgent);
    }

    #[test]
    fn test_priority_propagates() {
        let mut e = event("chat", "chat_message", "hello");
        e.priority = Priority::Critical;
        assert_eq!(fallback_decision(&e).priority, Priority::Critical);
    }
}
