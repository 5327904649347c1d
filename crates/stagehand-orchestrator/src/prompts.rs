use crate::summary::{SUMMARY_CLOSE, SUMMARY_OPEN};
use crate::types::{Backend, RoutingDecision};
use stagehand_core::{Event, MemorySnippet};

/// Longest event message embedded in any prompt, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Persona used when the config sets none.
pub const DEFAULT_PERSONA: &str = "\
You are a friendly live-streaming co-host. You keep replies short, warm and \
spoken-word friendly unless the task calls for detail.";

const ROUTER_PROMPT: &str = "\
You are the routing brain of a streaming assistant. Decide which backend \
should handle the event below. Do NOT call any tools and do NOT answer the \
event yourself.

Backends:
- reasoning_agent: multi-step work, coding, debugging, scheduled jobs, admin commands.
- fast_chat: short conversational replies and social mentions.
- creative: poems, songs, stories and other open-ended writing.

Respond with a single JSON object and nothing else:
{\"backend\": \"...\", \"use_case\": \"snake_case_tag\", \"memory_partition\": \"...\", \
\"required_tools\": [\"...\"], \"reason\": \"one sentence\", \"priority\": \"low|medium|high|critical\"}
Only set priority above the event's own priority for genuinely urgent content.";

const TASK_PROMPT: &str = "\
Handle the event below end to end. Use only the tools you have been granted. \
When you are done, end your output with a summary block exactly like:";

const CHAT_PROMPT: &str = "Reply conversationally in one to three sentences.";
const SOCIAL_PROMPT: &str = "\
Write a public reply suitable for the platform the message came from. \
Stay under 280 characters. Use the send_reply tool if it is offered.";
const CREATIVE_PROMPT: &str = "\
Write the requested piece. Keep it performable out loud and under twenty lines.";

/// Cut `text` to at most `max` characters on a char boundary.
pub fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn describe_event(event: &Event) -> String {
    let mut out = format!(
        "Event {} from '{}' (type '{}', priority {})",
        event.id, event.source, event.event_type, event.priority
    );
    if let Some(user) = &event.payload.user {
        out.push_str(&format!(", user '{user}'"));
    }
    out.push_str(":\n");
    out.push_str(truncate(event.text(), MAX_MESSAGE_CHARS));
    out
}

fn render_snippets(out: &mut String, snippets: &[MemorySnippet]) {
    if snippets.is_empty() {
        return;
    }
    out.push_str("\n\nRelevant context:\n");
    for snippet in snippets {
        out.push_str("- ");
        out.push_str(truncate(&snippet.content, 400));
        out.push('\n');
    }
}

/// Instruction payload for a tool-less routing worker.
pub fn render_routing_prompt(
    event: &Event,
    partitions: &[String],
    snippets: &[MemorySnippet],
) -> String {
    let mut out = String::from(ROUTER_PROMPT);
    out.push_str("\n\nMemory partitions: ");
    out.push_str(&partitions.join(", "));
    render_snippets(&mut out, snippets);
    out.push_str("\n\n");
    out.push_str(&describe_event(event));
    out
}

/// Instruction payload for a full task-processing worker.
pub fn render_task_prompt(
    persona: &str,
    event: &Event,
    decision: &RoutingDecision,
    snippets: &[MemorySnippet],
) -> String {
    let mut out = format!("{persona}\n\n{TASK_PROMPT}\n{SUMMARY_OPEN}\n");
    out.push_str(
        r#"{"actions": ["..."], "key_info": "...", "response_type": "...", "complexity": "low|medium|high"}"#,
    );
    out.push_str(&format!("\n{SUMMARY_CLOSE}\n\nUse case: {}", decision.use_case));
    if !decision.required_tools.is_empty() {
        out.push_str(&format!("\nTools: {}", decision.required_tools.join(", ")));
    }
    render_snippets(&mut out, snippets);
    out.push_str("\n\n");
    out.push_str(&describe_event(event));
    out
}

/// System prompt for a direct-generation backend.
pub fn system_prompt(persona: &str, decision: &RoutingDecision) -> String {
    let task = match (decision.backend, decision.use_case.as_str()) {
        (Backend::Creative, _) => CREATIVE_PROMPT,
        (_, "social_reply") => SOCIAL_PROMPT,
        _ => CHAT_PROMPT,
    };
    format!("{persona}\n\n{task}")
}

/// User-turn content for a direct-generation call.
pub fn user_content(event: &Event) -> String {
    let text = truncate(event.text(), MAX_MESSAGE_CHARS);
    match &event.payload.user {
        Some(user) => format!("{user}: {text}"),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::fallback_decision;
    use stagehand_core::{EventPayload, Priority};

    fn event(text: &str) -> Event {
        Event::new(
            "chat",
            "chat_message",
            Priority::High,
            EventPayload::message(text).with_user("ana"),
        )
        .with_id("e1")
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn test_routing_prompt_is_bounded() {
        let long = "x".repeat(MAX_MESSAGE_CHARS * 2);
        let prompt = render_routing_prompt(&event(&long), &["code".into(), "general".into()], &[]);
        assert!(prompt.len() < MAX_MESSAGE_CHARS + ROUTER_PROMPT.len() + 200);
        assert!(prompt.contains("Memory partitions: code, general"));
        assert!(prompt.contains("Event e1 from 'chat'"));
    }

    #[test]
    fn test_task_prompt_asks_for_summary() {
        let e = event("fix this null pointer bug");
        let prompt = render_task_prompt(DEFAULT_PERSONA, &e, &fallback_decision(&e), &[]);
        assert!(prompt.contains(SUMMARY_OPEN));
        assert!(prompt.contains(SUMMARY_CLOSE));
        assert!(prompt.contains("Use case: coding"));
        assert!(prompt.ends_with("fix this null pointer bug"));
    }

    #[test]
    fn test_system_prompt_by_use_case() {
        let mut decision = fallback_decision(&event("hello"));
        assert!(system_prompt("P", &decision).ends_with(CHAT_PROMPT));
        decision.use_case = "social_reply".into();
        assert!(system_prompt("P", &decision).ends_with(SOCIAL_PROMPT));
        assert_eq!(user_content(&event("hello")), "ana: hello");
    }
}
