use crate::config::RouterConfig;
use crate::prompts::render_routing_prompt;
use crate::rules::fallback_decision;
use crate::supervisor::{ProcessSupervisor, SpawnConfig, SpawnOutcome};
use crate::types::{Backend, DecisionSource, RoutingDecision};
use parking_lot::Mutex;
use serde::Deserialize;
use stagehand_core::{Event, MemoryService, MemorySnippet, Priority, StagehandError, StagehandResult};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Raw shape of an agent's routing answer, before validation.
#[derive(Debug, Deserialize)]
struct RawDecision {
    backend: Option<String>,
    #[serde(alias = "useCase")]
    use_case: Option<String>,
    #[serde(alias = "memoryPartition")]
    memory_partition: Option<String>,
    #[serde(default, alias = "requiredTools")]
    required_tools: Vec<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    priority: Option<String>,
}

/// Routing engine. [`Router::decide`] never fails: any problem on the agent
/// path falls back to the deterministic rules.
pub struct Router {
    supervisor: ProcessSupervisor,
    memory: Option<Arc<dyn MemoryService>>,
    config: RouterConfig,
    last_decision: Mutex<Option<RoutingDecision>>,
}

impl Router {
    /// Router spawning routing workers through `supervisor`.
    pub fn new(
        supervisor: ProcessSupervisor,
        memory: Option<Arc<dyn MemoryService>>,
        config: RouterConfig,
    ) -> Self {
        Self {
            supervisor,
            memory,
            config,
            last_decision: Mutex::new(None),
        }
    }

    /// Most recent decision, for status reporting.
    pub fn last_decision(&self) -> Option<RoutingDecision> {
        self.last_decision.lock().clone()
    }

    /// Choose a backend, partition and tool set for `event`.
    ///
    /// Asks a tool-less routing worker when `use_agent` is set and validates its
    /// answer. Spawn failures, timeouts and malformed output fall back to
    /// [`fallback_decision`](crate::rules::fallback_decision).
    pub async fn decide(&self, event: &Event) -> RoutingDecision {
        let decision = if self.config.use_agent {
            match self.decide_with_agent(event).await {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "Agent routing failed, using rules");
                    fallback_decision(event)
                }
            }
        } else {
            fallback_decision(event)
        };

        info!(
            event_id = %event.id,
            backend = %decision.backend,
            use_case = %decision.use_case,
            partition = %decision.memory_partition,
            source = ?decision.source,
            "Routing decision"
        );
        *self.last_decision.lock() = Some(decision.clone());
        decision
    }

    async fn decide_with_agent(&self, event: &Event) -> StagehandResult<RoutingDecision> {
        let snippets = self.recall_context(event).await;
        let prompt = render_routing_prompt(event, &self.config.partitions, &snippets);
        let outcome = self
            .supervisor
            .spawn(SpawnConfig::routing(prompt), &event.id, None)
            .await?;
        let SpawnOutcome::Finished { output, .. } = outcome else {
            return Err(StagehandError::RoutingParse("routing worker detached".into()));
        };
        parse_decision(&output.stdout, event, &self.config.partitions)
    }

    async fn recall_context(&self, event: &Event) -> Vec<MemorySnippet> {
        let Some(memory) = &self.memory else {
            return Vec::new();
        };
        if self.config.recall_limit == 0 || event.text().trim().is_empty() {
            return Vec::new();
        }
        match memory
            .recall(&self.config.context_partition, event.text(), self.config.recall_limit)
            .await
        {
            Ok(snippets) => snippets,
            Err(e) => {
                debug!(event_id = %event.id, error = %e, "Routing context recall failed");
                Vec::new()
            }
        }
    }
}

/// Parse and validate a routing decision from agent output.
///
/// The last JSON object in the output that names a backend is used. `backend`,
/// `use_case` and `memory_partition` must be present and well formed; the
/// partition must be one of `partitions` when that list is non-empty.
pub fn parse_decision(
    output: &str,
    event: &Event,
    partitions: &[String],
) -> StagehandResult<RoutingDecision> {
    let raw = json_objects(output)
        .into_iter()
        .rev()
        .filter_map(|candidate| serde_json::from_str::<RawDecision>(candidate).ok())
        .find(|raw| raw.backend.is_some())
        .ok_or_else(|| StagehandError::RoutingParse("no JSON decision in output".into()))?;

    let backend: Backend = raw
        .backend
        .as_deref()
        .ok_or_else(|| StagehandError::RoutingParse("missing backend".into()))?
        .parse()
        .map_err(StagehandError::RoutingParse)?;

    let use_case = raw
        .use_case
        .map(|u| u.trim().to_ascii_lowercase())
        .filter(|u| is_tag(u))
        .ok_or_else(|| StagehandError::RoutingParse("missing or malformed use_case".into()))?;

    let memory_partition = raw
        .memory_partition
        .map(|p| p.trim().to_ascii_lowercase())
        .filter(|p| is_tag(p))
        .ok_or_else(|| StagehandError::RoutingParse("missing or malformed memory_partition".into()))?;
    if !partitions.is_empty() && !partitions.iter().any(|p| *p == memory_partition) {
        return Err(StagehandError::RoutingParse(format!(
            "unknown memory partition '{memory_partition}'"
        )));
    }

    let priority = match raw.priority.as_deref().map(str::parse::<Priority>) {
        Some(Ok(p)) => p,
        _ => event.priority,
    };

    let required_tools = match &event.required_tools {
        Some(tools) => tools.clone(),
        None => raw
            .required_tools
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
    };

    Ok(RoutingDecision {
        backend,
        use_case,
        memory_partition,
        required_tools,
        reason: raw.reason.unwrap_or_default(),
        priority,
        source: DecisionSource::Agent,
    })
}

fn is_tag(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 64
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Balanced top-level `{...}` spans in `text`, string-literal aware.
fn json_objects(text: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        found.push(&text[s..=idx]);
                    }
                }
            }
            _ => {}
        }
    }
    found
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{AgentBinaryConfig, SupervisorConfig};
    use crate::rules::DEFAULT_PARTITIONS;
    use stagehand_core::EventPayload;

    fn partitions() -> Vec<String> {
        DEFAULT_PARTITIONS.iter().map(|p| p.to_string()).collect()
    }

    fn event(text: &str) -> Event {
        Event::new("chat", "chat_message", Priority::Medium, EventPayload::message(text))
    }

    fn router_with_script(script: &str) -> Router {
        let supervisor = ProcessSupervisor::new(SupervisorConfig {
            agent: AgentBinaryConfig {
                program: "sh".into(),
                args: vec!["-c".into(), script.into()],
                ..Default::default()
            },
            ..Default::default()
        });
        Router::new(supervisor, None, RouterConfig::default())
    }

    #[test]
    fn test_parse_decision_with_chatter() {
        let output = r#"Thinking about it... {"draft": true}
Final answer:
{"backend": "creative", "use_case": "Song_Request", "memory_partition": "creative", "required_tools": ["speak", " "], "reason": "asked for a song {with braces}"}"#;
        let d = parse_decision(output, &event("sing"), &partitions()).unwrap();
        assert_eq!(d.backend, Backend::Creative);
        assert_eq!(d.use_case, "song_request");
        assert_eq!(d.required_tools, vec!["speak"]);
        assert_eq!(d.reason, "asked for a song {with braces}");
        assert_eq!(d.priority, Priority::Medium);
        assert_eq!(d.source, DecisionSource::Agent);
    }

    #[test]
    fn test_parse_decision_rejects_malformed() {
        let e = event("hi");
        let p = partitions();
        assert!(parse_decision("no json here", &e, &p).is_err());
        assert!(parse_decision(r#"{"backend":"gpt5","use_case":"chat","memory_partition":"general"}"#, &e, &p).is_err());
        assert!(parse_decision(r#"{"backend":"fast_chat","memory_partition":"general"}"#, &e, &p).is_err());
        assert!(parse_decision(r#"{"backend":"fast_chat","use_case":"chat now!","memory_partition":"general"}"#, &e, &p).is_err());
        assert!(parse_decision(r#"{"backend":"fast_chat","use_case":"chat","memory_partition":"secrets"}"#, &e, &p).is_err());
    }

    #[test]
    fn test_priority_override_and_tool_override() {
        let e = event("hi").with_required_tools(vec!["wave".into()]);
        let d = parse_decision(
            r#"{"backend":"fast_chat","useCase":"chat","memoryPartition":"conversation","priority":"critical","requiredTools":["speak"]}"#,
            &e,
            &partitions(),
        )
        .unwrap();
        assert_eq!(d.priority, Priority::Critical);
        assert_eq!(d.required_tools, vec!["wave"]);
    }

    #[tokio::test]
    async fn test_decide_uses_agent_output() {
        let router = router_with_script(
            r#"cat >/dev/null; echo '{"backend":"fast_chat","use_case":"chat","memory_partition":"conversation","reason":"small talk"}'"#,
        );
        let d = router.decide(&event("hello")).await;
        assert_eq!(d.source, DecisionSource::Agent);
        assert_eq!(d.backend, Backend::FastChat);
        assert_eq!(router.last_decision(), Some(d));
    }

    #[tokio::test]
    async fn test_decide_falls_back_on_spawn_failure() {
        let router = router_with_script("exit 0");
        let router = Router {
            supervisor: ProcessSupervisor::new(SupervisorConfig {
                agent: AgentBinaryConfig {
                    program: "/nonexistent/router-agent".into(),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..router
        };
        let d = router.decide(&event("please debug this function")).await;
        assert_eq!(d.source, DecisionSource::Rules);
        assert_eq!(d.backend, Backend::ReasoningAgent);
        assert_eq!(d.memory_partition, "code");
    }

    #[tokio::test]
    async fn test_decide_falls_back_on_failure_exit_and_garbage() {
        let failing = router_with_script("cat >/dev/null; exit 2");
        assert_eq!(failing.decide(&event("hello")).await.source, DecisionSource::Rules);

        let garbage = router_with_script("cat >/dev/null; echo 'I think fast chat'");
        assert_eq!(garbage.decide(&event("hello")).await.source, DecisionSource::Rules);
    }

    #[tokio::test]
    async fn test_rules_only_mode_spawns_nothing() {
        let mut router = router_with_script("exit 1");
        router.config.use_agent = false;
        let d = router.decide(&event("how are you?")).await;
        assert_eq!(d.source, DecisionSource::Rules);
        assert!(router.supervisor.is_empty());
    }
}
