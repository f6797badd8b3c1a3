//! Scripted collaborators shared by the runtime integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loom_core::{ThreadId, WorldlineId};
use loom_events::{EngineState, Event, EventPayload, EventStore, EventType, StateEffect, WorldlineManager};
use loom_runtime::{
    Executor, ExecutorError, ProducedArtifact, Provider, ProviderError, ProviderEvent,
    ProviderFactory, ProviderRequest, ProviderStream, RuntimeConfig, ToolInvocation, ToolOutput,
    TurnRunner,
};
use parking_lot::Mutex;
use serde_json::{Value, json};

// ── Replies ──

/// One scripted provider response.
#[derive(Clone, Debug)]
pub struct Reply {
    pub delay: Option<Duration>,
    pub events: Vec<Result<ProviderEvent, ProviderError>>,
}

impl Reply {
    /// Final assistant text, streamed in two fragments.
    pub fn text(text: &str) -> Self {
        let (a, b) = text.split_at(text.len() / 2);
        Self {
            delay: None,
            events: vec![
                Ok(ProviderEvent::TextDelta { delta: a.into() }),
                Ok(ProviderEvent::TextDelta { delta: b.into() }),
                Ok(ProviderEvent::Done),
            ],
        }
    }

    /// A single tool call whose id resolves on the first argument fragment.
    pub fn tool(name: &str, arguments: Value) -> Self {
        Self::tools(&[(name, arguments)])
    }

    /// Several tool calls in one response.
    pub fn tools(calls: &[(&str, Value)]) -> Self {
        let mut events = Vec::new();
        for (index, (name, arguments)) in calls.iter().enumerate() {
            events.push(Ok(ProviderEvent::ToolCallStart {
                index,
                call_id: None,
                name: (*name).to_string(),
            }));
            events.push(Ok(ProviderEvent::ToolCallDelta {
                index,
                call_id: Some(loom_core::CallId::new().into_inner()),
                arguments_delta: arguments.to_string(),
            }));
        }
        events.push(Ok(ProviderEvent::Done));
        Self { delay: None, events }
    }

    /// Plan text followed by a tool call.
    pub fn plan_then_tool(plan: &str, name: &str, arguments: Value) -> Self {
        let mut reply = Self::tool(name, arguments);
        reply.events.insert(0, Ok(ProviderEvent::TextDelta { delta: plan.into() }));
        reply
    }

    /// A stream that breaks off.
    pub fn broken() -> Self {
        Self {
            delay: None,
            events: vec![
                Ok(ProviderEvent::TextDelta { delta: "par".into() }),
                Err(ProviderError::Stream("connection reset".into())),
            ],
        }
    }

    /// Wait `delay` before streaming.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

// ── Provider ──

type Responder = dyn Fn(&ProviderRequest) -> Reply + Send + Sync;

/// Provider answering from a closure over the request.
pub struct ScriptedProvider {
    respond: Box<Responder>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(respond: impl Fn(&ProviderRequest) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Replies in order; once exhausted, answers with plain text.
    pub fn sequence(replies: Vec<Reply>) -> Arc<Self> {
        let queue = Mutex::new(VecDeque::from(replies));
        Self::new(move |_| queue.lock().pop_front().unwrap_or_else(|| Reply::text("nothing left")))
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "mock"
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<ProviderStream, ProviderError> {
        self.requests.lock().push(request.clone());
        let reply = (self.respond)(request);
        let stream = async_stream::stream! {
            if let Some(delay) = reply.delay {
                tokio::time::sleep(delay).await;
            }
            for event in reply.events {
                yield event;
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Factory serving one provider for model `mock`.
pub struct StaticFactory(pub Arc<ScriptedProvider>);

#[async_trait]
impl ProviderFactory for StaticFactory {
    async fn create(&self, provider: &str, model: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        if model != "mock" {
            return Err(ProviderError::UnknownModel {
                provider: provider.into(),
                model: model.into(),
            });
        }
        Ok(self.0.clone())
    }
}

// ── Executor ──

/// Executor recording invocations and restores.
///
/// `run_sql` yields one table artifact whose bytes are the SQL text; a
/// `create table <name>` statement also reports a `table_created` effect.
/// SQL containing `boom` raises; SQL containing `syntax` returns an error
/// result without artifacts.
#[derive(Default)]
pub struct FakeExecutor {
    pub invocations: Mutex<Vec<ToolInvocation>>,
    pub restores: Mutex<Vec<(WorldlineId, EngineState)>>,
}

impl FakeExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.invocations.lock().len()
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ExecutorError> {
        self.invocations.lock().push(invocation.clone());
        let code = invocation
            .arguments
            .get("sql")
            .or_else(|| invocation.arguments.get("code"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        if code.contains("boom") {
            return Err(ExecutorError::Failed("engine crashed".into()));
        }
        let name = invocation
            .arguments
            .get("artifact_name")
            .and_then(Value::as_str)
            .unwrap_or("result")
            .to_string();
        let state_effects = code
            .strip_prefix("create table ")
            .and_then(|rest| rest.split_whitespace().next())
            .map(|table| {
                vec![StateEffect::TableCreated {
                    name: table.to_string(),
                    source: None,
                }]
            })
            .unwrap_or_default();
        if code.contains("syntax") {
            return Ok(ToolOutput {
                output: json!({"error": "syntax error"}),
                preview: "syntax error".into(),
                is_error: true,
                ..ToolOutput::default()
            });
        }
        Ok(ToolOutput {
            output: json!({"rows": 1}),
            preview: format!("ran: {code}"),
            is_error: false,
            artifacts: vec![ProducedArtifact {
                name,
                artifact_type: "table".into(),
                content: Some(code.into_bytes()),
                content_hash: None,
            }],
            state_effects,
        })
    }

    async fn restore_state(
        &self,
        worldline_id: &WorldlineId,
        state: &EngineState,
    ) -> Result<(), ExecutorError> {
        self.restores.lock().push((worldline_id.clone(), state.clone()));
        Ok(())
    }
}

// ── Harness ──

pub struct Harness {
    pub store: Arc<EventStore>,
    pub manager: WorldlineManager,
    pub thread_id: ThreadId,
    pub worldline_id: WorldlineId,
    pub provider: Arc<ScriptedProvider>,
    pub executor: Arc<FakeExecutor>,
    pub runner: TurnRunner,
}

impl Harness {
    pub fn new(provider: Arc<ScriptedProvider>) -> Self {
        Self::with_config(provider, RuntimeConfig::default())
    }

    pub fn with_config(provider: Arc<ScriptedProvider>, config: RuntimeConfig) -> Self {
        let store = Arc::new(EventStore::in_memory().unwrap());
        let manager = WorldlineManager::new(store.clone());
        let thread = store.create_thread("analysis").unwrap();
        let worldline = manager.create_worldline(&thread.id, "main").unwrap();
        let executor = FakeExecutor::new();
        let runner = TurnRunner::new(
            store.clone(),
            Arc::new(StaticFactory(provider.clone())),
            executor.clone(),
            config,
        );
        Self {
            store,
            manager,
            thread_id: thread.id,
            worldline_id: worldline.id,
            provider,
            executor,
            runner,
        }
    }

    pub fn timeline(&self, worldline_id: &WorldlineId) -> Vec<Event> {
        self.manager.timeline(worldline_id).unwrap()
    }
}

// ── Timeline helpers ──

pub fn types(events: &[Event]) -> Vec<EventType> {
    events.iter().map(|e| e.event_type).collect()
}

pub fn of_type(events: &[Event], event_type: EventType) -> Vec<EventPayload> {
    events
        .iter()
        .filter(|e| e.event_type == event_type)
        .map(|e| e.typed_payload().unwrap())
        .collect()
}

/// `(from, to, reason)` of every state transition.
pub fn transitions(events: &[Event]) -> Vec<(String, String, String)> {
    of_type(events, EventType::StateTransition)
        .into_iter()
        .map(|p| match p {
            EventPayload::StateTransition(t) => {
                (t.from_state.to_string(), t.to_state.to_string(), t.reason)
            }
            other => panic!("unexpected payload {other:?}"),
        })
        .collect()
}

/// Reasons of every skipped call.
pub fn skip_reasons(events: &[Event]) -> Vec<String> {
    of_type(events, EventType::ToolCallSkipped)
        .into_iter()
        .map(|p| match p {
            EventPayload::ToolCallSkipped(s) => s.reason,
            other => panic!("unexpected payload {other:?}"),
        })
        .collect()
}
