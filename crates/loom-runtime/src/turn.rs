//! Turn runner: one user message through planning, guarded tool execution,
//! and presentation.
//!
//! Interactive streams, background jobs, and subagent children all run turns
//! through [`TurnRunner::run_turn`]. Every turn owns a [`TurnContext`] holding
//! its chain writer, state machine, and frame sink; nothing else is shared
//! between concurrent turns except the store and the worldline locks.

use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use futures::future::BoxFuture;
use loom_core::text::truncate_preview;
use loom_core::{ArtifactId, JobId, TurnId, WorldlineId, now_rfc3339};
use loom_events::types::{
    AssistantTextPayload, ToolCallPayload, ToolCallSkippedPayload, ToolResultPayload,
    UserMessagePayload,
};
use loom_events::{
    ArtifactRecord, Event, EventPayload, EventStore, EventType, Producer, TurnState,
    WorldlineManager,
};
use loom_settings::LoomSettings;
use loom_stream::Frame;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{Span, debug, error, info, instrument, warn};

use crate::dedup::{
    ArtifactMemory, dedup_key, intent_key, logical_key, normalize_arguments, requests_rerun,
    sha256_hex,
};
use crate::errors::{ReasonCode, Result, RuntimeError};
use crate::executor::{ArtifactStore, Executor, ProducedArtifact, ToolInvocation};
use crate::locks::{WorldlineGuard, WorldlineLocks};
use crate::persist::ChainWriter;
use crate::provider::{Provider, ProviderFactory, ProviderRequest};
use crate::sink::FrameSink;
use crate::state_machine::TurnStateMachine;
use crate::stream_processor::{PendingToolCall, process_stream};
use crate::tools::ToolKind;

/// Runtime knobs, resolved from settings once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Default iteration cap per turn.
    pub max_iterations: u32,
    /// Prior turns searched for duplicate calls.
    pub dedup_window_turns: usize,
    /// Append attempts per event when the head moves underneath a turn.
    pub append_retry_limit: u32,
    /// Children running at once per fan-out.
    pub subagent_max_parallel: usize,
    /// Default per-child timeout.
    pub subagent_timeout_secs: u64,
    /// Maximum tasks per fan-out.
    pub subagent_max_tasks: usize,
    /// Characters kept in result previews.
    pub preview_chars: usize,
}

impl RuntimeConfig {
    /// Extract runtime knobs from settings.
    #[must_use]
    pub fn from_settings(settings: &LoomSettings) -> Self {
        Self {
            max_iterations: settings.runtime.max_iterations,
            dedup_window_turns: settings.runtime.dedup_window_turns,
            append_retry_limit: settings.runtime.append_retry_limit,
            subagent_max_parallel: settings.subagents.max_parallel,
            subagent_timeout_secs: settings.subagents.default_timeout_secs,
            subagent_max_tasks: settings.subagents.max_tasks,
            preview_chars: settings.subagents.preview_chars,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_settings(&LoomSettings::default())
    }
}

/// One turn to run.
#[derive(Debug)]
pub struct TurnRequest {
    /// Target worldline.
    pub worldline_id: WorldlineId,
    /// User message opening the turn.
    pub message: String,
    /// Provider name.
    pub provider: String,
    /// Model name.
    pub model: String,
    /// Iteration cap override.
    pub max_iterations: Option<u32>,
    /// Bypass the duplicate guards.
    pub allow_rerun: bool,
    /// Subagent nesting depth (0 for user-initiated turns).
    pub depth: u32,
    /// Frame channel of an interactive client.
    pub sink: Option<mpsc::Sender<Frame>>,
    /// Background job driving the turn.
    pub job_id: Option<JobId>,
}

impl TurnRequest {
    /// Request with defaults for everything but the essentials.
    #[must_use]
    pub fn new(
        worldline_id: WorldlineId,
        message: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            worldline_id,
            message: message.into(),
            provider: provider.into(),
            model: model.into(),
            max_iterations: None,
            allow_rerun: false,
            depth: 0,
            sink: None,
            job_id: None,
        }
    }
}

/// How a turn ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Turn id.
    pub turn_id: TurnId,
    /// Worldline it ran on.
    pub worldline_id: WorldlineId,
    /// `completed` or `error`.
    pub final_state: TurnState,
    /// Final assistant message, when the turn completed.
    pub final_message: Option<String>,
    /// Failure description, when the turn errored.
    pub error: Option<String>,
    /// Reason code of the failure.
    pub reason: Option<ReasonCode>,
    /// Provider calls made.
    pub iterations: u32,
}

impl TurnOutcome {
    /// Whether the turn reached `completed`.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.final_state == TurnState::Completed
    }

    /// Short description: the answer for completed turns, `reason: error`
    /// otherwise.
    #[must_use]
    pub fn summary(&self, max_chars: usize) -> String {
        let text = match (&self.final_message, &self.error, self.reason) {
            (_, Some(error), Some(reason)) => format!("{reason}: {error}"),
            (_, Some(error), None) => error.clone(),
            (Some(message), None, _) => message.clone(),
            (None, None, _) => String::new(),
        };
        truncate_preview(&text, max_chars)
    }
}

/// Per-request turn state.
pub(crate) struct TurnContext {
    pub(crate) turn_id: TurnId,
    pub(crate) worldline_id: WorldlineId,
    pub(crate) provider: String,
    pub(crate) model: String,
    pub(crate) depth: u32,
    pub(crate) writer: ChainWriter,
    machine: TurnStateMachine,
    sink: FrameSink,
    hints: Vec<String>,
    empty_retry_used: bool,
    allow_rerun: bool,
    max_iterations: u32,
    iterations: u32,
    final_message: Option<String>,
    started: Instant,
}

impl TurnContext {
    /// Persist `payload` on the turn's chain and stream it.
    pub(crate) async fn append(&mut self, payload: EventPayload) -> Result<Event> {
        let event = self.writer.append(&payload)?;
        debug!(event_id = %event.id, event_type = %event.event_type, "event appended");
        self.sink.event(&event).await;
        Ok(event)
    }

    /// Record the user message and the opening transition.
    async fn begin(&mut self, message: &str) -> Result<()> {
        let _ = self
            .append(EventPayload::UserMessage(UserMessagePayload {
                turn_id: self.turn_id.clone(),
                content: message.to_string(),
                rerun_requested: self.allow_rerun,
            }))
            .await?;
        let start = self.machine.start()?;
        let _ = self.append(EventPayload::StateTransition(start)).await?;
        Ok(())
    }

    /// Move the state machine and record the move. Same-state moves are
    /// silent.
    pub(crate) async fn transition(&mut self, to: TurnState, reason: ReasonCode) -> Result<()> {
        if let Some(payload) = self.machine.transition(to, reason)? {
            let _ = self.append(EventPayload::StateTransition(payload)).await?;
        }
        Ok(())
    }

    /// Record a call that will not execute, with the result the model sees
    /// instead.
    pub(crate) async fn skip(
        &mut self,
        call: &PendingToolCall,
        reason: ReasonCode,
        synthetic_result: Value,
    ) -> Result<()> {
        let _ = self
            .append(EventPayload::ToolCallSkipped(ToolCallSkippedPayload {
                turn_id: self.turn_id.clone(),
                call_id: call.call_id.clone(),
                tool_name: call.name.clone(),
                reason: reason.as_str().to_string(),
                synthetic_result,
            }))
            .await?;
        metrics::counter!("tool_calls_skipped_total", "reason" => reason.as_str()).increment(1);
        info!(call_id = %call.call_id, tool = %call.name, %reason, "tool call skipped");
        Ok(())
    }
}

/// Runs turns against the event log.
#[derive(Clone)]
pub struct TurnRunner {
    store: Arc<EventStore>,
    manager: Arc<WorldlineManager>,
    providers: Arc<dyn ProviderFactory>,
    executor: Arc<dyn Executor>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    locks: Arc<WorldlineLocks>,
    config: RuntimeConfig,
}

impl TurnRunner {
    /// Runner with its own worldline locks and no artifact store.
    #[must_use]
    pub fn new(
        store: Arc<EventStore>,
        providers: Arc<dyn ProviderFactory>,
        executor: Arc<dyn Executor>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            manager: Arc::new(WorldlineManager::new(store.clone())),
            store,
            providers,
            executor,
            artifacts: None,
            locks: Arc::new(WorldlineLocks::new()),
            config,
        }
    }

    /// Persist inline artifact bytes through `artifacts`.
    #[must_use]
    pub fn with_artifact_store(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Share worldline locks with another runner or the HTTP layer.
    #[must_use]
    pub fn with_locks(mut self, locks: Arc<WorldlineLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// Worldline locks.
    #[must_use]
    pub fn locks(&self) -> &Arc<WorldlineLocks> {
        &self.locks
    }

    /// Event store.
    #[must_use]
    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Worldline manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<WorldlineManager> {
        &self.manager
    }

    /// Runtime knobs.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Run a turn, waiting for the worldline to be free.
    ///
    /// Boxed so subagent children can run turns from inside a turn.
    pub fn run_turn(&self, request: TurnRequest) -> BoxFuture<'static, Result<TurnOutcome>> {
        let runner = self.clone();
        async move {
            let guard = runner.locks.acquire(&request.worldline_id).await;
            runner.run_locked(request, guard).await
        }
        .boxed()
    }

    /// Run a turn while holding the worldline's lock.
    ///
    /// Returns `Err` only when the turn could not be opened (unknown
    /// worldline, failed first append). Failures after that end the turn in
    /// `error` and are reported through the outcome.
    #[instrument(skip_all, fields(worldline_id = %request.worldline_id, turn_id, job_id, depth = request.depth))]
    pub async fn run_locked(
        &self,
        request: TurnRequest,
        _guard: WorldlineGuard,
    ) -> Result<TurnOutcome> {
        let turn_id = TurnId::new();
        let span = Span::current();
        let _ = span.record("turn_id", turn_id.as_str());
        if let Some(job_id) = &request.job_id {
            let _ = span.record("job_id", job_id.as_str());
        }

        let sink = match request.sink.clone() {
            Some(tx) => FrameSink::new(request.worldline_id.clone(), tx),
            None => FrameSink::detached(request.worldline_id.clone()),
        };

        let opened = self
            .manager
            .timeline(&request.worldline_id)
            .map_err(RuntimeError::from)
            .and_then(|timeline| {
                let writer = ChainWriter::open(
                    self.store.clone(),
                    request.worldline_id.clone(),
                    self.config.append_retry_limit,
                )?;
                Ok((last_turn_state(&timeline), writer))
            });
        let (previous, writer) = match opened {
            Ok(opened) => opened,
            Err(e) => return reject(sink, e).await,
        };

        let allow_rerun = request.allow_rerun || requests_rerun(&request.message);
        let mut ctx = TurnContext {
            machine: TurnStateMachine::new(turn_id.clone(), previous),
            turn_id,
            worldline_id: request.worldline_id.clone(),
            provider: request.provider.clone(),
            model: request.model.clone(),
            depth: request.depth,
            writer,
            sink,
            hints: Vec::new(),
            empty_retry_used: false,
            allow_rerun,
            max_iterations: request.max_iterations.unwrap_or(self.config.max_iterations).max(1),
            iterations: 0,
            final_message: None,
            started: Instant::now(),
        };

        if let Err(e) = ctx.begin(&request.message).await {
            return reject(ctx.sink, e).await;
        }
        info!(previous = ?previous, allow_rerun, "turn started");

        let result = self.drive(&mut ctx).await;
        Ok(self.finish(ctx, result).await)
    }

    async fn drive(&self, ctx: &mut TurnContext) -> Result<()> {
        let provider = self.providers.create(&ctx.provider, &ctx.model).await?;

        while ctx.iterations < ctx.max_iterations {
            ctx.iterations += 1;
            if self.iterate(ctx, provider.as_ref()).await? {
                return Ok(());
            }
        }
        Err(RuntimeError::IterationCap {
            max_iterations: ctx.max_iterations,
        })
    }

    /// One provider call. Returns `true` once the turn completed.
    async fn iterate(&self, ctx: &mut TurnContext, provider: &dyn Provider) -> Result<bool> {
        let timeline = self.manager.timeline(&ctx.worldline_id)?;
        let memory =
            ArtifactMemory::from_timeline(&timeline, &ctx.turn_id, self.config.dedup_window_turns);
        let request = ProviderRequest {
            worldline_id: ctx.worldline_id.clone(),
            turn_id: ctx.turn_id.clone(),
            timeline,
            inventory: memory.inventory().to_vec(),
            hints: std::mem::take(&mut ctx.hints),
        };

        let stream = provider.stream(&request).await?;
        let response = process_stream(stream, &mut ctx.sink).await?;
        debug!(
            iteration = ctx.iterations,
            text_len = response.text.len(),
            tool_calls = response.tool_calls.len(),
            "provider response"
        );

        let mut calls = response.tool_calls.into_iter();
        let Some(first) = calls.next() else {
            self.present(ctx, response.text).await?;
            return Ok(true);
        };

        if !response.text.trim().is_empty() {
            let _ = ctx
                .append(EventPayload::AssistantPlan(AssistantTextPayload {
                    turn_id: ctx.turn_id.clone(),
                    content: response.text,
                }))
                .await?;
        }

        for extra in calls {
            let reason = ReasonCode::ConcurrentToolCallRejected;
            ctx.skip(
                &extra,
                reason,
                json!({
                    "skipped": true,
                    "reason": reason.as_str(),
                    "message": format!("only one tool call runs per response; {} ran first", first.name),
                }),
            )
            .await?;
        }

        self.handle_call(ctx, &memory, first).await?;
        Ok(false)
    }

    async fn present(&self, ctx: &mut TurnContext, text: String) -> Result<()> {
        let message = EventPayload::AssistantMessage(AssistantTextPayload {
            turn_id: ctx.turn_id.clone(),
            content: text.clone(),
        });
        if ctx.machine.state() == TurnState::Planning {
            let _ = ctx.append(message).await?;
            ctx.transition(TurnState::Completed, ReasonCode::FinalMessage).await?;
        } else {
            ctx.transition(TurnState::Presenting, ReasonCode::FinalMessage).await?;
            let _ = ctx.append(message).await?;
            ctx.transition(TurnState::Completed, ReasonCode::Presented).await?;
        }
        ctx.final_message = Some(text);
        Ok(())
    }

    #[instrument(skip_all, fields(call_id = %call.call_id, tool = %call.name))]
    async fn handle_call(
        &self,
        ctx: &mut TurnContext,
        memory: &ArtifactMemory,
        call: PendingToolCall,
    ) -> Result<()> {
        let Some(kind) = ToolKind::from_name(&call.name) else {
            let reason = ReasonCode::UnknownTool;
            ctx.skip(
                &call,
                reason,
                json!({"skipped": true, "reason": reason.as_str(), "tool_name": call.name}),
            )
            .await?;
            return Err(RuntimeError::UnknownTool {
                tool_name: call.name,
            });
        };

        let arguments = call.arguments();
        if kind.payload_is_empty(&arguments) {
            if ctx.empty_retry_used {
                return Err(RuntimeError::EmptyPayload {
                    tool_name: call.name,
                });
            }
            ctx.empty_retry_used = true;
            let hint = empty_payload_hint(kind);
            let reason = ReasonCode::EmptyPayload;
            ctx.skip(
                &call,
                reason,
                json!({"skipped": true, "reason": reason.as_str(), "hint": hint}),
            )
            .await?;
            warn!("empty tool payload, retrying once with a hint");
            ctx.hints.push(hint);
            return Ok(());
        }

        if kind == ToolKind::Subagents {
            if ctx.depth > 0 {
                let reason = ReasonCode::SubagentDepthExceeded;
                ctx.skip(&call, reason, json!({"skipped": true, "reason": reason.as_str()}))
                    .await?;
                return Err(RuntimeError::SubagentDepthExceeded { depth: ctx.depth });
            }
            ctx.transition(kind.target_state(), ReasonCode::ToolSelected).await?;
            return self.fan_out(ctx, &call, &arguments).await;
        }

        let Some(producer) = kind.producer() else {
            return Err(RuntimeError::Internal(format!("{} has no producer", kind.name())));
        };
        let normalized = normalize_arguments(&arguments);
        let dedup = dedup_key(kind.name(), &normalized);
        let intent = intent_key(producer, &normalized, &dedup);

        if !ctx.allow_rerun {
            if let Some((reason, synthetic)) = memory.check(&dedup, &intent).skip() {
                ctx.skip(&call, reason, synthetic).await?;
                return Ok(());
            }
        }

        ctx.transition(kind.target_state(), ReasonCode::ToolSelected).await?;
        self.restore_if_pending(&ctx.worldline_id).await?;

        let call_payload = ToolCallPayload {
            turn_id: ctx.turn_id.clone(),
            call_id: call.call_id.clone(),
            tool_name: call.name.clone(),
            arguments: arguments.clone(),
            dedup_key: dedup,
            intent_key: intent.clone(),
        };
        let _ = ctx
            .append(match kind {
                ToolKind::Sql => EventPayload::ToolCallSql(call_payload),
                _ => EventPayload::ToolCallPython(call_payload),
            })
            .await?;

        let output = self
            .executor
            .execute(&ToolInvocation {
                worldline_id: ctx.worldline_id.clone(),
                call_id: call.call_id.clone(),
                tool_name: call.name.clone(),
                arguments,
            })
            .await
            .map_err(|source| RuntimeError::ToolExecution {
                tool_name: call.name.clone(),
                source,
            })?;

        let artifacts = self
            .record_artifacts(&ctx.worldline_id, &call, producer, &intent, output.artifacts)
            .await?;
        let has_effects = !output.state_effects.is_empty();
        let result = ToolResultPayload {
            turn_id: ctx.turn_id.clone(),
            call_id: call.call_id.clone(),
            output: output.output,
            preview: truncate_preview(&output.preview, self.config.preview_chars),
            is_error: output.is_error,
            artifacts,
            state_effects: output.state_effects,
        };
        let event = ctx
            .append(match kind {
                ToolKind::Sql => EventPayload::ToolResultSql(result),
                _ => EventPayload::ToolResultPython(result),
            })
            .await?;
        metrics::counter!("tool_calls_total", "tool" => kind.name()).increment(1);
        info!(is_error = output.is_error, "tool executed");

        if has_effects {
            let _ = self.manager.capture_snapshot(&ctx.worldline_id, &event.id)?;
        }
        Ok(())
    }

    /// Load the fork-point engine state into the executor before the first
    /// tool call on a fresh branch.
    async fn restore_if_pending(&self, worldline_id: &WorldlineId) -> Result<()> {
        let Some(restored) = self.manager.pending_restore(worldline_id)? else {
            return Ok(());
        };
        self.executor
            .restore_state(worldline_id, &restored.state)
            .await
            .map_err(RuntimeError::Restore)?;
        self.manager.mark_state_restored(worldline_id)?;
        debug!(source = ?restored.source, "engine state loaded into executor");
        Ok(())
    }

    async fn record_artifacts(
        &self,
        worldline_id: &WorldlineId,
        call: &PendingToolCall,
        producer: Producer,
        intent: &str,
        produced: Vec<ProducedArtifact>,
    ) -> Result<Vec<ArtifactRecord>> {
        let mut records = Vec::with_capacity(produced.len());
        for artifact in produced {
            let id = ArtifactId::new();
            let content_hash = artifact
                .content
                .as_deref()
                .map(sha256_hex)
                .or(artifact.content_hash);
            if let (Some(bytes), Some(store)) = (&artifact.content, &self.artifacts) {
                store
                    .put(worldline_id, &id, &artifact.name, bytes)
                    .await
                    .map_err(|source| RuntimeError::ToolExecution {
                        tool_name: call.name.clone(),
                        source,
                    })?;
            }
            records.push(ArtifactRecord {
                logical_key: logical_key(intent, content_hash.as_deref()),
                id,
                name: artifact.name,
                artifact_type: artifact.artifact_type,
                created_at: now_rfc3339(),
                source_call_id: call.call_id.clone(),
                producer,
                content_hash,
            });
        }
        Ok(records)
    }

    async fn finish(&self, mut ctx: TurnContext, result: Result<()>) -> TurnOutcome {
        let mut outcome = TurnOutcome {
            turn_id: ctx.turn_id.clone(),
            worldline_id: ctx.worldline_id.clone(),
            final_state: ctx.machine.state(),
            final_message: ctx.final_message.take(),
            error: None,
            reason: None,
            iterations: ctx.iterations,
        };

        match result {
            Ok(()) => {
                info!(iterations = ctx.iterations, dropped_deltas = ctx.sink.dropped_deltas(), "turn completed");
                ctx.sink.done().await;
            }
            Err(e) => {
                let reason = e.reason_code();
                error!(error = %e, %reason, iterations = ctx.iterations, "turn failed");
                let payload = ctx.machine.force_error(reason);
                if let Err(record_err) = ctx.append(EventPayload::StateTransition(payload)).await {
                    error!(error = %record_err, "could not record error transition");
                }
                ctx.sink.error(&e.to_string(), reason.as_str()).await;
                outcome.final_state = TurnState::Error;
                outcome.error = Some(e.to_string());
                outcome.reason = Some(reason);
            }
        }
        metrics::counter!("turns_total", "state" => outcome.final_state.as_str()).increment(1);
        metrics::histogram!("turn_duration_seconds").record(ctx.started.elapsed().as_secs_f64());
        outcome
    }
}

/// Report a turn that never opened.
async fn reject(mut sink: FrameSink, error: RuntimeError) -> Result<TurnOutcome> {
    error!(error = %error, "turn could not start");
    sink.error(&error.to_string(), error.reason_code().as_str()).await;
    Err(error)
}

/// State the worldline's last turn ended in.
fn last_turn_state(timeline: &[Event]) -> Option<TurnState> {
    timeline
        .iter()
        .rev()
        .filter(|e| e.event_type == EventType::StateTransition)
        .find_map(|e| match e.typed_payload() {
            Ok(EventPayload::StateTransition(p)) => Some(p.to_state),
            _ => None,
        })
}

fn empty_payload_hint(kind: ToolKind) -> String {
    let field = match kind {
        ToolKind::Sql => "a non-empty `sql` argument",
        ToolKind::Python => "a non-empty `code` argument",
        ToolKind::Subagents => "at least one entry in `tasks` or a `goal`",
    };
    format!("Your last {} call had an empty payload. Call it again with {field}.", kind.name())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
