//! Subagent fan-out: sibling branches from one parent event, one child turn
//! per task, joined before the parent continues.

use std::sync::Arc;
use std::time::Duration;

use loom_core::text::truncate_preview;
use loom_core::{EventId, WorldlineId};
use loom_events::EventPayload;
use loom_events::types::{
    SubagentCallPayload, SubagentResultPayload, SubagentStatus, SubagentTaskResult,
};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use crate::errors::{Result, RuntimeError};
use crate::stream_processor::PendingToolCall;
use crate::turn::{TurnContext, TurnRequest, TurnRunner};

/// Tasks named by a fan-out call, capped at `max_tasks`.
///
/// Explicit `tasks` win; otherwise `goal` is split into one task per
/// non-empty line with list markers removed.
#[must_use]
pub fn parse_tasks(arguments: &Value, max_tasks: usize) -> Vec<String> {
    let explicit: Vec<String> = arguments
        .get("tasks")
        .and_then(Value::as_array)
        .map(|tasks| {
            tasks
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let tasks = if explicit.is_empty() {
        arguments
            .get("goal")
            .and_then(Value::as_str)
            .map(split_goal)
            .unwrap_or_default()
    } else {
        explicit
    };
    tasks.into_iter().take(max_tasks).collect()
}

fn split_goal(goal: &str) -> Vec<String> {
    goal.lines()
        .map(|line| strip_list_marker(line.trim()))
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim_start_matches(['-', '*', '•']).trim_start();
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        if let Some(rest) = line[digits..].strip_prefix(['.', ')']) {
            return rest.trim_start();
        }
    }
    line
}

struct ChildReport {
    status: SubagentStatus,
    preview: String,
}

impl TurnRunner {
    /// Run a `spawn_subagents` call for the turn in `ctx`.
    ///
    /// Bracketed by `tool_call_subagents` and `tool_result_subagents` on the
    /// parent chain. Child failures and timeouts are reported in the
    /// aggregate; only persistence and branching failures fail the parent.
    #[instrument(skip_all, fields(call_id = %call.call_id))]
    pub(crate) async fn fan_out(
        &self,
        ctx: &mut TurnContext,
        call: &PendingToolCall,
        arguments: &Value,
    ) -> Result<()> {
        let config = self.config();
        let tasks = parse_tasks(arguments, config.subagent_max_tasks);
        let from_event_id = match arguments.get("from_event_id").and_then(Value::as_str) {
            Some(id) => EventId::from(id),
            None => ctx
                .writer
                .head()
                .cloned()
                .ok_or_else(|| RuntimeError::Internal("fan-out on an empty worldline".into()))?,
        };
        let timeout_s = arguments
            .get("timeout_s")
            .and_then(Value::as_u64)
            .filter(|t| *t > 0)
            .unwrap_or(config.subagent_timeout_secs);
        let max_iterations = arguments
            .get("max_iterations")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(config.max_iterations);

        let _ = ctx
            .append(EventPayload::ToolCallSubagents(SubagentCallPayload {
                turn_id: ctx.turn_id.clone(),
                call_id: call.call_id.clone(),
                tasks: tasks.clone(),
                from_event_id: from_event_id.clone(),
                timeout_s,
                max_iterations,
            }))
            .await?;

        let mut children: Vec<WorldlineId> = Vec::with_capacity(tasks.len());
        for index in 0..tasks.len() {
            let name = format!("subagent-{}-{}", call.call_id, index + 1);
            let child = self.manager().branch(&ctx.worldline_id, &from_event_id, &name)?;
            children.push(child.id);
        }
        info!(
            tasks = tasks.len(),
            from_event_id = %from_event_id,
            timeout_s,
            "subagents branched"
        );

        let semaphore = Arc::new(Semaphore::new(config.subagent_max_parallel.max(1)));
        let timeout = Duration::from_secs(timeout_s);
        let preview_chars = config.preview_chars;
        let waits = tasks.iter().zip(&children).map(|(task, child)| {
            let runner = self.clone();
            let semaphore = semaphore.clone();
            let request = TurnRequest {
                max_iterations: Some(max_iterations),
                depth: ctx.depth + 1,
                ..TurnRequest::new(child.clone(), task.clone(), ctx.provider.clone(), ctx.model.clone())
            };
            let child = child.clone();
            async move {
                let Ok(permit) = semaphore.acquire_owned().await else {
                    return ChildReport {
                        status: SubagentStatus::Failed,
                        preview: "parallelism limiter closed".into(),
                    };
                };
                // The child runs as its own task and holds its permit until
                // the turn ends. On timeout the parent only stops waiting.
                let handle = tokio::spawn(async move {
                    let _permit = permit;
                    runner.run_turn(request).await
                });
                match tokio::time::timeout(timeout, handle).await {
                    Ok(Ok(Ok(outcome))) if outcome.is_completed() => ChildReport {
                        status: SubagentStatus::Completed,
                        preview: outcome.summary(preview_chars),
                    },
                    Ok(Ok(Ok(outcome))) => ChildReport {
                        status: SubagentStatus::Failed,
                        preview: outcome.summary(preview_chars),
                    },
                    Ok(Ok(Err(e))) => ChildReport {
                        status: SubagentStatus::Failed,
                        preview: truncate_preview(&e.to_string(), preview_chars),
                    },
                    Ok(Err(join)) => ChildReport {
                        status: SubagentStatus::Failed,
                        preview: truncate_preview(&format!("child task aborted: {join}"), preview_chars),
                    },
                    Err(_) => {
                        let err = RuntimeError::SubagentTimeout {
                            child_worldline_id: child.to_string(),
                            timeout_s,
                        };
                        warn!(child_worldline_id = %child, timeout_s, "subagent timed out");
                        ChildReport {
                            status: SubagentStatus::Timeout,
                            preview: err.to_string(),
                        }
                    }
                }
            }
        });
        let reports = futures::future::join_all(waits).await;

        let mut completed_count = 0;
        let mut failed_count = 0;
        let mut timed_out_count = 0;
        let results: Vec<SubagentTaskResult> = tasks
            .into_iter()
            .zip(children)
            .zip(reports)
            .map(|((task, child_worldline_id), report)| {
                metrics::counter!("subagent_children_total", "status" => report.status.as_str())
                    .increment(1);
                match report.status {
                    SubagentStatus::Completed => completed_count += 1,
                    SubagentStatus::Failed => failed_count += 1,
                    SubagentStatus::Timeout => timed_out_count += 1,
                }
                SubagentTaskResult {
                    task,
                    status: report.status,
                    child_worldline_id,
                    preview: report.preview,
                }
            })
            .collect();

        info!(completed_count, failed_count, timed_out_count, "subagents joined");
        let _ = ctx
            .append(EventPayload::ToolResultSubagents(SubagentResultPayload {
                turn_id: ctx.turn_id.clone(),
                call_id: call.call_id.clone(),
                results,
                completed_count,
                failed_count,
                timed_out_count,
            }))
            .await?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
