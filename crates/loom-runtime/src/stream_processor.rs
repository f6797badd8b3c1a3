//! Stream processor: consumes a provider stream, accumulates text and tool
//! calls, and forwards fragments to the client as deltas.

use std::collections::BTreeMap;

use futures::StreamExt;
use loom_core::CallId;
use loom_stream::{Delta, DeltaKind};
use serde_json::{Value, json};

use crate::errors::{Result, RuntimeError};
use crate::provider::{ProviderError, ProviderEvent, ProviderStream};
use crate::sink::FrameSink;
use crate::tools::ToolKind;

/// A tool call as assembled from the stream.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingToolCall {
    /// Position in the response.
    pub index: usize,
    /// Resolved call id (generated when the provider never sent one).
    pub call_id: CallId,
    /// Tool name.
    pub name: String,
    /// Concatenated argument JSON.
    pub raw_arguments: String,
}

impl PendingToolCall {
    /// Parsed arguments. Blank input is `{}`; unparseable input is kept as a
    /// JSON string so payload guards see it as empty.
    #[must_use]
    pub fn arguments(&self) -> Value {
        if self.raw_arguments.trim().is_empty() {
            return json!({});
        }
        serde_json::from_str(&self.raw_arguments)
            .unwrap_or_else(|_| Value::String(self.raw_arguments.clone()))
    }
}

/// One complete provider response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProviderResponse {
    /// Assistant text.
    pub text: String,
    /// Tool calls in response order.
    pub tool_calls: Vec<PendingToolCall>,
}

#[derive(Default)]
struct CallAcc {
    call_id: Option<String>,
    name: String,
    args: String,
}

/// Drain `stream` into a [`ProviderResponse`].
pub async fn process_stream(mut stream: ProviderStream, sink: &mut FrameSink) -> Result<ProviderResponse> {
    let mut text = String::with_capacity(1024);
    let mut calls: BTreeMap<usize, CallAcc> = BTreeMap::new();

    loop {
        match stream.next().await {
            None => {
                return Err(RuntimeError::Provider(ProviderError::Stream(
                    "stream ended without done".into(),
                )));
            }
            Some(Err(e)) => return Err(RuntimeError::Provider(e)),
            Some(Ok(ProviderEvent::Done)) => break,
            Some(Ok(ProviderEvent::TextDelta { delta })) => {
                text.push_str(&delta);
                sink.delta(Delta {
                    kind: DeltaKind::AssistantText,
                    call_id: None,
                    delta,
                    done: None,
                });
            }
            Some(Ok(ProviderEvent::ToolCallStart { index, call_id, name })) => {
                let acc = calls.entry(index).or_default();
                acc.name = name;
                if call_id.is_some() {
                    acc.call_id = call_id;
                }
            }
            Some(Ok(ProviderEvent::ToolCallDelta {
                index,
                call_id,
                arguments_delta,
            })) => {
                let acc = calls.entry(index).or_default();
                if acc.call_id.is_none() {
                    acc.call_id = call_id;
                }
                acc.args.push_str(&arguments_delta);
                if let Some(kind) = ToolKind::from_name(&acc.name) {
                    sink.delta(Delta {
                        kind: kind.delta_kind(),
                        call_id: acc.call_id.clone(),
                        delta: arguments_delta,
                        done: None,
                    });
                }
            }
        }
    }

    let mut tool_calls = Vec::with_capacity(calls.len());
    for (index, acc) in calls {
        let call_id = acc.call_id.map_or_else(CallId::new, CallId::from);
        if let Some(kind) = ToolKind::from_name(&acc.name) {
            // Resolves any provisional draft on the client.
            sink.delta(Delta {
                kind: kind.delta_kind(),
                call_id: Some(call_id.to_string()),
                delta: String::new(),
                done: Some(true),
            });
        }
        tool_calls.push(PendingToolCall {
            index,
            call_id,
            name: acc.name,
            raw_arguments: acc.args,
        });
    }

    Ok(ProviderResponse { text, tool_calls })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
