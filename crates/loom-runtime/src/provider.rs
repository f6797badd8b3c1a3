//! Model provider collaborator.
//!
//! A provider receives the worldline's linear timeline plus the artifact
//! inventory and streams back text and tool-call fragments. Tool-call ids may
//! be unknown when a call starts and arrive on a later fragment.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use loom_core::{TurnId, WorldlineId};
use loom_events::{ArtifactRecord, Event};

/// Errors raised by a provider.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ProviderError {
    /// No provider is registered under this name/model.
    #[error("unknown provider or model: {provider}/{model}")]
    UnknownModel {
        /// Provider name.
        provider: String,
        /// Model name.
        model: String,
    },
    /// The provider could not be reached.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    /// The response stream broke off.
    #[error("stream error: {0}")]
    Stream(String),
}

/// One fragment of a provider response.
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderEvent {
    /// Assistant text.
    TextDelta {
        /// Text fragment.
        delta: String,
    },
    /// A tool call begins.
    ToolCallStart {
        /// Position of the call within this response.
        index: usize,
        /// Call id, when the provider already knows it.
        call_id: Option<String>,
        /// Tool name.
        name: String,
    },
    /// More argument JSON for a tool call.
    ToolCallDelta {
        /// Position of the call within this response.
        index: usize,
        /// Call id, when it resolves on this fragment.
        call_id: Option<String>,
        /// Argument JSON fragment.
        arguments_delta: String,
    },
    /// The response is complete.
    Done,
}

/// Boxed fragment stream.
pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<ProviderEvent, ProviderError>> + Send>>;

/// Everything a provider call sees.
#[derive(Clone, Debug)]
pub struct ProviderRequest {
    /// Worldline the turn runs on.
    pub worldline_id: WorldlineId,
    /// Current turn.
    pub turn_id: TurnId,
    /// Visible timeline, oldest first.
    pub timeline: Vec<Event>,
    /// Artifacts visible on the timeline.
    pub inventory: Vec<ArtifactRecord>,
    /// Corrective hints for this call (e.g. after an empty payload).
    pub hints: Vec<String>,
}

/// A model provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name (e.g. `"anthropic"`).
    fn name(&self) -> &str;

    /// Model name.
    fn model(&self) -> &str;

    /// Stream a response.
    async fn stream(&self, request: &ProviderRequest) -> Result<ProviderStream, ProviderError>;
}

/// Creates providers per turn from the request's provider and model names.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    /// Provider for `provider`/`model`.
    async fn create(&self, provider: &str, model: &str) -> Result<Arc<dyn Provider>, ProviderError>;
}
