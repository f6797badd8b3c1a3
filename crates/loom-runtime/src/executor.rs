//! Executor and artifact storage collaborators.

use async_trait::async_trait;
use dashmap::DashMap;
use loom_core::{ArtifactId, CallId, WorldlineId};
use loom_events::{EngineState, StateEffect};
use serde_json::Value;

/// Errors raised by the executor or artifact store.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Execution raised.
    #[error("execution failed: {0}")]
    Failed(String),
    /// Engine state could not be loaded.
    #[error("restore failed: {0}")]
    Restore(String),
    /// Artifact content could not be stored or read.
    #[error("artifact storage failed: {0}")]
    Storage(String),
}

/// One tool call handed to the executor.
#[derive(Clone, Debug)]
pub struct ToolInvocation {
    /// Worldline the call is scoped to.
    pub worldline_id: WorldlineId,
    /// Tool call id.
    pub call_id: CallId,
    /// Tool name (`run_sql`, `run_python`).
    pub tool_name: String,
    /// Parsed arguments.
    pub arguments: Value,
}

/// Artifact reported by the executor.
#[derive(Clone, Debug, Default)]
pub struct ProducedArtifact {
    /// Name (table, file, chart).
    pub name: String,
    /// Type (`table`, `chart`, `file`).
    pub artifact_type: String,
    /// Inline bytes to persist through the [`ArtifactStore`].
    pub content: Option<Vec<u8>>,
    /// Content hash computed by the executor, when bytes are not inline.
    pub content_hash: Option<String>,
}

/// Executor result for one call.
#[derive(Clone, Debug, Default)]
pub struct ToolOutput {
    /// Structured output.
    pub output: Value,
    /// Short preview for the model and UI.
    pub preview: String,
    /// The call ran but reported an error (e.g. SQL syntax).
    pub is_error: bool,
    /// Produced artifacts.
    pub artifacts: Vec<ProducedArtifact>,
    /// Engine-state changes.
    pub state_effects: Vec<StateEffect>,
}

/// Sandboxed SQL/Python execution scoped to a worldline.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a tool call.
    async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ExecutorError>;

    /// Replace the worldline's engine state before its first tool call.
    async fn restore_state(
        &self,
        worldline_id: &WorldlineId,
        state: &EngineState,
    ) -> Result<(), ExecutorError>;
}

/// Artifact content storage.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store content under `artifact_id`.
    async fn put(
        &self,
        worldline_id: &WorldlineId,
        artifact_id: &ArtifactId,
        name: &str,
        content: &[u8],
    ) -> Result<(), ExecutorError>;

    /// Fetch content.
    async fn get(&self, artifact_id: &ArtifactId) -> Result<Option<Vec<u8>>, ExecutorError>;
}

/// Process-local [`ArtifactStore`].
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryArtifactStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(
        &self,
        _worldline_id: &WorldlineId,
        artifact_id: &ArtifactId,
        _name: &str,
        content: &[u8],
    ) -> Result<(), ExecutorError> {
        let _ = self.blobs.insert(artifact_id.to_string(), content.to_vec());
        Ok(())
    }

    async fn get(&self, artifact_id: &ArtifactId) -> Result<Option<Vec<u8>>, ExecutorError> {
        Ok(self.blobs.get(artifact_id.as_str()).map(|b| b.value().clone()))
    }
}
