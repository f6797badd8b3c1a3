//! Analytic-engine-facing state reconstructed for a worldline.
//!
//! [`EngineState`] is what the executor needs to mirror before running a
//! tool on a branch: which tables exist and which external sources are
//! attached. It is rebuilt by folding state-mutating events in chain order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::event::{Event, EventPayload};

/// A single engine-state change reported by a tool result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateEffect {
    /// A table was created or replaced.
    TableCreated {
        /// Table name.
        name: String,
        /// Origin of the data, if known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
    /// A table was dropped.
    TableDropped {
        /// Table name.
        name: String,
    },
    /// A source was attached.
    SourceAttached {
        /// Alias.
        alias: String,
        /// Location.
        uri: String,
    },
    /// A source was detached.
    SourceDetached {
        /// Alias.
        alias: String,
    },
}

/// Table entry in [`EngineState`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableState {
    /// Origin of the data, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Tables and attached sources visible to the analytic engine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    /// Tables by name.
    #[serde(default)]
    pub tables: BTreeMap<String, TableState>,
    /// Attached source URIs by alias.
    #[serde(default)]
    pub attached: BTreeMap<String, String>,
}

impl EngineState {
    /// Apply one effect.
    pub fn apply_effect(&mut self, effect: &StateEffect) {
        match effect {
            StateEffect::TableCreated { name, source } => {
                let _ = self.tables.insert(
                    name.clone(),
                    TableState {
                        source: source.clone(),
                    },
                );
            }
            StateEffect::TableDropped { name } => {
                let _ = self.tables.remove(name);
            }
            StateEffect::SourceAttached { alias, uri } => {
                let _ = self.attached.insert(alias.clone(), uri.clone());
            }
            StateEffect::SourceDetached { alias } => {
                let _ = self.attached.remove(alias);
            }
        }
    }

    /// Apply an event if it mutates engine state. Returns whether it did.
    pub fn apply_event(&mut self, event: &Event) -> Result<bool, serde_json::Error> {
        if !event.is_state_mutating() {
            return Ok(false);
        }
        match event.typed_payload()? {
            EventPayload::DataImported(p) => self.apply_effect(&StateEffect::TableCreated {
                name: p.table,
                source: Some(p.source),
            }),
            EventPayload::SourceAttached(p) => self.apply_effect(&StateEffect::SourceAttached {
                alias: p.alias,
                uri: p.uri,
            }),
            EventPayload::SourceDetached(p) => {
                self.apply_effect(&StateEffect::SourceDetached { alias: p.alias });
            }
            EventPayload::ToolResultSql(p) | EventPayload::ToolResultPython(p) => {
                for effect in &p.state_effects {
                    self.apply_effect(effect);
                }
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Whether nothing is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.attached.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
