//! Dedup policy and artifact memory.
//!
//! A tool call's identity is `(tool name, canonical arguments)`: object keys
//! lower-cased and sorted, whitespace collapsed inside `sql`/`code` text.
//! Before a call executes it is checked against
//!
//! 1. calls in the current turn and the previous `window` turns, and
//! 2. every artifact visible on the timeline, by intent key.
//!
//! Both memories are rebuilt from the timeline on each iteration, so a branch
//! only ever sees calls and artifacts on its own chain.

use std::collections::{BTreeMap, HashMap, HashSet};

use loom_core::text::collapse_whitespace;
use loom_core::{CallId, TurnId};
use loom_events::{ArtifactRecord, Event, EventPayload, EventType, Producer};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::errors::ReasonCode;

/// Argument keys whose string values are code and get whitespace-normalized.
const CODE_KEYS: [&str; 3] = ["sql", "code", "query"];

/// Hex characters kept from a SHA-256 digest in keys.
const HASH_PREFIX: usize = 16;

/// Canonical form of tool arguments. Idempotent.
#[must_use]
pub fn normalize_arguments(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = BTreeMap::new();
            for (key, val) in map {
                let key = key.trim().to_lowercase();
                let val = match val.as_str() {
                    Some(text) if CODE_KEYS.contains(&key.as_str()) => {
                        Value::String(collapse_whitespace(text))
                    }
                    _ => normalize_arguments(val),
                };
                let _ = sorted.insert(key, val);
            }
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_arguments).collect()),
        other => other.clone(),
    }
}

/// Dedup key for a call. `arguments` must already be normalized.
#[must_use]
pub fn dedup_key(tool_name: &str, normalized: &Value) -> String {
    format!("{}:{normalized}", tool_name.trim().to_lowercase())
}

/// Lowercase hex SHA-256.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes).iter().map(|b| format!("{b:02x}")).collect()
}

/// Intent key: what artifact a call means to produce.
///
/// `producer:` + the normalized `artifact_name` argument when present, else
/// `producer:` + a hash prefix of the dedup key.
#[must_use]
pub fn intent_key(producer: Producer, normalized: &Value, dedup_key: &str) -> String {
    let explicit = normalized
        .get("artifact_name")
        .and_then(Value::as_str)
        .map(normalize_name)
        .filter(|name| !name.is_empty());
    match explicit {
        Some(name) => format!("{}:{name}", producer.as_str()),
        None => format!("{}:{}", producer.as_str(), &sha256_hex(dedup_key.as_bytes())[..HASH_PREFIX]),
    }
}

/// Logical key of a produced artifact.
#[must_use]
pub fn logical_key(intent_key: &str, content_hash: Option<&str>) -> String {
    match content_hash {
        Some(hash) => {
            let prefix: String = hash.chars().take(HASH_PREFIX).collect();
            format!("{intent_key}#{prefix}")
        }
        None => intent_key.to_string(),
    }
}

fn normalize_name(name: &str) -> String {
    collapse_whitespace(&name.to_lowercase()).replace(' ', "_")
}

/// Whether a user message explicitly asks to re-execute earlier work.
#[must_use]
pub fn requests_rerun(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["rerun", "re-run", "run again"].iter().any(|needle| lower.contains(needle))
}

/// A non-failed call seen in the dedup window.
#[derive(Clone, Debug, PartialEq)]
pub struct RecentCall {
    /// Original call id.
    pub call_id: CallId,
    /// Turn it ran in.
    pub turn_id: TurnId,
    /// Result preview.
    pub preview: String,
    /// Artifacts it produced.
    pub artifacts: Vec<ArtifactRecord>,
}

/// Guard verdict for a proposed call.
#[derive(Clone, Debug, PartialEq)]
pub enum DedupDecision {
    /// Run it.
    Execute,
    /// An identical call already ran in the window.
    DuplicateCall(RecentCall),
    /// An equivalent artifact is already in inventory.
    DuplicateArtifact(ArtifactRecord),
}

impl DedupDecision {
    /// Reason code and synthetic result for a skip, `None` for [`Self::Execute`].
    #[must_use]
    pub fn skip(&self) -> Option<(ReasonCode, Value)> {
        match self {
            Self::Execute => None,
            Self::DuplicateCall(call) => {
                let reason = ReasonCode::DuplicateToolCallSkipped;
                Some((
                    reason,
                    json!({
                        "skipped": true,
                        "reason": reason.as_str(),
                        "previous_call_id": call.call_id,
                        "preview": call.preview,
                        "artifacts": call.artifacts,
                    }),
                ))
            }
            Self::DuplicateArtifact(artifact) => {
                let reason = ReasonCode::DuplicateArtifactPrevented;
                Some((
                    reason,
                    json!({
                        "skipped": true,
                        "reason": reason.as_str(),
                        "artifact": artifact,
                    }),
                ))
            }
        }
    }
}

/// Calls and artifacts visible from one worldline, as of one iteration.
#[derive(Clone, Debug, Default)]
pub struct ArtifactMemory {
    inventory: Vec<ArtifactRecord>,
    recent: HashMap<String, RecentCall>,
}

struct ResultSummary {
    is_error: bool,
    preview: String,
    artifacts: Vec<ArtifactRecord>,
}

impl ArtifactMemory {
    /// Build from a timeline. The window is `current_turn` plus the
    /// `window_turns` turns before it.
    #[must_use]
    pub fn from_timeline(events: &[Event], current_turn: &TurnId, window_turns: usize) -> Self {
        let mut turn_order: Vec<&str> = Vec::new();
        let mut results: HashMap<String, ResultSummary> = HashMap::new();
        let mut inventory = Vec::new();

        for event in events {
            match event.typed_payload() {
                Ok(EventPayload::UserMessage(_)) => turn_order.extend(event.turn_id()),
                Ok(EventPayload::ToolResultSql(p) | EventPayload::ToolResultPython(p)) => {
                    inventory.extend(p.artifacts.iter().cloned());
                    let _ = results.insert(
                        p.call_id.to_string(),
                        ResultSummary {
                            is_error: p.is_error,
                            preview: p.preview,
                            artifacts: p.artifacts,
                        },
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(event_id = %event.id, error = %e, "unreadable payload in timeline"),
            }
        }

        let mut window: HashSet<&str> = turn_order
            .iter()
            .rev()
            .filter(|t| **t != current_turn.as_str())
            .take(window_turns)
            .copied()
            .collect();
        let _ = window.insert(current_turn.as_str());

        let mut recent = HashMap::new();
        for event in events {
            if !matches!(event.event_type, EventType::ToolCallSql | EventType::ToolCallPython) {
                continue;
            }
            let Ok(EventPayload::ToolCallSql(call) | EventPayload::ToolCallPython(call)) =
                event.typed_payload()
            else {
                continue;
            };
            if !window.contains(call.turn_id.as_str()) {
                continue;
            }
            // Failed calls may be retried verbatim.
            match results.get(call.call_id.as_str()) {
                Some(result) if !result.is_error => {
                    let _ = recent.insert(
                        call.dedup_key.clone(),
                        RecentCall {
                            call_id: call.call_id.clone(),
                            turn_id: call.turn_id.clone(),
                            preview: result.preview.clone(),
                            artifacts: result.artifacts.clone(),
                        },
                    );
                }
                _ => {}
            }
        }

        Self { inventory, recent }
    }

    /// Artifacts visible on the timeline, oldest first.
    #[must_use]
    pub fn inventory(&self) -> &[ArtifactRecord] {
        &self.inventory
    }

    /// Check a proposed call.
    #[must_use]
    pub fn check(&self, dedup_key: &str, intent_key: &str) -> DedupDecision {
        if let Some(call) = self.recent.get(dedup_key) {
            return DedupDecision::DuplicateCall(call.clone());
        }
        let extended = format!("{intent_key}#");
        self.inventory
            .iter()
            .rev()
            .find(|a| a.logical_key == intent_key || a.logical_key.starts_with(&extended))
            .map_or(DedupDecision::Execute, |a| DedupDecision::DuplicateArtifact(a.clone()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::{ArtifactId, EventId, WorldlineId};
    use proptest::prelude::*;

    fn event(seq: i64, event_type: EventType, payload: Value) -> Event {
        Event {
            id: EventId::from(format!("evt_{seq}")),
            worldline_id: WorldlineId::from("wl_1"),
            sequence: seq,
            event_type,
            payload,
            parent_event_id: None,
            created_at: "2026-01-01T00:00:00.000Z".into(),
        }
    }

    fn user(seq: i64, turn: &str) -> Event {
        event(seq, EventType::UserMessage, json!({"turn_id": turn, "content": "q"}))
    }

    fn call(seq: i64, turn: &str, call_id: &str, key: &str) -> Event {
        event(
            seq,
            EventType::ToolCallSql,
            json!({"turn_id": turn, "call_id": call_id, "tool_name": "run_sql",
                   "arguments": {}, "dedup_key": key, "intent_key": ""}),
        )
    }

    fn result(seq: i64, turn: &str, call_id: &str, is_error: bool, artifacts: Value) -> Event {
        event(
            seq,
            EventType::ToolResultSql,
            json!({"turn_id": turn, "call_id": call_id, "output": {}, "preview": "3 rows",
                   "is_error": is_error, "artifacts": artifacts}),
        )
    }

    fn artifact(name: &str, logical_key: &str) -> Value {
        serde_json::to_value(ArtifactRecord {
            id: ArtifactId::from(format!("art_{name}")),
            name: name.into(),
            artifact_type: "table".into(),
            created_at: "2026-01-01T00:00:00.000Z".into(),
            source_call_id: CallId::from("call_x"),
            producer: Producer::Sql,
            logical_key: logical_key.into(),
            content_hash: None,
        })
        .unwrap()
    }

    #[test]
    fn normalize_sorts_lowercases_and_collapses() {
        let raw = json!({"SQL": "SELECT  *\n FROM t", "Limit": 5, "Nested": {"B": 1, "a": 2}});
        let norm = normalize_arguments(&raw);
        assert_eq!(
            norm,
            json!({"limit": 5, "nested": {"a": 2, "b": 1}, "sql": "SELECT * FROM t"})
        );
        assert_eq!(norm.to_string(), r#"{"limit":5,"nested":{"a":2,"b":1},"sql":"SELECT * FROM t"}"#);
    }

    #[test]
    fn non_code_strings_untouched() {
        let norm = normalize_arguments(&json!({"title": "  Two  spaces "}));
        assert_eq!(norm["title"], "  Two  spaces ");
    }

    #[test]
    fn equivalent_calls_share_a_key() {
        let a = normalize_arguments(&json!({"sql": "select 1", "limit": 10}));
        let b = normalize_arguments(&json!({"Limit": 10, "SQL": " select   1 "}));
        assert_eq!(dedup_key("run_sql", &a), dedup_key("RUN_SQL ", &b));
    }

    #[test]
    fn intent_key_prefers_artifact_name() {
        let args = normalize_arguments(&json!({"sql": "select 1", "artifact_name": "Monthly  Sales"}));
        let key = dedup_key("run_sql", &args);
        assert_eq!(intent_key(Producer::Sql, &args, &key), "sql:monthly_sales");

        let args = normalize_arguments(&json!({"code": "df.describe()"}));
        let key = dedup_key("run_python", &args);
        let intent = intent_key(Producer::Python, &args, &key);
        assert!(intent.starts_with("python:"));
        assert_eq!(intent.len(), "python:".len() + 16);
    }

    #[test]
    fn logical_key_appends_hash_prefix() {
        assert_eq!(logical_key("sql:t", None), "sql:t");
        let hash = sha256_hex(b"abc");
        assert_eq!(logical_key("sql:t", Some(&hash)), format!("sql:t#{}", &hash[..16]));
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn logical_key_tolerates_non_ascii_hash() {
        // 15 ASCII chars then a 3-byte char straddling byte 16.
        let hash = "abcdef012345678\u{20ac}tail";
        assert_eq!(logical_key("sql:t", Some(hash)), "sql:t#abcdef012345678\u{20ac}");
        assert_eq!(logical_key("sql:t", Some("ab")), "sql:t#ab");
    }

    #[test]
    fn rerun_phrases() {
        assert!(requests_rerun("Please RERUN the query"));
        assert!(requests_rerun("can you re-run that"));
        assert!(requests_rerun("run again with fresh data"));
        assert!(!requests_rerun("run the query"));
    }

    #[test]
    fn duplicate_call_within_window() {
        let events = vec![
            user(1, "turn_a"),
            call(2, "turn_a", "call_1", "k1"),
            result(3, "turn_a", "call_1", false, json!([])),
            user(4, "turn_b"),
        ];
        let memory = ArtifactMemory::from_timeline(&events, &TurnId::from("turn_b"), 3);
        let decision = memory.check("k1", "sql:x");
        assert!(matches!(decision, DedupDecision::DuplicateCall(ref c) if c.call_id.as_str() == "call_1"));
        let (reason, synthetic) = decision.skip().unwrap();
        assert_eq!(reason, ReasonCode::DuplicateToolCallSkipped);
        assert_eq!(synthetic["previous_call_id"], "call_1");
        assert_eq!(synthetic["preview"], "3 rows");
    }

    #[test]
    fn calls_outside_window_are_forgotten() {
        let mut events = vec![
            user(1, "turn_0"),
            call(2, "turn_0", "call_old", "k_old"),
            result(3, "turn_0", "call_old", false, json!([])),
        ];
        for (i, turn) in ["turn_1", "turn_2", "turn_3", "turn_4"].iter().enumerate() {
            events.push(user(10 + i64::try_from(i).unwrap(), turn));
        }
        let memory = ArtifactMemory::from_timeline(&events, &TurnId::from("turn_4"), 3);
        assert_eq!(memory.check("k_old", "sql:none"), DedupDecision::Execute);

        let memory = ArtifactMemory::from_timeline(&events, &TurnId::from("turn_4"), 4);
        assert!(matches!(memory.check("k_old", "sql:none"), DedupDecision::DuplicateCall(_)));
    }

    #[test]
    fn failed_calls_can_be_retried() {
        let events = vec![
            user(1, "turn_a"),
            call(2, "turn_a", "call_1", "k1"),
            result(3, "turn_a", "call_1", true, json!([])),
        ];
        let memory = ArtifactMemory::from_timeline(&events, &TurnId::from("turn_a"), 3);
        assert_eq!(memory.check("k1", "sql:x"), DedupDecision::Execute);
    }

    #[test]
    fn artifact_equivalence_by_intent_key() {
        let events = vec![
            user(1, "turn_0"),
            call(2, "turn_0", "call_1", "k1"),
            result(3, "turn_0", "call_1", false, json!([artifact("sales", "sql:sales#abcd")])),
        ];
        // Outside the call window, but artifacts never expire.
        let memory = ArtifactMemory::from_timeline(&events, &TurnId::from("turn_9"), 0);
        assert_eq!(memory.inventory().len(), 1);
        let decision = memory.check("k_other", "sql:sales");
        assert!(matches!(decision, DedupDecision::DuplicateArtifact(ref a) if a.name == "sales"));
        assert_eq!(decision.skip().unwrap().0, ReasonCode::DuplicateArtifactPrevented);
        assert_eq!(memory.check("k_other", "sql:sales_v2"), DedupDecision::Execute);
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[ a-zA-Z\\t\\n]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map(
                    prop_oneof![Just("SQL".to_string()), Just("code".to_string()), "[ A-Za-z]{1,6}"],
                    inner,
                    0..4
                )
                .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(value in arb_json()) {
            let once = normalize_arguments(&value);
            prop_assert_eq!(normalize_arguments(&once), once);
        }
    }
}
