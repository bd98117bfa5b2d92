//! Feedback payloads pushed by the orchestrator.
//!
//! Feedback is retrieved by polling and handed to the host over a bounded
//! channel that drops on overflow; a slow or absent consumer must never
//! stall the poller.

use serde::{Deserialize, Serialize};

/// Capacity of the outbound feedback channel.
pub const FEEDBACK_BUFFER: usize = 10;

/// How many items one poll asks the orchestrator for.
pub const FEEDBACK_POLL_LIMIT: usize = 10;

/// One out-of-band signal from the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackPayload {
    pub message: String,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Shape of the `get_pending_feedback` result text.
#[derive(Debug, Default, Deserialize)]
pub struct FeedbackBatch {
    #[serde(default)]
    pub items: Vec<FeedbackPayload>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn batch_parses_items_in_order() {
        let batch: FeedbackBatch = serde_json::from_str(
            r#"{"items":[
                {"message":"m1","source":"workflow"},
                {"message":"m2","source":"workflow","task_id":"T-9","metadata":{"k":"v"}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(batch.items.len(), 2);
        assert_eq!(batch.items[0].message, "m1");
        assert!(batch.items[0].task_id.is_none());
        assert_eq!(batch.items[1].task_id.as_deref(), Some("T-9"));
        assert_eq!(batch.items[1].metadata["k"], "v");
    }

    #[test]
    fn empty_object_is_an_empty_batch() {
        let batch: FeedbackBatch = serde_json::from_str("{}").unwrap();
        assert!(batch.items.is_empty());
    }

    #[test]
    fn payload_roundtrip_omits_absent_fields() {
        let payload = FeedbackPayload {
            message: "nudge".to_string(),
            source: "supervisor".to_string(),
            task_id: None,
            metadata: serde_json::Map::new(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(!json.contains("task_id"));
        assert!(!json.contains("metadata"));
    }
}
