use std::collections::HashMap;

use chrono::{DateTime, Utc};
use player_channel::NodeResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::{Display, EnumString};
use tracing::{debug, warn};

use crate::error::CorrelationError;
use crate::sequence::Item;

/// Keys a `Finish` result must not carry.
const NAVIGATION_KEYS: [&str; 3] = ["nextActivity", "nextBinding", "computeNext"];

/// Why a result was requested; decides what the resolved result asks for next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reason {
    DisplayItem { item_index: usize },
    Finish,
}

/// What `register` does when a request with the same correlation id is
/// still outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Replace the outstanding request with the new one.
    #[default]
    Overwrite,
    /// Keep the outstanding request and refuse the new one.
    Reject,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingResultRequest {
    pub correlation_id: String,
    pub node_id: String,
    pub reason: Reason,
    pub created_at: DateTime<Utc>,
}

/// A node result with navigation fields filled in, ready to post to the Hub.
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentedResult(Map<String, Value>);

impl AugmentedResult {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn next_binding(&self) -> Option<&str> {
        self.0.get("nextBinding").and_then(Value::as_str)
    }

    pub fn next_index(&self) -> Option<u64> {
        self.0.get("nextIndex").and_then(Value::as_u64)
    }

    pub fn sequence_node_id(&self) -> Option<&str> {
        self.0.get("sequenceNodeId").and_then(Value::as_str)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Matches out-of-order result messages back to the request that asked for them.
#[derive(Debug, Default)]
pub struct ResultCorrelator {
    pending: HashMap<String, PendingResultRequest>,
    policy: DuplicatePolicy,
}

impl ResultCorrelator {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            pending: HashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self, correlation_id: &str) -> Option<&PendingResultRequest> {
        self.pending.get(correlation_id)
    }

    /// Record that a result for `node_id` was requested under `correlation_id`.
    pub fn register(
        &mut self,
        correlation_id: &str,
        node_id: &str,
        reason: Reason,
    ) -> Result<(), CorrelationError> {
        if let Some(existing) = self.pending.get(correlation_id) {
            warn!(
                correlation_id,
                existing_reason = ?existing.reason,
                new_reason = ?reason,
                policy = %self.policy,
                "result request already pending"
            );
            if self.policy == DuplicatePolicy::Reject {
                return Err(CorrelationError::Duplicate {
                    correlation_id: correlation_id.to_string(),
                });
            }
        }

        self.pending.insert(
            correlation_id.to_string(),
            PendingResultRequest {
                correlation_id: correlation_id.to_string(),
                node_id: node_id.to_string(),
                reason,
                created_at: Utc::now(),
            },
        );
        debug!(correlation_id, node_id, ?reason, "result request registered");
        Ok(())
    }

    /// Match `envelope` against its pending request.
    ///
    /// Only a clean match consumes the pending entry; unmatched, mismatched
    /// and otherwise unusable results leave the table as it was.
    pub fn resolve(
        &mut self,
        envelope: &NodeResult,
        items: &[Item],
    ) -> Result<AugmentedResult, CorrelationError> {
        let correlation_id = envelope.message_id.as_str();
        let Some(pending) = self.pending.get(correlation_id) else {
            warn!(correlation_id, node_id = %envelope.sequence_node_id, "unmatched result");
            return Err(CorrelationError::Unmatched {
                correlation_id: correlation_id.to_string(),
            });
        };

        if pending.node_id != envelope.sequence_node_id {
            warn!(
                correlation_id,
                expected = %pending.node_id,
                received = %envelope.sequence_node_id,
                "mismatched result"
            );
            return Err(CorrelationError::Mismatched {
                correlation_id: correlation_id.to_string(),
                expected: pending.node_id.clone(),
                received: envelope.sequence_node_id.clone(),
            });
        }

        let mut fields = match serde_json::to_value(envelope) {
            Ok(Value::Object(fields)) => fields,
            _ => Map::new(),
        };

        match pending.reason {
            Reason::DisplayItem { item_index } => {
                let Some(item) = items.get(item_index) else {
                    warn!(correlation_id, item_index, "result points past the last item");
                    return Err(CorrelationError::UnknownItem {
                        correlation_id: correlation_id.to_string(),
                        index: item_index,
                    });
                };
                fields.insert("nextBinding".into(), Value::String(item.id.clone()));
                fields.insert("nextIndex".into(), Value::from(item_index + 1));
            }
            Reason::Finish => {
                for key in NAVIGATION_KEYS {
                    fields.remove(key);
                }
            }
        }

        self.pending.remove(correlation_id);
        debug!(correlation_id, "result resolved");
        Ok(AugmentedResult(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items() -> Vec<Item> {
        vec![Item::new("item-a"), Item::new("item-b"), Item::new("item-c")]
    }

    #[test]
    fn display_item_sets_binding_and_next_index() {
        let mut c = ResultCorrelator::default();
        c.register("n-1", "n-1", Reason::DisplayItem { item_index: 1 }).unwrap();

        let result = c
            .resolve(&NodeResult::new("n-1", "n-1").with_score(json!(0.8)), &items())
            .unwrap();
        assert_eq!(result.next_binding(), Some("item-b"));
        assert_eq!(result.next_index(), Some(2));
        assert_eq!(result.get("score"), Some(&json!(0.8)));
        assert!(c.is_empty());
    }

    #[test]
    fn finish_strips_navigation_keys() {
        let mut c = ResultCorrelator::default();
        c.register("n-9", "n-9", Reason::Finish).unwrap();

        let mut envelope = NodeResult::new("n-9", "n-9");
        envelope.extra.insert("nextActivity".into(), json!("x"));
        envelope.extra.insert("computeNext".into(), json!(true));
        envelope.extra.insert("nextBinding".into(), json!("y"));
        envelope.extra.insert("duration".into(), json!("PT1M"));

        let result = c.resolve(&envelope, &items()).unwrap();
        for key in NAVIGATION_KEYS {
            assert!(!result.contains_key(key), "{key} should be removed");
        }
        assert_eq!(result.get("duration"), Some(&json!("PT1M")));
    }

    #[test]
    fn unknown_correlation_id_leaves_table_untouched() {
        let mut c = ResultCorrelator::default();
        c.register("n-1", "n-1", Reason::Finish).unwrap();

        let err = c.resolve(&NodeResult::new("n-2", "n-2"), &items()).unwrap_err();
        assert_eq!(err, CorrelationError::Unmatched { correlation_id: "n-2".into() });
        assert_eq!(c.len(), 1);
        assert!(c.pending("n-1").is_some());
    }

    #[test]
    fn mismatched_node_leaves_table_untouched() {
        let mut c = ResultCorrelator::default();
        c.register("n-1", "n-1", Reason::DisplayItem { item_index: 0 }).unwrap();

        let err = c.resolve(&NodeResult::new("n-7", "n-1"), &items()).unwrap_err();
        assert!(matches!(err, CorrelationError::Mismatched { .. }));
        assert_eq!(c.pending("n-1").map(|p| p.node_id.as_str()), Some("n-1"));
    }

    #[test]
    fn resolution_is_one_shot() {
        let mut c = ResultCorrelator::default();
        c.register("n-1", "n-1", Reason::DisplayItem { item_index: 0 }).unwrap();
        let envelope = NodeResult::new("n-1", "n-1");
        assert!(c.resolve(&envelope, &items()).is_ok());
        assert!(matches!(
            c.resolve(&envelope, &items()),
            Err(CorrelationError::Unmatched { .. })
        ));
    }

    #[test]
    fn out_of_range_item_keeps_request_pending() {
        let mut c = ResultCorrelator::default();
        c.register("n-1", "n-1", Reason::DisplayItem { item_index: 5 }).unwrap();
        let err = c.resolve(&NodeResult::new("n-1", "n-1"), &items()).unwrap_err();
        assert!(matches!(err, CorrelationError::UnknownItem { index: 5, .. }));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn duplicate_overwrites_by_default() {
        let mut c = ResultCorrelator::default();
        c.register("n-1", "n-1", Reason::DisplayItem { item_index: 0 }).unwrap();
        c.register("n-1", "n-1", Reason::Finish).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c.pending("n-1").map(|p| p.reason), Some(Reason::Finish));
    }

    #[test]
    fn duplicate_rejected_under_reject_policy() {
        let mut c = ResultCorrelator::new(DuplicatePolicy::Reject);
        c.register("n-1", "n-1", Reason::DisplayItem { item_index: 0 }).unwrap();
        let err = c.register("n-1", "n-1", Reason::Finish).unwrap_err();
        assert_eq!(err, CorrelationError::Duplicate { correlation_id: "n-1".into() });
        assert_eq!(
            c.pending("n-1").map(|p| p.reason),
            Some(Reason::DisplayItem { item_index: 0 })
        );
    }

    #[test]
    fn policy_parses_from_config_strings() {
        assert_eq!("reject".parse::<DuplicatePolicy>().unwrap(), DuplicatePolicy::Reject);
        assert_eq!(DuplicatePolicy::Overwrite.to_string(), "overwrite");
        assert!("drop".parse::<DuplicatePolicy>().is_err());
    }
}
