use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::{AsRefStr, Display};

/// Identity of the surface that produced an inbound message.
/// A channel only accepts messages whose origin matches the surface it owns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub String);

impl SurfaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw message as handed over by a surface transport, before parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceMessage {
    pub origin: SurfaceId,
    pub body: String,
}

impl SurfaceMessage {
    pub fn new(origin: SurfaceId, body: impl Into<String>) -> Self {
        Self { origin, body: body.into() }
    }
}

// -----------------------------------------------------------------------------
// Surface → channel
// -----------------------------------------------------------------------------

/// Messages a surface can emit, discriminated by the `@type` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum InboundMessage {
    PlayerReady,
    NodeResult(NodeResult),
    #[serde(rename_all = "camelCase")]
    SequenceNodeLoaded { sequence_node_id: String },
    GetSequenceNode {
        #[serde(flatten)]
        fields: Map<String, Value>,
    },
    /// Anything with a `@type` we do not know about.
    #[serde(other)]
    Unknown,
}

/// Scoring data emitted by a surface for one rendered node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub sequence_node_id: String,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission: Option<Value>,
    /// Surface-defined fields carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NodeResult {
    pub fn new(sequence_node_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            sequence_node_id: sequence_node_id.into(),
            message_id: message_id.into(),
            score: None,
            submission: None,
            extra: Map::new(),
        }
    }

    pub fn with_score(mut self, score: Value) -> Self {
        self.score = Some(score);
        self
    }
}

// -----------------------------------------------------------------------------
// Channel → surface
// -----------------------------------------------------------------------------

/// Asks a surface to emit its `NodeResult` for the given node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type", rename = "NodeResultRequest", rename_all = "camelCase")]
pub struct NodeResultRequest {
    pub message_id: String,
    pub sequence_node_id: String,
}

// -----------------------------------------------------------------------------
// Channel → orchestrator
// -----------------------------------------------------------------------------

/// Inbound surface messages the channel re-emits for its owner.
/// `PlayerReady` never shows up here, the channel consumes it.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    NodeResult(NodeResult),
    SequenceNodeLoaded { sequence_node_id: String },
    GetSequenceNode { fields: Map<String, Value> },
}

/// Event tagged with the slot whose channel produced it.
pub type SlotEvent = (usize, ChannelEvent);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum ChannelState {
    Idle,
    Loading,
    Ready,
}

/// How a `load` call reached `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ReadySource {
    /// Same URI was already loaded and ready, no new cycle started.
    AlreadyLoaded,
    /// The surface sent `PlayerReady`.
    Handshake,
    /// The ready timeout elapsed first.
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_player_ready_with_extra_fields() {
        let msg: InboundMessage =
            serde_json::from_value(json!({"@type": "PlayerReady", "version": 2})).unwrap();
        assert_eq!(msg, InboundMessage::PlayerReady);
    }

    #[test]
    fn parses_node_result_and_keeps_extra_fields() {
        let msg: InboundMessage = serde_json::from_value(json!({
            "@type": "NodeResult",
            "sequenceNodeId": "n-1",
            "messageId": "n-1",
            "score": {"scaled": 0.5},
            "duration": "PT3M"
        }))
        .unwrap();

        let InboundMessage::NodeResult(result) = msg else {
            panic!("expected NodeResult, got {msg:?}");
        };
        assert_eq!(result.sequence_node_id, "n-1");
        assert_eq!(result.score, Some(json!({"scaled": 0.5})));
        assert_eq!(result.submission, None);
        assert_eq!(result.extra.get("duration"), Some(&json!("PT3M")));
        assert!(!result.extra.contains_key("@type"));
    }

    #[test]
    fn unknown_type_maps_to_catch_all() {
        let msg: InboundMessage =
            serde_json::from_value(json!({"@type": "Resize", "height": 300})).unwrap();
        assert_eq!(msg, InboundMessage::Unknown);
    }

    #[test]
    fn missing_discriminator_is_an_error() {
        assert!(serde_json::from_value::<InboundMessage>(json!({"sequenceNodeId": "x"})).is_err());
    }

    #[test]
    fn result_request_carries_type_tag() {
        let req = NodeResultRequest {
            message_id: "m".into(),
            sequence_node_id: "n".into(),
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"@type": "NodeResultRequest", "messageId": "m", "sequenceNodeId": "n"})
        );
    }

    #[test]
    fn state_names_are_lowercase() {
        assert_eq!(ChannelState::Loading.to_string(), "loading");
        assert_eq!(ChannelState::Ready.as_ref(), "ready");
        assert_eq!(ReadySource::Handshake.to_string(), "Handshake");
    }
}
