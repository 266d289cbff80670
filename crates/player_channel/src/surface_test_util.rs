use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::{
    error::ChannelError,
    message::{SurfaceId, SurfaceMessage},
    surface::Surface,
};

/// In-memory surface for tests.
///
/// Records everything the channel sends to it and lets the test inject
/// inbound messages. In `responsive` mode it answers navigations with
/// `PlayerReady` and result requests with a `NodeResult`, like a well-behaved
/// activity would.
pub struct MockSurface {
    id: SurfaceId,
    in_tx: UnboundedSender<SurfaceMessage>,
    navigations: Mutex<Vec<String>>,
    posted: Mutex<Vec<Value>>,
    visible: AtomicBool,
    responsive: bool,
    score: Mutex<Value>,
}

impl MockSurface {
    pub fn new(id: &str) -> (Arc<Self>, UnboundedReceiver<SurfaceMessage>) {
        Self::build(id, false)
    }

    pub fn responsive(id: &str) -> (Arc<Self>, UnboundedReceiver<SurfaceMessage>) {
        Self::build(id, true)
    }

    fn build(id: &str, responsive: bool) -> (Arc<Self>, UnboundedReceiver<SurfaceMessage>) {
        let (in_tx, in_rx) = unbounded_channel();
        let surface = Arc::new(Self {
            id: SurfaceId::new(id),
            in_tx,
            navigations: Mutex::new(vec![]),
            posted: Mutex::new(vec![]),
            visible: AtomicBool::new(true),
            responsive,
            score: Mutex::new(json!({"scaled": 1.0})),
        });
        (surface, in_rx)
    }

    /// Score reported by a responsive surface.
    pub fn set_score(&self, score: Value) {
        *self.score.lock().unwrap() = score;
    }

    /// Inject a message as if this surface had sent it.
    pub fn inject(&self, msg: Value) {
        self.inject_from(self.id.clone(), msg);
    }

    /// Inject a message claiming to come from another surface.
    pub fn inject_from(&self, origin: SurfaceId, msg: Value) {
        let _ = self.in_tx.send(SurfaceMessage::new(origin, msg.to_string()));
    }

    pub fn inject_raw(&self, body: &str) {
        let _ = self.in_tx.send(SurfaceMessage::new(self.id.clone(), body));
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn posted(&self) -> Vec<Value> {
        self.posted.lock().unwrap().clone()
    }

    /// Posted messages with the given `@type`.
    pub fn posted_of_type(&self, kind: &str) -> Vec<Value> {
        self.posted()
            .into_iter()
            .filter(|msg| msg.get("@type").and_then(Value::as_str) == Some(kind))
            .collect()
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Surface for MockSurface {
    fn id(&self) -> &SurfaceId {
        &self.id
    }

    async fn navigate(&self, uri: &str) -> Result<(), ChannelError> {
        self.navigations.lock().unwrap().push(uri.to_string());
        if self.responsive {
            self.inject(json!({"@type": "PlayerReady"}));
        }
        Ok(())
    }

    async fn post(&self, body: String) -> Result<(), ChannelError> {
        let msg: Value = serde_json::from_str(&body)?;
        let kind = msg.get("@type").and_then(Value::as_str);
        if self.responsive && kind == Some("NodeResultRequest") {
            let score = self.score.lock().unwrap().clone();
            self.inject(json!({
                "@type": "NodeResult",
                "sequenceNodeId": msg["sequenceNodeId"],
                "messageId": msg["messageId"],
                "score": score,
            }));
        }
        self.posted.lock().unwrap().push(msg);
        Ok(())
    }

    fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }
}
