use player_channel::{ChannelError, PlayerChannel, ReadySource};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::sequence::SequenceNode;

/// One rendering slot: its channel plus whatever node it currently shows.
#[derive(Debug)]
pub struct PlayerSlot {
    id: usize,
    channel: PlayerChannel,
    node: Option<SequenceNode>,
    loading: Option<JoinHandle<Result<ReadySource, ChannelError>>>,
}

impl PlayerSlot {
    pub fn new(id: usize, channel: PlayerChannel) -> Self {
        Self {
            id,
            channel,
            node: None,
            loading: None,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn channel(&self) -> &PlayerChannel {
        &self.channel
    }

    pub fn node(&self) -> Option<&SequenceNode> {
        self.node.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.node.is_none()
    }

    /// Show `node` in this slot.
    ///
    /// Loading and posting run in the background: the channel loads the
    /// node's launch URI and, once the surface is ready, receives the node.
    /// If a later assignment supersedes the load, the node is never posted.
    pub fn assign(&mut self, node: SequenceNode) {
        let channel = self.channel.clone();
        let slot = self.id;
        let to_post = node.clone();
        self.loading = Some(tokio::spawn(async move {
            let source = channel.load(&to_post.launch_uri).await?;
            channel.send(&to_post).await?;
            debug!(slot, node_id = %to_post.id, %source, "node posted to surface");
            Ok(source)
        }));
        self.node = Some(node);
    }

    /// Leave the slot empty for this round. A load still in flight is
    /// abandoned, so its node is never posted.
    pub fn release(&mut self) {
        if let Some(loading) = self.loading.take() {
            loading.abort();
        }
        if let Some(node) = self.node.take() {
            debug!(slot = self.id, node_id = %node.id, "slot released");
        }
    }

    /// Wait for the background load of the current assignment, if any.
    pub async fn wait_loaded(&mut self) -> Option<Result<ReadySource, ChannelError>> {
        let handle = self.loading.take()?;
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(err) => Err(ChannelError::Join {
                slot: self.id,
                reason: err.to_string(),
            }),
        };
        if let Err(err) = &outcome {
            warn!(slot = self.id, error = %err, "slot load did not complete");
        }
        Some(outcome)
    }

    /// Send the current node again, e.g. when the surface asks for it.
    pub async fn repost(&self) -> Result<bool, ChannelError> {
        match &self.node {
            Some(node) => {
                self.channel.send(node).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
