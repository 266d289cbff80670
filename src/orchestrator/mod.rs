/*
┌────────────────────────── SequenceOrchestrator ──────────────────────────┐
│ cursor ──▶ advance_round ──fetch_node──▶ HubClient                       │
│                 │                                                        │
│                 ▼ assign                                                 │
│   PlayerSlot[0..n] ── PlayerChannel ── Surface                           │
│                 │            │                                           │
│ request_results │            └─ SlotEvent (NodeResult, …) ─┐             │
│                 ▼                                          ▼             │
│          ResultCorrelator ◀──────── handle_channel_event ──┘             │
│                 │                                                        │
│                 └─ AugmentedResult ──post_result──▶ HubClient            │
└──────────────────────────────────────────────────────────────────────────┘
*/
pub mod slot;

use std::sync::Arc;

use futures::future::join_all;
use player_channel::{
    ChannelConfig, ChannelError, ChannelEvent, NodeResult, NodeResultRequest, PlayerChannel,
    ReadySource, SlotEvent, Surface, SurfaceMessage,
};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::correlator::{AugmentedResult, DuplicatePolicy, Reason, ResultCorrelator};
use crate::error::FetchError;
use crate::events::{EventBus, SequenceEvent};
use crate::hub::{Credentials, HubClient};
use crate::sequence::{ActivitySequence, NodeIndex, SequenceNode};

pub use slot::PlayerSlot;

/// A surface together with the receiving half of its inbound queue.
pub type SurfaceBinding = (Arc<dyn Surface>, mpsc::UnboundedReceiver<SurfaceMessage>);

#[derive(Debug, Clone, Default)]
pub struct OrchestratorOptions {
    pub credentials: Credentials,
    pub channel: ChannelConfig,
    pub duplicate_policy: DuplicatePolicy,
    pub events: EventBus,
}

/// A node handed to a slot in the latest round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub slot: usize,
    pub index: usize,
    pub node_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// At least one slot received a node.
    Assigned(Vec<Assignment>),
    /// Nothing left to assign.
    Finished,
}

/// Walks an [`ActivitySequence`] through a set of rendering slots.
///
/// All operations take `&mut self`: the orchestrator is owned by a single
/// driving task, which keeps the pending-request table and node index free of
/// concurrent access. Channel events reach it through
/// [`next_channel_event`](Self::next_channel_event).
pub struct SequenceOrchestrator {
    sequence: ActivitySequence,
    slots: Vec<PlayerSlot>,
    hub: Arc<dyn HubClient>,
    credentials: Credentials,
    cursor: i64,
    nodes: NodeIndex,
    correlator: ResultCorrelator,
    recent: Vec<Assignment>,
    finished: bool,
    events: EventBus,
    channel_events: mpsc::UnboundedReceiver<SlotEvent>,
}

impl SequenceOrchestrator {
    /// Set up one slot per surface, with the cursor before the first item.
    ///
    /// Must be called inside a tokio runtime.
    pub fn initialize(
        sequence: ActivitySequence,
        surfaces: Vec<SurfaceBinding>,
        hub: Arc<dyn HubClient>,
        options: OrchestratorOptions,
    ) -> Self {
        let (events_tx, channel_events) = mpsc::unbounded_channel();
        let slots = surfaces
            .into_iter()
            .enumerate()
            .map(|(id, (surface, inbound))| {
                let channel = PlayerChannel::new(
                    id,
                    surface,
                    inbound,
                    events_tx.clone(),
                    options.channel.clone(),
                );
                PlayerSlot::new(id, channel)
            })
            .collect::<Vec<_>>();

        info!(
            sequence_id = %sequence.sequence_id,
            items = sequence.len(),
            slots = slots.len(),
            "sequence orchestrator initialized"
        );

        Self {
            sequence,
            slots,
            hub,
            credentials: options.credentials,
            cursor: -1,
            nodes: NodeIndex::new(),
            correlator: ResultCorrelator::new(options.duplicate_policy),
            recent: vec![],
            finished: false,
            events: options.events,
            channel_events,
        }
    }

    /// Fetch the sequence at `sequence_url` and initialize from it.
    pub async fn load(
        hub: Arc<dyn HubClient>,
        sequence_url: &str,
        surfaces: Vec<SurfaceBinding>,
        options: OrchestratorOptions,
    ) -> Result<Self, FetchError> {
        let sequence = match hub.fetch_sequence(sequence_url, &options.credentials).await {
            Ok(Some(sequence)) if !sequence.is_empty() => sequence,
            Ok(_) => {
                error!(sequence_url, "hub returned an empty sequence");
                return Err(FetchError::NoSequence {
                    url: sequence_url.to_string(),
                });
            }
            Err(err) => {
                error!(sequence_url, error = %err, "could not fetch sequence");
                return Err(err.into());
            }
        };

        let orchestrator = Self::initialize(sequence, surfaces, hub, options);
        orchestrator
            .events
            .publish(SequenceEvent::SequenceLoaded(orchestrator.sequence.clone()));
        Ok(orchestrator)
    }

    pub fn sequence(&self) -> &ActivitySequence {
        &self.sequence
    }

    pub fn slots(&self) -> &[PlayerSlot] {
        &self.slots
    }

    pub fn slot(&self, id: usize) -> Option<&PlayerSlot> {
        self.slots.get(id)
    }

    /// Position of the last assigned item, `-1` before the first round.
    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    pub fn is_over(&self) -> bool {
        self.cursor >= self.last_index()
    }

    pub fn is_last(&self) -> bool {
        self.cursor == self.last_index()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn recent_assignments(&self) -> &[Assignment] {
        &self.recent
    }

    pub fn correlator(&self) -> &ResultCorrelator {
        &self.correlator
    }

    pub fn node(&self, node_id: &str) -> Option<&SequenceNode> {
        self.nodes.get(node_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SequenceEvent> {
        self.events.subscribe()
    }

    fn last_index(&self) -> i64 {
        self.sequence.len() as i64 - 1
    }

    /// Fill every slot with the next item, in slot order.
    ///
    /// All node fetches of the round are in flight together; nodes are then
    /// assigned in slot order. Slots the cursor can no longer reach stay
    /// empty; when none can be filled the sequence is finished and
    /// `SequenceFinished` is published once.
    ///
    /// A failed fetch stops the round at that slot: earlier slots keep their
    /// nodes, and the cursor rests on the last assigned index so the next
    /// round starts again at the item that failed.
    pub async fn advance_round(&mut self) -> Result<RoundOutcome, FetchError> {
        if self.finished {
            return Ok(RoundOutcome::Finished);
        }

        let start = self.cursor;
        let last = self.last_index();
        let mut planned = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            if self.cursor + 1 > last {
                break;
            }
            self.cursor += 1;
            planned.push((slot.id(), self.cursor as usize));
        }

        if planned.is_empty() {
            for slot in &mut self.slots {
                slot.release();
            }
            self.recent.clear();
            self.finished = true;
            info!(sequence_id = %self.sequence.sequence_id, "sequence finished");
            self.events.publish(SequenceEvent::SequenceFinished);
            return Ok(RoundOutcome::Finished);
        }

        let hub = Arc::clone(&self.hub);
        let credentials = &self.credentials;
        let collection = self.sequence.node_collection_url.as_str();
        let fetches = planned.iter().map(|&(_, index)| {
            let hub = Arc::clone(&hub);
            let item_id = self.sequence.items[index].id.as_str();
            async move { hub.fetch_node(collection, item_id, index, credentials).await }
        });
        let responses = join_all(fetches).await;

        let mut assignments = Vec::with_capacity(planned.len());
        let mut failure = None;
        for (&(slot_id, index), response) in planned.iter().zip(responses) {
            let item_id = &self.sequence.items[index].id;
            let node = match response {
                Ok(Some(node)) => node,
                Ok(None) => {
                    error!(item_id = %item_id, index, "hub returned no node");
                    failure = Some(FetchError::NoNode {
                        item_id: item_id.clone(),
                        index,
                    });
                    break;
                }
                Err(err) => {
                    error!(item_id = %item_id, index, error = %err, "node fetch failed");
                    failure = Some(err.into());
                    break;
                }
            };
            assignments.push(Assignment {
                slot: slot_id,
                index,
                node_id: node.id.clone(),
            });
            self.nodes.insert(node.clone());
            self.slots[slot_id].assign(node);
            debug!(slot = slot_id, index, "item assigned");
            self.events.publish(SequenceEvent::ItemLoaded { index, slot: slot_id });
        }

        let filled = assignments.len();
        for slot in self.slots.iter_mut().skip(filled) {
            slot.release();
        }
        self.cursor = start + filled as i64;
        self.recent = assignments.clone();

        match failure {
            Some(err) => Err(err),
            None => Ok(RoundOutcome::Assigned(assignments)),
        }
    }

    /// Wait until every slot filled by the latest round has loaded and
    /// received its node.
    pub async fn wait_for_loads(&mut self) -> Vec<(usize, Result<ReadySource, ChannelError>)> {
        let mut outcomes = vec![];
        for slot in &mut self.slots {
            if let Some(outcome) = slot.wait_loaded().await {
                outcomes.push((slot.id(), outcome));
            }
        }
        outcomes
    }

    /// Ask every surface of the latest round for its result, to display the
    /// next item afterwards.
    pub async fn request_results_for_round(&mut self) -> usize {
        self.request_results(|assignment| Reason::DisplayItem {
            item_index: assignment.index,
        })
        .await
    }

    /// Ask every surface of the latest round for its result, ending the
    /// sequence afterwards.
    pub async fn request_results_for_finish(&mut self) -> usize {
        self.request_results(|_| Reason::Finish).await
    }

    async fn request_results(&mut self, reason: impl Fn(&Assignment) -> Reason) -> usize {
        let assignments = std::mem::take(&mut self.recent);
        let mut sent = 0;
        for assignment in &assignments {
            let correlation_id = assignment.node_id.as_str();
            if let Err(err) =
                self.correlator
                    .register(correlation_id, &assignment.node_id, reason(assignment))
            {
                warn!(slot = assignment.slot, error = %err, "result request not sent");
                continue;
            }

            let request = NodeResultRequest {
                message_id: correlation_id.to_string(),
                sequence_node_id: assignment.node_id.clone(),
            };
            match self.slots[assignment.slot].channel().send(&request).await {
                Ok(()) => sent += 1,
                Err(err) => {
                    warn!(slot = assignment.slot, error = %err, "could not deliver result request")
                }
            }
        }
        sent
    }

    /// Next event re-emitted by any slot's channel.
    pub async fn next_channel_event(&mut self) -> Option<SlotEvent> {
        self.channel_events.recv().await
    }

    /// React to one channel event. Returns the result when a `NodeResult`
    /// was resolved.
    pub async fn handle_channel_event(
        &mut self,
        slot: usize,
        event: ChannelEvent,
    ) -> Option<AugmentedResult> {
        match event {
            ChannelEvent::NodeResult(envelope) => self.handle_inbound_result(slot, envelope).await,
            ChannelEvent::SequenceNodeLoaded { sequence_node_id } => {
                debug!(slot, node_id = %sequence_node_id, "surface rendered node");
                self.events.publish(SequenceEvent::NodeRendered {
                    slot,
                    node_id: sequence_node_id,
                });
                None
            }
            ChannelEvent::GetSequenceNode { .. } => {
                let Some(player) = self.slots.get(slot) else {
                    warn!(slot, "node requested by unknown slot");
                    return None;
                };
                match player.repost().await {
                    Ok(true) => debug!(slot, "node re-sent on request"),
                    Ok(false) => debug!(slot, "node requested by an idle slot"),
                    Err(err) => warn!(slot, error = %err, "could not re-send node"),
                }
                None
            }
        }
    }

    /// Resolve a result from `slot` and forward it to the Hub.
    ///
    /// Results that do not match a pending request are logged and dropped.
    /// A failed post is logged; the resolved result is returned either way.
    pub async fn handle_inbound_result(
        &mut self,
        slot: usize,
        envelope: NodeResult,
    ) -> Option<AugmentedResult> {
        let result = match self.correlator.resolve(&envelope, &self.sequence.items) {
            Ok(result) => result,
            Err(err) => {
                warn!(slot, error = %err, "dropping inbound result");
                return None;
            }
        };

        let Some(node) = self.nodes.get(&envelope.sequence_node_id) else {
            warn!(
                slot,
                node_id = %envelope.sequence_node_id,
                "no node known for result, not posted"
            );
            return Some(result);
        };

        let payload = result.clone().into_value();
        match self
            .hub
            .post_result(
                &node.result_collection_url,
                &self.sequence.sequence_id,
                &payload,
                &self.credentials,
            )
            .await
        {
            Ok(Some(_ack)) => {
                tracing::event!(
                    target: "result",
                    tracing::Level::INFO,
                    sequence_id = %self.sequence.sequence_id,
                    node_id = %node.id,
                    slot,
                    status = "posted",
                );
                self.events.publish(SequenceEvent::ResultPosted {
                    slot,
                    node_id: node.id.clone(),
                });
            }
            Ok(None) => warn!(slot, node_id = %node.id, "hub did not acknowledge result"),
            Err(err) => warn!(slot, node_id = %node.id, error = %err, "posting result failed"),
        }
        Some(result)
    }

    /// The Hub's report for this sequence, if it has one.
    pub async fn fetch_report(&self) -> Option<Value> {
        match self
            .hub
            .fetch_report(&self.sequence.sequence_id, &self.credentials)
            .await
        {
            Ok(report) => report,
            Err(err) => {
                warn!(
                    sequence_id = %self.sequence.sequence_id,
                    error = %err,
                    "could not fetch report"
                );
                None
            }
        }
    }
}

impl std::fmt::Debug for SequenceOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceOrchestrator")
            .field("sequence_id", &self.sequence.sequence_id)
            .field("items", &self.sequence.len())
            .field("slots", &self.slots.len())
            .field("cursor", &self.cursor)
            .field("pending_results", &self.correlator.len())
            .field("finished", &self.finished)
            .finish()
    }
}
