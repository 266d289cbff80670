/*
    load(uri)
  Idle ───────────▶ Loading ──┬── PlayerReady ──┐
                       ▲      └── timeout ──────┤
                       │                        ▼
                       └────── load(other) ── Ready ──▶ load(same) resolves at once
*/

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::error::ChannelError;
use crate::message::{
    ChannelEvent, ChannelState, InboundMessage, ReadySource, SlotEvent, SurfaceId, SurfaceMessage,
};
use crate::surface::Surface;

pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// How long a load waits for `PlayerReady` before assuming the surface is ready.
    pub ready_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

struct LoadState {
    state: ChannelState,
    uri: Option<String>,
    cycle: u64,
    waiter: Option<oneshot::Sender<ReadySource>>,
    timer: Option<JoinHandle<()>>,
    visible: bool,
}

/// State shared between the channel handle, its inbound pump and its timers.
struct Shared {
    slot: usize,
    origin: SurfaceId,
    load: Mutex<LoadState>,
    events: mpsc::UnboundedSender<SlotEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LoadState> {
        self.load.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move `cycle` from Loading to Ready. Stale cycles and repeated
    /// promotions are ignored, so each cycle resolves at most once.
    fn promote(&self, cycle: u64, source: ReadySource) -> bool {
        let mut load = self.lock();
        if load.cycle != cycle || load.state != ChannelState::Loading {
            trace!(slot = self.slot, cycle, %source, "ignoring stale ready signal");
            return false;
        }
        load.state = ChannelState::Ready;
        if let Some(timer) = load.timer.take() {
            if source == ReadySource::Handshake {
                timer.abort();
            }
        }
        if let Some(waiter) = load.waiter.take() {
            let _ = waiter.send(source);
        }
        debug!(slot = self.slot, cycle, %source, uri = ?load.uri, "surface ready");
        true
    }

    fn on_player_ready(&self) {
        let (state, cycle) = {
            let load = self.lock();
            (load.state, load.cycle)
        };
        match state {
            ChannelState::Loading => {
                self.promote(cycle, ReadySource::Handshake);
            }
            ChannelState::Ready => {
                debug!(slot = self.slot, cycle, "late PlayerReady after ready, ignored");
            }
            ChannelState::Idle => {
                debug!(slot = self.slot, "PlayerReady before any load, ignored");
            }
        }
    }

    fn dispatch(&self, msg: SurfaceMessage) {
        if msg.origin != self.origin {
            trace!(
                slot = self.slot,
                origin = %msg.origin,
                "discarding message from foreign surface"
            );
            return;
        }

        let parsed = match serde_json::from_str::<InboundMessage>(&msg.body) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(slot = self.slot, error = %err, "dropping malformed surface message");
                return;
            }
        };

        let event = match parsed {
            InboundMessage::PlayerReady => {
                self.on_player_ready();
                return;
            }
            InboundMessage::NodeResult(result) => ChannelEvent::NodeResult(result),
            InboundMessage::SequenceNodeLoaded { sequence_node_id } => {
                ChannelEvent::SequenceNodeLoaded { sequence_node_id }
            }
            InboundMessage::GetSequenceNode { fields } => ChannelEvent::GetSequenceNode { fields },
            InboundMessage::Unknown => {
                warn!(
                    slot = self.slot,
                    body = %msg.body,
                    "dropping surface message of unknown type"
                );
                return;
            }
        };

        if self.events.send((self.slot, event)).is_err() {
            debug!(slot = self.slot, "no listener for channel events");
        }
    }
}

/// Messaging protocol wrapper around one [`Surface`].
///
/// Cloning is cheap; all clones drive the same surface and state.
#[derive(Clone)]
pub struct PlayerChannel {
    shared: Arc<Shared>,
    surface: Arc<dyn Surface>,
    config: ChannelConfig,
}

impl PlayerChannel {
    /// Wrap `surface` for `slot` and start pumping its inbound queue.
    ///
    /// Must be called inside a tokio runtime. Re-emitted events are sent on
    /// `events` tagged with `slot`.
    pub fn new(
        slot: usize,
        surface: Arc<dyn Surface>,
        mut inbound: mpsc::UnboundedReceiver<SurfaceMessage>,
        events: mpsc::UnboundedSender<SlotEvent>,
        config: ChannelConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            slot,
            origin: surface.id().clone(),
            load: Mutex::new(LoadState {
                state: ChannelState::Idle,
                uri: None,
                cycle: 0,
                waiter: None,
                timer: None,
                visible: true,
            }),
            events,
        });

        let pump = Arc::clone(&shared);
        tokio::spawn(async move {
            while let Some(msg) = inbound.recv().await {
                pump.dispatch(msg);
            }
            debug!(slot = pump.slot, "surface inbound queue closed");
        });

        Self {
            shared,
            surface,
            config,
        }
    }

    pub fn slot(&self) -> usize {
        self.shared.slot
    }

    pub fn surface_id(&self) -> &SurfaceId {
        &self.shared.origin
    }

    pub fn state(&self) -> ChannelState {
        self.shared.lock().state
    }

    pub fn current_uri(&self) -> Option<String> {
        self.shared.lock().uri.clone()
    }

    /// Number of load cycles started so far.
    pub fn cycle(&self) -> u64 {
        self.shared.lock().cycle
    }

    pub fn has_pending_timer(&self) -> bool {
        self.shared.lock().timer.is_some()
    }

    pub fn is_visible(&self) -> bool {
        self.shared.lock().visible
    }

    /// Load `uri` into the surface and wait until it is ready.
    ///
    /// Resolves with [`ReadySource::Timeout`] if the surface never says
    /// `PlayerReady`; an unresponsive surface is treated as ready. A newer
    /// `load` on the same channel makes this one fail with
    /// [`ChannelError::Superseded`].
    pub async fn load(&self, uri: &str) -> Result<ReadySource, ChannelError> {
        let ready = {
            let mut load = self.shared.lock();
            if load.state == ChannelState::Ready && load.uri.as_deref() == Some(uri) {
                debug!(slot = self.slot(), uri, "uri already loaded");
                return Ok(ReadySource::AlreadyLoaded);
            }

            if let Some(timer) = load.timer.take() {
                timer.abort();
            }
            if load.waiter.take().is_some() {
                debug!(slot = self.slot(), cycle = load.cycle, "superseding pending load");
            }

            load.cycle += 1;
            load.state = ChannelState::Loading;
            load.uri = Some(uri.to_string());

            let (tx, rx) = oneshot::channel();
            load.waiter = Some(tx);

            let cycle = load.cycle;
            let shared = Arc::clone(&self.shared);
            let timeout = self.config.ready_timeout;
            load.timer = Some(tokio::spawn(async move {
                sleep(timeout).await;
                if shared.promote(cycle, ReadySource::Timeout) {
                    debug!(
                        slot = shared.slot,
                        cycle,
                        "no PlayerReady within {:?}, assuming ready",
                        timeout
                    );
                }
            }));

            debug!(slot = self.slot(), cycle, uri, "load cycle started");
            rx
        };

        if let Err(err) = self.surface.navigate(uri).await {
            warn!(slot = self.slot(), uri, error = %err, "surface navigation failed");
        }

        ready.await.map_err(|_| ChannelError::Superseded {
            uri: uri.to_string(),
        })
    }

    /// Serialize `payload` and deliver it to the surface.
    ///
    /// Callers only send once `load` has resolved for the current cycle; the
    /// channel neither queues nor rejects early sends.
    pub async fn send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<(), ChannelError> {
        let body = serde_json::to_string(payload)?;
        if self.state() != ChannelState::Ready {
            debug!(slot = self.slot(), "sending on a channel that is not ready");
        }
        self.surface.post(body).await
    }

    pub fn set_visible(&self, visible: bool) {
        self.shared.lock().visible = visible;
        self.surface.set_visible(visible);
    }
}

impl std::fmt::Debug for PlayerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let load = self.shared.lock();
        f.debug_struct("PlayerChannel")
            .field("slot", &self.shared.slot)
            .field("surface", &self.shared.origin)
            .field("state", &load.state)
            .field("uri", &load.uri)
            .field("cycle", &load.cycle)
            .finish()
    }
}
