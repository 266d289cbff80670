//! Per-slot messaging between the player and one isolated rendering surface.
//!
//! ```text
//! Surface (process / mock)  ──SurfaceMessage──▶  PlayerChannel  ──SlotEvent──▶ owner
//!          ▲                                          │
//!          └──────────── navigate / post ─────────────┘
//! ```
pub mod channel;
pub mod error;
pub mod message;
pub mod process;
pub mod surface;

#[cfg(any(test, feature = "test-utils"))]
pub mod surface_test_util;

pub use channel::{ChannelConfig, PlayerChannel, DEFAULT_READY_TIMEOUT};
pub use error::ChannelError;
pub use message::{
    ChannelEvent, ChannelState, InboundMessage, NodeResult, NodeResultRequest, ReadySource,
    SlotEvent, SurfaceId, SurfaceMessage,
};
pub use process::ProcessSurface;
pub use surface::{Surface, SurfaceCommand};
