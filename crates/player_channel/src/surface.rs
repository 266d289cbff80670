use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::ChannelError, message::SurfaceId};

/// Transport to one isolated rendering surface.
///
/// A surface is handed out together with the receiving half of its inbound
/// queue (see [`crate::ProcessSurface::spawn`]); every message it pushes there
/// is stamped with its own [`SurfaceId`] so the owning channel can check the
/// origin.
#[async_trait]
pub trait Surface: Send + Sync + 'static {
    fn id(&self) -> &SurfaceId;

    /// Begin loading `uri`. Returns once the request is handed to the surface,
    /// not when the surface has finished loading.
    async fn navigate(&self, uri: &str) -> Result<(), ChannelError>;

    /// Deliver an already serialized message.
    async fn post(&self, body: String) -> Result<(), ChannelError>;

    fn set_visible(&self, visible: bool);
}

/// Host → surface commands used by line-oriented transports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum SurfaceCommand {
    Navigate { uri: String },
    Post { message: Value },
    Visible { visible: bool },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commands_encode_with_op_tag() {
        let nav = SurfaceCommand::Navigate { uri: "https://a/b".into() };
        assert_eq!(
            serde_json::to_value(&nav).unwrap(),
            json!({"op": "navigate", "uri": "https://a/b"})
        );
        let vis = SurfaceCommand::Visible { visible: false };
        assert_eq!(
            serde_json::to_value(&vis).unwrap(),
            json!({"op": "visible", "visible": false})
        );
    }
}
