use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode surface payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Surface `{0}` is closed")]
    SurfaceClosed(String),

    #[error("Load of `{uri}` was superseded by a newer load")]
    Superseded { uri: String },

    #[error("Load task for slot {slot} failed: {reason}")]
    Join { slot: usize, reason: String },
}
