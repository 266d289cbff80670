use thiserror::Error;

/// Transport-level failure talking to the Hub.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid hub URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Hub returned {status} for {url}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("Could not decode hub response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The Hub had nothing (or failed) where the sequence needs data.
/// Fatal to the current step; never retried here.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Hub returned no sequence for `{url}`")]
    NoSequence { url: String },

    #[error("Hub returned no node for item `{item_id}` at index {index}")]
    NoNode { item_id: String, index: usize },

    #[error("Hub request failed: {0}")]
    Hub(#[from] HubError),
}

/// Why an inbound result could not be matched to a pending request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("Unmatched result `{correlation_id}`: no pending request")]
    Unmatched { correlation_id: String },

    #[error("Mismatched result `{correlation_id}`: expected node `{expected}`, got `{received}`")]
    Mismatched {
        correlation_id: String,
        expected: String,
        received: String,
    },

    #[error("A request for `{correlation_id}` is already pending")]
    Duplicate { correlation_id: String },

    #[error("No item at index {index} for result `{correlation_id}`")]
    UnknownItem { correlation_id: String, index: usize },
}
