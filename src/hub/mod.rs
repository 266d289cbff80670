/*
    SequenceOrchestrator ──fetch_sequence / fetch_node──▶ HubClient ──▶ Hub
                         ──post_result / fetch_report──▶
*/
pub mod http;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::HubError;
use crate::sequence::{ActivitySequence, SequenceNode};

pub use http::HttpHubClient;

/// Credentials passed along with every Hub call.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub token: Option<String>,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = self.token.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credentials").field("token", &token).finish()
    }
}

/// Request/response access to the remote store of sequences, nodes and results.
///
/// `Ok(None)` means the Hub answered but had nothing; callers decide whether
/// that is fatal.
#[async_trait]
pub trait HubClient: Send + Sync {
    async fn fetch_sequence(
        &self,
        sequence_url: &str,
        credentials: &Credentials,
    ) -> Result<Option<ActivitySequence>, HubError>;

    async fn fetch_node(
        &self,
        node_collection_url: &str,
        item_id: &str,
        node_index: usize,
        credentials: &Credentials,
    ) -> Result<Option<SequenceNode>, HubError>;

    /// Returns the Hub's acknowledgement, if any.
    async fn post_result(
        &self,
        result_collection_url: &str,
        sequence_id: &str,
        result: &Value,
        credentials: &Credentials,
    ) -> Result<Option<Value>, HubError>;

    async fn fetch_report(
        &self,
        sequence_id: &str,
        credentials: &Credentials,
    ) -> Result<Option<Value>, HubError>;
}
