use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, error};
use url::Url;

use crate::error::HubError;
use crate::hub::{Credentials, HubClient};
use crate::sequence::{ActivitySequence, SequenceNode};

/// [`HubClient`] speaking JSON over HTTP.
///
/// Relative collection URLs handed out by the Hub are resolved against
/// `hub_url`. A 404 or an empty/`null` body is "nothing there", not an error.
#[derive(Debug, Clone)]
pub struct HttpHubClient {
    client: Client,
    hub_url: Url,
}

impl HttpHubClient {
    pub fn new(hub_url: &str) -> Result<Self, HubError> {
        Self::with_client(Client::new(), hub_url)
    }

    pub fn with_client(client: Client, hub_url: &str) -> Result<Self, HubError> {
        let mut hub_url = Url::parse(hub_url)?;
        if !hub_url.path().ends_with('/') {
            let path = format!("{}/", hub_url.path());
            hub_url.set_path(&path);
        }
        Ok(Self { client, hub_url })
    }

    pub fn hub_url(&self) -> &Url {
        &self.hub_url
    }

    fn resolve(&self, url: &str) -> Result<Url, HubError> {
        Ok(self.hub_url.join(url)?)
    }

    fn authorize(request: RequestBuilder, credentials: &Credentials) -> RequestBuilder {
        match &credentials.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read<T: DeserializeOwned>(
        url: &Url,
        request: RequestBuilder,
    ) -> Result<Option<T>, HubError> {
        let resp = request.send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            debug!(%url, "hub has nothing at this url");
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_else(|_| "<no body>".into());
            error!(%url, status = status.as_u16(), "hub request failed");
            return Err(HubError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let text = resp.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(serde_json::from_str::<Option<T>>(&text)?)
    }
}

#[async_trait]
impl HubClient for HttpHubClient {
    async fn fetch_sequence(
        &self,
        sequence_url: &str,
        credentials: &Credentials,
    ) -> Result<Option<ActivitySequence>, HubError> {
        let url = self.resolve(sequence_url)?;
        debug!(%url, "fetching sequence");
        let request = Self::authorize(self.client.get(url.clone()), credentials);
        Self::read(&url, request).await
    }

    async fn fetch_node(
        &self,
        node_collection_url: &str,
        item_id: &str,
        node_index: usize,
        credentials: &Credentials,
    ) -> Result<Option<SequenceNode>, HubError> {
        let mut url = self.resolve(node_collection_url)?;
        url.query_pairs_mut()
            .append_pair("itemId", item_id)
            .append_pair("index", &node_index.to_string());
        debug!(%url, item_id, node_index, "fetching node");
        let request = Self::authorize(self.client.get(url.clone()), credentials);
        Self::read(&url, request).await
    }

    async fn post_result(
        &self,
        result_collection_url: &str,
        sequence_id: &str,
        result: &Value,
        credentials: &Credentials,
    ) -> Result<Option<Value>, HubError> {
        let url = self.resolve(result_collection_url)?;
        let body = json!({
            "sequenceId": sequence_id,
            "result": result,
        });
        debug!(%url, sequence_id, "posting result");
        let request = Self::authorize(self.client.post(url.clone()).json(&body), credentials);
        Self::read(&url, request).await
    }

    async fn fetch_report(
        &self,
        sequence_id: &str,
        credentials: &Credentials,
    ) -> Result<Option<Value>, HubError> {
        let url = self.resolve(&format!("sequences/{sequence_id}/report"))?;
        debug!(%url, "fetching report");
        let request = Self::authorize(self.client.get(url.clone()), credentials);
        Self::read(&url, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn creds() -> Credentials {
        Credentials::bearer("t0ken")
    }

    #[tokio::test]
    async fn fetches_sequence_with_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/sequences/s1")
            .match_header("authorization", "Bearer t0ken")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "sequenceId": "s1",
                    "nodeCollectionUrl": "nodes",
                    "items": [{"id": "a"}, {"id": "b"}]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let hub = HttpHubClient::new(&server.url()).unwrap();
        let seq = hub.fetch_sequence("sequences/s1", &creds()).await.unwrap().unwrap();
        assert_eq!(seq.sequence_id, "s1");
        assert_eq!(seq.items.len(), 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn node_query_carries_item_and_index() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/nodes")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("itemId".into(), "b".into()),
                Matcher::UrlEncoded("index".into(), "1".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({
                    "id": "n-b",
                    "index": 1,
                    "itemId": "b",
                    "launchUri": "https://content.example/b",
                    "resultCollectionUrl": "results"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let hub = HttpHubClient::new(&server.url()).unwrap();
        let node = hub.fetch_node("nodes", "b", 1, &creds()).await.unwrap().unwrap();
        assert_eq!(node.id, "n-b");
        assert_eq!(node.payload, Value::Null);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_or_null_node_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _gone = server
            .mock("GET", "/nodes")
            .match_query(Matcher::UrlEncoded("itemId".into(), "gone".into()))
            .with_status(404)
            .create_async()
            .await;
        let _null = server
            .mock("GET", "/nodes")
            .match_query(Matcher::UrlEncoded("itemId".into(), "null".into()))
            .with_status(200)
            .with_body("null")
            .create_async()
            .await;

        let hub = HttpHubClient::new(&server.url()).unwrap();
        assert!(hub.fetch_node("nodes", "gone", 0, &creds()).await.unwrap().is_none());
        assert!(hub.fetch_node("nodes", "null", 0, &creds()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/sequences/s1/report")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let hub = HttpHubClient::new(&server.url()).unwrap();
        let err = hub.fetch_report("s1", &creds()).await.unwrap_err();
        assert!(matches!(err, HubError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn posts_result_wrapped_with_sequence_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/results")
            .match_body(Matcher::PartialJson(json!({
                "sequenceId": "s1",
                "result": {"sequenceNodeId": "n-a", "nextIndex": 1}
            })))
            .with_status(201)
            .with_body(json!({"ok": true}).to_string())
            .create_async()
            .await;

        let hub = HttpHubClient::new(&server.url()).unwrap();
        let ack = hub
            .post_result(
                "results",
                "s1",
                &json!({"sequenceNodeId": "n-a", "nextIndex": 1}),
                &creds(),
            )
            .await
            .unwrap();
        assert_eq!(ack, Some(json!({"ok": true})));
        mock.assert_async().await;
    }

    #[test]
    fn hub_url_gains_trailing_slash() {
        let hub = HttpHubClient::new("https://hub.example/api").unwrap();
        assert_eq!(hub.hub_url().as_str(), "https://hub.example/api/");
        assert_eq!(
            hub.resolve("nodes").unwrap().as_str(),
            "https://hub.example/api/nodes"
        );
        assert_eq!(
            hub.resolve("https://other.example/x").unwrap().as_str(),
            "https://other.example/x"
        );
    }
}
