use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use parley_core::config::RetrievalConfig;
use parley_core::error::{ParleyError, Result};
use parley_core::traits::RetrievalPort;
use parley_core::types::{Passage, RetrieveOptions};

/// Retrieval port backed by an HTTP search service.
///
/// Each call is one `POST <base_url>/retrieve`. Transport failures (including
/// timeouts) and non-2xx responses map to different error variants.
pub struct HttpRetriever {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveRequest<'a> {
    knowledge_base_id: &'a str,
    query: &'a str,
    max_results: usize,
    threshold: f32,
}

#[derive(Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    results: Vec<Passage>,
}

impl HttpRetriever {
    pub fn new(config: &RetrievalConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ParleyError::Config(format!("retrieval client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl RetrievalPort for HttpRetriever {
    fn retrieve(
        &self,
        knowledge_base_id: &str,
        query: &str,
        options: RetrieveOptions,
    ) -> BoxFuture<'_, Result<Vec<Passage>>> {
        let knowledge_base_id = knowledge_base_id.to_string();
        let query = query.to_string();
        Box::pin(async move {
            let url = format!("{}/retrieve", self.base_url);
            let mut req = self.client.post(&url).json(&RetrieveRequest {
                knowledge_base_id: &knowledge_base_id,
                query: &query,
                max_results: options.max_results,
                threshold: options.threshold,
            });
            if let Some(ref key) = self.api_key {
                req = req.bearer_auth(key);
            }

            let resp = req.send().await.map_err(|e| {
                if e.is_timeout() {
                    ParleyError::RetrievalTransport(format!("request to {} timed out", url))
                } else {
                    ParleyError::RetrievalTransport(e.to_string())
                }
            })?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(ParleyError::RetrievalStatus {
                    status: status.as_u16(),
                    body,
                });
            }

            let body: RetrieveResponse = resp
                .json()
                .await
                .map_err(|e| ParleyError::RetrievalBackend(format!("bad response body: {}", e)))?;

            debug!(
                knowledge_base = %knowledge_base_id,
                results = body.results.len(),
                "Retrieved passages"
            );
            Ok(body.results)
        })
    }
}
