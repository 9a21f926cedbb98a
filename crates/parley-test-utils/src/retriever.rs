use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use parley_core::error::{ParleyError, Result};
use parley_core::traits::RetrievalPort;
use parley_core::types::{Passage, RetrieveOptions};

#[derive(Default)]
struct KnowledgeBase {
    passages: Vec<Passage>,
    delay: Option<Duration>,
    fail: Option<String>,
}

/// In-memory retrieval port with canned passages per knowledge base.
#[derive(Default)]
pub struct MockRetriever {
    bases: HashMap<String, KnowledgeBase>,
    queries: Mutex<Vec<(String, String)>>,
}

impl MockRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_passages(mut self, kb_id: &str, passages: Vec<Passage>) -> Self {
        self.bases.entry(kb_id.to_string()).or_default().passages = passages;
        self
    }

    /// Delay every call against `kb_id`, e.g. to make it finish last.
    pub fn with_delay(mut self, kb_id: &str, delay: Duration) -> Self {
        self.bases.entry(kb_id.to_string()).or_default().delay = Some(delay);
        self
    }

    pub fn failing(mut self, kb_id: &str, message: &str) -> Self {
        self.bases.entry(kb_id.to_string()).or_default().fail = Some(message.to_string());
        self
    }

    /// `(knowledge_base_id, query)` pairs in call order.
    pub fn queries(&self) -> Vec<(String, String)> {
        self.queries.lock().unwrap().clone()
    }
}

impl RetrievalPort for MockRetriever {
    fn retrieve(
        &self,
        knowledge_base_id: &str,
        query: &str,
        options: RetrieveOptions,
    ) -> BoxFuture<'_, Result<Vec<Passage>>> {
        self.queries
            .lock()
            .unwrap()
            .push((knowledge_base_id.to_string(), query.to_string()));
        let kb_id = knowledge_base_id.to_string();

        Box::pin(async move {
            let Some(kb) = self.bases.get(&kb_id) else {
                return Ok(vec![]);
            };
            if let Some(delay) = kb.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(ref message) = kb.fail {
                return Err(ParleyError::RetrievalStatus {
                    status: 500,
                    body: message.clone(),
                });
            }
            Ok(kb
                .passages
                .iter()
                .filter(|p| p.score >= options.threshold)
                .take(options.max_results)
                .cloned()
                .collect())
        })
    }
}
