use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use serde_json::{json, Value};
use tracing::{debug, error};

use parley_core::flow::{Flow, Node, NodeConfig, NodeKind, OutputMode, RetrievalConfig};
use parley_core::state::{ExecutionState, StepRecord, StepResult, StepStatus};
use parley_core::traits::RetrievalPort;
use parley_core::types::{Passage, RetrieveOptions};

use super::{config_mismatch, store_output, NodeHandler, TurnContext};
use crate::resolver::next_node;

/// Queries every configured knowledge base at once and merges the results
/// in configuration order.
pub struct RetrievalHandler {
    retriever: Arc<dyn RetrievalPort>,
}

impl RetrievalHandler {
    pub fn new(retriever: Arc<dyn RetrievalPort>) -> Self {
        Self { retriever }
    }
}

/// Render merged passages for prompt use.
pub fn format_passages(passages: &[Passage], mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => serde_json::to_string(passages).unwrap_or_else(|_| "[]".into()),
        OutputMode::Text => passages
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{}. {}", i + 1, p.text))
            .collect::<Vec<_>>()
            .join("\n\n"),
        OutputMode::Citations => {
            if passages.is_empty() {
                return String::new();
            }
            let body = passages
                .iter()
                .enumerate()
                .map(|(i, p)| format!("{} [{}]", p.text, i + 1))
                .collect::<Vec<_>>()
                .join("\n\n");
            let sources = passages
                .iter()
                .enumerate()
                .map(|(i, p)| format!("[{}] {}", i + 1, p.source))
                .collect::<Vec<_>>()
                .join("\n");
            format!("{}\n\nSources:\n{}", body, sources)
        }
    }
}

fn query_text<'s>(config: &RetrievalConfig, state: &'s ExecutionState) -> Option<&'s str> {
    config
        .input
        .as_deref()
        .and_then(|name| state.get_str(name))
        .or_else(|| state.get_str("lastUserInput"))
        .or_else(|| state.get_str("userInput"))
}

impl NodeHandler for RetrievalHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Retrieval
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        state: &'a mut ExecutionState,
        flow: &'a Flow,
        _ctx: &'a mut TurnContext,
    ) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            let NodeConfig::Retrieval(config) = &node.config else {
                return config_mismatch(node, NodeKind::Retrieval);
            };
            let Some(query) = query_text(config, state).map(str::to_string) else {
                return StepResult::error(format!("retrieval node '{}' has no query", node.id));
            };
            if config.knowledge_ids.is_empty() {
                return StepResult::error(format!(
                    "retrieval node '{}' has no knowledge bases configured",
                    node.id
                ));
            }

            let options = RetrieveOptions {
                max_results: config.max_results,
                threshold: config.threshold,
            };
            let calls = config
                .knowledge_ids
                .iter()
                .map(|kb| self.retriever.retrieve(kb, &query, options));
            let results = join_all(calls).await;

            let mut merged = Vec::new();
            for (kb, result) in config.knowledge_ids.iter().zip(results) {
                match result {
                    Ok(passages) => merged.extend(passages),
                    Err(e) => {
                        error!(node_id = %node.id, knowledge_base = %kb, error = %e, "Retrieval failed");
                        return StepResult::error(e.to_string());
                    }
                }
            }
            merged.truncate(config.max_results);

            let formatted = format_passages(&merged, config.output_mode);
            let raw = serde_json::to_value(&merged).unwrap_or(Value::Array(vec![]));
            debug!(node_id = %node.id, passages = merged.len(), "Retrieved");

            store_output(state, &node.id, &config.output_variable, raw.clone());
            state.set("retrievalResults", raw);
            store_output(
                state,
                &node.id,
                &config.context_variable,
                Value::String(formatted.clone()),
            );
            state.set_str("retrievalContext", formatted.clone());

            let next = next_node(flow, &node.id, None);
            let status = if next.is_some() {
                StepStatus::InProgress
            } else {
                StepStatus::Completed
            };
            state.record(
                StepRecord::new(&node.id, NodeKind::Retrieval, status)
                    .with_input(json!({ "query": query, "knowledgeIds": config.knowledge_ids }))
                    .with_output(&formatted),
            );
            StepResult::advance(formatted, next)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::flow::Edge;
    use parley_test_utils::{passages, MockRetriever};

    fn flow(config: RetrievalConfig) -> Flow {
        Flow::new(
            vec![
                Node::begin("begin", ""),
                Node::retrieval("search", config),
                Node::interface("ui"),
            ],
            vec![Edge::new("search", "ui")],
        )
    }

    async fn run(retriever: MockRetriever, config: RetrievalConfig, query: Option<&str>) -> (StepResult, ExecutionState) {
        let handler = RetrievalHandler::new(Arc::new(retriever));
        let flow = flow(config);
        let mut state = ExecutionState::new("search");
        if let Some(q) = query {
            state.set_str("userInput", q);
        }
        let mut ctx = TurnContext::new(None, "");
        let result = handler
            .execute(flow.node("search").unwrap(), &mut state, &flow, &mut ctx)
            .await;
        (result, state)
    }

    #[test]
    fn test_format_modes() {
        let p = vec![Passage::new("alpha", "a.md", 0.9), Passage::new("beta", "b.md", 0.8)];
        assert_eq!(format_passages(&p, OutputMode::Text), "1. alpha\n\n2. beta");
        assert_eq!(
            format_passages(&p, OutputMode::Citations),
            "alpha [1]\n\nbeta [2]\n\nSources:\n[1] a.md\n[2] b.md"
        );
        let json: Vec<Passage> =
            serde_json::from_str(&format_passages(&p, OutputMode::Json)).unwrap();
        assert_eq!(json, p);
    }

    #[tokio::test]
    async fn test_stores_raw_and_formatted_under_both_names() {
        let retriever = MockRetriever::new().with_passages("kb", passages("kb", 2));
        let config = RetrievalConfig {
            knowledge_ids: vec!["kb".into()],
            ..Default::default()
        };
        let (result, state) = run(retriever, config, Some("what?")).await;

        assert_eq!(result.status, StepStatus::InProgress);
        assert_eq!(state.get("documents").unwrap().as_array().unwrap().len(), 2);
        assert_eq!(state.get("retrievalResults"), state.get("documents"));
        assert_eq!(
            state.get_str("formattedDocuments"),
            Some("1. kb passage 1\n\n2. kb passage 2")
        );
        assert_eq!(state.get_str("retrievalContext"), state.get_str("formattedDocuments"));
        assert!(state.get("search.documents").is_some());
    }

    #[tokio::test]
    async fn test_failure_of_any_knowledge_base_is_error() {
        let retriever = MockRetriever::new()
            .with_passages("a", passages("a", 1))
            .failing("b", "index offline");
        let config = RetrievalConfig {
            knowledge_ids: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        let (result, state) = run(retriever, config, Some("q")).await;
        assert_eq!(result.status, StepStatus::Error);
        assert!(result.message.unwrap().contains("index offline"));
        assert!(state.history.is_empty());
    }

    #[tokio::test]
    async fn test_missing_query_or_knowledge_bases() {
        let config = RetrievalConfig {
            knowledge_ids: vec!["kb".into()],
            ..Default::default()
        };
        let (result, _) = run(MockRetriever::new(), config, None).await;
        assert_eq!(result.status, StepStatus::Error);

        let (result, _) = run(MockRetriever::new(), RetrievalConfig::default(), Some("q")).await;
        assert_eq!(result.status, StepStatus::Error);
        assert!(result.message.unwrap().contains("no knowledge bases"));
    }
}
