use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use parley_core::config::ModelConfig;
use parley_core::flow::{CategorizeConfig, Category, Flow, Node, NodeConfig, NodeKind};
use parley_core::state::{ExecutionState, StepRecord, StepResult, StepStatus};
use parley_core::traits::ModelPort;
use parley_core::types::InvokeOptions;

use super::{config_mismatch, store_output, NodeHandler, TurnContext};
use crate::resolver::next_node;

const DEFAULT_INSTRUCTIONS: &str =
    "Classify the user's message into exactly one of the following categories.";

/// Classifies the latest input into one of the configured categories and
/// branches on the result.
pub struct CategorizeHandler {
    model: Arc<dyn ModelPort>,
    defaults: ModelConfig,
}

impl CategorizeHandler {
    pub fn new(model: Arc<dyn ModelPort>, defaults: ModelConfig) -> Self {
        Self { model, defaults }
    }
}

/// A parsed classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: String,
    pub confidence: f64,
}

fn classification_object() -> &'static Regex {
    static OBJECT: OnceLock<Regex> = OnceLock::new();
    OBJECT.get_or_init(|| {
        Regex::new(r#"\{[^{}]*"category"[^{}]*\}"#).expect("classification regex is valid")
    })
}

/// Extract the first `{"category": ..}` object from a model reply.
pub fn parse_classification(reply: &str) -> Option<Classification> {
    let found = classification_object().find(reply)?;
    let value: Value = serde_json::from_str(found.as_str()).ok()?;
    let category = value.get("category")?.as_str()?.trim().to_string();
    let confidence = value
        .get("confidence")
        .and_then(|c| c.as_f64())
        .unwrap_or(0.0);
    Some(Classification {
        category,
        confidence,
    })
}

fn build_prompt(config: &CategorizeConfig, text: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(config.instructions.as_deref().unwrap_or(DEFAULT_INSTRUCTIONS));
    prompt.push_str("\n\nCategories:\n");
    for category in &config.categories {
        prompt.push_str(&format!("- {}", category.name));
        if !category.description.is_empty() {
            prompt.push_str(&format!(": {}", category.description));
        }
        prompt.push('\n');
        if !category.examples.is_empty() {
            let examples: Vec<String> = category
                .examples
                .iter()
                .map(|e| format!("\"{}\"", e))
                .collect();
            prompt.push_str(&format!("  Examples: {}\n", examples.join("; ")));
        }
    }
    prompt.push_str(&format!("\nMessage: {}\n\n", text));
    prompt.push_str(
        "Respond with only a single compact JSON object of the form \
         {\"category\": \"<name>\", \"confidence\": <number between 0 and 1>}.",
    );
    prompt
}

fn input_text<'s>(config: &CategorizeConfig, state: &'s ExecutionState) -> Option<&'s str> {
    config
        .input
        .as_deref()
        .and_then(|name| state.get_str(name))
        .or_else(|| state.latest_user_input())
}

fn find_category<'c>(config: &'c CategorizeConfig, name: &str) -> Option<&'c Category> {
    config
        .categories
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
}

impl NodeHandler for CategorizeHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Categorize
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        state: &'a mut ExecutionState,
        flow: &'a Flow,
        _ctx: &'a mut TurnContext,
    ) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            let NodeConfig::Categorize(config) = &node.config else {
                return config_mismatch(node, NodeKind::Categorize);
            };
            if config.categories.is_empty() {
                return StepResult::error(format!("categorize node '{}' has no categories", node.id));
            }
            let Some(text) = input_text(config, state).map(str::to_string) else {
                return StepResult::error(format!(
                    "categorize node '{}' has no input to classify",
                    node.id
                ));
            };

            let prompt = build_prompt(config, &text);
            let model_config = self.defaults.with_overrides(&config.model);
            let options = InvokeOptions {
                system_prompt: config.model.system_prompt.clone(),
            };
            let reply = match self.model.invoke(&model_config, &prompt, &options).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!(node_id = %node.id, error = %e, "Classification call failed");
                    return StepResult::error(e.to_string());
                }
            };

            let matched = parse_classification(&reply)
                .and_then(|c| find_category(config, &c.category).map(|cat| (cat, c.confidence)));
            let (category, name, confidence) = match matched {
                Some((cat, confidence)) => (Some(cat), cat.name.clone(), confidence),
                None => {
                    let name = config
                        .default_category
                        .clone()
                        .unwrap_or_else(|| config.categories[0].name.clone());
                    warn!(node_id = %node.id, reply = %reply, fallback = %name, "Unusable classification, using default category");
                    (find_category(config, &name), name, 0.0)
                }
            };

            state.set("categorization", json!({ "category": name, "confidence": confidence }));
            store_output(state, &node.id, "category", Value::String(name.clone()));

            let next = category
                .and_then(|c| c.target_node.clone())
                .or_else(|| next_node(flow, &node.id, Some(&name)));
            debug!(node_id = %node.id, category = %name, confidence, next = ?next, "Categorized");

            let status = if next.is_some() {
                StepStatus::InProgress
            } else {
                StepStatus::Completed
            };
            state.record(
                StepRecord::new(&node.id, NodeKind::Categorize, status)
                    .with_input(json!({ "text": text }))
                    .with_output(&name),
            );
            StepResult::advance(name, next)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::flow::Edge;
    use parley_test_utils::MockModel;

    fn sentiment(default: Option<&str>) -> CategorizeConfig {
        CategorizeConfig {
            categories: vec![
                Category {
                    description: "happy".into(),
                    examples: vec!["great".into()],
                    ..Category::new("positive")
                },
                Category::new("negative"),
            ],
            default_category: default.map(str::to_string),
            ..Default::default()
        }
    }

    fn flow(config: CategorizeConfig) -> Flow {
        Flow::new(
            vec![
                Node::begin("begin", ""),
                Node::categorize("cls", config),
                Node::interface("pos"),
                Node::interface("neg"),
            ],
            vec![
                Edge::branch("cls", "pos", "positive"),
                Edge::branch("cls", "neg", "negative"),
            ],
        )
    }

    async fn run(model: MockModel, config: CategorizeConfig, input: Option<&str>) -> (StepResult, ExecutionState) {
        let handler = CategorizeHandler::new(Arc::new(model), ModelConfig::new("openai", "m"));
        let flow = flow(config);
        let mut state = ExecutionState::new("cls");
        if let Some(input) = input {
            state.set_str("lastUserInput", input);
        }
        let mut ctx = TurnContext::new(None, "");
        let result = handler
            .execute(flow.node("cls").unwrap(), &mut state, &flow, &mut ctx)
            .await;
        (result, state)
    }

    #[test]
    fn test_parse_classification_from_chatty_reply() {
        let c = parse_classification(
            "Sure! Here you go: {\"category\": \"negative\", \"confidence\": 0.82} Hope that helps.",
        )
        .unwrap();
        assert_eq!(c.category, "negative");
        assert!((c.confidence - 0.82).abs() < 1e-9);
        assert!(parse_classification("no json here").is_none());
        assert!(parse_classification("{\"label\": \"x\"}").is_none());
    }

    #[test]
    fn test_prompt_lists_categories() {
        let prompt = build_prompt(&sentiment(None), "I love it");
        assert!(prompt.contains("- positive: happy"));
        assert!(prompt.contains("Examples: \"great\""));
        assert!(prompt.contains("- negative\n"));
        assert!(prompt.contains("Message: I love it"));
        assert!(prompt.contains("\"category\""));
    }

    #[tokio::test]
    async fn test_branches_on_matched_category() {
        let model = MockModel::new().reply(r#"{"category":"NEGATIVE","confidence":0.9}"#);
        let (result, state) = run(model, sentiment(Some("positive")), Some("awful")).await;
        assert_eq!(result.next_node_id.as_deref(), Some("neg"));
        assert_eq!(state.get_str("category"), Some("negative"));
        assert_eq!(state.get("categorization").unwrap()["confidence"], 0.9);
    }

    #[tokio::test]
    async fn test_unparseable_reply_falls_back_to_default() {
        let model = MockModel::new().reply("I think it's positive-ish");
        let (result, state) = run(model, sentiment(Some("positive")), Some("meh")).await;
        assert_eq!(result.status, StepStatus::InProgress);
        assert_eq!(result.next_node_id.as_deref(), Some("pos"));
        assert_eq!(
            state.get("categorization"),
            Some(&json!({"category": "positive", "confidence": 0.0}))
        );
    }

    #[tokio::test]
    async fn test_unknown_category_falls_back_to_first_without_default() {
        let model = MockModel::new().reply(r#"{"category":"neutral","confidence":0.99}"#);
        let (_, state) = run(model, sentiment(None), Some("ok")).await;
        assert_eq!(state.get_str("category"), Some("positive"));
    }

    #[tokio::test]
    async fn test_target_node_wins_over_edges() {
        let mut config = sentiment(None);
        config.categories[1].target_node = Some("pos".into());
        let model = MockModel::new().reply(r#"{"category":"negative","confidence":1}"#);
        let (result, _) = run(model, config, Some("bad")).await;
        assert_eq!(result.next_node_id.as_deref(), Some("pos"));
    }

    #[tokio::test]
    async fn test_missing_categories_or_input_is_error() {
        let (result, state) = run(MockModel::new(), CategorizeConfig::default(), Some("x")).await;
        assert_eq!(result.status, StepStatus::Error);
        assert!(state.history.is_empty());

        let (result, _) = run(MockModel::new(), sentiment(None), None).await;
        assert_eq!(result.status, StepStatus::Error);
        assert!(result.message.unwrap().contains("no input"));
    }

    #[tokio::test]
    async fn test_explicit_input_variable() {
        let mut config = sentiment(None);
        config.input = Some("review".into());
        let model = MockModel::new().reply(r#"{"category":"negative"}"#);
        let handler = CategorizeHandler::new(Arc::new(model), ModelConfig::new("openai", "m"));
        let flow = flow(config);
        let mut state = ExecutionState::new("cls");
        state.set_str("review", "terrible product");
        state.set_str("lastUserInput", "unrelated");
        let mut ctx = TurnContext::new(None, "");
        handler
            .execute(flow.node("cls").unwrap(), &mut state, &flow, &mut ctx)
            .await;
        assert_eq!(state.history[0].input, Some(json!({"text": "terrible product"})));
    }
}
