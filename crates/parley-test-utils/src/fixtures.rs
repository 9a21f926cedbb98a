use parley_core::config::AppConfig;
use parley_core::flow::{
    CategorizeConfig, Category, Edge, Flow, Node, RetrievalConfig,
};
use parley_core::types::Passage;

/// Minimal config for engine tests.
pub fn test_config() -> AppConfig {
    let toml_str = r#"
[model]
provider = "openai"
model_id = "test-model"

[engine]
max_steps = 50
stream_batch_size = 2
"#;
    toml::from_str(toml_str).unwrap()
}

/// Begin(greeting) → Interface.
pub fn greeting_flow(greeting: &str) -> Flow {
    Flow::new(
        vec![Node::begin("begin", greeting), Node::interface("ui")],
        vec![Edge::new("begin", "ui")],
    )
}

/// Begin → InterfaceA → Generate → InterfaceB.
pub fn chat_flow() -> Flow {
    Flow::new(
        vec![
            Node::begin("begin", "Welcome! Ask me anything."),
            Node::interface("ui_a"),
            Node::generate("gen", "Answer the question: {{ question }}"),
            Node::interface("ui_b"),
        ],
        vec![
            Edge::new("begin", "ui_a"),
            Edge::new("ui_a", "gen"),
            Edge::new("gen", "ui_b"),
        ],
    )
}

/// Begin → Interface → Categorize{positive, negative} → one Generate per branch → Interface.
pub fn sentiment_flow() -> Flow {
    let categorize = CategorizeConfig {
        categories: vec![
            Category {
                description: "The user is happy".into(),
                examples: vec!["I love it".into()],
                ..Category::new("positive")
            },
            Category {
                description: "The user is unhappy".into(),
                ..Category::new("negative")
            },
        ],
        default_category: Some("positive".into()),
        ..Default::default()
    };
    Flow::new(
        vec![
            Node::begin("begin", "How are you feeling?"),
            Node::interface("ask"),
            Node::categorize("classify", categorize),
            Node::generate("cheer", "Celebrate: {{ question }}"),
            Node::generate("comfort", "Comfort: {{ question }}"),
            Node::interface("reply"),
        ],
        vec![
            Edge::new("begin", "ask"),
            Edge::new("ask", "classify"),
            Edge::branch("classify", "cheer", "positive"),
            Edge::branch("classify", "comfort", "negative"),
            Edge::new("cheer", "reply"),
            Edge::new("comfort", "reply"),
        ],
    )
}

/// Begin → Interface → Retrieval(kbs) → Generate → Interface.
pub fn retrieval_flow(knowledge_ids: &[&str], max_results: usize) -> Flow {
    let retrieval = RetrievalConfig {
        knowledge_ids: knowledge_ids.iter().map(|s| s.to_string()).collect(),
        max_results,
        ..Default::default()
    };
    Flow::new(
        vec![
            Node::begin("begin", "Ask about the docs."),
            Node::interface("ask"),
            Node::retrieval("search", retrieval),
            Node::generate("answer", "Context:\n{{ context }}\n\nQuestion: {{ question }}"),
            Node::interface("reply"),
        ],
        vec![
            Edge::new("begin", "ask"),
            Edge::new("ask", "search"),
            Edge::new("search", "answer"),
            Edge::new("answer", "reply"),
        ],
    )
}

/// `n` passages tagged with a source prefix.
pub fn passages(source: &str, n: usize) -> Vec<Passage> {
    (1..=n)
        .map(|i| {
            Passage::new(
                format!("{} passage {}", source, i),
                format!("{}-doc-{}", source, i),
                1.0 - i as f32 * 0.1,
            )
        })
        .collect()
}
