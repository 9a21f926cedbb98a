//! Turns against on-disk flows and a SQLite store, across process-like restarts.

use std::sync::Arc;

use parley_core::state::StepStatus;
use parley_core::traits::ConversationStore;
use parley_engine::{ConversationRunner, HandlerRegistry, TurnRequest};
use parley_store::{FlowDirectory, SqliteStore};
use parley_test_utils::{test_config, MockModel, MockRetriever};

const SUPPORT_FLOW: &str = r#"{
    "nodes": [
        {"id": "begin", "type": "begin", "config": {"greeting": "Hi, I'm the support bot."}},
        {"id": "ask", "type": "interface"},
        {"id": "answer", "type": "generate", "config": {"prompt": "Help with: {{ question }}"}},
        {"id": "reply", "type": "interface"}
    ],
    "edges": [
        {"source": "begin", "target": "ask"},
        {"source": "ask", "target": "answer"},
        {"source": "answer", "target": "reply"}
    ]
}"#;

fn runner(dir: &std::path::Path, model: Arc<MockModel>) -> ConversationRunner {
    let config = test_config();
    let registry = HandlerRegistry::standard(model, Arc::new(MockRetriever::new()), config.model);
    ConversationRunner::new(
        Arc::new(FlowDirectory::new(dir.join("flows"))),
        Arc::new(SqliteStore::open(&dir.join("conversations.db")).unwrap()),
        registry,
        &config.engine,
    )
}

#[tokio::test]
async fn test_conversation_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("flows")).unwrap();
    std::fs::write(dir.path().join("flows/support.json"), SUPPORT_FLOW).unwrap();

    let first = {
        let runner = runner(dir.path(), Arc::new(MockModel::new()));
        runner.turn(TurnRequest::new("support")).await.unwrap()
    };
    assert_eq!(first.result.status, StepStatus::WaitingForInput);
    assert_eq!(first.result.output.as_deref(), Some("Hi, I'm the support bot."));

    let model = Arc::new(MockModel::with_default("Try turning it off and on."));
    let runner = runner(dir.path(), model.clone());
    let second = runner
        .turn(
            TurnRequest::new("support")
                .with_conversation(first.conversation_id.clone())
                .with_user_message("my router is broken"),
        )
        .await
        .unwrap();

    assert_eq!(second.result.status, StepStatus::WaitingForInput);
    assert_eq!(second.result.output.as_deref(), Some("Try turning it off and on."));
    assert_eq!(model.last_prompt().as_deref(), Some("Help with: my router is broken"));

    let stored = runner
        .store()
        .load(&first.conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, second.state);
    assert_eq!(stored.pause.last_pause_node_id.as_deref(), Some("reply"));
}

#[tokio::test]
async fn test_unknown_flow_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(dir.path(), Arc::new(MockModel::new()));
    let err = runner.turn(TurnRequest::new("missing")).await.unwrap_err();
    assert!(err.to_string().contains("missing"));
}
