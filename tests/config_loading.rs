use std::io::Write;

use parley_core::config::AppConfig;
use parley_core::error::ParleyError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[engine]
max_steps = 40
stream_batch_size = 8
fallback_message = "Anything else?"

[model]
provider = "anthropic"
model_id = "claude-sonnet-4-20250514"
api_key = "sk-test-key"
max_tokens = 2048
temperature = 0.5

[model.retry]
max_retries = 5

[providers.openai]
api_key = "sk-openai"
base_url = "http://localhost:11434/v1"

[store]
workspace = "/tmp/parley-test"
database = "state.db"
flows_dir = "/srv/flows"

[retrieval]
base_url = "http://127.0.0.1:9000"
timeout_secs = 5
api_key = "kb-key"

[retrieval.backend]
command = "parley-kb"
args = ["--port", "9000"]
env = { KB_INDEX = "/var/kb" }
health_path = "/ready"
startup_timeout_secs = 15

[gateway]
bind = "0.0.0.0:9999"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.max_steps, 40);
    assert_eq!(config.engine.stream_batch_size, 8);
    assert_eq!(config.engine.fallback_message, "Anything else?");

    assert_eq!(config.model.provider, "anthropic");
    assert_eq!(config.model.model_id, "claude-sonnet-4-20250514");
    assert_eq!(config.model.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.model.max_tokens, 2048);
    assert_eq!(config.model.retry.as_ref().map(|r| r.max_retries), Some(5));

    let openai = &config.providers["openai"];
    assert_eq!(openai.base_url.as_deref(), Some("http://localhost:11434/v1"));

    assert_eq!(
        config.database_path(),
        std::path::PathBuf::from("/tmp/parley-test/state.db")
    );
    assert_eq!(config.flows_dir(), std::path::PathBuf::from("/srv/flows"));

    let retrieval = config.retrieval.expect("retrieval present");
    assert_eq!(retrieval.timeout_secs, 5);
    let backend = retrieval.backend.expect("backend present");
    assert_eq!(backend.command, "parley-kb");
    assert_eq!(backend.args, vec!["--port", "9000"]);
    assert_eq!(backend.env["KB_INDEX"], "/var/kb");
    assert_eq!(backend.health_path, "/ready");

    assert_eq!(config.gateway.expect("gateway present").bind, "0.0.0.0:9999");
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("PARLEY_TEST_API_KEY", "expanded-key-value");

    let toml_content = r#"
[model]
model_id = "test-model"
api_key = "${PARLEY_TEST_API_KEY}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.model.api_key, Some("expanded-key-value".to_string()));

    std::env::remove_var("PARLEY_TEST_API_KEY");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let toml_content = r#"
[model]
model_id = "llama3.2"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.max_steps, 100);
    assert_eq!(config.engine.stream_batch_size, 4);
    assert_eq!(config.engine.fallback_message, "How can I help you today?");
    assert!(config.providers.is_empty());
    assert!(config.retrieval.is_none());
    assert!(config.gateway.is_none());
    assert!(config.model.retry.is_none());
    assert!(config.database_path().ends_with(".parley/conversations.db"));
    assert!(config.flows_dir().ends_with(".parley/flows"));
}

#[test]
fn test_missing_file_is_config_not_found() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let err = AppConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ParleyError::ConfigNotFound(_)));
}

#[test]
fn test_malformed_toml_is_config_error() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[engine]\nmax_steps = \"many\"\n").expect("write toml");

    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, ParleyError::Config(_)));
}
