use std::path::PathBuf;

use futures::future::BoxFuture;
use tracing::debug;

use parley_core::error::{ParleyError, Result};
use parley_core::flow::Flow;
use parley_core::traits::FlowStore;

/// Flow definitions stored as `<dir>/<flow_id>.json`.
pub struct FlowDirectory {
    dir: PathBuf,
}

impl FlowDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    fn path_for(&self, flow_id: &str) -> Result<PathBuf> {
        let valid = !flow_id.is_empty()
            && flow_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && !flow_id.starts_with('.');
        if !valid {
            return Err(ParleyError::Validation(format!("invalid flow id '{}'", flow_id)));
        }
        Ok(self.dir.join(format!("{}.json", flow_id)))
    }
}

impl FlowStore for FlowDirectory {
    fn load_flow(&self, flow_id: &str) -> BoxFuture<'_, Result<Option<Flow>>> {
        let path = self.path_for(flow_id);
        let flow_id = flow_id.to_string();

        Box::pin(async move {
            let path = path?;
            let json = match tokio::fs::read_to_string(&path).await {
                Ok(json) => json,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(flow_id = %flow_id, path = %path.display(), "Flow file not found");
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            };

            let flow = Flow::from_json(&json).map_err(|e| match e {
                ParleyError::InvalidFlow(msg) => {
                    ParleyError::InvalidFlow(format!("{}: {}", flow_id, msg))
                }
                other => other,
            })?;
            debug!(flow_id = %flow_id, nodes = flow.nodes.len(), "Flow loaded");
            Ok(Some(flow))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = r#"{
        "nodes": [
            {"id": "begin", "type": "begin", "config": {"greeting": "Hello!"}},
            {"id": "ui", "type": "interface"}
        ],
        "edges": [{"source": "begin", "target": "ui"}]
    }"#;

    #[tokio::test]
    async fn test_loads_json_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.json"), HELLO).unwrap();

        let flows = FlowDirectory::new(dir.path());
        let flow = flows.load_flow("hello").await.unwrap().unwrap();
        assert_eq!(flow.nodes.len(), 2);
        assert_eq!(flow.begin_node().unwrap().id, "begin");
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let flows = FlowDirectory::new(dir.path());
        assert!(flows.load_flow("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_flow_names_the_flow() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("lonely.json"),
            r#"{"nodes": [{"id": "ui", "type": "interface"}]}"#,
        )
        .unwrap();

        let err = FlowDirectory::new(dir.path())
            .load_flow("lonely")
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::InvalidFlow(_)));
        assert!(err.to_string().contains("lonely"));
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let flows = FlowDirectory::new(dir.path());
        for bad in ["../secret", "a/b", "", ".hidden"] {
            let err = flows.load_flow(bad).await.unwrap_err();
            assert!(matches!(err, ParleyError::Validation(_)), "{}", bad);
        }
    }
}
