use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use parley_core::config::BackendConfig;
use parley_core::error::{ParleyError, Result};

const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Owns the lifecycle of an external retrieval backend process.
///
/// Constructed with the backend's configuration; nothing here reads the
/// process environment. The child is killed when the supervisor drops.
pub struct RetrievalSupervisor {
    config: BackendConfig,
    health_url: String,
    http: reqwest::Client,
    child: Mutex<Option<Child>>,
}

impl RetrievalSupervisor {
    pub fn new(base_url: &str, config: BackendConfig) -> Self {
        let health_url = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            config.health_path.trim_start_matches('/')
        );
        Self {
            config,
            health_url,
            http: reqwest::Client::new(),
            child: Mutex::new(None),
        }
    }

    pub fn health_url(&self) -> &str {
        &self.health_url
    }

    /// Spawn the backend and wait until its health endpoint answers.
    ///
    /// A no-op when the backend is already running.
    pub async fn start(&self) -> Result<()> {
        let mut guard = self.child.lock().await;
        if let Some(ref mut child) = *guard {
            if matches!(child.try_wait(), Ok(None)) {
                debug!("Retrieval backend already running");
                return Ok(());
            }
        }

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args);
        for (k, v) in &self.config.env {
            cmd.env(k, v);
        }
        cmd.stdout(std::process::Stdio::null());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            ParleyError::RetrievalBackend(format!(
                "failed to spawn {}: {}",
                self.config.command, e
            ))
        })?;
        info!(command = %self.config.command, pid = child.id(), "Retrieval backend started");

        if let Err(e) = self.wait_healthy(&mut child).await {
            if let Err(kill_err) = child.kill().await {
                warn!(error = %kill_err, "Failed to kill unhealthy retrieval backend");
            }
            return Err(e);
        }

        *guard = Some(child);
        Ok(())
    }

    async fn wait_healthy(&self, child: &mut Child) -> Result<()> {
        let timeout = Duration::from_secs(self.config.startup_timeout_secs);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(ParleyError::RetrievalBackend(format!(
                    "backend exited during startup ({})",
                    status
                )));
            }

            match self.http.get(&self.health_url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(url = %self.health_url, "Retrieval backend healthy");
                    return Ok(());
                }
                Ok(resp) => debug!(status = %resp.status(), "Retrieval backend not ready"),
                Err(e) => debug!(error = %e, "Retrieval backend not reachable yet"),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ParleyError::RetrievalBackend(format!(
                    "backend not healthy after {}s",
                    self.config.startup_timeout_secs
                )));
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }
    }

    pub async fn is_running(&self) -> bool {
        let mut guard = self.child.lock().await;
        match *guard {
            Some(ref mut child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Kill the backend if it is running.
    pub async fn stop(&self) -> Result<()> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };
        if let Ok(Some(_)) = child.try_wait() {
            return Ok(());
        }
        child.kill().await?;
        info!("Retrieval backend stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use axum::routing::get;
    use axum::Router;

    fn backend(command: &str, args: &[&str], timeout: u64) -> BackendConfig {
        BackendConfig {
            command: command.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: HashMap::new(),
            health_path: "/health".into(),
            startup_timeout_secs: timeout,
        }
    }

    async fn health_server() -> String {
        let app = Router::new().route("/health", get(|| async { "ok" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn unused_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        format!("http://{}", addr)
    }

    #[test]
    fn test_health_url_joins_cleanly() {
        let s = RetrievalSupervisor::new("http://h:1/", backend("x", &[], 1));
        assert_eq!(s.health_url(), "http://h:1/health");
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let url = health_server().await;
        let s = RetrievalSupervisor::new(&url, backend("sleep", &["30"], 5));

        s.start().await.unwrap();
        assert!(s.is_running().await);
        // Second start keeps the existing process.
        s.start().await.unwrap();

        s.stop().await.unwrap();
        assert!(!s.is_running().await);
        s.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_command_fails_to_spawn() {
        let s = RetrievalSupervisor::new(&unused_url(), backend("parley-no-such-binary", &[], 1));
        let err = s.start().await.unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
        assert!(!s.is_running().await);
    }

    #[tokio::test]
    async fn test_early_exit_is_reported() {
        let s = RetrievalSupervisor::new(&unused_url(), backend("true", &[], 5));
        let err = s.start().await.unwrap_err();
        assert!(err.to_string().contains("exited during startup"));
    }

    #[tokio::test]
    async fn test_unhealthy_backend_times_out() {
        let s = RetrievalSupervisor::new(&unused_url(), backend("sleep", &["30"], 1));
        let err = s.start().await.unwrap_err();
        assert!(err.to_string().contains("not healthy"));
        assert!(!s.is_running().await);
    }
}
