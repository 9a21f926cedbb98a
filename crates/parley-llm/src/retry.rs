use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tracing::warn;

use parley_core::config::{ModelConfig, RetryConfig};
use parley_core::error::{ParleyError, Result};
use parley_core::traits::LlmClient;
use parley_core::types::*;

/// An LLM client that retries transient failures with exponential backoff.
pub struct RetryingClient {
    inner: Box<dyn LlmClient>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(inner: Box<dyn LlmClient>, retry_config: RetryConfig) -> Self {
        Self {
            inner,
            retry_config,
        }
    }
}

/// Rate limits, upstream 5xx and dropped connections are worth another try.
pub fn is_retryable(e: &ParleyError) -> bool {
    match e {
        ParleyError::LlmStatus { status, .. } => *status == 429 || *status >= 500,
        ParleyError::LlmTransport(_) | ParleyError::LlmStream(_) => true,
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl LlmClient for RetryingClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;
            let mut attempt = 0;
            loop {
                match self.inner.chat_stream(&config, messages.clone()).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying LLM request"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use futures::StreamExt;

    struct Flaky {
        calls: Arc<AtomicU32>,
        failures: u32,
        status: u16,
    }

    impl LlmClient for Flaky {
        fn chat_stream(
            &self,
            _config: &ModelConfig,
            _messages: Vec<ChatMessage>,
        ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n < self.failures {
                    return Err(ParleyError::LlmStatus {
                        status: self.status,
                        body: "busy".into(),
                    });
                }
                let items = vec![Ok(StreamDelta::TextDelta("ok".into()))];
                Ok(futures::stream::iter(items).boxed())
            })
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&ParleyError::LlmStatus {
            status: 429,
            body: String::new()
        }));
        assert!(is_retryable(&ParleyError::LlmStatus {
            status: 503,
            body: String::new()
        }));
        assert!(!is_retryable(&ParleyError::LlmStatus {
            status: 401,
            body: String::new()
        }));
        assert!(is_retryable(&ParleyError::LlmTransport("reset".into())));
        assert!(!is_retryable(&ParleyError::Config("no key".into())));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
        };
        let d = calculate_backoff(8, &config);
        assert!(d <= Duration::from_millis(6000));
        assert!(d >= Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = RetryingClient::new(
            Box::new(Flaky {
                calls: calls.clone(),
                failures: 2,
                status: 500,
            }),
            fast_retry(),
        );
        let config = ModelConfig::new("openai", "m");
        let stream = client.chat_stream(&config, vec![]).await.unwrap();
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = RetryingClient::new(
            Box::new(Flaky {
                calls: calls.clone(),
                failures: 5,
                status: 400,
            }),
            fast_retry(),
        );
        let config = ModelConfig::new("openai", "m");
        let err = client.chat_stream(&config, vec![]).await.err().unwrap();
        assert!(matches!(err, ParleyError::LlmStatus { status: 400, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
