use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use parley_core::config::ModelConfig;
use parley_core::error::{ParleyError, Result};
use parley_core::traits::LlmClient;
use parley_core::types::*;

use crate::streaming::{SseEvent, SseStream};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    http: Client,
}

impl AnthropicClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SseData {
    MessageStart { message: MessageInfo },
    ContentBlockDelta { delta: DeltaInfo },
    MessageDelta {
        delta: MessageDeltaInfo,
        #[serde(default)]
        usage: Option<UsageInfo>,
    },
    Error { error: ApiError },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct MessageInfo {
    id: String,
}

#[derive(Deserialize, Debug)]
struct UsageInfo {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DeltaInfo {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct MessageDeltaInfo {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

/// Split out the system prompt; Anthropic takes it as a top-level field.
fn convert_messages(messages: Vec<ChatMessage>) -> (Option<String>, Vec<ApiMessage>) {
    let mut system: Option<String> = None;
    let mut api_msgs = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => match system {
                Some(ref mut s) => {
                    s.push_str("\n\n");
                    s.push_str(&msg.content);
                }
                None => system = Some(msg.content),
            },
            Role::User | Role::Tool => api_msgs.push(ApiMessage {
                role: "user",
                content: msg.content,
            }),
            Role::Assistant => api_msgs.push(ApiMessage {
                role: "assistant",
                content: msg.content,
            }),
        }
    }

    (system, api_msgs)
}

fn parse_sse_to_delta(event: SseEvent) -> Option<Result<StreamDelta>> {
    let data: SseData = match serde_json::from_str(&event.data) {
        Ok(data) => data,
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse SSE data");
            return None;
        }
    };

    match data {
        SseData::MessageStart { message } => Some(Ok(StreamDelta::MessageId(message.id))),
        SseData::ContentBlockDelta {
            delta: DeltaInfo::TextDelta { text },
        } => Some(Ok(StreamDelta::TextDelta(text))),
        SseData::ContentBlockDelta { .. } => None,
        SseData::MessageDelta { delta, usage } => {
            if let Some(usage) = usage {
                debug!(
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "Token usage"
                );
            }
            let stop = match delta.stop_reason.as_deref()? {
                "max_tokens" => StopReason::MaxTokens,
                "stop_sequence" => StopReason::StopSequence,
                _ => StopReason::EndTurn,
            };
            Some(Ok(StreamDelta::Stop(stop)))
        }
        SseData::Error { error } => Some(Err(ParleyError::LlmStream(error.message))),
        SseData::Other => None,
    }
}

impl LlmClient for AnthropicClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();

        Box::pin(async move {
            let api_key = config
                .api_key
                .as_deref()
                .ok_or_else(|| ParleyError::Config("Anthropic API key not set".into()))?;

            let base_url = config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL);
            let (system, api_messages) = convert_messages(messages);

            let body = MessagesRequest {
                model: config.model_id.clone(),
                max_tokens: config.max_tokens,
                temperature: (config.temperature > 0.0).then_some(config.temperature),
                messages: api_messages,
                system,
                stream: true,
            };

            let response = self
                .http
                .post(base_url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await
                .map_err(|e| ParleyError::LlmTransport(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown error".to_string());
                return Err(ParleyError::LlmStatus {
                    status: status.as_u16(),
                    body,
                });
            }

            let delta_stream =
                SseStream::new(response.bytes_stream()).filter_map(|event| async move {
                    match event {
                        Ok(event) => parse_sse_to_delta(event),
                        Err(e) => Some(Err(e)),
                    }
                });

            Ok(Box::pin(delta_stream) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}
