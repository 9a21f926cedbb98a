use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use parley_core::flow::NodeKind;
use parley_core::state::StepStatus;
use parley_core::types::ChatMessage;
use parley_engine::FlowEvent;

/// Body of `POST /v1/chat/completions`.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub flow_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: Option<String>,
}

/// Non-streaming response, shaped like an OpenAI `chat.completion`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub conversation_id: String,
    pub choices: Vec<Choice>,
}

impl ChatCompletion {
    pub fn new(
        model: &str,
        conversation_id: &str,
        content: String,
        status: StepStatus,
    ) -> Self {
        Self {
            id: completion_id(),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            conversation_id: conversation_id.to_string(),
            choices: vec![Choice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant".to_string(),
                    content,
                },
                finish_reason: status.finish_reason().map(str::to_string),
            }],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

/// One SSE frame of a streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub conversation_id: String,
    pub choices: Vec<ChunkChoice>,
}

fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

/// Turns engine events into `chat.completion.chunk` frames.
///
/// Begin and Generate outputs stream as content deltas. The terminal
/// output is only sent when no earlier delta carried the same text, and
/// the terminal event always produces a closing chunk with `finish_reason`.
pub struct ChunkTranslator {
    id: String,
    created: i64,
    model: String,
    conversation_id: String,
    streamed: HashSet<String>,
    sent_role: bool,
}

impl ChunkTranslator {
    pub fn new(model: &str, conversation_id: &str) -> Self {
        Self {
            id: completion_id(),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            conversation_id: conversation_id.to_string(),
            streamed: HashSet::new(),
            sent_role: false,
        }
    }

    fn chunk(&self, delta: Delta, finish_reason: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            conversation_id: self.conversation_id.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(str::to_string),
            }],
        }
    }

    fn content(&mut self, text: &str) -> ChatCompletionChunk {
        let role = (!self.sent_role).then(|| "assistant".to_string());
        self.sent_role = true;
        self.streamed.insert(text.to_string());
        self.chunk(
            Delta {
                role,
                content: Some(text.to_string()),
            },
            None,
        )
    }

    fn finish(&mut self, output: Option<&str>, status: StepStatus) -> Vec<ChatCompletionChunk> {
        let mut chunks = Vec::new();
        if let Some(text) = output.filter(|t| !t.is_empty()) {
            if !self.streamed.contains(text) {
                chunks.push(self.content(text));
            }
        }
        chunks.push(self.chunk(Delta::default(), status.finish_reason()));
        chunks
    }

    pub fn translate(&mut self, event: &FlowEvent) -> Vec<ChatCompletionChunk> {
        match event {
            FlowEvent::NodeStart { .. } => vec![],
            FlowEvent::Progress {
                node_type, output, ..
            } => match node_type {
                NodeKind::Begin | NodeKind::Generate if !output.is_empty() => {
                    vec![self.content(output)]
                }
                _ => vec![],
            },
            FlowEvent::WaitingForInput { output } => {
                self.finish(Some(output), StepStatus::WaitingForInput)
            }
            FlowEvent::Completed { output } => self.finish(output.as_deref(), StepStatus::Completed),
            FlowEvent::Error { message } => self.finish(Some(message), StepStatus::Error),
        }
    }
}
