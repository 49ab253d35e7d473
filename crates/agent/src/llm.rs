//! Language-model gateway port.
//!
//! The runtime and the extractor only talk to [`LlmClient`]. A completion either
//! carries text, a single tool request, or nothing at all; the caller decides
//! what an empty completion means.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use foodlink_core::domain::conversation::{Message, Role};
use foodlink_core::errors::ApplicationError;

#[derive(Clone, Debug, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PromptMessage {
    Human(String),
    Agent(String),
    /// A tool the model asked for, paired with what it returned.
    ToolExchange { request: ToolRequest, output: String },
}

impl From<&Message> for PromptMessage {
    fn from(message: &Message) -> Self {
        match message.role {
            Role::Human => Self::Human(message.content.clone()),
            Role::Agent => Self::Agent(message.content.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: Value,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<PromptMessage>,
    pub tools: Vec<ToolSpec>,
    pub response_schema: Option<ResponseSchema>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Completion {
    pub text: Option<String>,
    pub tool_call: Option<ToolRequest>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), tool_call: None }
    }

    pub fn tool(name: impl Into<String>, arguments: Value) -> Self {
        let name = name.into();
        Self {
            text: None,
            tool_call: Some(ToolRequest { id: format!("call_{name}"), name, arguments }),
        }
    }

    /// Text with surrounding whitespace removed, if any remains.
    pub fn final_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|text| !text.is_empty())
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum LlmError {
    #[error("language model call timed out after {0:?}")]
    Timeout(Duration),
    #[error("language model transport error: {0}")]
    Transport(String),
    #[error("language model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("language model response could not be decoded: {0}")]
    Decode(String),
}

impl From<LlmError> for ApplicationError {
    fn from(value: LlmError) -> Self {
        Self::Integration(value.to_string())
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError>;

    /// Checks that the model endpoint answers, without spending a completion.
    async fn ping(&self) -> Result<String, LlmError>;
}

/// Bounds every call to the wrapped client.
pub struct TimeoutLlmClient {
    inner: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl TimeoutLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl LlmClient for TimeoutLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        match tokio::time::timeout(self.timeout, self.inner.complete(request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    event_name = "agent.llm.timeout",
                    timeout_ms = self.timeout.as_millis() as u64,
                    "language model call timed out"
                );
                Err(LlmError::Timeout(self.timeout))
            }
        }
    }

    async fn ping(&self) -> Result<String, LlmError> {
        match tokio::time::timeout(self.timeout, self.inner.ping()).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.timeout)),
        }
    }
}

/// Replays a fixed script of completions and records every request it sees.
/// Once the script runs out every call fails with a transport error.
#[derive(Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<Completion, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
}

impl ScriptedLlmClient {
    pub fn new(script: impl IntoIterator<Item = Result<Completion, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|requests| requests.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|script| script.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().ok().and_then(|mut script| script.pop_front());
        next.unwrap_or_else(|| Err(LlmError::Transport("scripted responses exhausted".to_string())))
    }

    async fn ping(&self) -> Result<String, LlmError> {
        match self.remaining() {
            0 => Err(LlmError::Transport("scripted responses exhausted".to_string())),
            left => Ok(format!("{left} scripted response(s) left")),
        }
    }
}
