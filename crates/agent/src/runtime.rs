use std::sync::Arc;

use serde::Deserialize;

use foodlink_core::config::{AgentConfig, DEFAULT_FALLBACK_MESSAGE};
use foodlink_core::domain::conversation::{Message, ThreadId};

use crate::conversation::ConversationStore;
use crate::llm::{
    Completion, CompletionRequest, LlmClient, LlmError, PromptMessage, ToolRequest, ToolSpec,
};
use crate::tools::{ToolInvocation, ToolRegistry};

pub const NO_RESPONSE_FALLBACK: &str = "The agent did not return a response.";

const ROUTER_SYSTEM_PROMPT: &str = "You are the assistant for a food-rescue network that connects \
donors, volunteers and partner organizations. Answer the user directly when no tool is needed. \
When the request is about user records or partner organizations call crud_tool, when the user \
wants to open a page call navigation_tool, and when asked to combine or summarize data call \
synthesis_tool. Call at most one tool at a time.";

const CHAT_SYSTEM_PROMPT: &str = "You are a friendly assistant for a food-rescue network. Keep \
answers short and practical.";

/// Per-call routing overrides. Unset fields fall back to the runtime settings;
/// `max_tool_steps` can only lower the configured step budget.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub max_tool_steps: Option<usize>,
    #[serde(default)]
    pub enabled_tools: Option<Vec<String>>,
    #[serde(default)]
    pub history_window: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub max_tool_steps: usize,
    pub history_window: Option<usize>,
    pub fallback_message: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_tool_steps: 1,
            history_window: None,
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
        }
    }
}

impl From<&AgentConfig> for RuntimeSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_tool_steps: config.max_tool_steps.max(1),
            history_window: config.history_window,
            fallback_message: config.fallback_message.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Degradation {
    /// The model call failed or timed out.
    Gateway(LlmError),
    /// The model answered with neither text nor a tool call.
    EmptyCompletion,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DispatchOutcome {
    pub reply: String,
    /// The last tool that ran, if any.
    pub tool: Option<String>,
    pub tool_steps: usize,
    pub degraded: Option<Degradation>,
}

impl DispatchOutcome {
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    conversations: Arc<ConversationStore>,
    settings: RuntimeSettings,
}

impl AgentRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: ToolRegistry,
        conversations: Arc<ConversationStore>,
        settings: RuntimeSettings,
    ) -> Self {
        Self { llm, tools, conversations, settings }
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    pub async fn handle(&self, text: &str, thread_id: &ThreadId) -> String {
        self.dispatch(text, thread_id, None).await.reply
    }

    pub async fn handle_with(
        &self,
        text: &str,
        thread_id: &ThreadId,
        config: &RoutingConfig,
    ) -> String {
        self.dispatch(text, thread_id, Some(config)).await.reply
    }

    /// Routes one user message and always produces a reply, which is recorded
    /// in the thread before it is returned.
    pub async fn dispatch(
        &self,
        text: &str,
        thread_id: &ThreadId,
        config: Option<&RoutingConfig>,
    ) -> DispatchOutcome {
        let max_tool_steps = config
            .and_then(|config| config.max_tool_steps)
            .map_or(self.settings.max_tool_steps, |requested| {
                requested.min(self.settings.max_tool_steps)
            })
            .max(1);
        let history_window =
            config.and_then(|config| config.history_window).or(self.settings.history_window);
        let enabled_tools = config.and_then(|config| config.enabled_tools.as_deref());
        let tools = self.tools.specs_for(enabled_tools);

        self.conversations.append(thread_id, Message::human(text)).await;
        let mut prompt = self.prompt_history(thread_id, history_window).await;

        tracing::info!(
            event_name = "agent.router.dispatch_started",
            thread_id = %thread_id,
            history = prompt.len(),
            tools = tools.len(),
            max_tool_steps,
            "routing message"
        );

        let mut tool_steps = 0;
        let mut last_tool: Option<(String, String)> = None;
        let outcome = loop {
            let request = CompletionRequest {
                system: ROUTER_SYSTEM_PROMPT.to_string(),
                messages: prompt.clone(),
                tools: tools.clone(),
                response_schema: None,
            };

            let completion = match self.llm.complete(request).await {
                Ok(completion) => completion,
                Err(error) => {
                    tracing::warn!(
                        event_name = "agent.router.gateway_failed",
                        thread_id = %thread_id,
                        error = %error,
                        "language model call failed; answering with fallback"
                    );
                    let reply = match &last_tool {
                        Some((_, output)) => output.clone(),
                        None => self.settings.fallback_message.clone(),
                    };
                    let degraded = Some(Degradation::Gateway(error));
                    break self.outcome(reply, last_tool, tool_steps, degraded);
                }
            };

            if let Some(request) = completion.tool_call.clone() {
                let output = self.run_tool(&request, &tools, thread_id).await;
                tool_steps += 1;
                last_tool = Some((request.name.clone(), output.clone()));

                if tool_steps >= max_tool_steps {
                    break self.outcome(output, last_tool, tool_steps, None);
                }
                prompt.push(PromptMessage::ToolExchange { request, output });
                continue;
            }

            break self.direct_answer(&completion, last_tool, tool_steps, thread_id);
        };

        self.conversations.append(thread_id, Message::agent(outcome.reply.clone())).await;
        outcome
    }

    fn direct_answer(
        &self,
        completion: &Completion,
        last_tool: Option<(String, String)>,
        tool_steps: usize,
        thread_id: &ThreadId,
    ) -> DispatchOutcome {
        if let Some(text) = completion.final_text() {
            return self.outcome(text.to_string(), last_tool, tool_steps, None);
        }
        if let Some((_, output)) = &last_tool {
            let reply = output.clone();
            return self.outcome(reply, last_tool, tool_steps, None);
        }

        tracing::warn!(
            event_name = "agent.router.empty_completion",
            thread_id = %thread_id,
            "language model returned no answer"
        );
        self.outcome(
            NO_RESPONSE_FALLBACK.to_string(),
            None,
            tool_steps,
            Some(Degradation::EmptyCompletion),
        )
    }

    fn outcome(
        &self,
        reply: String,
        last_tool: Option<(String, String)>,
        tool_steps: usize,
        degraded: Option<Degradation>,
    ) -> DispatchOutcome {
        DispatchOutcome { reply, tool: last_tool.map(|(name, _)| name), tool_steps, degraded }
    }

    async fn run_tool(
        &self,
        request: &ToolRequest,
        offered: &[ToolSpec],
        thread_id: &ThreadId,
    ) -> String {
        let invocation = ToolInvocation::from_request(request);
        let known = self.tools.specs().iter().any(|spec| spec.name == invocation.tool);
        let offered = offered.iter().any(|spec| spec.name == invocation.tool);

        tracing::info!(
            event_name = "agent.router.tool_invoked",
            thread_id = %thread_id,
            tool = %invocation.tool,
            valid = invocation.validated.is_ok(),
            "invoking tool"
        );

        if known && !offered {
            return format!("Tool {} is not available for this request.", invocation.tool);
        }
        self.tools.invoke(&invocation).await
    }

    async fn prompt_history(
        &self,
        thread_id: &ThreadId,
        history_window: Option<usize>,
    ) -> Vec<PromptMessage> {
        let messages = match history_window {
            Some(n) => self.conversations.window(thread_id, n.max(1)).await,
            None => self.conversations.read(thread_id).await,
        };
        messages.iter().map(PromptMessage::from).collect()
    }

    /// Plain conversation over the same thread store, with no tools offered.
    pub async fn chat(&self, text: &str, thread_id: &ThreadId) -> Result<String, LlmError> {
        self.conversations.append(thread_id, Message::human(text)).await;
        let messages = self.prompt_history(thread_id, self.settings.history_window).await;

        let completion = self
            .llm
            .complete(CompletionRequest {
                system: CHAT_SYSTEM_PROMPT.to_string(),
                messages,
                tools: Vec::new(),
                response_schema: None,
            })
            .await
            .map_err(|error| {
                tracing::warn!(
                    event_name = "agent.chat.gateway_failed",
                    thread_id = %thread_id,
                    error = %error,
                    "chat completion failed"
                );
                error
            })?;

        let reply = completion.final_text().unwrap_or(NO_RESPONSE_FALLBACK).to_string();
        self.conversations.append(thread_id, Message::agent(reply.clone())).await;
        Ok(reply)
    }

    pub async fn history(&self, thread_id: &ThreadId) -> Vec<Message> {
        self.conversations.read(thread_id).await
    }
}
