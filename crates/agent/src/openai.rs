//! OpenAI-compatible chat completions client.
//!
//! Speaks `POST {base_url}/v1/chat/completions`, which both the OpenAI API and
//! Ollama expose. Tools are sent as function tools and a target schema as
//! `response_format: json_schema`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Map, Value};

use foodlink_core::config::AppConfig;

use crate::llm::{
    Completion, CompletionRequest, LlmClient, LlmError, PromptMessage, ToolRequest, ToolSpec,
};

pub struct OpenAiCompatibleClient {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: Option<f32>,
    timeout: Duration,
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| LlmError::Transport(error.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: model.into(),
            temperature: None,
            timeout,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, LlmError> {
        let mut client = Self::new(
            config.llm_base_url(),
            config.llm.model.clone(),
            Duration::from_secs(config.llm.timeout_secs),
        )?
        .with_temperature(config.llm.temperature);
        client.api_key = config.llm.api_key.clone();
        Ok(client)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(api_key.into()));
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn payload(&self, request: &CompletionRequest) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(json!({"role": "system", "content": request.system}));
        }
        for message in &request.messages {
            append_message_spec(&mut messages, message);
        }

        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(self.model));
        payload.insert("messages".to_string(), Value::Array(messages));
        if !request.tools.is_empty() {
            payload.insert("tools".to_string(), tools_spec(&request.tools));
        }
        if let Some(temperature) = self.temperature {
            payload.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(schema) = &request.response_schema {
            payload.insert(
                "response_format".to_string(),
                json!({
                    "type": "json_schema",
                    "json_schema": {"name": schema.name, "schema": schema.schema},
                }),
            );
        }
        Value::Object(payload)
    }

    async fn post(&self, payload: &Value) -> Result<Value, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .authorized(self.client.post(&url).json(payload))
            .send()
            .await
            .map_err(|error| self.transport_error(error))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body });
        }

        response.json::<Value>().await.map_err(|error| {
            if error.is_timeout() {
                LlmError::Timeout(self.timeout)
            } else {
                LlmError::Decode(error.to_string())
            }
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(api_key) => builder.bearer_auth(api_key.expose_secret()),
            None => builder,
        }
    }

    fn transport_error(&self, error: reqwest::Error) -> LlmError {
        if error.is_timeout() {
            LlmError::Timeout(self.timeout)
        } else {
            LlmError::Transport(error.to_string())
        }
    }
}

fn append_message_spec(messages: &mut Vec<Value>, message: &PromptMessage) {
    match message {
        PromptMessage::Human(content) => {
            messages.push(json!({"role": "user", "content": content}));
        }
        PromptMessage::Agent(content) => {
            messages.push(json!({"role": "assistant", "content": content}));
        }
        PromptMessage::ToolExchange { request, output } => {
            messages.push(json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": [{
                    "id": request.id,
                    "type": "function",
                    "function": {
                        "name": request.name,
                        "arguments": request.arguments.to_string(),
                    },
                }],
            }));
            messages.push(json!({
                "role": "tool",
                "tool_call_id": request.id,
                "content": output,
            }));
        }
    }
}

fn tools_spec(tools: &[ToolSpec]) -> Value {
    Value::Array(
        tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.input_schema,
                    },
                })
            })
            .collect(),
    )
}

fn parse_completion(response: &Value) -> Result<Completion, LlmError> {
    if let Some(error) = response.get("error") {
        return Err(LlmError::Decode(format!("provider returned an error: {error}")));
    }

    let message = response
        .pointer("/choices/0/message")
        .ok_or_else(|| LlmError::Decode("response has no choices[0].message".to_string()))?;

    let text = message.get("content").and_then(Value::as_str).map(str::to_string);
    let tool_call = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .and_then(|calls| calls.first())
        .map(parse_tool_call)
        .transpose()?;

    Ok(Completion { text, tool_call })
}

fn parse_tool_call(call: &Value) -> Result<ToolRequest, LlmError> {
    let name = call
        .pointer("/function/name")
        .and_then(Value::as_str)
        .ok_or_else(|| LlmError::Decode("tool call has no function name".to_string()))?;
    let id = call.get("id").and_then(Value::as_str).unwrap_or(name).to_string();

    // Arguments arrive as a JSON string; unparseable text is kept so validation can report it.
    let arguments = match call.pointer("/function/arguments") {
        Some(Value::String(raw)) => {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
        }
        Some(other) => other.clone(),
        None => Value::Object(Map::new()),
    };

    Ok(ToolRequest { id, name: name.to_string(), arguments })
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        let payload = self.payload(&request);
        tracing::debug!(
            event_name = "agent.llm.request",
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            structured = request.response_schema.is_some(),
            "sending chat completion request"
        );

        let response = self.post(&payload).await?;
        parse_completion(&response)
    }

    /// Lists models, which both OpenAI and Ollama serve without running one.
    async fn ping(&self) -> Result<String, LlmError> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|error| self.transport_error(error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body });
        }
        Ok(format!("{} reachable at {}", self.model, self.base_url))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::OpenAiCompatibleClient;
    use crate::llm::{
        CompletionRequest, LlmClient, LlmError, PromptMessage, ResponseSchema, ToolRequest,
        ToolSpec,
    };

    async fn setup_mock_server(response: ResponseTemplate) -> (MockServer, OpenAiCompatibleClient) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(response)
            .mount(&mock_server)
            .await;

        let client = OpenAiCompatibleClient::new(mock_server.uri(), "gpt-4o", Duration::from_secs(5))
            .expect("build client")
            .with_api_key("sk-test")
            .with_temperature(0.0);
        (mock_server, client)
    }

    fn request(text: &str) -> CompletionRequest {
        CompletionRequest {
            system: "You are a helpful assistant.".to_string(),
            messages: vec![PromptMessage::Human(text.to_string())],
            ..CompletionRequest::default()
        }
    }

    #[tokio::test]
    async fn complete_returns_direct_text() {
        let body = json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello! How can I help?", "tool_calls": null},
                "finish_reason": "stop"
            }]
        });
        let (_server, client) = setup_mock_server(ResponseTemplate::new(200).set_body_json(body)).await;

        let completion = client.complete(request("Hello?")).await.expect("complete");

        assert_eq!(completion.final_text(), Some("Hello! How can I help?"));
        assert!(completion.tool_call.is_none());
    }

    #[tokio::test]
    async fn complete_decodes_tool_call_arguments() {
        let body = json!({
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_123",
                        "type": "function",
                        "function": {
                            "name": "crud_tool",
                            "arguments": "{\"operation\":\"get_user\",\"data\":{\"user_id\":\"u-1\"}}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let (_server, client) = setup_mock_server(ResponseTemplate::new(200).set_body_json(body)).await;

        let tools = vec![ToolSpec {
            name: "crud_tool".to_string(),
            description: "records".to_string(),
            input_schema: json!({"type": "object"}),
        }];
        let completion = client
            .complete(CompletionRequest { tools, ..request("Look up user u-1") })
            .await
            .expect("complete");

        let call = completion.tool_call.expect("tool call");
        assert_eq!(call.id, "call_123");
        assert_eq!(call.name, "crud_tool");
        assert_eq!(call.arguments, json!({"operation": "get_user", "data": {"user_id": "u-1"}}));
    }

    #[tokio::test]
    async fn sends_bearer_auth_tools_and_schema() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o",
                "response_format": {"type": "json_schema", "json_schema": {"name": "donation_record"}},
                "messages": [{"role": "system", "content": "You are a helpful assistant."}],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "{}"}}]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = OpenAiCompatibleClient::new(mock_server.uri(), "gpt-4o", Duration::from_secs(5))
            .expect("build client")
            .with_api_key("sk-test");
        let completion = client
            .complete(CompletionRequest {
                response_schema: Some(ResponseSchema {
                    name: "donation_record".to_string(),
                    schema: json!({"type": "object"}),
                }),
                ..request("20 loaves")
            })
            .await
            .expect("complete");

        assert_eq!(completion.final_text(), Some("{}"));
    }

    #[tokio::test]
    async fn tool_exchanges_are_replayed_as_assistant_and_tool_messages() {
        let client =
            OpenAiCompatibleClient::new("http://localhost:11434/", "llama3.1", Duration::from_secs(1))
                .expect("build client");
        let payload = client.payload(&CompletionRequest {
            system: String::new(),
            messages: vec![
                PromptMessage::Human("go to donations".to_string()),
                PromptMessage::ToolExchange {
                    request: ToolRequest {
                        id: "call_1".to_string(),
                        name: "navigation_tool".to_string(),
                        arguments: json!({"page": "donations"}),
                    },
                    output: "Navigating to page: donations".to_string(),
                },
            ],
            ..CompletionRequest::default()
        });

        let messages = payload["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["tool_calls"][0]["function"]["arguments"], "{\"page\":\"donations\"}");
        assert_eq!(messages[2]["role"], "tool");
        assert_eq!(messages[2]["tool_call_id"], "call_1");
        assert!(payload.get("tools").is_none());
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[tokio::test]
    async fn non_success_status_is_reported_with_body() {
        let (_server, client) =
            setup_mock_server(ResponseTemplate::new(503).set_body_string("overloaded")).await;

        let result = client.complete(request("hi")).await;

        assert_eq!(result, Err(LlmError::Status { status: 503, body: "overloaded".to_string() }));
    }

    #[tokio::test]
    async fn ping_lists_models_with_credentials() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .expect(1)
            .mount(&mock_server)
            .await;
        let client = OpenAiCompatibleClient::new(mock_server.uri(), "gpt-4o", Duration::from_secs(5))
            .expect("build client")
            .with_api_key("sk-test");

        let detail = client.ping().await.expect("ping");

        assert_eq!(detail, format!("gpt-4o reachable at {}", mock_server.uri()));
    }

    #[tokio::test]
    async fn ping_reports_rejected_credentials() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&mock_server)
            .await;
        let client = OpenAiCompatibleClient::new(mock_server.uri(), "gpt-4o", Duration::from_secs(5))
            .expect("build client");

        let result = client.ping().await;

        assert_eq!(
            result,
            Err(LlmError::Status { status: 401, body: "invalid api key".to_string() })
        );
    }

    #[tokio::test]
    async fn slow_endpoint_is_reported_as_a_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&mock_server)
            .await;
        let client =
            OpenAiCompatibleClient::new(mock_server.uri(), "gpt-4o", Duration::from_millis(50))
                .expect("build client");

        let result = client.complete(request("Hello?")).await;

        assert_eq!(result, Err(LlmError::Timeout(Duration::from_millis(50))));
    }

    #[tokio::test]
    async fn response_without_choices_is_a_decode_error() {
        let (_server, client) =
            setup_mock_server(ResponseTemplate::new(200).set_body_json(json!({"choices": []}))).await;

        let result = client.complete(request("hi")).await;

        assert!(matches!(result, Err(LlmError::Decode(_))));
    }

    #[tokio::test]
    async fn malformed_tool_arguments_are_kept_as_raw_text() {
        let body: Value = json!({
            "choices": [{"message": {"content": null, "tool_calls": [{
                "id": "call_9",
                "function": {"name": "navigation_tool", "arguments": "{page: donations"}
            }]}}]
        });
        let (_server, client) = setup_mock_server(ResponseTemplate::new(200).set_body_json(body)).await;

        let call = client.complete(request("go")).await.expect("complete").tool_call.expect("call");

        assert_eq!(call.arguments, Value::String("{page: donations".to_string()));
    }
}
