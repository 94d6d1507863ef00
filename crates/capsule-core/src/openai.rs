//! OpenAI chat completion client (function-calling API)

use async_trait::async_trait;
use capsule_sdk::FunctionSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::OpenAiConfig;
use crate::error::CompletionError;
use crate::CompletionClient;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Function => "function",
        };
        f.write_str(s)
    }
}

/// A message as sent to the completion API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Function name; required by the API for function-role messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn function(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Function,
            content: content.into(),
            name: Some(name.into()),
        }
    }
}

/// A function call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, exactly as the model produced them
    #[serde(default)]
    pub arguments: String,
}

/// Why the model stopped producing output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    FunctionCall,
    Length,
    Other(String),
}

impl FinishReason {
    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::FunctionCall => "function_call",
            FinishReason::Length => "length",
            FinishReason::Other(s) => s,
        }
    }
}

impl From<&str> for FinishReason {
    fn from(s: &str) -> Self {
        match s {
            "stop" => FinishReason::Stop,
            "function_call" => FinishReason::FunctionCall,
            "length" => FinishReason::Length,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The first choice of a completion response
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub function_call: Option<FunctionCall>,
    pub finish_reason: FinishReason,
}

impl Completion {
    /// A plain textual answer
    pub fn stop(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            function_call: None,
            finish_reason: FinishReason::Stop,
        }
    }

    /// A request to call `name` with JSON `arguments`
    pub fn call(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            function_call: Some(FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            }),
            finish_reason: FinishReason::FunctionCall,
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "no_functions")]
    functions: &'a [FunctionSchema],
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<&'static str>,
}

fn no_functions(functions: &&[FunctionSchema]) -> bool {
    functions.is_empty()
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

/// OpenAI API client
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(config: &OpenAiConfig) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            client,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        functions: &[FunctionSchema],
    ) -> Result<Completion, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = CompletionRequest {
            model: &self.model,
            messages,
            functions,
            function_call: (!functions.is_empty()).then_some("auto"),
        };

        debug!(
            model = %self.model,
            messages = messages.len(),
            functions = functions.len(),
            "Requesting completion"
        );

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 => CompletionError::Unauthorized,
                429 => CompletionError::RateLimited(body),
                code => CompletionError::Api { status: code, body },
            });
        }

        let body = resp.text().await?;
        let parsed: CompletionResponse =
            serde_json::from_str(&body).map_err(|e| CompletionError::Decode(e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(CompletionError::EmptyChoices)?;

        let finish_reason = choice
            .finish_reason
            .as_deref()
            .map(FinishReason::from)
            .unwrap_or(FinishReason::Stop);

        debug!(finish_reason = %finish_reason, "Completion received");

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            function_call: choice.message.function_call,
            finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_sdk::{ParameterProperty, ParameterSchema};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OpenAiClient {
        let config = OpenAiConfig {
            api_key: Some("sk-test".to_string()),
            base_url: server.uri(),
            model: "gpt-test".to_string(),
            timeout_secs: 5,
        };
        OpenAiClient::new(&config).unwrap()
    }

    fn add_schema() -> FunctionSchema {
        FunctionSchema::new(
            "add",
            "Add two numbers",
            ParameterSchema::new()
                .with_required("num1", ParameterProperty::number("First"))
                .with_required("num2", ParameterProperty::number("Second")),
        )
    }

    #[tokio::test]
    async fn test_complete_stop() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "gpt-test"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {"role": "assistant", "content": "hello"},
                    "finish_reason": "stop"
                }]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let completion = client
            .complete(&[ChatMessage::user("hi")], &[])
            .await
            .unwrap();

        assert_eq!(completion.content, "hello");
        assert_eq!(completion.finish_reason, FinishReason::Stop);
        assert!(completion.function_call.is_none());
    }

    #[tokio::test]
    async fn test_complete_function_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"function_call": "auto"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "function_call": {"name": "add", "arguments": "{\"num1\":2,\"num2\":3}"}
                    },
                    "finish_reason": "function_call"
                }]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let completion = client
            .complete(&[ChatMessage::user("2+3?")], &[add_schema()])
            .await
            .unwrap();

        assert_eq!(completion.finish_reason, FinishReason::FunctionCall);
        assert_eq!(completion.content, "");
        let call = completion.function_call.unwrap();
        assert_eq!(call.name, "add");
        assert_eq!(call.arguments, r#"{"num1":2,"num2":3}"#);
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_remediation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(&[ChatMessage::user("hi")], &[])
            .await
            .unwrap_err();

        assert!(matches!(err, CompletionError::Unauthorized));
        assert!(err.remediation().is_some());
    }

    #[tokio::test]
    async fn test_rate_limit_and_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let first = client.complete(&[], &[]).await.unwrap_err();
        assert!(matches!(first, CompletionError::RateLimited(ref b) if b == "slow down"));

        let second = client.complete(&[], &[]).await.unwrap_err();
        assert!(matches!(second, CompletionError::Api { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_empty_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = client_for(&server).complete(&[], &[]).await.unwrap_err();
        assert!(matches!(err, CompletionError::EmptyChoices));
    }

    #[test]
    fn test_request_omits_functions_when_empty() {
        let messages = [ChatMessage::function("add", "{\"result\":\"5\"}")];
        let request = CompletionRequest {
            model: "m",
            messages: &messages,
            functions: &[],
            function_call: None,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("functions").is_none());
        assert!(value.get("function_call").is_none());
        assert_eq!(value["messages"][0]["role"], "function");
        assert_eq!(value["messages"][0]["name"], "add");
    }

    #[test]
    fn test_finish_reason_parsing() {
        assert_eq!(FinishReason::from("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from("length"), FinishReason::Length);
        assert_eq!(
            FinishReason::from("content_filter"),
            FinishReason::Other("content_filter".to_string())
        );
    }
}
