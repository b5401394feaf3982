use super::{LlmConfig, LlmError};
use crate::config::HttpSettings;
use crate::http::build_client;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// A tool the model may call, in the gateway's `additional_tools` shape.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub strict: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InputBlock {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    ToolResult {
        id: String,
        name: String,
        result: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmMessage {
    role: Role,
    content: Vec<InputBlock>,
}

impl LlmMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![InputBlock::Text { text: text.into() }],
        }
    }

    /// Echoes a model turn back so the gateway can pair tool results with their calls.
    pub fn assistant(reply: &LlmReply) -> Self {
        let mut content = Vec::with_capacity(reply.tool_calls.len() + 1);
        if let Some(text) = reply.text.as_ref().filter(|t| !t.is_empty()) {
            content.push(InputBlock::Text { text: text.clone() });
        }
        content.extend(reply.tool_calls.iter().map(|call| InputBlock::ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.to_string(),
        }));
        Self {
            role: Role::Assistant,
            content,
        }
    }

    pub fn tool_result(call: &ToolCall, result: String) -> Self {
        Self {
            role: Role::User,
            content: vec![InputBlock::ToolResult {
                id: call.id.clone(),
                name: call.name.clone(),
                result,
            }],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmReply {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<LlmUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmUsage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

pub struct LlmClient {
    http: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig, settings: &HttpSettings) -> Self {
        Self {
            http: build_client(settings),
            config,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.gateway_url.trim().is_empty()
    }

    pub async fn chat(
        &self,
        system: &str,
        messages: &[LlmMessage],
        tools: &[ToolDescriptor],
    ) -> Result<LlmReply, LlmError> {
        let gateway = self.config.gateway_url.trim().trim_end_matches('/');
        if gateway.is_empty() {
            return Err(LlmError::MissingGateway);
        }

        let body = ChatRequest {
            function_name: &self.config.function_name,
            model_name: self.config.model.as_deref(),
            input: ChatInput { system, messages },
            additional_tools: tools,
        };

        let mut request = self.http.post(format!("{gateway}/inference")).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;
        if !response.status().is_success() {
            return Err(LlmError::Http(format!("HTTP {}", response.status())));
        }

        let payload: TensorZeroResponse = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;

        let mut reply = LlmReply {
            usage: payload.usage,
            ..Default::default()
        };
        for block in payload.content {
            match block {
                ResponseContent::Text { text } => match &mut reply.text {
                    Some(existing) => existing.push_str(&text),
                    None => reply.text = Some(text),
                },
                ResponseContent::ToolCall {
                    id,
                    name,
                    raw_name,
                    arguments,
                    raw_arguments,
                } => {
                    let name = name.or(raw_name).ok_or_else(|| {
                        LlmError::InvalidResponse(format!("tool call {id} has no name"))
                    })?;
                    let arguments = match arguments {
                        Some(value) => value,
                        None => serde_json::from_str(raw_arguments.as_deref().unwrap_or("{}"))
                            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?,
                    };
                    reply.tool_calls.push(ToolCall {
                        id,
                        name,
                        arguments,
                    });
                }
                ResponseContent::Other => {}
            }
        }

        if reply.text.is_none() && reply.tool_calls.is_empty() {
            return Err(LlmError::InvalidResponse("empty content".into()));
        }
        debug!(
            target = "listing.agent",
            tool_calls = reply.tool_calls.len(),
            "inference reply"
        );
        Ok(reply)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    function_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_name: Option<&'a str>,
    input: ChatInput<'a>,
    #[serde(skip_serializing_if = "no_tools")]
    additional_tools: &'a [ToolDescriptor],
}

fn no_tools(tools: &&[ToolDescriptor]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Serialize)]
struct ChatInput<'a> {
    system: &'a str,
    messages: &'a [LlmMessage],
}

#[derive(Debug, Deserialize)]
struct TensorZeroResponse {
    content: Vec<ResponseContent>,
    #[serde(default)]
    usage: Option<LlmUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContent {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        raw_name: Option<String>,
        #[serde(default)]
        arguments: Option<Value>,
        #[serde(default)]
        raw_arguments: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> LlmClient {
        let mut config = LlmConfig::for_gateway(&server.uri());
        config.api_key = Some("gw-key".into());
        LlmClient::new(config, &HttpSettings::default())
    }

    #[tokio::test]
    async fn text_reply_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/inference"))
            .and(header("X-API-Key", "gw-key"))
            .and(body_partial_json(json!({
                "function_name": "listing_assistant",
                "input": {"system": "be helpful"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "Lower the price."}],
                "usage": {"input_tokens": 12, "output_tokens": 4}
            })))
            .mount(&server)
            .await;

        let reply = client(&server)
            .chat("be helpful", &[LlmMessage::user("how do I sell faster?")], &[])
            .await
            .unwrap();
        assert_eq!(reply.text.as_deref(), Some("Lower the price."));
        assert!(reply.tool_calls.is_empty());
        assert_eq!(reply.usage.and_then(|u| u.output_tokens), Some(4));
    }

    #[tokio::test]
    async fn tool_calls_fall_back_to_raw_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/inference"))
            .and(body_partial_json(json!({
                "additional_tools": [{"name": "get_listing", "strict": false}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    {"type": "tool_call", "id": "c1", "name": "get_listing",
                     "arguments": {"listing_id": "110000000001"}},
                    {"type": "tool_call", "id": "c2", "raw_name": "analyze_listing",
                     "raw_arguments": "{\"listing_id\":\"110000000002\"}"},
                    {"type": "thought", "text": "ignored"}
                ]
            })))
            .mount(&server)
            .await;

        let tools = [ToolDescriptor {
            name: "get_listing".into(),
            description: "Fetch a listing".into(),
            parameters: json!({"type": "object"}),
            strict: false,
        }];
        let reply = client(&server)
            .chat("sys", &[LlmMessage::user("look it up")], &tools)
            .await
            .unwrap();
        assert_eq!(reply.text, None);
        assert_eq!(reply.tool_calls.len(), 2);
        assert_eq!(reply.tool_calls[1].name, "analyze_listing");
        assert_eq!(reply.tool_calls[1].arguments["listing_id"], "110000000002");
    }

    #[tokio::test]
    async fn gateway_errors_surface_as_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let err = client(&server)
            .chat("sys", &[LlmMessage::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Http(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn missing_gateway_is_rejected() {
        let client = LlmClient::new(LlmConfig::for_gateway(""), &HttpSettings::default());
        assert!(!client.is_configured());
        let err = client.chat("sys", &[], &[]).await.unwrap_err();
        assert!(matches!(err, LlmError::MissingGateway));
    }

    #[test]
    fn assistant_echo_serializes_tool_calls_as_strings() {
        let reply = LlmReply {
            text: Some("checking".into()),
            tool_calls: vec![ToolCall {
                id: "c1".into(),
                name: "get_listing".into(),
                arguments: json!({"listing_id": "1"}),
            }],
            usage: None,
        };
        let value = serde_json::to_value(LlmMessage::assistant(&reply)).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][1]["type"], "tool_call");
        assert_eq!(value["content"][1]["arguments"], "{\"listing_id\":\"1\"}");
    }
}
