mod tensorzero;

pub use tensorzero::{LlmClient, LlmMessage, LlmReply, ToolCall, ToolDescriptor};

use thiserror::Error;

const DEFAULT_FUNCTION: &str = "listing_assistant";

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub gateway_url: String,
    pub api_key: Option<String>,
    pub function_name: String,
    pub model: Option<String>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            gateway_url: var("TENSORZERO_GATEWAY_URL").unwrap_or_default(),
            api_key: var("TENSORZERO_API_KEY"),
            function_name: var("TENSORZERO_FUNCTION")
                .unwrap_or_else(|| DEFAULT_FUNCTION.to_string()),
            model: var("TENSORZERO_MODEL"),
        }
    }

    pub fn for_gateway(url: &str) -> Self {
        Self {
            gateway_url: url.to_string(),
            api_key: None,
            function_name: DEFAULT_FUNCTION.to_string(),
            model: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("missing gateway url")]
    MissingGateway,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}
