use crate::db::UserRow;
use crate::llm::{LlmClient, LlmError, LlmMessage, ToolDescriptor};
use crate::service::{ListingManager, ServiceError, ServiceErrorKind};
use crate::tools::{self, REGISTRY};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub const SYSTEM_PROMPT: &str = "You are an expert eBay listing manager. Help users create, \
update, and manage their eBay listings efficiently. Provide suggestions for optimizing listings \
for better visibility and sales.";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("query must not be empty")]
    EmptyQuery,
    #[error("language model unavailable: {0}")]
    Llm(#[from] LlmError),
    #[error("no final answer after {0} steps")]
    StepLimit(usize),
}

impl AgentError {
    pub fn into_service_error(self) -> ServiceError {
        match self {
            AgentError::EmptyQuery => ServiceError::invalid_input("ai_assistant", self.to_string()),
            other => ServiceError::new("ai_assistant", ServiceErrorKind::Agent, other.to_string()),
        }
    }
}

/// One tool the model ran while answering.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub arguments: Value,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentReply {
    pub query: String,
    pub response: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Agent {
    llm: Arc<LlmClient>,
    listings: ListingManager,
    tools: Arc<Vec<ToolDescriptor>>,
    max_steps: usize,
}

impl Agent {
    pub fn new(llm: LlmClient, listings: ListingManager, max_steps: usize) -> Self {
        Self {
            llm: Arc::new(llm),
            listings,
            tools: Arc::new(REGISTRY.agent_descriptors()),
            max_steps: max_steps.max(1),
        }
    }

    /// Runs the model until it answers in text, executing every tool call it makes on the way.
    pub async fn process(
        &self,
        user: &UserRow,
        query: &str,
        context: Option<&Value>,
    ) -> Result<AgentReply, AgentError> {
        if query.trim().is_empty() {
            return Err(AgentError::EmptyQuery);
        }

        let mut messages = vec![LlmMessage::user(compose_prompt(query, context))];
        let mut tool_calls = Vec::new();

        for step in 0..self.max_steps {
            let reply = self.llm.chat(SYSTEM_PROMPT, &messages, &self.tools).await?;
            if let Some(usage) = &reply.usage {
                debug!(
                    target = "listing.agent",
                    step,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "model turn"
                );
            }

            if reply.tool_calls.is_empty() {
                info!(
                    target = "listing.agent",
                    user_id = %user.id,
                    steps = step + 1,
                    tool_calls = tool_calls.len(),
                    "query answered"
                );
                return Ok(AgentReply {
                    query: query.to_string(),
                    response: reply.text.unwrap_or_default(),
                    tool_calls,
                    timestamp: Utc::now(),
                });
            }

            messages.push(LlmMessage::assistant(&reply));
            for call in &reply.tool_calls {
                let envelope =
                    tools::dispatch_for_agent(&self.listings, user, &call.name, call.arguments.clone())
                        .await;
                let result = serde_json::to_string(&envelope)
                    .unwrap_or_else(|_| envelope.message.clone());
                tool_calls.push(ToolCallRecord {
                    tool: call.name.clone(),
                    arguments: call.arguments.clone(),
                    success: envelope.success,
                    message: envelope.message,
                });
                messages.push(LlmMessage::tool_result(call, result));
            }
        }

        Err(AgentError::StepLimit(self.max_steps))
    }
}

/// A non-empty context object is sent ahead of the query as JSON.
fn compose_prompt(query: &str, context: Option<&Value>) -> String {
    let context = context.filter(|value| match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    });
    match context {
        Some(value) => format!("Context: {value}\n\nQuery: {query}"),
        None => query.to_string(),
    }
}
