//! The tool table shared by the agent and the `/mcp` webhook.
//!
//! Every call resolves its tool once through [`REGISTRY`], runs the typed handler, and comes
//! back as an [`Envelope`]. Nothing here returns `Err`: callers branch on `success` only.

mod handlers;
pub mod schema;

pub(crate) use handlers::{bulk_envelope, created_envelope};

use crate::context::AppContext;
use crate::db::{NewAgentLog, Store, UserRow};
use crate::llm::ToolDescriptor;
use crate::service::{ListingManager, ServiceError, ServiceErrorKind};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    CreateListing,
    UpdateListing,
    GetListing,
    DeleteListing,
    SearchListings,
    AnalyzeListing,
    OptimizeListing,
    BulkOperations,
    SuggestCategories,
    GenerateReport,
    AiAssistant,
}

impl Tool {
    pub const ALL: [Tool; 11] = [
        Tool::CreateListing,
        Tool::UpdateListing,
        Tool::GetListing,
        Tool::DeleteListing,
        Tool::SearchListings,
        Tool::AnalyzeListing,
        Tool::OptimizeListing,
        Tool::BulkOperations,
        Tool::SuggestCategories,
        Tool::GenerateReport,
        Tool::AiAssistant,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Tool::CreateListing => "create_listing",
            Tool::UpdateListing => "update_listing",
            Tool::GetListing => "get_listing",
            Tool::DeleteListing => "delete_listing",
            Tool::SearchListings => "search_listings",
            Tool::AnalyzeListing => "analyze_listing",
            Tool::OptimizeListing => "optimize_listing",
            Tool::BulkOperations => "bulk_operations",
            Tool::SuggestCategories => "suggest_categories",
            Tool::GenerateReport => "generate_report",
            Tool::AiAssistant => "ai_assistant",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Tool::CreateListing => "Create a new eBay listing",
            Tool::UpdateListing => "Update an existing eBay listing",
            Tool::GetListing => "Fetch the current marketplace state of a listing",
            Tool::DeleteListing => "End a listing on eBay and remove its local record",
            Tool::SearchListings => "Search listings on eBay and in the local store",
            Tool::AnalyzeListing => "Analyze listing performance against competitors",
            Tool::OptimizeListing => "Suggest title, description, keyword and pricing improvements",
            Tool::BulkOperations => "Update, delete or relist several listings at once",
            Tool::SuggestCategories => "Suggest eBay categories for a listing title",
            Tool::GenerateReport => "Generate a sales, performance, inventory or analytics report",
            Tool::AiAssistant => "Ask the listing assistant a free-text question",
        }
    }

    fn schema(self) -> Value {
        match self {
            Tool::CreateListing => schema::create_listing(),
            Tool::UpdateListing => schema::update_listing(),
            Tool::GetListing => schema::get_listing(),
            Tool::DeleteListing => schema::delete_listing(),
            Tool::SearchListings => schema::search_listings(),
            Tool::AnalyzeListing => schema::analyze_listing(),
            Tool::OptimizeListing => schema::optimize_listing(),
            Tool::BulkOperations => schema::bulk_operations(),
            Tool::SuggestCategories => schema::suggest_categories(),
            Tool::GenerateReport => schema::generate_report(),
            Tool::AiAssistant => schema::ai_assistant(),
        }
    }

    /// Message carried by a failure envelope.
    fn failure_message(self) -> &'static str {
        match self {
            Tool::CreateListing => "Failed to create listing",
            Tool::UpdateListing => "Failed to update listing",
            Tool::GetListing => "Failed to get listing",
            Tool::DeleteListing => "Failed to delete listing",
            Tool::SearchListings => "Search failed",
            Tool::AnalyzeListing => "Analysis failed",
            Tool::OptimizeListing => "Optimization failed",
            Tool::BulkOperations => "Bulk operation failed",
            Tool::SuggestCategories => "Failed to get suggestions",
            Tool::GenerateReport => "Failed to generate report",
            Tool::AiAssistant => "Assistant request failed",
        }
    }

    fn agent_visible(self) -> bool {
        self != Tool::AiAssistant
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub schema: Value,
}

pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
    by_name: HashMap<&'static str, Tool>,
}

pub static REGISTRY: Lazy<ToolRegistry> = Lazy::new(ToolRegistry::build);

impl ToolRegistry {
    fn build() -> Self {
        let specs = Tool::ALL
            .iter()
            .map(|tool| ToolSpec {
                name: tool.name(),
                description: tool.description(),
                schema: tool.schema(),
            })
            .collect();
        let by_name = Tool::ALL.iter().map(|tool| (tool.name(), *tool)).collect();
        Self { specs, by_name }
    }

    pub fn resolve(&self, name: &str) -> Option<Tool> {
        self.by_name.get(name).copied()
    }

    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    /// Descriptors offered to the model; the assistant tool itself is left out.
    pub fn agent_descriptors(&self) -> Vec<ToolDescriptor> {
        Tool::ALL
            .iter()
            .zip(&self.specs)
            .filter(|(tool, _)| tool.agent_visible())
            .map(|(_, spec)| ToolDescriptor {
                name: spec.name.to_string(),
                description: spec.description.to_string(),
                parameters: spec.schema.clone(),
                strict: false,
            })
            .collect()
    }
}

/// Uniform tool result: `{success, ..., message}` or `{success: false, error, message}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub success: bool,
    #[serde(flatten)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
    #[serde(skip)]
    kind: Option<ServiceErrorKind>,
}

impl Envelope {
    pub fn ok(message: impl Into<String>, data: impl Serialize) -> Self {
        let data = match serde_json::to_value(data) {
            Ok(Value::Object(map)) => map,
            Ok(Value::Null) => Map::new(),
            Ok(other) => Map::from_iter([("result".to_string(), other)]),
            Err(err) => {
                return Self::error(
                    "Failed to encode result",
                    err.to_string(),
                    ServiceErrorKind::Internal,
                );
            }
        };
        Self {
            success: true,
            data,
            error: None,
            message: message.into(),
            kind: None,
        }
    }

    pub fn failure(message: impl Into<String>, err: &ServiceError) -> Self {
        Self::error(message, err.detail(), err.kind())
    }

    pub fn error(message: impl Into<String>, error: impl Into<String>, kind: ServiceErrorKind) -> Self {
        Self {
            success: false,
            data: Map::new(),
            error: Some(error.into()),
            message: message.into(),
            kind: Some(kind),
        }
    }

    fn unknown_tool(name: &str) -> Self {
        let text = format!("Unknown tool: {name}");
        Self::error(text.clone(), text, ServiceErrorKind::InvalidInput)
    }

    /// Why the call failed, when it did and the cause is known.
    pub fn kind(&self) -> Option<ServiceErrorKind> {
        self.kind
    }
}

/// Public entry point used by the webhook: every tool, including the assistant.
pub async fn dispatch(ctx: &AppContext, user_id: &str, name: &str, args: Value) -> Envelope {
    let started = Instant::now();
    let store = ctx.listings.store();
    let user = match ctx.listings.user(user_id).await {
        Ok(user) => user,
        Err(err) => return Envelope::failure("Unknown user", &err),
    };

    let envelope = match REGISTRY.resolve(name) {
        None => Envelope::unknown_tool(name),
        Some(Tool::AiAssistant) => handlers::assistant(&ctx.agent, &user, args.clone()).await,
        Some(tool) => handlers::invoke(&ctx.listings, &user, tool, args.clone()).await,
    };
    finish(store, &user, name, &args, envelope, started).await
}

/// Entry point for tool calls the model makes. The assistant tool is not reachable from here.
pub async fn dispatch_for_agent(
    listings: &ListingManager,
    user: &UserRow,
    name: &str,
    args: Value,
) -> Envelope {
    let started = Instant::now();
    let envelope = match REGISTRY.resolve(name).filter(|tool| tool.agent_visible()) {
        None => Envelope::unknown_tool(name),
        Some(tool) => handlers::invoke(listings, user, tool, args.clone()).await,
    };
    finish(listings.store(), user, name, &args, envelope, started).await
}

async fn finish(
    store: &Store,
    user: &UserRow,
    name: &str,
    args: &Value,
    envelope: Envelope,
    started: Instant,
) -> Envelope {
    let elapsed = started.elapsed();
    crate::metrics::tool_elapsed(name, elapsed.as_millis());
    info!(
        target = "listing.tools",
        tool = name,
        user_id = %user.id,
        success = envelope.success,
        elapsed_ms = elapsed.as_millis() as u64,
        "tool dispatched"
    );

    let output = serde_json::to_value(&envelope).unwrap_or(Value::Null);
    let entry = NewAgentLog {
        user_id: Some(&user.id),
        action: name,
        input: args,
        output: &output,
        success: envelope.success,
        error: envelope.error.as_deref(),
    };
    if let Err(err) = store.log_agent_action(&entry).await {
        warn!(target = "listing.tools", tool = name, error = %err, "agent log not written");
    }
    envelope
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockMarketplace, test_context};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn registry_covers_every_tool_once() {
        assert_eq!(REGISTRY.specs().len(), Tool::ALL.len());
        for tool in Tool::ALL {
            assert_eq!(REGISTRY.resolve(tool.name()), Some(tool));
        }
        assert_eq!(REGISTRY.resolve("drop_tables"), None);
        let agent_tools: Vec<String> = REGISTRY
            .agent_descriptors()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(agent_tools.len(), Tool::ALL.len() - 1);
        assert!(!agent_tools.iter().any(|name| name == "ai_assistant"));
    }

    #[test]
    fn envelope_shapes() {
        let ok = serde_json::to_value(Envelope::ok("Analysis complete", json!({"listing_id": "1"})))
            .unwrap();
        assert_eq!(ok, json!({"success": true, "listing_id": "1", "message": "Analysis complete"}));

        let err = ServiceError::not_found("get_listing", "listing 9 not found");
        let failed = Envelope::failure("Failed to get listing", &err);
        assert_eq!(failed.kind(), Some(ServiceErrorKind::NotFound));
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["error"], json!("listing 9 not found"));
        assert_eq!(value["message"], json!("Failed to get listing"));

        let back: Envelope = serde_json::from_value(ok).unwrap();
        assert_eq!(back.data["listing_id"], json!("1"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_envelope_and_logged() {
        let (ctx, user) = test_context(Arc::new(MockMarketplace::new())).await;
        let envelope = dispatch(&ctx, &user.id, "launch_rockets", json!({})).await;
        assert!(!envelope.success);
        assert_eq!(envelope.message, "Unknown tool: launch_rockets");
        assert_eq!(envelope.kind(), Some(ServiceErrorKind::InvalidInput));

        let logs = ctx.listings.recent_agent_logs(&user, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, "launch_rockets");
        assert!(!logs[0].success);
    }

    #[tokio::test]
    async fn agent_cannot_reach_the_assistant_tool() {
        let (ctx, user) = test_context(Arc::new(MockMarketplace::new())).await;
        let envelope =
            dispatch_for_agent(&ctx.listings, &user, "ai_assistant", json!({"query": "hi"})).await;
        assert!(!envelope.success);
        assert_eq!(envelope.message, "Unknown tool: ai_assistant");
    }

    #[tokio::test]
    async fn unknown_user_fails_without_panicking() {
        let (ctx, _) = test_context(Arc::new(MockMarketplace::new())).await;
        let envelope = dispatch(&ctx, "missing-user", "get_listing", json!({})).await;
        assert!(!envelope.success);
        assert_eq!(envelope.kind(), Some(ServiceErrorKind::NotFound));
    }
}
