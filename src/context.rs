use crate::agent::Agent;
use crate::config::AppConfig;
use crate::db::{Store, StoreError};
use crate::ebay::{EbayMarketplace, MarketplaceApi};
use crate::http::build_client;
use crate::llm::LlmClient;
use crate::service::ListingManager;
use crate::tools::{REGISTRY, ToolRegistry};
use std::sync::Arc;
use tracing::{info, warn};

/// Everything a request handler needs, built once in [`AppContext::start`].
pub struct AppContext {
    pub store: Store,
    pub listings: ListingManager,
    pub agent: Agent,
    pub tools: &'static ToolRegistry,
}

impl AppContext {
    /// Brings services up in dependency order: store, marketplace adapter, agent, tool table.
    pub async fn start(config: &AppConfig) -> Result<Self, StoreError> {
        let store = Store::connect(&config.database_url, config.database_max_connections).await?;
        let marketplace: Arc<dyn MarketplaceApi> = Arc::new(EbayMarketplace::new(
            build_client(&config.http),
            config.marketplace.clone(),
        ));
        let llm = LlmClient::new(config.llm.clone(), &config.http);
        if !llm.is_configured() {
            warn!(
                target = "listing.agent",
                "TENSORZERO_GATEWAY_URL not set; assistant queries will fail"
            );
        }
        Ok(Self::assemble(store, marketplace, llm, config.agent_max_steps))
    }

    pub fn assemble(
        store: Store,
        marketplace: Arc<dyn MarketplaceApi>,
        llm: LlmClient,
        agent_max_steps: usize,
    ) -> Self {
        let listings = ListingManager::new(store.clone(), marketplace);
        let agent = Agent::new(llm, listings.clone(), agent_max_steps);
        let tools = &*REGISTRY;
        info!(
            target = "listing.api",
            tools = tools.specs().len(),
            "application context ready"
        );
        Self {
            store,
            listings,
            agent,
            tools,
        }
    }

    /// Closes the store. The agent and marketplace adapter hold no resources beyond
    /// their HTTP clients, which are released on drop.
    pub async fn shutdown(&self) {
        self.store.close().await;
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{MockMarketplace, test_context};
    use std::sync::Arc;

    #[tokio::test]
    async fn shutdown_closes_the_store() {
        let (ctx, _) = test_context(Arc::new(MockMarketplace::new())).await;
        assert!(ctx.store.ping().await);
        ctx.shutdown().await;
        assert!(!ctx.store.ping().await);
    }
}
