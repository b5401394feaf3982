pub mod config;
pub mod finding;
pub mod mapping;
pub mod trading;

use crate::ebay::config::TradingConfig;
use crate::ebay::finding::FindItemsAdvancedRequest;
use crate::ebay::trading::{
    AddItemResponse, EndItemRequest, GetItemRequest, GetItemResponse, ItemEnvelope, ItemPayload,
    ReviseItemResponse, SuggestedCategoriesRequest, SuggestedCategoriesResponse,
};
use crate::models::{CategorySuggestion, ListingChanges, ListingDraft, SearchCriteria};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum MarketplaceError {
    #[error("marketplace request failed: {0}")]
    Request(String),
    #[error("unexpected marketplace response: {0}")]
    Decode(String),
    #[error("eBay API error ({call}): {}", .messages.join("; "))]
    Api {
        call: &'static str,
        messages: Vec<String>,
    },
    #[error("listing not found: {0}")]
    NotFound(String),
    #[error("no eBay credential available for this user")]
    MissingToken,
}

/// A marketplace item in the internal field naming.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketplaceListing {
    pub listing_id: String,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub quantity: i64,
    pub category_id: Option<String>,
    pub condition: Option<String>,
    pub images: Vec<String>,
    pub status: Option<String>,
    pub views: i64,
    pub watchers: i64,
    pub questions: i64,
    pub bids: i64,
    pub quantity_sold: i64,
    pub conversion_rate: f64,
    pub listed_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub listing_id: String,
    pub title: String,
    pub price: f64,
    pub listing_url: Option<String>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingFee {
    pub name: String,
    pub amount: f64,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreatedListing {
    pub listing_id: String,
    pub listing_url: String,
    pub fees: Vec<ListingFee>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListingStats {
    pub view_count: i64,
    pub watch_count: i64,
    pub question_count: i64,
    pub bid_count: i64,
    pub conversion_rate: f64,
}

/// Everything the listing layer needs from a marketplace.
///
/// `token` is the calling user's stored credential; implementations may fall back to a
/// process-wide one.
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    async fn create_listing(
        &self,
        token: Option<&str>,
        draft: &ListingDraft,
    ) -> Result<CreatedListing, MarketplaceError>;

    async fn update_listing(
        &self,
        token: Option<&str>,
        listing_id: &str,
        changes: &ListingChanges,
    ) -> Result<Vec<ListingFee>, MarketplaceError>;

    async fn get_listing(
        &self,
        token: Option<&str>,
        listing_id: &str,
    ) -> Result<MarketplaceListing, MarketplaceError>;

    async fn search_listings(
        &self,
        criteria: &SearchCriteria,
    ) -> Result<Vec<SearchHit>, MarketplaceError>;

    async fn end_listing(&self, token: Option<&str>, listing_id: &str)
    -> Result<(), MarketplaceError>;

    async fn relist_listing(
        &self,
        token: Option<&str>,
        listing_id: &str,
    ) -> Result<CreatedListing, MarketplaceError>;

    async fn listing_stats(
        &self,
        token: Option<&str>,
        listing_id: &str,
    ) -> Result<ListingStats, MarketplaceError>;

    async fn suggest_categories(
        &self,
        token: Option<&str>,
        title: &str,
    ) -> Result<Vec<CategorySuggestion>, MarketplaceError>;
}

/// Trading/Finding adapter. In-flight calls are capped by a fixed-size semaphore.
#[derive(Clone)]
pub struct EbayMarketplace {
    http: Client,
    config: Arc<TradingConfig>,
    workers: Arc<Semaphore>,
}

impl EbayMarketplace {
    pub fn new(http: Client, config: TradingConfig) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));
        info!(
            target = "listing.ebay",
            environment = %config.environment,
            pool = config.worker_pool_size,
            "marketplace adapter ready"
        );
        Self {
            http,
            config: Arc::new(config),
            workers,
        }
    }

    fn token<'a>(&'a self, token: Option<&'a str>) -> Result<&'a str, MarketplaceError> {
        token
            .filter(|t| !t.trim().is_empty())
            .or(self.config.default_user_token.as_deref())
            .ok_or(MarketplaceError::MissingToken)
    }

    async fn slot(&self) -> Result<SemaphorePermit<'_>, MarketplaceError> {
        self.workers
            .acquire()
            .await
            .map_err(|_| MarketplaceError::Request("worker pool closed".into()))
    }

    async fn fetch_item(
        &self,
        token: &str,
        listing_id: &str,
    ) -> Result<trading::ItemDetails, MarketplaceError> {
        let _permit = self.slot().await?;
        let response: GetItemResponse = trading::execute(
            &self.http,
            &self.config,
            "GetItem",
            token,
            &GetItemRequest {
                ItemID: listing_id,
                IncludeWatchCount: true,
                DetailLevel: "ReturnAll",
            },
        )
        .await?;
        Ok(response.Item)
    }
}

#[async_trait]
impl MarketplaceApi for EbayMarketplace {
    async fn create_listing(
        &self,
        token: Option<&str>,
        draft: &ListingDraft,
    ) -> Result<CreatedListing, MarketplaceError> {
        let token = self.token(token)?;
        let body = ItemEnvelope {
            Item: mapping::item_for_create(draft, &self.config.defaults),
        };
        let _permit = self.slot().await?;
        let response: AddItemResponse =
            trading::execute(&self.http, &self.config, "AddItem", token, &body).await?;
        info!(target = "listing.ebay", listing_id = %response.ItemID, "item listed");
        Ok(CreatedListing {
            listing_url: self.config.listing_url(&response.ItemID),
            fees: mapping::fees_from_entries(response.Fees.unwrap_or_default().Fee),
            listing_id: response.ItemID,
        })
    }

    async fn update_listing(
        &self,
        token: Option<&str>,
        listing_id: &str,
        changes: &ListingChanges,
    ) -> Result<Vec<ListingFee>, MarketplaceError> {
        let token = self.token(token)?;
        let body = ItemEnvelope {
            Item: mapping::item_for_revision(listing_id, changes),
        };
        let _permit = self.slot().await?;
        let response: ReviseItemResponse =
            trading::execute(&self.http, &self.config, "ReviseItem", token, &body).await?;
        debug!(
            target = "listing.ebay",
            listing_id,
            fields = ?changes.changed_fields(),
            "item revised"
        );
        Ok(mapping::fees_from_entries(
            response.Fees.unwrap_or_default().Fee,
        ))
    }

    async fn get_listing(
        &self,
        token: Option<&str>,
        listing_id: &str,
    ) -> Result<MarketplaceListing, MarketplaceError> {
        let token = self.token(token)?;
        let item = self.fetch_item(token, listing_id).await?;
        Ok(mapping::listing_from_item(item))
    }

    async fn search_listings(
        &self,
        criteria: &SearchCriteria,
    ) -> Result<Vec<SearchHit>, MarketplaceError> {
        let request = FindItemsAdvancedRequest::new(criteria.keyword(), criteria.category());
        let _permit = self.slot().await?;
        let items = finding::find_items_advanced(&self.http, &self.config, &request).await?;
        Ok(items.into_iter().map(mapping::hit_from_search_item).collect())
    }

    async fn end_listing(
        &self,
        token: Option<&str>,
        listing_id: &str,
    ) -> Result<(), MarketplaceError> {
        let token = self.token(token)?;
        let _permit = self.slot().await?;
        let _: Value = trading::execute(
            &self.http,
            &self.config,
            "EndItem",
            token,
            &EndItemRequest {
                ItemID: listing_id,
                EndingReason: "NotAvailable",
            },
        )
        .await?;
        info!(target = "listing.ebay", listing_id, "item ended");
        Ok(())
    }

    async fn relist_listing(
        &self,
        token: Option<&str>,
        listing_id: &str,
    ) -> Result<CreatedListing, MarketplaceError> {
        let token = self.token(token)?;
        let body = ItemEnvelope {
            Item: ItemPayload {
                ItemID: Some(listing_id.to_string()),
                ..Default::default()
            },
        };
        let _permit = self.slot().await?;
        let response: AddItemResponse =
            trading::execute(&self.http, &self.config, "RelistItem", token, &body).await?;
        info!(
            target = "listing.ebay",
            previous = listing_id,
            listing_id = %response.ItemID,
            "item relisted"
        );
        Ok(CreatedListing {
            listing_url: self.config.listing_url(&response.ItemID),
            fees: mapping::fees_from_entries(response.Fees.unwrap_or_default().Fee),
            listing_id: response.ItemID,
        })
    }

    async fn listing_stats(
        &self,
        token: Option<&str>,
        listing_id: &str,
    ) -> Result<ListingStats, MarketplaceError> {
        let token = self.token(token)?;
        let listing = mapping::listing_from_item(self.fetch_item(token, listing_id).await?);
        Ok(ListingStats {
            view_count: listing.views,
            watch_count: listing.watchers,
            question_count: listing.questions,
            bid_count: listing.bids,
            conversion_rate: listing.conversion_rate,
        })
    }

    async fn suggest_categories(
        &self,
        token: Option<&str>,
        title: &str,
    ) -> Result<Vec<CategorySuggestion>, MarketplaceError> {
        let token = self.token(token)?;
        let body = SuggestedCategoriesRequest {
            Query: mapping::category_query(title),
        };
        let _permit = self.slot().await?;
        let response: SuggestedCategoriesResponse = trading::execute(
            &self.http,
            &self.config,
            "GetSuggestedCategories",
            token,
            &body,
        )
        .await?;
        Ok(response
            .SuggestedCategoryArray
            .unwrap_or_default()
            .SuggestedCategory
            .into_iter()
            .take(mapping::MAX_CATEGORY_SUGGESTIONS)
            .map(mapping::suggestion_from_category)
            .collect())
    }
}
