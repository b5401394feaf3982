use crate::config::HttpSettings;
use crate::context::AppContext;
use crate::db::{Store, UserRow};
use crate::ebay::{
    CreatedListing, ListingFee, ListingStats, MarketplaceApi, MarketplaceError, MarketplaceListing,
    SearchHit,
};
use crate::llm::{LlmClient, LlmConfig};
use crate::models::{CategorySuggestion, ListingChanges, ListingDraft, SearchCriteria};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// A context over an in-memory store, with one registered user. The gateway is unset,
/// so assistant calls fail fast.
pub async fn test_context(marketplace: Arc<dyn MarketplaceApi>) -> (AppContext, UserRow) {
    test_context_with_llm(marketplace, LlmConfig::for_gateway("")).await
}

pub async fn test_context_with_llm(
    marketplace: Arc<dyn MarketplaceApi>,
    llm: LlmConfig,
) -> (AppContext, UserRow) {
    let store = Store::in_memory().await;
    let user = store.create_user("seller@example.com").await.unwrap();
    let llm = LlmClient::new(llm, &HttpSettings::default());
    (AppContext::assemble(store, marketplace, llm, 4), user)
}

/// Recording in-process marketplace.
#[derive(Default)]
pub struct MockMarketplace {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    listings: HashMap<String, MarketplaceListing>,
    calls: Vec<String>,
    update_calls: usize,
    failing_update_calls: HashSet<usize>,
    failing_ids: HashSet<String>,
    search_hits: Vec<SearchHit>,
    end_fails: bool,
}

impl MockMarketplace {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `n`th `update_listing` call (1-based) fails.
    pub fn fail_update_call(self, n: usize) -> Self {
        self.state.lock().unwrap().failing_update_calls.insert(n);
        self
    }

    /// Every call naming `listing_id` fails.
    pub fn fail_listing(self, listing_id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_ids
            .insert(listing_id.to_string());
        self
    }

    pub fn with_search_hits(self, hits: Vec<SearchHit>) -> Self {
        self.state.lock().unwrap().search_hits = hits;
        self
    }

    pub fn reject_end(self) -> Self {
        self.state.lock().unwrap().end_fails = true;
        self
    }

    pub fn seed(&self, listing_id: &str, title: &str, price: f64, quantity: i64) {
        let mut state = self.state.lock().unwrap();
        state
            .listings
            .insert(listing_id.to_string(), listing(listing_id, title, price, quantity));
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    fn record(&self, call: &'static str, listing_id: Option<&str>) -> Result<(), MarketplaceError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(match listing_id {
            Some(id) => format!("{call}:{id}"),
            None => call.to_string(),
        });
        if let Some(id) = listing_id
            && state.failing_ids.contains(id)
        {
            return Err(api_error(call, "simulated failure"));
        }
        Ok(())
    }

    fn mint(state: &mut MockState) -> String {
        state.next_id += 1;
        format!("11{:010}", state.next_id)
    }
}

fn api_error(call: &'static str, message: &str) -> MarketplaceError {
    MarketplaceError::Api {
        call,
        messages: vec![message.to_string()],
    }
}

fn listing(listing_id: &str, title: &str, price: f64, quantity: i64) -> MarketplaceListing {
    MarketplaceListing {
        listing_id: listing_id.to_string(),
        title: title.to_string(),
        description: format!("{title} in working order"),
        price,
        quantity,
        category_id: Some("625".into()),
        condition: Some("New".into()),
        images: Vec::new(),
        status: Some("Active".into()),
        views: 40,
        watchers: 3,
        questions: 1,
        bids: 0,
        quantity_sold: 2,
        conversion_rate: 5.0,
        listed_at: None,
        ends_at: None,
    }
}

#[async_trait]
impl MarketplaceApi for MockMarketplace {
    async fn create_listing(
        &self,
        _token: Option<&str>,
        draft: &ListingDraft,
    ) -> Result<CreatedListing, MarketplaceError> {
        self.record("AddItem", None)?;
        let mut state = self.state.lock().unwrap();
        let id = Self::mint(&mut state);
        let mut created = listing(&id, &draft.title, draft.price, draft.quantity);
        created.description = draft.description.clone();
        created.category_id = Some(draft.category_id.clone());
        created.images = draft.images.clone();
        created.condition = Some(draft.condition.label().to_string());
        state.listings.insert(id.clone(), created);
        Ok(CreatedListing {
            listing_url: format!("https://www.sandbox.ebay.com/itm/{id}"),
            fees: vec![ListingFee {
                name: "InsertionFee".into(),
                amount: 0.35,
                currency: Some("USD".into()),
            }],
            listing_id: id,
        })
    }

    async fn update_listing(
        &self,
        _token: Option<&str>,
        listing_id: &str,
        changes: &ListingChanges,
    ) -> Result<Vec<ListingFee>, MarketplaceError> {
        self.record("ReviseItem", Some(listing_id))?;
        let mut state = self.state.lock().unwrap();
        state.update_calls += 1;
        let call_no = state.update_calls;
        if state.failing_update_calls.contains(&call_no) {
            return Err(api_error("ReviseItem", "simulated revise failure"));
        }
        let entry = state
            .listings
            .entry(listing_id.to_string())
            .or_insert_with(|| listing(listing_id, "Seeded item", 10.0, 1));
        if let Some(title) = &changes.title {
            entry.title = title.clone();
        }
        if let Some(price) = changes.price {
            entry.price = price;
        }
        if let Some(quantity) = changes.quantity {
            entry.quantity = quantity;
        }
        Ok(Vec::new())
    }

    async fn get_listing(
        &self,
        _token: Option<&str>,
        listing_id: &str,
    ) -> Result<MarketplaceListing, MarketplaceError> {
        self.record("GetItem", Some(listing_id))?;
        let state = self.state.lock().unwrap();
        state
            .listings
            .get(listing_id)
            .cloned()
            .ok_or_else(|| MarketplaceError::NotFound(listing_id.to_string()))
    }

    async fn search_listings(
        &self,
        _criteria: &SearchCriteria,
    ) -> Result<Vec<SearchHit>, MarketplaceError> {
        self.record("findItemsAdvanced", None)?;
        Ok(self.state.lock().unwrap().search_hits.clone())
    }

    async fn end_listing(
        &self,
        _token: Option<&str>,
        listing_id: &str,
    ) -> Result<(), MarketplaceError> {
        self.record("EndItem", Some(listing_id))?;
        let mut state = self.state.lock().unwrap();
        if state.end_fails {
            return Err(api_error("EndItem", "listing cannot be ended"));
        }
        state.listings.remove(listing_id);
        Ok(())
    }

    async fn relist_listing(
        &self,
        _token: Option<&str>,
        listing_id: &str,
    ) -> Result<CreatedListing, MarketplaceError> {
        self.record("RelistItem", Some(listing_id))?;
        let mut state = self.state.lock().unwrap();
        let id = Self::mint(&mut state);
        let mut relisted = state
            .listings
            .remove(listing_id)
            .unwrap_or_else(|| listing(listing_id, "Relisted item", 10.0, 1));
        relisted.listing_id = id.clone();
        state.listings.insert(id.clone(), relisted);
        Ok(CreatedListing {
            listing_url: format!("https://www.sandbox.ebay.com/itm/{id}"),
            fees: Vec::new(),
            listing_id: id,
        })
    }

    async fn listing_stats(
        &self,
        _token: Option<&str>,
        listing_id: &str,
    ) -> Result<ListingStats, MarketplaceError> {
        self.record("GetItemStats", Some(listing_id))?;
        let state = self.state.lock().unwrap();
        let found = state
            .listings
            .get(listing_id)
            .ok_or_else(|| MarketplaceError::NotFound(listing_id.to_string()))?;
        Ok(ListingStats {
            view_count: found.views,
            watch_count: found.watchers,
            question_count: found.questions,
            bid_count: found.bids,
            conversion_rate: found.conversion_rate,
        })
    }

    async fn suggest_categories(
        &self,
        _token: Option<&str>,
        title: &str,
    ) -> Result<Vec<CategorySuggestion>, MarketplaceError> {
        self.record("GetSuggestedCategories", None)?;
        Ok(vec![CategorySuggestion {
            category_id: "625".into(),
            category_name: "Film Cameras".into(),
            category_path: vec!["Cameras & Photo".into(), "Film Cameras".into()],
            confidence: if title.to_lowercase().contains("camera") { 80.0 } else { 10.0 },
        }])
    }
}
