use crate::db::{ListingRow, NewAnalytics, Store, StoreError, TemplateRow, UserRow};
use crate::ebay::{
    ListingFee, ListingStats, MarketplaceApi, MarketplaceError, MarketplaceListing, SearchHit,
    mapping::category_query_with_description,
};
use crate::models::{
    CategorySuggestion, CredentialUpdate, ListingChanges, ListingDraft, ListingStatus,
    MAX_IMAGES, MAX_TITLE_CHARS, SearchCriteria, TemplateRequest, ValidationError,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Competitors priced more than this far below us make the listing uncompetitive.
const COMPETITIVE_MARGIN: f64 = 1.1;
const SHORT_TITLE_CHARS: usize = 50;
const MIN_IMAGES: usize = 3;
const SHORT_DESCRIPTION_CHARS: usize = 100;
const MAX_KEYWORDS: usize = 10;
const COMPETITOR_QUERY_WORDS: usize = 5;

const STOPWORDS: &[&str] = &[
    "and", "the", "for", "with", "from", "this", "that", "are", "was", "has", "have", "you",
    "your", "our", "not", "but", "all", "any", "can", "will", "its", "into", "very", "new",
];

#[derive(Debug, Error)]
#[error("{operation} failed: {message}")]
pub struct ServiceError {
    operation: &'static str,
    message: String,
    kind: ServiceErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    InvalidInput,
    NotFound,
    Marketplace,
    Storage,
    Agent,
    Internal,
}

impl ServiceError {
    pub fn new(operation: &'static str, kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
            kind,
        }
    }

    pub fn invalid_input(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(operation, ServiceErrorKind::InvalidInput, message)
    }

    pub fn not_found(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(operation, ServiceErrorKind::NotFound, message)
    }

    pub fn internal(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(operation, ServiceErrorKind::Internal, message)
    }

    pub fn marketplace(operation: &'static str, err: MarketplaceError) -> Self {
        let kind = match &err {
            MarketplaceError::NotFound(_) => ServiceErrorKind::NotFound,
            MarketplaceError::MissingToken => ServiceErrorKind::InvalidInput,
            _ => ServiceErrorKind::Marketplace,
        };
        Self::new(operation, kind, err.to_string())
    }

    pub fn storage(operation: &'static str, err: StoreError) -> Self {
        let kind = match &err {
            StoreError::Conflict(_) => ServiceErrorKind::InvalidInput,
            StoreError::Database(_) => ServiceErrorKind::Storage,
        };
        Self::new(operation, kind, err.to_string())
    }

    pub fn validation(operation: &'static str, err: ValidationError) -> Self {
        Self::invalid_input(operation, err.to_string())
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn kind(&self) -> ServiceErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateOutcome {
    pub listing_id: String,
    pub listing_url: String,
    pub fees: Vec<ListingFee>,
    pub listing: ListingRow,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub listing_id: String,
    pub updated_fields: Vec<&'static str>,
    pub fees: Vec<ListingFee>,
    pub local: Option<ListingRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub listing_id: String,
    pub removed_local: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelistOutcome {
    pub previous_listing_id: String,
    pub listing_id: String,
    pub listing_url: String,
    pub fees: Vec<ListingFee>,
}

/// One search result, tagged with where it came from. Both sources are kept even
/// when they describe the same listing.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum SearchEntry {
    Marketplace(SearchHit),
    Local(ListingRow),
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceCompetitiveness {
    pub competitive: bool,
    pub price: f64,
    pub suggested_price: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompetitorAnalysis {
    pub total_competitors: usize,
    pub average_price: f64,
    pub lowest_price: Option<f64>,
    pub highest_price: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingAnalysis {
    pub listing_id: String,
    pub views: i64,
    pub watchers: i64,
    pub conversion_rate: f64,
    pub price_competitiveness: PriceCompetitiveness,
    pub optimization_suggestions: Vec<String>,
    pub competitor_analysis: CompetitorAnalysis,
}

#[derive(Debug, Clone, Serialize)]
pub struct PricingSuggestion {
    pub current_price: f64,
    pub suggested_price: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Optimizations {
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub pricing: PricingSuggestion,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizeOutcome {
    pub listing_id: String,
    pub optimizations: Optimizations,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied: Option<bool>,
}

/// Every listing operation. REST handlers and tools both go through here.
#[derive(Clone)]
pub struct ListingManager {
    store: Store,
    marketplace: Arc<dyn MarketplaceApi>,
}

impl ListingManager {
    pub fn new(store: Store, marketplace: Arc<dyn MarketplaceApi>) -> Self {
        Self { store, marketplace }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn user(&self, user_id: &str) -> Result<UserRow, ServiceError> {
        self.store
            .get_user(user_id)
            .await
            .map_err(|err| ServiceError::storage("load_user", err))?
            .ok_or_else(|| ServiceError::not_found("load_user", format!("user {user_id} not found")))
    }

    pub async fn create_listing(
        &self,
        user: &UserRow,
        draft: &ListingDraft,
    ) -> Result<CreateOutcome, ServiceError> {
        const OP: &str = "create_listing";
        draft.validate().map_err(|err| ServiceError::validation(OP, err))?;

        let created = self
            .marketplace
            .create_listing(user.ebay_token.as_deref(), draft)
            .await
            .map_err(|err| ServiceError::marketplace(OP, err))?;

        let listing = self
            .store
            .insert_listing(
                &user.id,
                Some(&created.listing_id),
                draft,
                ListingStatus::Active,
                Some(Utc::now()),
            )
            .await
            .map_err(|err| ServiceError::storage(OP, err))?;

        info!(
            target = "listing.service",
            user_id = %user.id,
            listing_id = %created.listing_id,
            "listing created"
        );
        Ok(CreateOutcome {
            listing_id: created.listing_id,
            listing_url: created.listing_url,
            fees: created.fees,
            listing,
        })
    }

    pub async fn get_listing(
        &self,
        user: &UserRow,
        listing_id: &str,
    ) -> Result<MarketplaceListing, ServiceError> {
        let listing_id = required_id("get_listing", listing_id)?;
        self.marketplace
            .get_listing(user.ebay_token.as_deref(), listing_id)
            .await
            .map_err(|err| ServiceError::marketplace("get_listing", err))
    }

    pub async fn update_listing(
        &self,
        user: &UserRow,
        listing_id: &str,
        changes: &ListingChanges,
    ) -> Result<UpdateOutcome, ServiceError> {
        const OP: &str = "update_listing";
        let listing_id = required_id(OP, listing_id)?;
        changes.validate().map_err(|err| ServiceError::validation(OP, err))?;
        let token = user.ebay_token.as_deref();

        self.marketplace
            .get_listing(token, listing_id)
            .await
            .map_err(|err| ServiceError::marketplace(OP, err))?;
        let fees = self
            .marketplace
            .update_listing(token, listing_id, changes)
            .await
            .map_err(|err| ServiceError::marketplace(OP, err))?;
        let local = self
            .store
            .update_listing(listing_id, changes)
            .await
            .map_err(|err| ServiceError::storage(OP, err))?;

        Ok(UpdateOutcome {
            listing_id: listing_id.to_string(),
            updated_fields: changes.changed_fields(),
            fees,
            local,
        })
    }

    pub async fn delete_listing(
        &self,
        user: &UserRow,
        listing_id: &str,
    ) -> Result<DeleteOutcome, ServiceError> {
        const OP: &str = "delete_listing";
        let listing_id = required_id(OP, listing_id)?;
        self.marketplace
            .end_listing(user.ebay_token.as_deref(), listing_id)
            .await
            .map_err(|err| ServiceError::marketplace(OP, err))?;
        let removed_local = self
            .store
            .delete_listing(listing_id)
            .await
            .map_err(|err| ServiceError::storage(OP, err))?;
        info!(target = "listing.service", listing_id, removed_local, "listing ended");
        Ok(DeleteOutcome {
            listing_id: listing_id.to_string(),
            removed_local,
        })
    }

    pub async fn relist_listing(
        &self,
        user: &UserRow,
        listing_id: &str,
    ) -> Result<RelistOutcome, ServiceError> {
        const OP: &str = "relist_listing";
        let listing_id = required_id(OP, listing_id)?;
        let relisted = self
            .marketplace
            .relist_listing(user.ebay_token.as_deref(), listing_id)
            .await
            .map_err(|err| ServiceError::marketplace(OP, err))?;
        self.store
            .mark_relisted(listing_id, &relisted.listing_id)
            .await
            .map_err(|err| ServiceError::storage(OP, err))?;
        Ok(RelistOutcome {
            previous_listing_id: listing_id.to_string(),
            listing_id: relisted.listing_id,
            listing_url: relisted.listing_url,
            fees: relisted.fees,
        })
    }

    /// Marketplace hits followed by local rows. Overlapping listings appear twice.
    pub async fn search_listings(
        &self,
        user: &UserRow,
        criteria: &SearchCriteria,
    ) -> Result<Vec<SearchEntry>, ServiceError> {
        const OP: &str = "search_listings";
        let remote = self
            .marketplace
            .search_listings(criteria)
            .await
            .map_err(|err| ServiceError::marketplace(OP, err))?;
        let local = self
            .store
            .search_listings(criteria, Some(&user.id))
            .await
            .map_err(|err| ServiceError::storage(OP, err))?;

        let mut merged = Vec::with_capacity(remote.len() + local.len());
        merged.extend(remote.into_iter().map(SearchEntry::Marketplace));
        merged.extend(local.into_iter().map(SearchEntry::Local));
        Ok(merged)
    }

    pub async fn analyze_listing(
        &self,
        user: &UserRow,
        listing_id: &str,
    ) -> Result<ListingAnalysis, ServiceError> {
        const OP: &str = "analyze_listing";
        let listing_id = required_id(OP, listing_id)?;
        let token = user.ebay_token.as_deref();
        let listing = self
            .marketplace
            .get_listing(token, listing_id)
            .await
            .map_err(|err| ServiceError::marketplace(OP, err))?;
        let stats = self
            .marketplace
            .listing_stats(token, listing_id)
            .await
            .map_err(|err| ServiceError::marketplace(OP, err))?;

        let competitors = self.competitor_analysis(&listing).await;
        let price_competitiveness = price_competitiveness(listing.price, &competitors);
        self.record_snapshot(listing_id, &listing, &stats).await;

        Ok(ListingAnalysis {
            listing_id: listing_id.to_string(),
            views: stats.view_count,
            watchers: stats.watch_count,
            conversion_rate: stats.conversion_rate,
            price_competitiveness,
            optimization_suggestions: suggestions(&listing),
            competitor_analysis: competitors,
        })
    }

    pub async fn optimize_listing(
        &self,
        user: &UserRow,
        listing_id: &str,
        apply: bool,
    ) -> Result<OptimizeOutcome, ServiceError> {
        const OP: &str = "optimize_listing";
        let listing_id = required_id(OP, listing_id)?;
        let listing = self
            .marketplace
            .get_listing(user.ebay_token.as_deref(), listing_id)
            .await
            .map_err(|err| ServiceError::marketplace(OP, err))?;

        let optimizations = Optimizations {
            title: optimize_title(&listing.title),
            description: optimize_description(&listing.description),
            keywords: extract_keywords(&listing.title, &listing.description),
            pricing: pricing_suggestion(listing.price),
            images: image_suggestions(&listing.images),
        };

        let applied = if apply {
            let changes = ListingChanges {
                title: Some(optimizations.title.clone()),
                description: Some(optimizations.description.clone()),
                price: Some(optimizations.pricing.suggested_price),
                ..Default::default()
            };
            match self.update_listing(user, listing_id, &changes).await {
                Ok(_) => Some(true),
                Err(err) => {
                    warn!(target = "listing.service", listing_id, error = %err, "optimization not applied");
                    Some(false)
                }
            }
        } else {
            None
        };

        Ok(OptimizeOutcome {
            listing_id: listing_id.to_string(),
            optimizations,
            applied,
        })
    }

    /// Category suggestions for a title. Leading words of `description` widen the query
    /// when the title leaves room under the marketplace's query limit.
    pub async fn suggest_categories(
        &self,
        user: &UserRow,
        title: &str,
        description: Option<&str>,
    ) -> Result<Vec<CategorySuggestion>, ServiceError> {
        const OP: &str = "suggest_categories";
        if title.trim().is_empty() {
            return Err(ServiceError::invalid_input(OP, "title must not be empty"));
        }
        let query = category_query_with_description(title, description);
        self.marketplace
            .suggest_categories(user.ebay_token.as_deref(), &query)
            .await
            .map_err(|err| ServiceError::marketplace(OP, err))
    }

    pub async fn save_template(
        &self,
        user: &UserRow,
        request: &TemplateRequest,
    ) -> Result<TemplateRow, ServiceError> {
        const OP: &str = "save_template";
        if request.name.trim().is_empty() {
            return Err(ServiceError::invalid_input(OP, "template name must not be empty"));
        }
        request
            .template
            .validate()
            .map_err(|err| ServiceError::validation(OP, err))?;
        self.store
            .save_template(&user.id, &request.name, &request.template, request.is_default)
            .await
            .map_err(|err| ServiceError::storage(OP, err))
    }

    pub async fn list_templates(&self, user: &UserRow) -> Result<Vec<TemplateRow>, ServiceError> {
        self.store
            .list_templates(&user.id)
            .await
            .map_err(|err| ServiceError::storage("list_templates", err))
    }

    pub async fn delete_template(&self, user: &UserRow, template_id: &str) -> Result<(), ServiceError> {
        const OP: &str = "delete_template";
        let removed = self
            .store
            .delete_template(&user.id, template_id)
            .await
            .map_err(|err| ServiceError::storage(OP, err))?;
        if !removed {
            return Err(ServiceError::not_found(OP, format!("template {template_id} not found")));
        }
        Ok(())
    }

    pub async fn create_from_template(
        &self,
        user: &UserRow,
        template_id: &str,
        overrides: Option<&ListingChanges>,
    ) -> Result<CreateOutcome, ServiceError> {
        const OP: &str = "create_from_template";
        let template = self
            .store
            .get_template(&user.id, template_id)
            .await
            .map_err(|err| ServiceError::storage(OP, err))?
            .ok_or_else(|| ServiceError::not_found(OP, format!("template {template_id} not found")))?;
        let mut draft = template.template_data.0;
        if let Some(overrides) = overrides {
            overrides.apply_to(&mut draft);
        }
        self.create_listing(user, &draft).await
    }

    pub async fn register_user(&self, email: &str) -> Result<UserRow, ServiceError> {
        const OP: &str = "register_user";
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(ServiceError::invalid_input(OP, "a valid email is required"));
        }
        self.store
            .create_user(email)
            .await
            .map_err(|err| ServiceError::storage(OP, err))
    }

    pub async fn update_credential(
        &self,
        user: &UserRow,
        update: &CredentialUpdate,
    ) -> Result<UserRow, ServiceError> {
        const OP: &str = "update_credential";
        if update.ebay_token.trim().is_empty() {
            return Err(ServiceError::invalid_input(OP, "ebay_token must not be empty"));
        }
        let updated = self
            .store
            .update_user_credential(&user.id, update.ebay_token.trim(), update.ebay_user_id.as_deref())
            .await
            .map_err(|err| ServiceError::storage(OP, err))?
            .ok_or_else(|| ServiceError::not_found(OP, format!("user {} not found", user.id)))?;
        info!(target = "listing.service", user_id = %user.id, "credential updated");
        Ok(updated)
    }

    pub async fn recent_agent_logs(
        &self,
        user: &UserRow,
        limit: i64,
    ) -> Result<Vec<crate::db::AgentLogRow>, ServiceError> {
        self.store
            .recent_agent_logs(&user.id, limit.clamp(1, 100))
            .await
            .map_err(|err| ServiceError::storage("recent_agent_logs", err))
    }

    /// Competitor search failures degrade to an empty analysis.
    async fn competitor_analysis(&self, listing: &MarketplaceListing) -> CompetitorAnalysis {
        let query: Vec<&str> = listing
            .title
            .split_whitespace()
            .take(COMPETITOR_QUERY_WORDS)
            .collect();
        if query.is_empty() {
            return CompetitorAnalysis::default();
        }
        let criteria = SearchCriteria {
            keyword: Some(query.join(" ")),
            category: listing.category_id.clone(),
            ..Default::default()
        };
        match self.marketplace.search_listings(&criteria).await {
            Ok(hits) => summarize_competitors(&listing.listing_id, &hits),
            Err(err) => {
                warn!(target = "listing.service", listing_id = %listing.listing_id, error = %err, "competitor search failed");
                CompetitorAnalysis::default()
            }
        }
    }

    async fn record_snapshot(&self, listing_id: &str, listing: &MarketplaceListing, stats: &ListingStats) {
        let row = match self.store.get_listing(listing_id).await {
            Ok(Some(row)) => row,
            Ok(None) => return,
            Err(err) => {
                warn!(target = "listing.service", listing_id, error = %err, "snapshot lookup failed");
                return;
            }
        };
        let snapshot = NewAnalytics {
            listing_id: row.id.clone(),
            date: Utc::now().date_naive(),
            views: stats.view_count,
            clicks: 0,
            watchers: stats.watch_count,
            questions: stats.question_count,
            sales: listing.quantity_sold,
            revenue: listing.quantity_sold as f64 * listing.price,
        };
        let saved = self.store.save_analytics(&snapshot).await;
        let counters = self
            .store
            .update_counters(&row.id, stats.view_count, stats.watch_count, listing.quantity_sold)
            .await;
        if let Err(err) = saved.map(|_| ()).and(counters) {
            warn!(target = "listing.service", listing_id, error = %err, "snapshot not recorded");
        }
    }
}

fn required_id<'a>(operation: &'static str, listing_id: &'a str) -> Result<&'a str, ServiceError> {
    let trimmed = listing_id.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::invalid_input(operation, "listing_id must not be empty"));
    }
    Ok(trimmed)
}

fn summarize_competitors(own_id: &str, hits: &[SearchHit]) -> CompetitorAnalysis {
    let prices: Vec<f64> = hits
        .iter()
        .filter(|hit| hit.listing_id != own_id && hit.price > 0.0)
        .map(|hit| hit.price)
        .collect();
    if prices.is_empty() {
        return CompetitorAnalysis::default();
    }
    CompetitorAnalysis {
        total_competitors: prices.len(),
        average_price: round_cents(prices.iter().sum::<f64>() / prices.len() as f64),
        lowest_price: prices.iter().copied().reduce(f64::min),
        highest_price: prices.iter().copied().reduce(f64::max),
    }
}

fn price_competitiveness(price: f64, competitors: &CompetitorAnalysis) -> PriceCompetitiveness {
    if competitors.total_competitors == 0 {
        return PriceCompetitiveness {
            competitive: true,
            price,
            suggested_price: price,
        };
    }
    let competitive = price <= competitors.average_price * COMPETITIVE_MARGIN;
    PriceCompetitiveness {
        competitive,
        price,
        suggested_price: if competitive {
            price
        } else {
            competitors.average_price
        },
    }
}

fn suggestions(listing: &MarketplaceListing) -> Vec<String> {
    let mut out = Vec::new();
    if listing.title.chars().count() < SHORT_TITLE_CHARS {
        out.push("Consider adding more keywords to your title".to_string());
    }
    if listing.images.len() < MIN_IMAGES {
        out.push("Add more images to increase buyer confidence".to_string());
    }
    if listing.description.chars().count() < SHORT_DESCRIPTION_CHARS {
        out.push("Expand the description with condition details and measurements".to_string());
    }
    out
}

/// Collapses whitespace and cuts at a word boundary within the title limit.
fn optimize_title(title: &str) -> String {
    let mut out = String::new();
    for word in title.split_whitespace() {
        let extra = if out.is_empty() { 0 } else { 1 };
        if out.chars().count() + extra + word.chars().count() > MAX_TITLE_CHARS {
            break;
        }
        if extra == 1 {
            out.push(' ');
        }
        out.push_str(word);
    }
    if out.is_empty() {
        title.chars().take(MAX_TITLE_CHARS).collect()
    } else {
        out
    }
}

/// Trims each line and drops repeated blank lines.
fn optimize_description(description: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in description.lines().map(str::trim) {
        if line.is_empty() && lines.last().is_none_or(|prev| prev.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

fn extract_keywords(title: &str, description: &str) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let words = title
        .split(|c: char| !c.is_alphanumeric())
        .chain(description.split(|c: char| !c.is_alphanumeric()))
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(&w.as_str()));
    for (position, word) in words.enumerate() {
        counts.entry(word).or_insert((0, position)).0 += 1;
    }
    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.0.cmp(&a.1.0).then(a.1.1.cmp(&b.1.1)));
    ranked
        .into_iter()
        .take(MAX_KEYWORDS)
        .map(|(word, _)| word)
        .collect()
}

fn pricing_suggestion(price: f64) -> PricingSuggestion {
    let whole = price.fract().abs() < f64::EPSILON;
    if whole && price > 1.0 {
        PricingSuggestion {
            current_price: price,
            suggested_price: round_cents(price - 0.01),
            rationale: "Prices just under a round number tend to convert better".to_string(),
        }
    } else {
        PricingSuggestion {
            current_price: price,
            suggested_price: price,
            rationale: "Current price already uses charm pricing".to_string(),
        }
    }
}

fn image_suggestions(images: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    if images.len() < MIN_IMAGES {
        out.push(format!("Add at least {MIN_IMAGES} images"));
    }
    if images.len() < MAX_IMAGES {
        out.push("Add more product angles".to_string());
    }
    out.push("Improve lighting".to_string());
    out
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockMarketplace;
    use serde_json::json;

    fn camera() -> ListingDraft {
        serde_json::from_value(json!({
            "title": "Vintage Camera",
            "description": "35mm rangefinder",
            "price": 49.99,
            "quantity": 1,
            "category_id": "625",
        }))
        .unwrap()
    }

    async fn setup(mock: MockMarketplace) -> (ListingManager, Arc<MockMarketplace>, UserRow) {
        let store = Store::in_memory().await;
        let user = store.create_user("seller@example.com").await.unwrap();
        let mock = Arc::new(mock);
        (ListingManager::new(store, mock.clone()), mock, user)
    }

    #[tokio::test]
    async fn create_persists_active_row_with_listed_at() {
        let (manager, mock, user) = setup(MockMarketplace::new()).await;
        let outcome = manager.create_listing(&user, &camera()).await.unwrap();
        assert!(!outcome.listing_id.is_empty());
        assert_eq!(mock.calls(), vec!["AddItem"]);

        let row = manager.store().get_listing(&outcome.listing_id).await.unwrap().unwrap();
        assert_eq!(row.status, ListingStatus::Active);
        assert!(row.listed_at.is_some());
        assert_eq!(row.title, "Vintage Camera");
        assert_eq!(row.price, 49.99);
    }

    #[tokio::test]
    async fn invalid_price_or_quantity_never_reaches_marketplace() {
        let (manager, mock, user) = setup(MockMarketplace::new()).await;
        for (price, quantity) in [(0.0, 1), (-5.0, 1), (10.0, -1)] {
            let mut draft = camera();
            draft.price = price;
            draft.quantity = quantity;
            let err = manager.create_listing(&user, &draft).await.unwrap_err();
            assert_eq!(err.kind(), ServiceErrorKind::InvalidInput);
        }
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn created_listing_reads_back_unchanged() {
        let (manager, _, user) = setup(MockMarketplace::new()).await;
        let outcome = manager.create_listing(&user, &camera()).await.unwrap();
        let fetched = manager.get_listing(&user, &outcome.listing_id).await.unwrap();
        assert_eq!(fetched.title, "Vintage Camera");
        assert_eq!(fetched.price, 49.99);
        assert_eq!(fetched.quantity, 1);
    }

    #[tokio::test]
    async fn update_revises_marketplace_then_local_row() {
        let (manager, mock, user) = setup(MockMarketplace::new()).await;
        let created = manager.create_listing(&user, &camera()).await.unwrap();
        let changes = ListingChanges {
            price: Some(44.0),
            ..Default::default()
        };
        let outcome = manager
            .update_listing(&user, &created.listing_id, &changes)
            .await
            .unwrap();
        assert_eq!(outcome.updated_fields, vec!["price"]);
        assert_eq!(outcome.local.unwrap().price, 44.0);
        let id = &created.listing_id;
        assert_eq!(
            mock.calls(),
            vec!["AddItem".to_string(), format!("GetItem:{id}"), format!("ReviseItem:{id}")]
        );
    }

    #[tokio::test]
    async fn empty_update_is_rejected_without_calls() {
        let (manager, mock, user) = setup(MockMarketplace::new()).await;
        let err = manager
            .update_listing(&user, "110", &ListingChanges::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::InvalidInput);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn unknown_listing_maps_to_not_found() {
        let (manager, _, user) = setup(MockMarketplace::new()).await;
        let err = manager.get_listing(&user, "999").await.unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::NotFound);
        assert_eq!(err.operation(), "get_listing");
    }

    #[tokio::test]
    async fn delete_ends_item_and_removes_row() {
        let (manager, _, user) = setup(MockMarketplace::new()).await;
        let created = manager.create_listing(&user, &camera()).await.unwrap();
        let outcome = manager.delete_listing(&user, &created.listing_id).await.unwrap();
        assert!(outcome.removed_local);
        assert!(manager.store().get_listing(&created.listing_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_end_keeps_local_row() {
        let (manager, _, user) = setup(MockMarketplace::new().reject_end()).await;
        let created = manager.create_listing(&user, &camera()).await.unwrap();
        let err = manager.delete_listing(&user, &created.listing_id).await.unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::Marketplace);
        assert!(manager.store().get_listing(&created.listing_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn relist_points_row_at_new_marketplace_id() {
        let (manager, _, user) = setup(MockMarketplace::new()).await;
        let created = manager.create_listing(&user, &camera()).await.unwrap();
        let outcome = manager.relist_listing(&user, &created.listing_id).await.unwrap();
        assert_ne!(outcome.listing_id, created.listing_id);
        let row = manager.store().get_listing(&outcome.listing_id).await.unwrap().unwrap();
        assert_eq!(row.id, created.listing.id);
    }

    #[tokio::test]
    async fn empty_search_concatenates_both_sources_with_duplicates() {
        let hit = SearchHit {
            listing_id: "110000000001".into(),
            title: "Vintage Camera".into(),
            price: 49.99,
            listing_url: None,
            end_time: None,
        };
        let (manager, _, user) = setup(MockMarketplace::new().with_search_hits(vec![hit])).await;
        manager.create_listing(&user, &camera()).await.unwrap();

        let results = manager
            .search_listings(&user, &SearchCriteria::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        let value = serde_json::to_value(&results).unwrap();
        assert_eq!(value[0]["source"], json!("marketplace"));
        assert_eq!(value[0]["listing_id"], json!("110000000001"));
        assert_eq!(value[1]["source"], json!("local"));
        assert_eq!(value[1]["ebay_listing_id"], json!("110000000001"));
    }

    #[tokio::test]
    async fn analysis_compares_against_competitors_and_snapshots() {
        let hits = vec![
            SearchHit {
                listing_id: "c1".into(),
                title: "Camera".into(),
                price: 30.0,
                listing_url: None,
                end_time: None,
            },
            SearchHit {
                listing_id: "c2".into(),
                title: "Camera".into(),
                price: 40.0,
                listing_url: None,
                end_time: None,
            },
        ];
        let (manager, _, user) = setup(MockMarketplace::new().with_search_hits(hits)).await;
        let created = manager.create_listing(&user, &camera()).await.unwrap();

        let analysis = manager.analyze_listing(&user, &created.listing_id).await.unwrap();
        assert_eq!(analysis.competitor_analysis.total_competitors, 2);
        assert_eq!(analysis.competitor_analysis.average_price, 35.0);
        assert!(!analysis.price_competitiveness.competitive);
        assert_eq!(analysis.price_competitiveness.suggested_price, 35.0);
        assert!(
            analysis
                .optimization_suggestions
                .iter()
                .any(|s| s.contains("title"))
        );

        let today = Utc::now().date_naive();
        let snapshots = manager
            .store()
            .analytics_between(&user.id, today, today)
            .await
            .unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].views, 40);
    }

    #[tokio::test]
    async fn optimize_can_apply_through_update() {
        let (manager, _, user) = setup(MockMarketplace::new()).await;
        let mut draft = camera();
        draft.price = 50.0;
        draft.title = "  Vintage   Camera  ".into();
        let created = manager.create_listing(&user, &draft).await.unwrap();

        let outcome = manager
            .optimize_listing(&user, &created.listing_id, true)
            .await
            .unwrap();
        assert_eq!(outcome.optimizations.title, "Vintage Camera");
        assert_eq!(outcome.optimizations.pricing.suggested_price, 49.99);
        assert_eq!(outcome.applied, Some(true));
        let row = manager.store().get_listing(&created.listing_id).await.unwrap().unwrap();
        assert_eq!(row.price, 49.99);
    }

    #[tokio::test]
    async fn template_overrides_apply_before_create() {
        let (manager, _, user) = setup(MockMarketplace::new()).await;
        let template = manager
            .save_template(
                &user,
                &TemplateRequest {
                    name: "cameras".into(),
                    is_default: true,
                    template: camera(),
                },
            )
            .await
            .unwrap();
        let overrides = ListingChanges {
            title: Some("Leica M3".into()),
            ..Default::default()
        };
        let outcome = manager
            .create_from_template(&user, &template.id, Some(&overrides))
            .await
            .unwrap();
        assert_eq!(outcome.listing.title, "Leica M3");
        assert_eq!(outcome.listing.category_id, "625");

        let err = manager
            .create_from_template(&user, "missing", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::NotFound);
    }

    #[tokio::test]
    async fn credentials_and_registration() {
        let (manager, _, user) = setup(MockMarketplace::new()).await;
        let updated = manager
            .update_credential(
                &user,
                &CredentialUpdate {
                    ebay_token: "fresh".into(),
                    ebay_user_id: Some("seller_1".into()),
                },
            )
            .await
            .unwrap();
        assert!(updated.has_credential());

        let err = manager.register_user("not-an-email").await.unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::InvalidInput);
        let err = manager.register_user("seller@example.com").await.unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::InvalidInput);
    }

    #[test]
    fn keywords_rank_by_frequency_then_position() {
        let keywords = extract_keywords(
            "Vintage Leica Camera",
            "A vintage camera for the collector. Camera works.",
        );
        assert_eq!(keywords[0], "camera");
        assert_eq!(keywords[1], "vintage");
        assert!(!keywords.contains(&"the".to_string()));
    }

    #[test]
    fn description_cleanup_drops_blank_runs() {
        assert_eq!(
            optimize_description("  Line one  \n\n\n  Line two\n\n"),
            "Line one\n\nLine two"
        );
    }

    #[test]
    fn long_titles_cut_at_word_boundary() {
        let title = "word ".repeat(30);
        let optimized = optimize_title(&title);
        assert!(optimized.chars().count() <= MAX_TITLE_CHARS);
        assert!(!optimized.ends_with(' '));
    }
}
