use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;
use thiserror::Error;

pub const MAX_TITLE_CHARS: usize = 80;
pub const MAX_IMAGES: usize = 12;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ListingStatus {
    Draft,
    #[default]
    Active,
    Sold,
    Ended,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Draft => "draft",
            ListingStatus::Active => "active",
            ListingStatus::Sold => "sold",
            ListingStatus::Ended => "ended",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
pub enum ItemCondition {
    #[default]
    #[serde(rename = "New")]
    New,
    #[serde(rename = "Like New")]
    LikeNew,
    #[serde(rename = "Very Good")]
    VeryGood,
    #[serde(rename = "Good")]
    Good,
    #[serde(rename = "Acceptable")]
    Acceptable,
    #[serde(rename = "For parts or not working")]
    ForParts,
}

impl ItemCondition {
    pub fn label(&self) -> &'static str {
        match self {
            ItemCondition::New => "New",
            ItemCondition::LikeNew => "Like New",
            ItemCondition::VeryGood => "Very Good",
            ItemCondition::Good => "Good",
            ItemCondition::Acceptable => "Acceptable",
            ItemCondition::ForParts => "For parts or not working",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShippingOption {
    pub service: String,
    pub cost: f64,
    #[serde(default)]
    pub estimated_days: u32,
    #[serde(default)]
    pub free_shipping: bool,
}

/// Every field a new listing can carry. Unknown fields are rejected at deserialization.
///
/// `quantity` defaults to 1 and `condition` to `New` when omitted; an explicit zero
/// quantity is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListingDraft {
    pub title: String,
    pub description: String,
    pub price: f64,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    pub category_id: String,
    #[serde(default)]
    pub condition: ItemCondition,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub item_specifics: BTreeMap<String, String>,
    #[serde(default)]
    pub shipping_options: Vec<ShippingOption>,
}

fn default_quantity() -> i64 {
    1
}

impl ListingDraft {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_title(&self.title)?;
        check_description(&self.description)?;
        check_price(self.price)?;
        check_quantity(self.quantity)?;
        if self.category_id.trim().is_empty() {
            return Err(ValidationError::Category);
        }
        check_images(&self.images)?;
        check_shipping(&self.shipping_options)
    }
}

/// A partial update. Only the fields present are sent to the marketplace and written locally.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListingChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub quantity: Option<i64>,
    pub images: Option<Vec<String>>,
    pub item_specifics: Option<BTreeMap<String, String>>,
    pub shipping_options: Option<Vec<ShippingOption>>,
}

impl ListingChanges {
    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }

    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.title.is_some() {
            fields.push("title");
        }
        if self.description.is_some() {
            fields.push("description");
        }
        if self.price.is_some() {
            fields.push("price");
        }
        if self.quantity.is_some() {
            fields.push("quantity");
        }
        if self.images.is_some() {
            fields.push("images");
        }
        if self.item_specifics.is_some() {
            fields.push("item_specifics");
        }
        if self.shipping_options.is_some() {
            fields.push("shipping_options");
        }
        fields
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.is_empty() {
            return Err(ValidationError::EmptyUpdate);
        }
        if let Some(title) = &self.title {
            check_title(title)?;
        }
        if let Some(description) = &self.description {
            check_description(description)?;
        }
        if let Some(price) = self.price {
            check_price(price)?;
        }
        if let Some(quantity) = self.quantity {
            check_quantity(quantity)?;
        }
        if let Some(images) = &self.images {
            check_images(images)?;
        }
        if let Some(options) = &self.shipping_options {
            check_shipping(options)?;
        }
        Ok(())
    }

    pub fn apply_to(&self, draft: &mut ListingDraft) {
        if let Some(title) = &self.title {
            draft.title = title.clone();
        }
        if let Some(description) = &self.description {
            draft.description = description.clone();
        }
        if let Some(price) = self.price {
            draft.price = price;
        }
        if let Some(quantity) = self.quantity {
            draft.quantity = quantity;
        }
        if let Some(images) = &self.images {
            draft.images = images.clone();
        }
        if let Some(specifics) = &self.item_specifics {
            draft.item_specifics = specifics.clone();
        }
        if let Some(options) = &self.shipping_options {
            draft.shipping_options = options.clone();
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("title must be between 1 and 80 characters")]
    Title,
    #[error("description must not be empty")]
    Description,
    #[error("price must be a number greater than 0")]
    Price,
    #[error("quantity must be 0 or more")]
    Quantity,
    #[error("category_id must not be empty")]
    Category,
    #[error("at most 12 images are allowed")]
    TooManyImages,
    #[error("image `{0}` is not an http(s) url")]
    ImageUrl(String),
    #[error("shipping cost for `{0}` must be 0 or more")]
    ShippingCost(String),
    #[error("no fields to update")]
    EmptyUpdate,
    #[error("listing_ids must not be empty")]
    NoListingIds,
    #[error("`update` requires a `data` change set")]
    MissingUpdateData,
    #[error("date range start is after its end")]
    DateRange,
}

fn check_title(title: &str) -> Result<(), ValidationError> {
    let chars = title.trim().chars().count();
    if chars == 0 || title.chars().count() > MAX_TITLE_CHARS {
        return Err(ValidationError::Title);
    }
    Ok(())
}

fn check_description(description: &str) -> Result<(), ValidationError> {
    if description.trim().is_empty() {
        return Err(ValidationError::Description);
    }
    Ok(())
}

fn check_price(price: f64) -> Result<(), ValidationError> {
    if !price.is_finite() || price <= 0.0 {
        return Err(ValidationError::Price);
    }
    Ok(())
}

fn check_quantity(quantity: i64) -> Result<(), ValidationError> {
    if quantity < 0 {
        return Err(ValidationError::Quantity);
    }
    Ok(())
}

fn check_images(images: &[String]) -> Result<(), ValidationError> {
    if images.len() > MAX_IMAGES {
        return Err(ValidationError::TooManyImages);
    }
    for url in images {
        let lower = url.trim().to_ascii_lowercase();
        if !(lower.starts_with("https://") || lower.starts_with("http://")) {
            return Err(ValidationError::ImageUrl(url.clone()));
        }
    }
    Ok(())
}

fn check_shipping(options: &[ShippingOption]) -> Result<(), ValidationError> {
    for option in options {
        if !option.cost.is_finite() || option.cost < 0.0 {
            return Err(ValidationError::ShippingCost(option.service.clone()));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchCriteria {
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub status: Option<ListingStatus>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub date_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_to: Option<DateTime<Utc>>,
}

impl SearchCriteria {
    pub fn keyword(&self) -> Option<&str> {
        self.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BulkOperationKind {
    Update,
    Delete,
    Relist,
}

impl BulkOperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkOperationKind::Update => "update",
            BulkOperationKind::Delete => "delete",
            BulkOperationKind::Relist => "relist",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BulkOperationRequest {
    pub operation: BulkOperationKind,
    pub listing_ids: Vec<String>,
    #[serde(default)]
    pub data: Option<ListingChanges>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Sales,
    Performance,
    Inventory,
    Analytics,
}

/// Inclusive calendar-day window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportFilters {
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub status: Option<ListingStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportRequest {
    pub report_type: ReportType,
    #[serde(default)]
    pub date_range: Option<DateRange>,
    #[serde(default)]
    pub filters: Option<ReportFilters>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentQueryRequest {
    pub query: String,
    #[serde(default)]
    pub context: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategorySuggestion {
    pub category_id: String,
    pub category_name: String,
    pub category_path: Vec<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateRequest {
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    pub template: ListingDraft,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FromTemplateRequest {
    #[serde(default)]
    pub overrides: Option<ListingChanges>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialUpdate {
    pub ebay_token: String,
    #[serde(default)]
    pub ebay_user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterUserRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
