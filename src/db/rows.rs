use crate::models::{ListingDraft, ListingStatus, ShippingOption};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::types::Json;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub ebay_user_id: Option<String>,
    #[serde(skip_serializing)]
    pub ebay_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    pub fn has_credential(&self) -> bool {
        self.ebay_token.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ListingRow {
    pub id: String,
    pub ebay_listing_id: Option<String>,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub quantity: i64,
    pub category_id: String,
    pub condition: String,
    pub status: ListingStatus,
    pub images: Json<Vec<String>>,
    pub item_specifics: Json<BTreeMap<String, String>>,
    pub shipping_options: Json<Vec<ShippingOption>>,
    pub views: i64,
    pub watchers: i64,
    pub sold_quantity: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub listed_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

impl ListingRow {
    /// Id the marketplace knows this row by, falling back to the local id.
    pub fn marketplace_id(&self) -> &str {
        self.ebay_listing_id.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TemplateRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub template_data: Json<ListingDraft>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AnalyticsRow {
    pub id: String,
    pub listing_id: String,
    pub date: NaiveDate,
    pub views: i64,
    pub clicks: i64,
    pub watchers: i64,
    pub questions: i64,
    pub sales: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Default)]
pub struct NewAnalytics {
    pub listing_id: String,
    pub date: NaiveDate,
    pub views: i64,
    pub clicks: i64,
    pub watchers: i64,
    pub questions: i64,
    pub sales: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AgentLogRow {
    pub id: String,
    pub user_id: Option<String>,
    pub action: String,
    pub input_data: Json<Value>,
    pub output_data: Json<Value>,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAgentLog<'a> {
    pub user_id: Option<&'a str>,
    pub action: &'a str,
    pub input: &'a Value,
    pub output: &'a Value,
    pub success: bool,
    pub error: Option<&'a str>,
}
