#![allow(non_snake_case)]

use crate::ebay::MarketplaceError;
use crate::ebay::config::TradingConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

const OPERATION: &str = "findItemsAdvanced";
const ENTRIES_PER_PAGE: u32 = 100;

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct FindItemsAdvancedRequest {
    pub keywords: Option<String>,
    pub categoryId: Option<String>,
    pub outputSelector: Vec<&'static str>,
    pub paginationInput: PaginationInput,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginationInput {
    pub entriesPerPage: u32,
    pub pageNumber: u32,
}

impl FindItemsAdvancedRequest {
    pub fn new(keywords: Option<&str>, category_id: Option<&str>) -> Self {
        Self {
            keywords: keywords.map(str::to_string),
            categoryId: category_id.map(str::to_string),
            outputSelector: vec!["ItemID", "Title", "CurrentPrice", "ListingInfo"],
            paginationInput: PaginationInput {
                entriesPerPage: ENTRIES_PER_PAGE,
                pageNumber: 1,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FindItemsAdvancedResponse {
    #[serde(default)]
    pub ack: Option<String>,
    #[serde(default)]
    pub errorMessage: Option<FindingErrorMessage>,
    #[serde(default)]
    pub searchResult: Option<SearchResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FindingErrorMessage {
    #[serde(default)]
    pub error: Vec<FindingError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FindingError {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub item: Vec<SearchItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchItem {
    pub itemId: Option<String>,
    pub title: Option<String>,
    pub sellingStatus: Option<FindingSellingStatus>,
    pub viewItemURL: Option<String>,
    pub listingInfo: Option<ListingInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FindingSellingStatus {
    pub currentPrice: Option<FindingAmount>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FindingAmount {
    #[serde(default)]
    pub value: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingInfo {
    pub endTime: Option<chrono::DateTime<chrono::Utc>>,
}

/// Finding calls authenticate with the application id only; no user token is involved.
pub async fn find_items_advanced(
    http: &Client,
    config: &TradingConfig,
    request: &FindItemsAdvancedRequest,
) -> Result<Vec<SearchItem>, MarketplaceError> {
    let response = http
        .post(&config.finding_url)
        .header("X-EBAY-SOA-OPERATION-NAME", OPERATION)
        .header("X-EBAY-SOA-SECURITY-APPNAME", &config.app_id)
        .header("X-EBAY-SOA-REQUEST-DATA-FORMAT", "JSON")
        .header("X-EBAY-SOA-RESPONSE-DATA-FORMAT", "JSON")
        .json(request)
        .send()
        .await
        .map_err(|err| MarketplaceError::Request(err.to_string()))?;

    if !response.status().is_success() {
        return Err(MarketplaceError::Request(format!(
            "{OPERATION}: HTTP {}",
            response.status()
        )));
    }

    let payload: FindItemsAdvancedResponse = response
        .json()
        .await
        .map_err(|err| MarketplaceError::Decode(err.to_string()))?;

    match payload.ack.as_deref() {
        Some("Success") | Some("Warning") => Ok(payload
            .searchResult
            .map(|result| result.item)
            .unwrap_or_default()),
        _ => {
            let messages: Vec<String> = payload
                .errorMessage
                .unwrap_or_default()
                .error
                .into_iter()
                .filter_map(|e| e.message)
                .collect();
            Err(MarketplaceError::Api {
                call: OPERATION,
                messages: if messages.is_empty() {
                    vec!["Unknown error".to_string()]
                } else {
                    messages
                },
            })
        }
    }
}
