//! Trading API calls (`AddItem`, `ReviseItem`, `GetItem`, `EndItem`, `RelistItem`,
//! `GetSuggestedCategories`) and the transport that checks each response's `Ack`.
#![allow(non_snake_case)]

use crate::ebay::MarketplaceError;
use crate::ebay::config::TradingConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use serde_with::skip_serializing_none;
use tracing::debug;

/// eBay returns error code 17 for an item id it does not know.
const ITEM_NOT_FOUND_CODE: &str = "17";

#[derive(Debug, Clone, Serialize)]
pub struct ItemEnvelope {
    pub Item: ItemPayload,
}

/// Item block shared by `AddItem`, `ReviseItem` and `RelistItem`; absent fields are left untouched.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize)]
pub struct ItemPayload {
    pub ItemID: Option<String>,
    pub Title: Option<String>,
    pub Description: Option<String>,
    pub PrimaryCategory: Option<CategoryRef>,
    pub StartPrice: Option<f64>,
    pub Quantity: Option<i64>,
    pub ConditionID: Option<u32>,
    pub Country: Option<&'static str>,
    pub Currency: Option<&'static str>,
    pub DispatchTimeMax: Option<u32>,
    pub ListingDuration: Option<&'static str>,
    pub ListingType: Option<&'static str>,
    pub PictureDetails: Option<PictureDetails>,
    pub ReturnPolicy: Option<ReturnPolicy>,
    pub ShippingDetails: Option<ShippingDetails>,
    pub ItemSpecifics: Option<ItemSpecifics>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryRef {
    pub CategoryID: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PictureDetails {
    #[serde(default)]
    pub PictureURL: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReturnPolicy {
    pub ReturnsAcceptedOption: &'static str,
    pub RefundOption: &'static str,
    pub ReturnsWithinOption: &'static str,
    pub ShippingCostPaidByOption: &'static str,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ShippingDetails {
    pub ShippingType: &'static str,
    pub ShippingServiceOptions: Vec<ShippingServiceOption>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ShippingServiceOption {
    pub ShippingService: String,
    pub ShippingServiceCost: f64,
    pub ShippingServicePriority: u32,
    pub FreeShipping: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ItemSpecifics {
    pub NameValueList: Vec<NameValue>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NameValue {
    pub Name: String,
    pub Value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetItemRequest<'a> {
    pub ItemID: &'a str,
    pub IncludeWatchCount: bool,
    pub DetailLevel: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndItemRequest<'a> {
    pub ItemID: &'a str,
    pub EndingReason: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuggestedCategoriesRequest {
    pub Query: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddItemResponse {
    pub ItemID: String,
    #[serde(default)]
    pub Fees: Option<Fees>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fees {
    #[serde(default)]
    pub Fee: Vec<FeeEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeeEntry {
    pub Name: String,
    #[serde(default)]
    pub Fee: Option<Amount>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Amount {
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub currencyID: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviseItemResponse {
    #[serde(default)]
    pub Fees: Option<Fees>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetItemResponse {
    pub Item: ItemDetails,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemDetails {
    pub ItemID: Option<String>,
    pub Title: Option<String>,
    pub Description: Option<String>,
    pub StartPrice: Option<Amount>,
    pub Quantity: Option<i64>,
    pub PrimaryCategory: Option<CategoryRef>,
    pub ConditionDisplayName: Option<String>,
    pub PictureDetails: Option<PictureDetails>,
    pub SellingStatus: Option<SellingStatus>,
    pub HitCount: Option<i64>,
    pub WatchCount: Option<i64>,
    pub QuestionCount: Option<i64>,
    pub BidCount: Option<i64>,
    pub ListingDetails: Option<ListingDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SellingStatus {
    pub ListingStatus: Option<String>,
    pub QuantitySold: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingDetails {
    pub StartTime: Option<chrono::DateTime<chrono::Utc>>,
    pub EndTime: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuggestedCategoriesResponse {
    #[serde(default)]
    pub SuggestedCategoryArray: Option<SuggestedCategoryArray>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SuggestedCategoryArray {
    #[serde(default)]
    pub SuggestedCategory: Vec<SuggestedCategory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuggestedCategory {
    pub Category: SuggestedCategoryInfo,
    #[serde(default)]
    pub PercentItemsFound: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SuggestedCategoryInfo {
    pub CategoryID: Option<String>,
    pub CategoryName: Option<String>,
    #[serde(default)]
    pub CategoryParentName: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AckHeader {
    #[serde(default)]
    Ack: Option<String>,
    #[serde(default)]
    Errors: Vec<ErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    ShortMessage: Option<String>,
    #[serde(default)]
    LongMessage: Option<String>,
    #[serde(default)]
    ErrorCode: Option<String>,
    #[serde(default)]
    SeverityCode: Option<String>,
}

/// Posts one Trading call and returns the decoded body once the `Ack` reports success.
///
/// Transport-level success is not enough: a `200` carrying `Ack: Failure` is an error.
pub async fn execute<Req, Resp>(
    http: &Client,
    config: &TradingConfig,
    call: &'static str,
    token: &str,
    body: &Req,
) -> Result<Resp, MarketplaceError>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let response = http
        .post(&config.trading_url)
        .header("X-EBAY-API-CALL-NAME", call)
        .header("X-EBAY-API-SITEID", config.site_id.to_string())
        .header(
            "X-EBAY-API-COMPATIBILITY-LEVEL",
            config.compatibility_level.to_string(),
        )
        .header("X-EBAY-API-APP-NAME", &config.app_id)
        .header("X-EBAY-API-DEV-NAME", &config.dev_id)
        .header("X-EBAY-API-CERT-NAME", &config.cert_id)
        .header("X-EBAY-API-IAF-TOKEN", token)
        .json(body)
        .send()
        .await
        .map_err(|err| MarketplaceError::Request(err.to_string()))?;

    if !response.status().is_success() {
        return Err(MarketplaceError::Request(format!(
            "{call}: HTTP {}",
            response.status()
        )));
    }

    let payload: Value = response
        .json()
        .await
        .map_err(|err| MarketplaceError::Decode(err.to_string()))?;
    check_ack(call, &payload)?;
    debug!(target = "listing.ebay", call, "trading call acknowledged");

    serde_json::from_value(payload).map_err(|err| MarketplaceError::Decode(err.to_string()))
}

/// `Success` and `Warning` both mean the call went through.
pub(crate) fn check_ack(call: &'static str, payload: &Value) -> Result<(), MarketplaceError> {
    let header: AckHeader = serde_json::from_value(payload.clone())
        .map_err(|err| MarketplaceError::Decode(err.to_string()))?;
    match header.Ack.as_deref() {
        Some("Success") | Some("Warning") => Ok(()),
        _ => {
            if header
                .Errors
                .iter()
                .any(|e| e.ErrorCode.as_deref() == Some(ITEM_NOT_FOUND_CODE))
            {
                return Err(MarketplaceError::NotFound(first_message(&header.Errors)));
            }
            Err(MarketplaceError::Api {
                call,
                messages: error_messages(&header.Errors),
            })
        }
    }
}

fn error_messages(errors: &[ErrorDetail]) -> Vec<String> {
    let messages: Vec<String> = errors
        .iter()
        .filter(|e| e.SeverityCode.as_deref() != Some("Warning"))
        .filter_map(|e| e.LongMessage.clone().or_else(|| e.ShortMessage.clone()))
        .collect();
    if messages.is_empty() {
        vec!["Unknown error".to_string()]
    } else {
        messages
    }
}

fn first_message(errors: &[ErrorDetail]) -> String {
    error_messages(errors)
        .into_iter()
        .next()
        .unwrap_or_else(|| "item not found".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_and_warning_acks_pass() {
        assert!(check_ack("AddItem", &json!({"Ack": "Success"})).is_ok());
        assert!(
            check_ack(
                "AddItem",
                &json!({"Ack": "Warning", "Errors": [{"SeverityCode": "Warning", "ShortMessage": "minor"}]})
            )
            .is_ok()
        );
    }

    #[test]
    fn failure_ack_collects_error_messages() {
        let err = check_ack(
            "ReviseItem",
            &json!({
                "Ack": "Failure",
                "Errors": [
                    {"ShortMessage": "Bad price", "LongMessage": "StartPrice must be positive", "ErrorCode": "37", "SeverityCode": "Error"},
                    {"ShortMessage": "Heads up", "SeverityCode": "Warning"}
                ]
            }),
        )
        .unwrap_err();
        match err {
            MarketplaceError::Api { call, messages } => {
                assert_eq!(call, "ReviseItem");
                assert_eq!(messages, vec!["StartPrice must be positive".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_ack_is_a_failure() {
        let err = check_ack("GetItem", &json!({})).unwrap_err();
        assert!(err.to_string().contains("Unknown error"));
    }

    #[test]
    fn unknown_item_maps_to_not_found() {
        let err = check_ack(
            "GetItem",
            &json!({"Ack": "Failure", "Errors": [{"ShortMessage": "Item not found.", "ErrorCode": "17"}]}),
        )
        .unwrap_err();
        assert!(matches!(err, MarketplaceError::NotFound(_)));
    }

    #[test]
    fn item_payload_omits_absent_fields() {
        let payload = ItemEnvelope {
            Item: ItemPayload {
                ItemID: Some("110".into()),
                StartPrice: Some(12.5),
                ..Default::default()
            },
        };
        assert_eq!(
            serde_json::to_value(payload).unwrap(),
            json!({"Item": {"ItemID": "110", "StartPrice": 12.5}})
        );
    }
}
