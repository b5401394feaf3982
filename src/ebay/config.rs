use crate::config::{env_parse, env_parse_positive};
use std::env;

const SANDBOX_TRADING_URL: &str = "https://api.sandbox.ebay.com/ws/api.dll";
const PROD_TRADING_URL: &str = "https://api.ebay.com/ws/api.dll";
const SANDBOX_FINDING_URL: &str = "https://svcs.sandbox.ebay.com/services/search/FindingService/v1";
const PROD_FINDING_URL: &str = "https://svcs.ebay.com/services/search/FindingService/v1";
const SANDBOX_WEB_ROOT: &str = "https://www.sandbox.ebay.com";
const PROD_WEB_ROOT: &str = "https://www.ebay.com";

#[derive(Debug, Clone)]
pub struct TradingConfig {
    pub environment: String,
    pub app_id: String,
    pub cert_id: String,
    pub dev_id: String,
    /// Used when the calling user has no stored credential of their own.
    pub default_user_token: Option<String>,
    pub site_id: u32,
    pub compatibility_level: u32,
    pub worker_pool_size: usize,
    pub trading_url: String,
    pub finding_url: String,
    pub web_root: String,
    pub defaults: ListingDefaults,
}

/// Fixed item fields sent with every `AddItem`.
#[derive(Debug, Clone)]
pub struct ListingDefaults {
    pub country: &'static str,
    pub currency: &'static str,
    pub dispatch_time_max: u32,
    pub listing_duration: &'static str,
    pub listing_type: &'static str,
    pub returns_within: &'static str,
}

impl Default for ListingDefaults {
    fn default() -> Self {
        Self {
            country: "US",
            currency: "USD",
            dispatch_time_max: 3,
            listing_duration: "Days_7",
            listing_type: "FixedPriceItem",
            returns_within: "Days_30",
        }
    }
}

impl TradingConfig {
    pub fn from_env() -> Self {
        let environment = env::var("EBAY_ENV").unwrap_or_else(|_| "SANDBOX".to_string());
        let production = environment.eq_ignore_ascii_case("PROD");
        let pick = |key: &str, prod: &str, sandbox: &str| {
            env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| (if production { prod } else { sandbox }).to_string())
        };

        Self {
            app_id: env::var("EBAY_APP_ID").unwrap_or_default(),
            cert_id: env::var("EBAY_CERT_ID").unwrap_or_default(),
            dev_id: env::var("EBAY_DEV_ID").unwrap_or_default(),
            default_user_token: env::var("EBAY_USER_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            site_id: env_parse("EBAY_SITE_ID", 0),
            compatibility_level: env_parse_positive("EBAY_COMPATIBILITY_LEVEL", 1193),
            worker_pool_size: env_parse_positive("EBAY_WORKER_POOL_SIZE", 5),
            trading_url: pick("EBAY_TRADING_URL", PROD_TRADING_URL, SANDBOX_TRADING_URL),
            finding_url: pick("EBAY_FINDING_URL", PROD_FINDING_URL, SANDBOX_FINDING_URL),
            web_root: if production {
                PROD_WEB_ROOT.to_string()
            } else {
                SANDBOX_WEB_ROOT.to_string()
            },
            defaults: ListingDefaults::default(),
            environment,
        }
    }

    /// Points both APIs at a single base URL. Used to aim the adapter at a local stub.
    #[cfg(test)]
    pub fn for_base_url(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            environment: "SANDBOX".into(),
            app_id: "app-id".into(),
            cert_id: "cert-id".into(),
            dev_id: "dev-id".into(),
            default_user_token: Some("default-token".into()),
            site_id: 0,
            compatibility_level: 1193,
            worker_pool_size: 2,
            trading_url: format!("{base}/ws/api.dll"),
            finding_url: format!("{base}/services/search/FindingService/v1"),
            web_root: SANDBOX_WEB_ROOT.to_string(),
            defaults: ListingDefaults::default(),
        }
    }

    pub fn listing_url(&self, listing_id: &str) -> String {
        format!("{}/itm/{}", self.web_root, listing_id)
    }
}
