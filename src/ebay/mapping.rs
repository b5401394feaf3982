use crate::ebay::config::ListingDefaults;
use crate::ebay::finding::SearchItem;
use crate::ebay::trading::{
    CategoryRef, FeeEntry, ItemDetails, ItemPayload, ItemSpecifics, NameValue, PictureDetails,
    ReturnPolicy, ShippingDetails, ShippingServiceOption, SuggestedCategory,
};
use crate::ebay::{ListingFee, MarketplaceListing, SearchHit};
use crate::models::{CategorySuggestion, ItemCondition, ListingChanges, ListingDraft, ShippingOption};
use std::collections::BTreeMap;

const DEFAULT_SHIPPING_SERVICE: &str = "USPSPriority";
/// `GetSuggestedCategories` rejects longer queries.
pub const MAX_CATEGORY_QUERY_CHARS: usize = 50;
pub const MAX_CATEGORY_SUGGESTIONS: usize = 5;

pub fn condition_id(condition: ItemCondition) -> u32 {
    match condition {
        ItemCondition::New => 1000,
        ItemCondition::LikeNew => 1500,
        ItemCondition::VeryGood => 2000,
        ItemCondition::Good => 3000,
        ItemCondition::Acceptable => 4000,
        ItemCondition::ForParts => 7000,
    }
}

pub fn shipping_details(options: &[ShippingOption]) -> Option<ShippingDetails> {
    if options.is_empty() {
        return None;
    }
    let services = options
        .iter()
        .enumerate()
        .map(|(idx, option)| ShippingServiceOption {
            ShippingService: if option.service.trim().is_empty() {
                DEFAULT_SHIPPING_SERVICE.to_string()
            } else {
                option.service.clone()
            },
            ShippingServiceCost: option.cost,
            ShippingServicePriority: idx as u32 + 1,
            FreeShipping: option.free_shipping,
        })
        .collect();
    Some(ShippingDetails {
        ShippingType: "Flat",
        ShippingServiceOptions: services,
    })
}

pub fn item_specifics(specifics: &BTreeMap<String, String>) -> Option<ItemSpecifics> {
    if specifics.is_empty() {
        return None;
    }
    Some(ItemSpecifics {
        NameValueList: specifics
            .iter()
            .map(|(name, value)| NameValue {
                Name: name.clone(),
                Value: value.clone(),
            })
            .collect(),
    })
}

pub fn item_for_create(draft: &ListingDraft, defaults: &ListingDefaults) -> ItemPayload {
    ItemPayload {
        Title: Some(draft.title.clone()),
        Description: Some(draft.description.clone()),
        PrimaryCategory: Some(CategoryRef {
            CategoryID: draft.category_id.clone(),
        }),
        StartPrice: Some(draft.price),
        Quantity: Some(draft.quantity),
        ConditionID: Some(condition_id(draft.condition)),
        Country: Some(defaults.country),
        Currency: Some(defaults.currency),
        DispatchTimeMax: Some(defaults.dispatch_time_max),
        ListingDuration: Some(defaults.listing_duration),
        ListingType: Some(defaults.listing_type),
        PictureDetails: Some(PictureDetails {
            PictureURL: draft.images.clone(),
        }),
        ReturnPolicy: Some(ReturnPolicy {
            ReturnsAcceptedOption: "ReturnsAccepted",
            RefundOption: "MoneyBack",
            ReturnsWithinOption: defaults.returns_within,
            ShippingCostPaidByOption: "Buyer",
        }),
        ShippingDetails: shipping_details(&draft.shipping_options),
        ItemSpecifics: item_specifics(&draft.item_specifics),
        ..Default::default()
    }
}

pub fn item_for_revision(listing_id: &str, changes: &ListingChanges) -> ItemPayload {
    ItemPayload {
        ItemID: Some(listing_id.to_string()),
        Title: changes.title.clone(),
        Description: changes.description.clone(),
        StartPrice: changes.price,
        Quantity: changes.quantity,
        PictureDetails: changes.images.as_ref().map(|images| PictureDetails {
            PictureURL: images.clone(),
        }),
        ShippingDetails: changes
            .shipping_options
            .as_deref()
            .and_then(shipping_details),
        ItemSpecifics: changes.item_specifics.as_ref().and_then(item_specifics),
        ..Default::default()
    }
}

pub fn listing_from_item(item: ItemDetails) -> MarketplaceListing {
    let selling = item.SellingStatus.unwrap_or_default();
    let details = item.ListingDetails.unwrap_or_default();
    let views = item.HitCount.unwrap_or(0);
    let quantity_sold = selling.QuantitySold.unwrap_or(0);
    MarketplaceListing {
        listing_id: item.ItemID.unwrap_or_default(),
        title: item.Title.unwrap_or_default(),
        description: item.Description.unwrap_or_default(),
        price: item.StartPrice.map(|p| p.value).unwrap_or(0.0),
        quantity: item.Quantity.unwrap_or(0),
        category_id: item.PrimaryCategory.map(|c| c.CategoryID),
        condition: item.ConditionDisplayName,
        images: item.PictureDetails.unwrap_or_default().PictureURL,
        status: selling.ListingStatus,
        views,
        watchers: item.WatchCount.unwrap_or(0),
        questions: item.QuestionCount.unwrap_or(0),
        bids: item.BidCount.unwrap_or(0),
        quantity_sold,
        conversion_rate: conversion_rate(views, quantity_sold),
        listed_at: details.StartTime,
        ends_at: details.EndTime,
    }
}

pub fn hit_from_search_item(item: SearchItem) -> SearchHit {
    SearchHit {
        listing_id: item.itemId.unwrap_or_default(),
        title: item.title.unwrap_or_default(),
        price: item
            .sellingStatus
            .and_then(|s| s.currentPrice)
            .map(|p| p.value)
            .unwrap_or(0.0),
        listing_url: item.viewItemURL,
        end_time: item.listingInfo.and_then(|info| info.endTime),
    }
}

pub fn suggestion_from_category(entry: SuggestedCategory) -> CategorySuggestion {
    let name = entry.Category.CategoryName.unwrap_or_default();
    let mut path = entry.Category.CategoryParentName;
    if !name.is_empty() {
        path.push(name.clone());
    }
    CategorySuggestion {
        category_id: entry.Category.CategoryID.unwrap_or_default(),
        category_name: name,
        category_path: path,
        confidence: entry.PercentItemsFound.unwrap_or(0.0),
    }
}

pub fn fees_from_entries(entries: Vec<FeeEntry>) -> Vec<ListingFee> {
    entries
        .into_iter()
        .map(|entry| {
            let amount = entry.Fee.unwrap_or_default();
            ListingFee {
                name: entry.Name,
                amount: amount.value,
                currency: amount.currencyID,
            }
        })
        .filter(|fee| fee.amount > 0.0)
        .collect()
}

pub fn category_query(title: &str) -> String {
    title.trim().chars().take(MAX_CATEGORY_QUERY_CHARS).collect()
}

/// The title, then leading description words while the query still fits the limit.
pub fn category_query_with_description(title: &str, description: Option<&str>) -> String {
    let mut query = title.trim().to_string();
    let mut used = query.chars().count();
    for word in description.unwrap_or_default().split_whitespace() {
        let needed = word.chars().count() + usize::from(used > 0);
        if used + needed > MAX_CATEGORY_QUERY_CHARS {
            break;
        }
        if used > 0 {
            query.push(' ');
        }
        query.push_str(word);
        used += needed;
    }
    category_query(&query)
}

/// Percentage of views that turned into sales.
pub fn conversion_rate(views: i64, sold: i64) -> f64 {
    if views > 0 {
        sold as f64 / views as f64 * 100.0
    } else {
        0.0
    }
}
