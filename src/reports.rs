//! Sales, performance, inventory and analytics reports plus the dashboard summary,
//! all computed from local rows and analytics snapshots.

use crate::db::{AnalyticsRow, ListingRow, UserRow};
use crate::models::{DateRange, ListingStatus, ReportFilters, ReportRequest, ReportType, ValidationError};
use crate::service::{ListingManager, ServiceError};
use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;

const DEFAULT_WINDOW_DAYS: i64 = 30;
const BEST_SELLERS: usize = 5;
const TOP_CATEGORIES: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub report_type: ReportType,
    pub date_range: DateRange,
    pub data: ReportData,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ReportData {
    Sales(SalesReport),
    Performance(PerformanceReport),
    Inventory(InventoryReport),
    Analytics(AnalyticsReport),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SalesReport {
    pub total_sales: i64,
    pub items_sold: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PerformanceReport {
    pub views: i64,
    pub clicks: i64,
    pub watchers: i64,
    pub conversion_rate: f64,
    pub average_sale_price: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InventoryReport {
    pub total_items: usize,
    pub active: usize,
    pub draft: usize,
    pub sold: usize,
    pub ended: usize,
    pub out_of_stock: usize,
    pub total_quantity: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CategoryCount {
    pub category_id: String,
    pub listings: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BestSeller {
    pub listing_id: String,
    pub title: String,
    pub sold_quantity: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DailyTrend {
    pub date: NaiveDate,
    pub views: i64,
    pub sales: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AnalyticsReport {
    pub top_categories: Vec<CategoryCount>,
    pub best_sellers: Vec<BestSeller>,
    pub trends: Vec<DailyTrend>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Dashboard {
    pub total_listings: usize,
    pub active_listings: usize,
    pub total_sales: i64,
    pub total_revenue: f64,
    pub average_sale_price: f64,
    pub total_views: i64,
    pub total_watchers: i64,
    pub conversion_rate: f64,
}

impl ListingManager {
    pub async fn generate_report(
        &self,
        user: &UserRow,
        request: &ReportRequest,
    ) -> Result<Report, ServiceError> {
        const OP: &str = "generate_report";
        let range = request.date_range.unwrap_or_else(|| default_range(DEFAULT_WINDOW_DAYS));
        if range.start > range.end {
            return Err(ServiceError::validation(OP, ValidationError::DateRange));
        }
        let filters = request.filters.clone().unwrap_or_default();

        let listings: Vec<ListingRow> = self
            .store()
            .listings_for_user(&user.id)
            .await
            .map_err(|err| ServiceError::storage(OP, err))?
            .into_iter()
            .filter(|row| matches_filters(row, &filters))
            .collect();
        let ids: HashSet<&str> = listings.iter().map(|row| row.id.as_str()).collect();
        let snapshots: Vec<AnalyticsRow> = self
            .store()
            .analytics_between(&user.id, range.start, range.end)
            .await
            .map_err(|err| ServiceError::storage(OP, err))?
            .into_iter()
            .filter(|snap| ids.contains(snap.listing_id.as_str()))
            .collect();

        let current = latest_by(&snapshots, |snap| snap.listing_id.as_str());
        let data = match request.report_type {
            ReportType::Sales => ReportData::Sales(sales(&listings, &current)),
            ReportType::Performance => ReportData::Performance(performance(&current)),
            ReportType::Inventory => ReportData::Inventory(inventory(&listings)),
            ReportType::Analytics => ReportData::Analytics(analytics(&listings, &snapshots)),
        };
        Ok(Report {
            report_type: request.report_type,
            date_range: range,
            data,
        })
    }

    pub async fn dashboard(&self, user: &UserRow, days: i64) -> Result<Dashboard, ServiceError> {
        const OP: &str = "dashboard";
        let range = default_range(days.clamp(1, 365));
        let listings = self
            .store()
            .listings_for_user(&user.id)
            .await
            .map_err(|err| ServiceError::storage(OP, err))?;
        let snapshots = self
            .store()
            .analytics_between(&user.id, range.start, range.end)
            .await
            .map_err(|err| ServiceError::storage(OP, err))?;
        Ok(dashboard(&listings, &snapshots))
    }
}

fn default_range(days: i64) -> DateRange {
    let end = Utc::now().date_naive();
    DateRange {
        start: end - Duration::days(days),
        end,
    }
}

fn matches_filters(row: &ListingRow, filters: &ReportFilters) -> bool {
    filters
        .category_id
        .as_deref()
        .is_none_or(|category| row.category_id == category)
        && filters.status.is_none_or(|status| row.status == status)
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Snapshots carry running totals, so only the newest row per key counts.
/// `snapshots` must be ordered oldest first.
fn latest_by<'a, K: Eq + Hash>(
    snapshots: &'a [AnalyticsRow],
    key: impl Fn(&'a AnalyticsRow) -> K,
) -> Vec<&'a AnalyticsRow> {
    let mut latest: HashMap<K, &AnalyticsRow> = HashMap::new();
    for snap in snapshots {
        latest.insert(key(snap), snap);
    }
    latest.into_values().collect()
}

fn sales(listings: &[ListingRow], snapshots: &[&AnalyticsRow]) -> SalesReport {
    SalesReport {
        total_sales: snapshots.iter().map(|s| s.sales).sum(),
        items_sold: listings.iter().map(|l| l.sold_quantity).sum(),
        revenue: snapshots.iter().map(|s| s.revenue).sum(),
    }
}

fn performance(snapshots: &[&AnalyticsRow]) -> PerformanceReport {
    let views: i64 = snapshots.iter().map(|s| s.views).sum();
    let sales: i64 = snapshots.iter().map(|s| s.sales).sum();
    let revenue: f64 = snapshots.iter().map(|s| s.revenue).sum();
    PerformanceReport {
        views,
        clicks: snapshots.iter().map(|s| s.clicks).sum(),
        watchers: snapshots.iter().map(|s| s.watchers).sum(),
        conversion_rate: ratio(sales as f64, views as f64) * 100.0,
        average_sale_price: ratio(revenue, sales as f64),
    }
}

fn inventory(listings: &[ListingRow]) -> InventoryReport {
    let count = |status: ListingStatus| listings.iter().filter(|l| l.status == status).count();
    InventoryReport {
        total_items: listings.len(),
        active: count(ListingStatus::Active),
        draft: count(ListingStatus::Draft),
        sold: count(ListingStatus::Sold),
        ended: count(ListingStatus::Ended),
        out_of_stock: listings
            .iter()
            .filter(|l| l.status == ListingStatus::Active && l.quantity == 0)
            .count(),
        total_quantity: listings.iter().map(|l| l.quantity).sum(),
    }
}

fn analytics(listings: &[ListingRow], snapshots: &[AnalyticsRow]) -> AnalyticsReport {
    let mut categories: HashMap<&str, usize> = HashMap::new();
    for row in listings {
        *categories.entry(row.category_id.as_str()).or_default() += 1;
    }
    let mut top_categories: Vec<CategoryCount> = categories
        .into_iter()
        .map(|(category_id, listings)| CategoryCount {
            category_id: category_id.to_string(),
            listings,
        })
        .collect();
    top_categories.sort_by(|a, b| {
        b.listings
            .cmp(&a.listings)
            .then_with(|| a.category_id.cmp(&b.category_id))
    });
    top_categories.truncate(TOP_CATEGORIES);

    let mut sellers: Vec<&ListingRow> = listings.iter().filter(|l| l.sold_quantity > 0).collect();
    sellers.sort_by(|a, b| b.sold_quantity.cmp(&a.sold_quantity));
    let best_sellers = sellers
        .into_iter()
        .take(BEST_SELLERS)
        .map(|l| BestSeller {
            listing_id: l.marketplace_id().to_string(),
            title: l.title.clone(),
            sold_quantity: l.sold_quantity,
        })
        .collect();

    let mut daily: BTreeMap<NaiveDate, DailyTrend> = BTreeMap::new();
    for snap in latest_by(snapshots, |snap| (snap.listing_id.as_str(), snap.date)) {
        let day = daily.entry(snap.date).or_insert(DailyTrend {
            date: snap.date,
            views: 0,
            sales: 0,
            revenue: 0.0,
        });
        day.views += snap.views;
        day.sales += snap.sales;
        day.revenue += snap.revenue;
    }

    AnalyticsReport {
        top_categories,
        best_sellers,
        trends: daily.into_values().collect(),
    }
}

fn dashboard(listings: &[ListingRow], snapshots: &[AnalyticsRow]) -> Dashboard {
    let total_sales: i64 = listings.iter().map(|l| l.sold_quantity).sum();
    let total_revenue: f64 = listings
        .iter()
        .map(|l| l.sold_quantity as f64 * l.price)
        .sum();
    let current = latest_by(snapshots, |snap| snap.listing_id.as_str());
    let total_views: i64 = current.iter().map(|s| s.views).sum();
    Dashboard {
        total_listings: listings.len(),
        active_listings: listings
            .iter()
            .filter(|l| l.status == ListingStatus::Active)
            .count(),
        total_sales,
        total_revenue,
        average_sale_price: ratio(total_revenue, total_sales as f64),
        total_views,
        total_watchers: current.iter().map(|s| s.watchers).sum(),
        conversion_rate: ratio(total_sales as f64, total_views as f64) * 100.0,
    }
}
