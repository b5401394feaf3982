mod rows;

pub use rows::{
    AgentLogRow, AnalyticsRow, ListingRow, NewAgentLog, NewAnalytics, TemplateRow, UserRow,
};

use crate::models::{ListingChanges, ListingDraft, ListingStatus, SearchCriteria};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error("conflicting record: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err
            && (db.is_unique_violation() || db.is_check_violation())
        {
            return StoreError::Conflict(db.message().to_string());
        }
        StoreError::Database(err)
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        ebay_user_id TEXT UNIQUE,
        ebay_token TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS listings (
        id TEXT PRIMARY KEY,
        ebay_listing_id TEXT UNIQUE,
        user_id TEXT NOT NULL REFERENCES users(id),
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        price REAL NOT NULL CHECK (price > 0),
        quantity INTEGER NOT NULL DEFAULT 1 CHECK (quantity >= 0),
        category_id TEXT NOT NULL,
        condition TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'draft' CHECK (status IN ('draft', 'active', 'sold', 'ended')),
        images TEXT NOT NULL DEFAULT '[]',
        item_specifics TEXT NOT NULL DEFAULT '{}',
        shipping_options TEXT NOT NULL DEFAULT '[]',
        views INTEGER NOT NULL DEFAULT 0,
        watchers INTEGER NOT NULL DEFAULT 0,
        sold_quantity INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        listed_at TEXT,
        ends_at TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_listings_user ON listings(user_id)",
    "CREATE TABLE IF NOT EXISTS listing_templates (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id),
        name TEXT NOT NULL,
        template_data TEXT NOT NULL,
        is_default INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS listing_analytics (
        id TEXT PRIMARY KEY,
        listing_id TEXT NOT NULL REFERENCES listings(id) ON DELETE CASCADE,
        date TEXT NOT NULL,
        views INTEGER NOT NULL DEFAULT 0,
        clicks INTEGER NOT NULL DEFAULT 0,
        watchers INTEGER NOT NULL DEFAULT 0,
        questions INTEGER NOT NULL DEFAULT 0,
        sales INTEGER NOT NULL DEFAULT 0,
        revenue REAL NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_analytics_listing_date ON listing_analytics(listing_id, date)",
    "CREATE TABLE IF NOT EXISTS agent_logs (
        id TEXT PRIMARY KEY,
        user_id TEXT,
        action TEXT NOT NULL,
        input_data TEXT NOT NULL,
        output_data TEXT NOT NULL,
        success INTEGER NOT NULL,
        error_message TEXT,
        created_at TEXT NOT NULL
    )",
];

/// Session-per-call access to the relational store. Cloning shares the pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        info!(target = "listing.db", url, "store ready");
        Ok(store)
    }

    /// A fresh private database. The pool is pinned to one connection so every
    /// query sees the same in-memory file.
    #[cfg(test)]
    pub async fn in_memory() -> Self {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .unwrap();
        let store = Self { pool };
        store.migrate().await.unwrap();
        store
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!(target = "listing.db", "store closed");
    }

    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    // ---- users ----

    pub async fn create_user(&self, email: &str) -> Result<UserRow, StoreError> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (id, email, created_at, updated_at) VALUES (?, ?, ?, ?) RETURNING *",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(email.trim())
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        info!(target = "listing.db", user_id = %row.id, "user created");
        Ok(row)
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<UserRow>, StoreError> {
        Ok(sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRow>, StoreError> {
        Ok(
            sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = ?")
                .bind(email.trim())
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn find_or_create_user(&self, email: &str) -> Result<UserRow, StoreError> {
        if let Some(user) = self.find_user_by_email(email).await? {
            return Ok(user);
        }
        self.create_user(email).await
    }

    pub async fn update_user_credential(
        &self,
        user_id: &str,
        token: &str,
        ebay_user_id: Option<&str>,
    ) -> Result<Option<UserRow>, StoreError> {
        Ok(sqlx::query_as::<_, UserRow>(
            "UPDATE users SET ebay_token = ?, ebay_user_id = COALESCE(?, ebay_user_id), updated_at = ?
             WHERE id = ? RETURNING *",
        )
        .bind(token)
        .bind(ebay_user_id)
        .bind(Utc::now())
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    // ---- listings ----

    pub async fn insert_listing(
        &self,
        user_id: &str,
        ebay_listing_id: Option<&str>,
        draft: &ListingDraft,
        status: ListingStatus,
        listed_at: Option<DateTime<Utc>>,
    ) -> Result<ListingRow, StoreError> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, ListingRow>(
            "INSERT INTO listings (id, ebay_listing_id, user_id, title, description, price, quantity,
                category_id, condition, status, images, item_specifics, shipping_options,
                created_at, updated_at, listed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(ebay_listing_id)
        .bind(user_id)
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(draft.price)
        .bind(draft.quantity)
        .bind(&draft.category_id)
        .bind(draft.condition.label())
        .bind(status)
        .bind(Json(&draft.images))
        .bind(Json(&draft.item_specifics))
        .bind(Json(&draft.shipping_options))
        .bind(now)
        .bind(now)
        .bind(listed_at)
        .fetch_one(&self.pool)
        .await?;
        debug!(target = "listing.db", listing_id = %row.id, "listing stored");
        Ok(row)
    }

    /// Looks a listing up by local id or marketplace id.
    pub async fn get_listing(&self, id: &str) -> Result<Option<ListingRow>, StoreError> {
        Ok(sqlx::query_as::<_, ListingRow>(
            "SELECT * FROM listings WHERE id = ? OR ebay_listing_id = ?",
        )
        .bind(id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Applies the supplied field set in one transaction. `None` when no row matches.
    pub async fn update_listing(
        &self,
        id: &str,
        changes: &ListingChanges,
    ) -> Result<Option<ListingRow>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let Some(current) = sqlx::query_as::<_, ListingRow>(
            "SELECT * FROM listings WHERE id = ? OR ebay_listing_id = ?",
        )
        .bind(id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };

        let images = changes.images.as_ref().unwrap_or(&current.images.0);
        let specifics = changes
            .item_specifics
            .as_ref()
            .unwrap_or(&current.item_specifics.0);
        let shipping = changes
            .shipping_options
            .as_ref()
            .unwrap_or(&current.shipping_options.0);

        let updated = sqlx::query_as::<_, ListingRow>(
            "UPDATE listings SET title = ?, description = ?, price = ?, quantity = ?, images = ?,
                item_specifics = ?, shipping_options = ?, updated_at = ?
             WHERE id = ? RETURNING *",
        )
        .bind(changes.title.as_ref().unwrap_or(&current.title))
        .bind(changes.description.as_ref().unwrap_or(&current.description))
        .bind(changes.price.unwrap_or(current.price))
        .bind(changes.quantity.unwrap_or(current.quantity))
        .bind(Json(images))
        .bind(Json(specifics))
        .bind(Json(shipping))
        .bind(Utc::now())
        .bind(&current.id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(updated))
    }

    pub async fn mark_relisted(
        &self,
        id: &str,
        new_ebay_listing_id: &str,
    ) -> Result<Option<ListingRow>, StoreError> {
        let now = Utc::now();
        Ok(sqlx::query_as::<_, ListingRow>(
            "UPDATE listings SET ebay_listing_id = ?, status = ?, listed_at = ?, updated_at = ?
             WHERE id = ? OR ebay_listing_id = ? RETURNING *",
        )
        .bind(new_ebay_listing_id)
        .bind(ListingStatus::Active)
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Refreshes the denormalized traffic counters.
    pub async fn update_counters(
        &self,
        id: &str,
        views: i64,
        watchers: i64,
        sold_quantity: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE listings SET views = ?, watchers = ?, sold_quantity = ?, updated_at = ? WHERE id = ?",
        )
        .bind(views)
        .bind(watchers)
        .bind(sold_quantity)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Removes the row outright. Returns whether anything was deleted.
    pub async fn delete_listing(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM listings WHERE id = ? OR ebay_listing_id = ?")
            .bind(id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn search_listings(
        &self,
        criteria: &SearchCriteria,
        user_id: Option<&str>,
    ) -> Result<Vec<ListingRow>, StoreError> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM listings WHERE 1 = 1");
        if let Some(keyword) = criteria.keyword() {
            let pattern = format!("%{}%", escape_like(&keyword.to_lowercase()));
            query
                .push(" AND (LOWER(title) LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR LOWER(description) LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }
        if let Some(status) = criteria.status {
            query.push(" AND status = ").push_bind(status);
        }
        if let Some(category) = criteria.category() {
            query.push(" AND category_id = ").push_bind(category.to_string());
        }
        if let Some(user_id) = user_id {
            query.push(" AND user_id = ").push_bind(user_id.to_string());
        }
        if let Some(from) = criteria.date_from {
            query.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = criteria.date_to {
            query.push(" AND created_at <= ").push_bind(to);
        }
        query.push(" ORDER BY created_at DESC");

        Ok(query
            .build_query_as::<ListingRow>()
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn listings_for_user(&self, user_id: &str) -> Result<Vec<ListingRow>, StoreError> {
        Ok(sqlx::query_as::<_, ListingRow>(
            "SELECT * FROM listings WHERE user_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    // ---- templates ----

    /// Saving a default template clears the flag on the user's other templates.
    pub async fn save_template(
        &self,
        user_id: &str,
        name: &str,
        draft: &ListingDraft,
        is_default: bool,
    ) -> Result<TemplateRow, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        if is_default {
            sqlx::query("UPDATE listing_templates SET is_default = 0 WHERE user_id = ?")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }
        let row = sqlx::query_as::<_, TemplateRow>(
            "INSERT INTO listing_templates (id, user_id, name, template_data, is_default, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(name.trim())
        .bind(Json(draft))
        .bind(is_default)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row)
    }

    pub async fn list_templates(&self, user_id: &str) -> Result<Vec<TemplateRow>, StoreError> {
        Ok(sqlx::query_as::<_, TemplateRow>(
            "SELECT * FROM listing_templates WHERE user_id = ? ORDER BY is_default DESC, name",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn get_template(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<Option<TemplateRow>, StoreError> {
        Ok(sqlx::query_as::<_, TemplateRow>(
            "SELECT * FROM listing_templates WHERE id = ? AND user_id = ?",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn delete_template(&self, user_id: &str, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM listing_templates WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ---- analytics ----

    /// Appends a snapshot. Several rows for the same listing and date may coexist.
    pub async fn save_analytics(&self, snapshot: &NewAnalytics) -> Result<AnalyticsRow, StoreError> {
        Ok(sqlx::query_as::<_, AnalyticsRow>(
            "INSERT INTO listing_analytics (id, listing_id, date, views, clicks, watchers, questions, sales, revenue)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&snapshot.listing_id)
        .bind(snapshot.date)
        .bind(snapshot.views)
        .bind(snapshot.clicks)
        .bind(snapshot.watchers)
        .bind(snapshot.questions)
        .bind(snapshot.sales)
        .bind(snapshot.revenue)
        .fetch_one(&self.pool)
        .await?)
    }

    /// Snapshots for the user's listings with `start <= date <= end`, oldest first.
    pub async fn analytics_between(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AnalyticsRow>, StoreError> {
        Ok(sqlx::query_as::<_, AnalyticsRow>(
            "SELECT a.* FROM listing_analytics a
             JOIN listings l ON l.id = a.listing_id
             WHERE l.user_id = ? AND a.date >= ? AND a.date <= ?
             ORDER BY a.date, a.rowid",
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?)
    }

    // ---- agent logs ----

    pub async fn log_agent_action(&self, entry: &NewAgentLog<'_>) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO agent_logs (id, user_id, action, input_data, output_data, success, error_message, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(entry.user_id)
        .bind(entry.action)
        .bind(Json(entry.input))
        .bind(Json(entry.output))
        .bind(entry.success)
        .bind(entry.error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_agent_logs(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<AgentLogRow>, StoreError> {
        Ok(sqlx::query_as::<_, AgentLogRow>(
            "SELECT * FROM agent_logs WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }
}

/// Keywords match literally; `%` and `_` are not wildcards.
fn escape_like(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len());
    for ch in keyword.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
