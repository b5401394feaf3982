use crate::db::UserRow;
use crate::models::{BulkOperationKind, BulkOperationRequest, ListingChanges, ValidationError};
use crate::service::{ListingManager, ServiceError, ServiceErrorKind};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

#[derive(Debug, Clone)]
pub enum BulkOperation {
    Update(ListingChanges),
    Delete,
    Relist,
}

impl BulkOperation {
    pub fn kind(&self) -> BulkOperationKind {
        match self {
            BulkOperation::Update(_) => BulkOperationKind::Update,
            BulkOperation::Delete => BulkOperationKind::Delete,
            BulkOperation::Relist => BulkOperationKind::Relist,
        }
    }
}

/// A checked bulk request: the ids are non-empty and an update carries a valid change set.
#[derive(Debug, Clone)]
pub struct BulkPlan {
    pub operation: BulkOperation,
    pub listing_ids: Vec<String>,
}

impl BulkPlan {
    pub fn from_request(request: BulkOperationRequest) -> Result<Self, ServiceError> {
        const OP: &str = "bulk_operations";
        if request.listing_ids.is_empty() {
            return Err(ServiceError::validation(OP, ValidationError::NoListingIds));
        }
        let operation = match request.operation {
            BulkOperationKind::Update => {
                let changes = request
                    .data
                    .ok_or_else(|| ServiceError::validation(OP, ValidationError::MissingUpdateData))?;
                changes
                    .validate()
                    .map_err(|err| ServiceError::validation(OP, err))?;
                BulkOperation::Update(changes)
            }
            BulkOperationKind::Delete => BulkOperation::Delete,
            BulkOperationKind::Relist => BulkOperation::Relist,
        };
        Ok(Self {
            operation,
            listing_ids: request.listing_ids,
        })
    }

    pub fn len(&self) -> usize {
        self.listing_ids.len()
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    InvalidInput,
    NotFound,
    Marketplace,
    Storage,
    Internal,
}

impl From<ServiceErrorKind> for FailureReason {
    fn from(kind: ServiceErrorKind) -> Self {
        match kind {
            ServiceErrorKind::InvalidInput => FailureReason::InvalidInput,
            ServiceErrorKind::NotFound => FailureReason::NotFound,
            ServiceErrorKind::Marketplace => FailureReason::Marketplace,
            ServiceErrorKind::Storage => FailureReason::Storage,
            ServiceErrorKind::Agent | ServiceErrorKind::Internal => FailureReason::Internal,
        }
    }
}

/// Outcome for one id.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    Succeeded {
        listing_id: String,
        #[serde(skip_serializing_if = "Value::is_null")]
        result: Value,
    },
    Failed {
        listing_id: String,
        reason: FailureReason,
        error: String,
    },
}

impl ItemOutcome {
    pub fn listing_id(&self) -> &str {
        match self {
            ItemOutcome::Succeeded { listing_id, .. } | ItemOutcome::Failed { listing_id, .. } => {
                listing_id
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkReport {
    pub operation: BulkOperationKind,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<ItemOutcome>,
}

impl BulkReport {
    fn new(operation: BulkOperationKind, results: Vec<ItemOutcome>) -> Self {
        let successful = results.iter().filter(|r| r.is_success()).count();
        Self {
            operation,
            total: results.len(),
            successful,
            failed: results.len() - successful,
            results,
        }
    }
}

/// Applies the operation to each id in order. A failure is recorded and the loop moves on;
/// earlier successes are never rolled back.
pub async fn run(manager: &ListingManager, user: &UserRow, plan: &BulkPlan) -> BulkReport {
    let mut results = Vec::with_capacity(plan.len());
    for listing_id in &plan.listing_ids {
        let outcome = match &plan.operation {
            BulkOperation::Update(changes) => manager
                .update_listing(user, listing_id, changes)
                .await
                .map(|done| json!({"updated_fields": done.updated_fields})),
            BulkOperation::Delete => manager
                .delete_listing(user, listing_id)
                .await
                .map(|_| Value::Null),
            BulkOperation::Relist => manager
                .relist_listing(user, listing_id)
                .await
                .map(|done| json!({"new_listing_id": done.listing_id})),
        };
        results.push(match outcome {
            Ok(result) => ItemOutcome::Succeeded {
                listing_id: listing_id.clone(),
                result,
            },
            Err(err) => ItemOutcome::Failed {
                listing_id: listing_id.clone(),
                reason: err.kind().into(),
                error: err.detail().to_string(),
            },
        });
    }

    let report = BulkReport::new(plan.operation.kind(), results);
    info!(
        target = "listing.service",
        operation = report.operation.as_str(),
        total = report.total,
        successful = report.successful,
        failed = report.failed,
        "bulk operation finished"
    );
    report
}
