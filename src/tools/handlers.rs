use super::{Envelope, Tool};
use crate::agent::Agent;
use crate::bulk::{self, BulkPlan};
use crate::db::UserRow;
use crate::models::{
    AgentQueryRequest, BulkOperationKind, BulkOperationRequest, ListingChanges, ListingDraft,
    ReportRequest, SearchCriteria,
};
use crate::service::{CreateOutcome, ListingManager, ServiceError, ServiceErrorKind};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListingIdArgs {
    listing_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateArgs {
    listing_id: String,
    updates: ListingChanges,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OptimizeArgs {
    listing_id: String,
    #[serde(default)]
    apply: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SuggestArgs {
    title: String,
    #[serde(default)]
    description: Option<String>,
}

/// `null` arguments read as an empty object so argument-free tools accept both.
fn parse<T: DeserializeOwned>(tool: Tool, args: Value) -> Result<T, Envelope> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|err| {
        Envelope::error(
            format!("Invalid arguments for {}", tool.name()),
            err.to_string(),
            ServiceErrorKind::InvalidInput,
        )
    })
}

fn respond<T>(
    tool: Tool,
    result: Result<T, ServiceError>,
    ok: impl FnOnce(T) -> Envelope,
) -> Envelope {
    match result {
        Ok(value) => ok(value),
        Err(err) => Envelope::failure(tool.failure_message(), &err),
    }
}

pub(crate) fn created_envelope(outcome: CreateOutcome) -> Envelope {
    Envelope::ok(
        "Listing created successfully",
        json!({
            "listing_id": outcome.listing_id,
            "url": outcome.listing_url,
            "listing_url": outcome.listing_url,
            "fees": outcome.fees,
            "listing": outcome.listing,
        }),
    )
}

pub(super) async fn invoke(
    manager: &ListingManager,
    user: &UserRow,
    tool: Tool,
    args: Value,
) -> Envelope {
    match run(manager, user, tool, args).await {
        Ok(envelope) | Err(envelope) => envelope,
    }
}

async fn run(
    manager: &ListingManager,
    user: &UserRow,
    tool: Tool,
    args: Value,
) -> Result<Envelope, Envelope> {
    let envelope = match tool {
        Tool::CreateListing => {
            let draft: ListingDraft = parse(tool, args)?;
            respond(tool, manager.create_listing(user, &draft).await, created_envelope)
        }
        Tool::UpdateListing => {
            let UpdateArgs {
                listing_id,
                updates,
            } = parse(tool, args)?;
            respond(
                tool,
                manager.update_listing(user, &listing_id, &updates).await,
                |done| {
                    Envelope::ok(
                        "Listing updated successfully",
                        json!({
                            "listing_id": done.listing_id,
                            "updated_fields": done.updated_fields,
                            "fees": done.fees,
                        }),
                    )
                },
            )
        }
        Tool::GetListing => {
            let ListingIdArgs { listing_id } = parse(tool, args)?;
            respond(tool, manager.get_listing(user, &listing_id).await, |listing| {
                Envelope::ok("Listing retrieved", json!({ "listing": listing }))
            })
        }
        Tool::DeleteListing => {
            let ListingIdArgs { listing_id } = parse(tool, args)?;
            respond(tool, manager.delete_listing(user, &listing_id).await, |done| {
                Envelope::ok("Listing deleted", done)
            })
        }
        Tool::SearchListings => {
            let criteria: SearchCriteria = parse(tool, args)?;
            respond(tool, manager.search_listings(user, &criteria).await, |listings| {
                Envelope::ok(
                    format!("Found {} listings", listings.len()),
                    json!({ "count": listings.len(), "listings": listings }),
                )
            })
        }
        Tool::AnalyzeListing => {
            let ListingIdArgs { listing_id } = parse(tool, args)?;
            respond(tool, manager.analyze_listing(user, &listing_id).await, |insights| {
                Envelope::ok(
                    "Analysis complete",
                    json!({ "listing_id": insights.listing_id, "insights": insights }),
                )
            })
        }
        Tool::OptimizeListing => {
            let OptimizeArgs { listing_id, apply } = parse(tool, args)?;
            respond(
                tool,
                manager.optimize_listing(user, &listing_id, apply).await,
                |outcome| Envelope::ok("Optimization suggestions generated", outcome),
            )
        }
        Tool::BulkOperations => {
            let request: BulkOperationRequest = parse(tool, args)?;
            let plan = BulkPlan::from_request(request)
                .map_err(|err| Envelope::failure(tool.failure_message(), &err))?;
            bulk_envelope(bulk::run(manager, user, &plan).await)
        }
        Tool::SuggestCategories => {
            let SuggestArgs { title, description } = parse(tool, args)?;
            let found = manager
                .suggest_categories(user, &title, description.as_deref())
                .await;
            respond(tool, found, |suggestions| {
                Envelope::ok(
                    format!("Found {} category suggestions", suggestions.len()),
                    json!({ "suggestions": suggestions }),
                )
            })
        }
        Tool::GenerateReport => {
            let request: ReportRequest = parse(tool, args)?;
            respond(tool, manager.generate_report(user, &request).await, |report| {
                Envelope::ok("Report generated", json!({ "report": report }))
            })
        }
        Tool::AiAssistant => Envelope::error(
            tool.failure_message(),
            "the assistant is not available here",
            ServiceErrorKind::InvalidInput,
        ),
    };
    Ok(envelope)
}

/// The batch counts as a success when at least one id went through.
pub(crate) fn bulk_envelope(report: bulk::BulkReport) -> Envelope {
    let verb = match report.operation {
        BulkOperationKind::Update => "Updated",
        BulkOperationKind::Delete => "Deleted",
        BulkOperationKind::Relist => "Relisted",
    };
    let message = format!("{verb} {} of {} listings", report.successful, report.total);
    let all_failed = report.successful == 0;
    let failed = report.failed;
    let mut envelope = Envelope::ok(message, report);
    if all_failed && envelope.success {
        envelope.success = false;
        envelope.error = Some(format!("all {failed} listings failed"));
    }
    envelope
}

pub(super) async fn assistant(agent: &Agent, user: &UserRow, args: Value) -> Envelope {
    let tool = Tool::AiAssistant;
    let request: AgentQueryRequest = match parse(tool, args) {
        Ok(request) => request,
        Err(envelope) => return envelope,
    };
    match agent
        .process(user, &request.query, request.context.as_ref())
        .await
    {
        Ok(reply) => Envelope::ok("Assistant response ready", reply),
        Err(err) => Envelope::failure(tool.failure_message(), &err.into_service_error()),
    }
}
