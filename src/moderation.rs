//! Moderation workflow.
//!
//! `pending` is only ever entered by creation or an author edit. Moderators move a listing from
//! any status to `approved` or `rejected`; every transition leaves an audit record.

use uuid::Uuid;

use crate::{
    error::{AppError, ErrorCode},
    listings::{self, to_view},
    models::{ListingQuery, ListingStatus, ListingView, ModerateRequest, ModerationRecord, Page},
    policy::{self, Viewer},
    repository::Repository,
    storage::StorageService,
};

/// Accepts only the statuses a moderator may set.
pub fn parse_target(raw: &str) -> Result<ListingStatus, AppError> {
    match ListingStatus::parse(raw) {
        Some(status @ (ListingStatus::Approved | ListingStatus::Rejected)) => Ok(status),
        _ => Err(AppError::field(
            "status",
            ErrorCode::InvalidTargetStatus,
            format!("'{}' is not a valid moderation status; use approved or rejected.", raw.trim()),
        )),
    }
}

/// moderate
///
/// Permission is checked before the target status, and both before the listing lookup.
pub async fn moderate(
    repo: &dyn Repository,
    storage: &dyn StorageService,
    viewer: &Viewer,
    id: Uuid,
    req: ModerateRequest,
) -> Result<ListingView, AppError> {
    let moderator_id = policy::authorize_moderation(viewer)?;
    let target = parse_target(&req.status)?;
    let record = repo.set_listing_status(id, moderator_id, target).await?;
    tracing::info!(listing_id = %id, moderator_id = %moderator_id, status = %target, "listing moderated");
    Ok(to_view(storage, record))
}

/// history
///
/// Audit trail of a listing, newest first.
pub async fn history(repo: &dyn Repository, viewer: &Viewer, id: Uuid) -> Result<Vec<ModerationRecord>, AppError> {
    policy::authorize_moderation(viewer)?;
    if repo.get_listing(id).await?.is_none() {
        return Err(AppError::NotFound);
    }
    Ok(repo.moderation_history(id).await?)
}

/// review_queue
///
/// Every listing for moderators, optionally narrowed by status. The query is only inspected once
/// the viewer is known to be a moderator; an unknown `status` is a validation error.
pub async fn review_queue(
    repo: &dyn Repository,
    storage: &dyn StorageService,
    viewer: &Viewer,
    query: &ListingQuery,
) -> Result<Page<ListingView>, AppError> {
    policy::authorize_moderation(viewer)?;
    let filter = query.moderation_filter()?;
    let page = query.page()?;
    listings::list_listings(repo, storage, viewer, &filter, page).await
}
