//! Visibility and authorization rules for listings.
//!
//! Every read and write path asks this module, so the list filter and the detail check can never
//! disagree. Nothing here touches storage.

use uuid::Uuid;

use crate::{error::AppError, models::{Listing, ListingStatus}};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Roles {
    pub is_staff: bool,
    pub is_moderator: bool,
}

impl Roles {
    pub const STAFF: Roles = Roles { is_staff: true, is_moderator: false };
    pub const MODERATOR: Roles = Roles { is_staff: false, is_moderator: true };
}

/// Viewer
///
/// The resolved identity behind a request, threaded explicitly into every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    Anonymous,
    User { id: Uuid, roles: Roles },
}

impl Viewer {
    pub fn user(id: Uuid, roles: Roles) -> Self {
        Viewer::User { id, roles }
    }

    pub fn id(&self) -> Option<Uuid> {
        match self {
            Viewer::Anonymous => None,
            Viewer::User { id, .. } => Some(*id),
        }
    }

    pub fn roles(&self) -> Roles {
        match self {
            Viewer::Anonymous => Roles::default(),
            Viewer::User { roles, .. } => *roles,
        }
    }

    pub fn is_privileged(&self) -> bool {
        let roles = self.roles();
        roles.is_staff || roles.is_moderator
    }

    pub fn is_author_of(&self, listing: &Listing) -> bool {
        self.id() == Some(listing.author_id)
    }

    /// The authenticated user id, or `Unauthorized` for anonymous viewers.
    pub fn require_user(&self) -> Result<Uuid, AppError> {
        self.id().ok_or(AppError::Unauthorized)
    }
}

/// VisibilityScope
///
/// The collection-level form of the visibility rule. Repositories translate it into their own
/// filter (a SQL predicate, an iterator filter) so enumeration never needs per-item checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityScope {
    Everything,
    ApprovedOrAuthoredBy(Uuid),
    ApprovedOnly,
}

impl VisibilityScope {
    pub fn admits(&self, listing: &Listing) -> bool {
        match self {
            VisibilityScope::Everything => true,
            VisibilityScope::ApprovedOrAuthoredBy(id) => {
                listing.status == ListingStatus::Approved || listing.author_id == *id
            }
            VisibilityScope::ApprovedOnly => listing.status == ListingStatus::Approved,
        }
    }
}

pub fn visibility_scope(viewer: &Viewer) -> VisibilityScope {
    match viewer {
        Viewer::Anonymous => VisibilityScope::ApprovedOnly,
        v if v.is_privileged() => VisibilityScope::Everything,
        Viewer::User { id, .. } => VisibilityScope::ApprovedOrAuthoredBy(*id),
    }
}

pub fn can_view(viewer: &Viewer, listing: &Listing) -> bool {
    visibility_scope(viewer).admits(listing)
}

/// Content edits belong to the author alone, whatever the listing's status.
pub fn can_mutate(viewer: &Viewer, listing: &Listing) -> bool {
    viewer.is_author_of(listing)
}

pub fn can_moderate(viewer: &Viewer) -> bool {
    viewer.is_privileged()
}

/// Catalog and account administration is reserved for staff.
pub fn can_administer(viewer: &Viewer) -> bool {
    viewer.roles().is_staff
}

pub fn authorize_mutation(viewer: &Viewer, listing: &Listing) -> Result<(), AppError> {
    viewer.require_user()?;
    if can_mutate(viewer, listing) {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

pub fn authorize_moderation(viewer: &Viewer) -> Result<Uuid, AppError> {
    let id = viewer.require_user()?;
    if can_moderate(viewer) {
        Ok(id)
    } else {
        Err(AppError::Forbidden)
    }
}

pub fn authorize_administration(viewer: &Viewer) -> Result<Uuid, AppError> {
    let id = viewer.require_user()?;
    if can_administer(viewer) {
        Ok(id)
    } else {
        Err(AppError::Forbidden)
    }
}
