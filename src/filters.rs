use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{ListingStatus, Page, User},
};

pub const DEFAULT_PAGE_SIZE: u32 = 12;
pub const MAX_PAGE_SIZE: u32 = 100;

/// ListingOrdering
///
/// Supported sort keys. Ties are broken by id so pages are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListingOrdering {
    CreatedAsc,
    #[default]
    CreatedDesc,
    PriceAsc,
    PriceDesc,
}

impl ListingOrdering {
    /// Parses `created_at`, `-created_at`, `price` or `-price`; anything else falls back to newest first.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("created_at") => ListingOrdering::CreatedAsc,
            Some("-created_at") => ListingOrdering::CreatedDesc,
            Some("price") => ListingOrdering::PriceAsc,
            Some("-price") => ListingOrdering::PriceDesc,
            _ => ListingOrdering::default(),
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            ListingOrdering::CreatedAsc => "created_at ASC, id ASC",
            ListingOrdering::CreatedDesc => "created_at DESC, id DESC",
            ListingOrdering::PriceAsc => "price ASC, id ASC",
            ListingOrdering::PriceDesc => "price DESC, id DESC",
        }
    }
}

/// ListingFilter
///
/// Field filters applied on top of the viewer's visibility scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingFilter {
    /// Case-insensitive substring match over title and description.
    pub search: Option<String>,
    pub category_id: Option<Uuid>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub status: Option<ListingStatus>,
    pub author_id: Option<Uuid>,
    pub ordering: ListingOrdering,
}

impl ListingFilter {
    /// The trimmed search term, if any non-blank one was given.
    pub fn search_term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn matches_fields(&self, listing: &crate::models::Listing) -> bool {
        if let Some(term) = self.search_term() {
            let term = term.to_lowercase();
            if !listing.title.to_lowercase().contains(&term)
                && !listing.description.to_lowercase().contains(&term)
            {
                return false;
            }
        }
        self.category_id.is_none_or(|c| listing.category_id == c)
            && self.min_price.is_none_or(|p| listing.price >= p)
            && self.max_price.is_none_or(|p| listing.price <= p)
            && self.status.is_none_or(|s| listing.status == s)
            && self.author_id.is_none_or(|a| listing.author_id == a)
    }
}

/// UserOrdering
///
/// Sort keys of the staff user list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserOrdering {
    JoinedAsc,
    #[default]
    JoinedDesc,
    UsernameAsc,
    UsernameDesc,
}

impl UserOrdering {
    /// Parses `date_joined`, `-date_joined`, `username` or `-username`; anything else falls back to
    /// newest first.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("date_joined") => UserOrdering::JoinedAsc,
            Some("-date_joined") => UserOrdering::JoinedDesc,
            Some("username") => UserOrdering::UsernameAsc,
            Some("-username") => UserOrdering::UsernameDesc,
            _ => UserOrdering::default(),
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            UserOrdering::JoinedAsc => "date_joined ASC, id ASC",
            UserOrdering::JoinedDesc => "date_joined DESC, id DESC",
            UserOrdering::UsernameAsc => "username ASC, id ASC",
            UserOrdering::UsernameDesc => "username DESC, id DESC",
        }
    }
}

/// UserFilter
///
/// `search` matches username, email and both names, case-insensitively.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserFilter {
    pub search: Option<String>,
    pub ordering: UserOrdering,
}

impl UserFilter {
    pub fn search_term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn matches(&self, user: &User) -> bool {
        let Some(term) = self.search_term() else {
            return true;
        };
        let term = term.to_lowercase();
        [&user.username, &user.email, &user.first_name, &user.last_name]
            .iter()
            .any(|field| field.to_lowercase().contains(&term))
    }
}

/// PageRequest
///
/// A validated, 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, page_size: DEFAULT_PAGE_SIZE }
    }
}

impl PageRequest {
    /// Page 0 does not exist; a zero page size means the default and oversized pages are clamped.
    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Result<Self, AppError> {
        let page = page.unwrap_or(1);
        if page == 0 {
            return Err(AppError::NotFound);
        }
        let page_size = match page_size {
            None | Some(0) => DEFAULT_PAGE_SIZE,
            Some(size) => size.min(MAX_PAGE_SIZE),
        };
        Ok(Self { page, page_size })
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.page_size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    /// Wraps one page of results. Asking past the last page is `NotFound`, except for page 1 of an
    /// empty collection.
    pub fn into_page<T>(self, results: Vec<T>, count: i64) -> Result<Page<T>, AppError> {
        let count = count.max(0);
        let total_pages = u32::try_from((count + i64::from(self.page_size) - 1) / i64::from(self.page_size))
            .unwrap_or(u32::MAX);
        if self.page > total_pages.max(1) {
            return Err(AppError::NotFound);
        }
        Ok(Page {
            count,
            page: self.page,
            page_size: self.page_size,
            total_pages,
            results,
        })
    }
}
