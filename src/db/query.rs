use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{ContentItem, ContentStatus, UserStatus};

pub const DEFAULT_PER_PAGE: u32 = 20;
/// Hard cap on page size.
pub const MAX_PER_PAGE: u32 = 200;

/// 1-indexed page request. The constructor clamps, so `page >= 1` and
/// `1 <= per_page <= MAX_PER_PAGE` always hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    per_page: u32,
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn from_params(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self::new(page.unwrap_or(1), per_page.unwrap_or(DEFAULT_PER_PAGE))
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, DEFAULT_PER_PAGE)
    }
}

/// One page of results plus the size of the whole filtered set.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> Page<T> {
    pub fn empty(request: PageRequest) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            page: request.page(),
            per_page: request.per_page(),
        }
    }

    /// Cuts the requested page out of an already filtered and ordered set.
    pub fn from_sorted(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(request.offset() as usize)
            .take(request.per_page() as usize)
            .collect();
        Self {
            items,
            total,
            page: request.page(),
            per_page: request.per_page(),
        }
    }

    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.per_page))
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    UpdatedAt,
    CreatedAt,
    Title,
    Id,
}

impl SortKey {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "updated_at" => Some(SortKey::UpdatedAt),
            "created_at" => Some(SortKey::CreatedAt),
            "title" => Some(SortKey::Title),
            "id" => Some(SortKey::Id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "asc" => Some(SortDirection::Asc),
            "desc" => Some(SortDirection::Desc),
            _ => None,
        }
    }
}

/// Ordering for content lists. Ties on the key fall back to `id` in the same
/// direction, which keeps pages disjoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sort {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl Sort {
    pub fn compare(&self, a: &ContentItem, b: &ContentItem) -> Ordering {
        let primary = match self.key {
            SortKey::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
            SortKey::Title => a.title.cmp(&b.title),
            SortKey::Id => Ordering::Equal,
        };
        let ordering = primary.then_with(|| a.id.cmp(&b.id));
        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

/// Predicates AND-ed together. An empty `statuses` means every status except
/// `deleted`.
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    pub category: Option<String>,
    /// Every listed tag must be present on the item.
    pub tags: Vec<String>,
    /// Case-insensitive substring over title, summary and content.
    pub search: Option<String>,
    pub statuses: Vec<ContentStatus>,
    pub created_by: Option<i64>,
    pub updated_from: Option<DateTime<Utc>>,
    pub updated_to: Option<DateTime<Utc>>,
}

impl ContentFilter {
    pub fn status_allowed(&self, status: ContentStatus) -> bool {
        if self.statuses.is_empty() {
            status != ContentStatus::Deleted
        } else {
            self.statuses.contains(&status)
        }
    }

    pub fn matches(&self, item: &ContentItem) -> bool {
        if !self.status_allowed(item.status) {
            return false;
        }
        if let Some(category) = &self.category {
            if &item.category != category {
                return false;
            }
        }
        if !self.tags.iter().all(|tag| item.tags.contains(tag)) {
            return false;
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let hit = [&item.title, &item.summary, &item.content]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        if let Some(created_by) = self.created_by {
            if item.created_by != Some(created_by) {
                return false;
            }
        }
        if let Some(from) = self.updated_from {
            if item.updated_at < from {
                return false;
            }
        }
        if let Some(to) = self.updated_to {
            if item.updated_at > to {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub filter: ContentFilter,
    pub page: PageRequest,
    pub sort: Sort,
}

#[derive(Debug, Clone, Default)]
pub struct UserQuery {
    /// Case-insensitive substring over username, display name and email.
    pub search: Option<String>,
    pub role: Option<String>,
    pub status: Option<UserStatus>,
    pub page: PageRequest,
}

#[derive(Debug, Clone, Default)]
pub struct AccessLogQuery {
    pub user_id: Option<i64>,
    pub action: Option<String>,
    pub page: PageRequest,
}
