// Query model shared by both storage adapters: filter, sort, pagination

mod filter;

pub use filter::{compare_values, matches};

use crate::document::Document;
use serde::{Deserialize, Serialize};

/// Default page size when a pagination block omits `perPage`.
pub const DEFAULT_PER_PAGE: u64 = 50;

/// A find request: `{filter, sort: {field, order}, pagination: {page, perPage}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Query {
    #[serde(default)]
    pub filter: Document,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Sort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl Query {
    pub fn filter(filter: Document) -> Self {
        Query {
            filter,
            ..Default::default()
        }
    }

    pub fn sorted(mut self, field: &str, order: SortOrder) -> Self {
        self.sort = Some(Sort {
            field: field.to_string(),
            order,
        });
        self
    }

    pub fn paged(mut self, page: u64, per_page: u64) -> Self {
        self.pagination = Some(Pagination { page, per_page });
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sort {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

/// Sort direction. Anything other than `DESC` sorts ascending.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum SortOrder {
    #[serde(rename = "DESC")]
    Desc,
    #[default]
    #[serde(rename = "ASC", other)]
    Asc,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    DEFAULT_PER_PAGE
}

impl Pagination {
    /// Page clamped to at least 1.
    pub fn effective_page(&self) -> u64 {
        self.page.max(1)
    }

    pub fn effective_per_page(&self) -> u64 {
        if self.per_page == 0 {
            DEFAULT_PER_PAGE
        } else {
            self.per_page
        }
    }
}

/// Describes which slice of the matching set a find returned.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaginationInfo {
    pub page: u64,
    pub count: u64,
    pub skip: u64,
    pub per_page: u64,
    pub last_page: u64,
}

impl PaginationInfo {
    /// Compute the pagination window from the total match count.
    ///
    /// Without a pagination request the whole result is reported as one page.
    pub fn compute(pagination: Option<&Pagination>, count: u64) -> Self {
        match pagination {
            Some(p) => {
                let page = p.effective_page();
                let per_page = p.effective_per_page();
                let skip = if count > 0 { (page - 1) * per_page } else { 0 };
                PaginationInfo {
                    page,
                    count,
                    skip,
                    per_page,
                    last_page: count.div_ceil(per_page),
                }
            }
            None => PaginationInfo {
                page: 1,
                count,
                skip: 0,
                per_page: count,
                last_page: 1,
            },
        }
    }
}

/// Documents returned by a find, plus the window they came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FindResult {
    pub documents: Vec<Document>,
    pub pagination: PaginationInfo,
}
