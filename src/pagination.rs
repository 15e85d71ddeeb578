//! # Pagination
//!
//! Data sources answer list requests either with a bare collection or with a
//! paginated envelope. Both are folded into a single [`Page`] here so the rest
//! of the crate never has to probe response shapes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Paginated list response produced by a data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedEnvelope<T> {
    pub list: Vec<T>,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default = "first_page")]
    pub pages: u32,
    #[serde(default)]
    pub total: u64,
}

fn first_page() -> u32 {
    1
}

/// Either response shape a list function may return
#[derive(Debug, Clone, PartialEq)]
pub enum ListResponse<T> {
    Paginated(PaginatedEnvelope<T>),
    Items(Vec<T>),
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self {
        ListResponse::Items(items)
    }
}

impl<T> From<PaginatedEnvelope<T>> for ListResponse<T> {
    fn from(envelope: PaginatedEnvelope<T>) -> Self {
        ListResponse::Paginated(envelope)
    }
}

impl<T: DeserializeOwned> ListResponse<T> {
    /// Classify an untyped response.
    ///
    /// An object with a `list` field is an envelope and an array is a bare
    /// collection. Anything else, or a payload whose items fail to
    /// deserialize, yields `None`.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Object(ref map) if map.contains_key("list") => {
                match serde_json::from_value::<PaginatedEnvelope<T>>(value) {
                    Ok(envelope) => Some(ListResponse::Paginated(envelope)),
                    Err(err) => {
                        debug!(error = %err, "Discarding malformed paginated envelope");
                        None
                    }
                }
            }
            serde_json::Value::Array(_) => match serde_json::from_value::<Vec<T>>(value) {
                Ok(items) => Some(ListResponse::Items(items)),
                Err(err) => {
                    debug!(error = %err, "Discarding malformed list response");
                    None
                }
            },
            _ => None,
        }
    }
}

/// Canonical list state committed by a context
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub list: Option<Vec<T>>,
    pub page: u32,
    pub pages: u32,
    pub total: u64,
}

impl<T> Page<T> {
    /// State used before the first fetch and after a failed one
    pub fn reset() -> Self {
        Self {
            list: None,
            page: 1,
            pages: 1,
            total: 0,
        }
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self::reset()
    }
}

/// Reduce a list response to a [`Page`].
///
/// A `limit` of zero disables pagination: every item lands on a single page.
pub fn normalize<T>(response: Option<ListResponse<T>>, limit: u32) -> Page<T> {
    match response {
        Some(ListResponse::Paginated(envelope)) => Page {
            list: Some(envelope.list),
            page: envelope.page,
            pages: envelope.pages,
            total: envelope.total,
        },
        Some(ListResponse::Items(items)) => {
            let total = items.len() as u64;
            Page {
                list: Some(items),
                page: 1,
                pages: page_count(total, limit),
                total,
            }
        }
        None => Page::reset(),
    }
}

/// Normalize an untyped response; unrecognized shapes become the reset state.
pub fn normalize_value<T: DeserializeOwned>(value: Option<serde_json::Value>, limit: u32) -> Page<T> {
    normalize(value.and_then(ListResponse::from_value), limit)
}

/// Number of pages needed for `total` items, never less than one
pub fn page_count(total: u64, limit: u32) -> u32 {
    if limit == 0 {
        return 1;
    }
    let pages = total.div_ceil(u64::from(limit));
    u32::try_from(pages).unwrap_or(u32::MAX).max(1)
}

/// Renderable description of the pagination control.
///
/// A presentation layer renders this however it likes; moving between pages
/// is done by writing `page_param` in the navigable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaginationView {
    pub page: u32,
    pub pages: u32,
    pub total: u64,
    pub page_param: String,
    pub is_loading: bool,
    pub has_next: bool,
    pub has_previous: bool,
}

impl PaginationView {
    pub fn new<T>(page: &Page<T>, page_param: &str, is_loading: bool) -> Self {
        Self {
            page: page.page,
            pages: page.pages,
            total: page.total,
            page_param: page_param.to_string(),
            is_loading,
            has_next: page.page < page.pages,
            has_previous: page.page > 1,
        }
    }
}
