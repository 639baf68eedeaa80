use crate::part::Part;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const MAX_PAGE_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchSort {
    Relevance,
    PriceAsc,
    PriceDesc,
    Newest,
}

impl Default for SearchSort {
    fn default() -> Self {
        SearchSort::Relevance
    }
}

/// Which backend actually served a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchSource {
    #[serde(rename = "search-store")]
    SearchStore,
    #[serde(rename = "primary-store")]
    PrimaryStore,
}

/// A part search as issued by the outside query handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
    #[serde(default)]
    pub in_stock: bool,
    #[serde(default)]
    pub sort: SearchSort,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_page() -> usize {
    1
}
fn default_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            brand: None,
            supplier: None,
            min_price: None,
            max_price: None,
            in_stock: false,
            sort: SearchSort::default(),
            page: default_page(),
            limit: default_limit(),
        }
    }
}

impl SearchRequest {
    /// Page and limit clamped to sane bounds.
    pub fn clamped(&self) -> (usize, usize) {
        let limit = self.limit.clamp(1, MAX_PAGE_LIMIT);
        let page = self.page.max(1);
        (page, limit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<Part>,
    pub total: u64,
    pub total_pages: u64,
    pub has_more: bool,
    /// Milliseconds spent serving the query.
    #[serde(rename = "searchTime")]
    pub search_time_ms: u64,
    pub source: SearchSource,
}
