//! Item catalog listing models.

use serde::{Deserialize, Serialize};

/// A tradeable item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub members: bool,
    /// Grand Exchange buy limit per four hours.
    #[serde(default)]
    pub limit: Option<u32>,
    /// High-alchemy base value.
    #[serde(default)]
    pub value: Option<i64>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub examine: Option<String>,
}

/// Pagination block of a catalog page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
}

/// One page of the paginated item listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogPage {
    pub data: Vec<Item>,
    pub meta: Pagination,
}
