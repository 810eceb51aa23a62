//! Page results.

use serde::Serialize;

use crate::collection::Collection;

/// One page of results together with the total row count.
#[derive(Debug, Clone, Serialize)]
pub struct LengthAwarePaginator {
    #[serde(rename = "data")]
    pub items: Collection,
    pub total: u64,
    pub per_page: u64,
    pub current_page: u64,
    pub last_page: u64,
}

impl LengthAwarePaginator {
    pub(crate) fn new(items: Collection, total: u64, per_page: u64, current_page: u64) -> Self {
        let last_page = total.div_ceil(per_page.max(1)).max(1);
        Self {
            items,
            total,
            per_page,
            current_page,
            last_page,
        }
    }

    pub fn has_more_pages(&self) -> bool {
        self.current_page < self.last_page
    }

    /// 1-based position of the first item on this page, if any.
    pub fn from(&self) -> Option<u64> {
        (!self.items.is_empty()).then(|| (self.current_page - 1) * self.per_page + 1)
    }

    pub fn to(&self) -> Option<u64> {
        self.from().map(|from| from + self.items.len() as u64 - 1)
    }
}

/// One page of results without a total; built by over-fetching one row.
#[derive(Debug, Clone, Serialize)]
pub struct Paginator {
    #[serde(rename = "data")]
    pub items: Collection,
    pub per_page: u64,
    pub current_page: u64,
    pub has_more: bool,
}
