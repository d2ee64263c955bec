use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// 1-indexed page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}

impl Pagination {
    /// Page and size are clamped to at least 1.
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.max(1),
        }
    }

    /// Reapplies the clamp to values that bypassed `new`, e.g. deserialized requests.
    pub fn clamped(self) -> Self {
        Self::new(self.page, self.page_size)
    }

    pub fn offset(self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageData<T> {
    pub list: Vec<T>,
    pub total: u64,
}

impl<T> PageData<T> {
    pub fn new(list: Vec<T>, total: u64) -> Self {
        Self { list, total }
    }
}
