//! Read-only queries.
//!
//! Queries are stateless: every bit of resume state travels in the client's
//! continuation token, so one instance can serve any number of concurrent
//! callers behind an `Arc`.

mod get_store;
mod list_stores;
mod read_changes;

pub use get_store::GetStoreQuery;
pub use list_stores::ListStoresQuery;
pub use read_changes::ReadChangesQuery;

use crate::error::{ServerError, ServerResult};
use crate::types::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

/// Page size bounds applied to paginated requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSizeLimits {
    /// Used when the request leaves the page size unset.
    pub default: u32,
    /// Largest accepted page size.
    pub max: u32,
}

impl Default for PageSizeLimits {
    fn default() -> Self {
        Self {
            default: DEFAULT_PAGE_SIZE,
            max: MAX_PAGE_SIZE,
        }
    }
}

impl PageSizeLimits {
    /// Resolves a requested page size: unset takes the default, anything
    /// outside `1..=max` is rejected.
    pub fn resolve(&self, requested: Option<i32>) -> ServerResult<usize> {
        let Some(requested) = requested else {
            return Ok(self.default as usize);
        };
        match u32::try_from(requested) {
            Ok(size) if (1..=self.max).contains(&size) => Ok(size as usize),
            _ => Err(ServerError::InvalidArgument {
                message: format!(
                    "page_size must be between 1 and {}, got {requested}",
                    self.max
                ),
            }),
        }
    }
}
