//! Request and response types for queries and commands.
//!
//! Transport-agnostic; a gRPC or HTTP layer maps its messages onto these.

use chrono::{DateTime, Utc};
use relfga_storage::{Store, TupleChange, TupleKey, TupleOperation};
use serde::{Deserialize, Serialize};

/// Default page size when a request leaves it unset.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Largest page size a request may ask for.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Maximum number of tuple operations (writes + deletes) per write request.
pub const MAX_TUPLES_PER_WRITE: usize = 100;

/// A store as returned to clients. Deleted stores are never returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Store> for StoreInfo {
    fn from(store: Store) -> Self {
        Self {
            id: store.id,
            name: store.name,
            created_at: store.created_at,
            updated_at: store.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListStoresRequest {
    pub page_size: Option<i32>,
    pub continuation_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListStoresResponse {
    pub stores: Vec<StoreInfo>,
    /// Empty on the last page.
    pub continuation_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadChangesRequest {
    pub store_id: String,
    /// Object type filter; empty reads every type.
    pub r#type: String,
    pub continuation_token: String,
    pub page_size: Option<i32>,
}

impl ReadChangesRequest {
    pub fn new(store_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, object_type: impl Into<String>) -> Self {
        self.r#type = object_type.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.continuation_token = token.into();
        self
    }

    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

/// A single changelog entry as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupleChangeInfo {
    pub tuple_key: TupleKey,
    pub operation: TupleOperation,
    pub timestamp: DateTime<Utc>,
}

impl From<TupleChange> for TupleChangeInfo {
    fn from(change: TupleChange) -> Self {
        Self {
            tuple_key: change.tuple_key,
            operation: change.operation,
            timestamp: change.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadChangesResponse {
    pub changes: Vec<TupleChangeInfo>,
    /// Never empty once a page has been returned; re-issued unchanged when
    /// there is nothing new.
    pub continuation_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateStoreRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetStoreRequest {
    pub store_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteStoreRequest {
    pub store_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteRequest {
    pub store_id: String,
    pub writes: Vec<TupleKey>,
    pub deletes: Vec<TupleKey>,
}

impl WriteRequest {
    pub fn new(store_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            ..Default::default()
        }
    }

    pub fn write(mut self, key: TupleKey) -> Self {
        self.writes.push(key);
        self
    }

    pub fn delete(mut self, key: TupleKey) -> Self {
        self.deletes.push(key);
        self
    }
}
