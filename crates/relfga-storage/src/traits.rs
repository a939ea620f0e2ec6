//! DataStore trait definition and the value types it exchanges.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Maximum length of a store ID.
pub const MAX_STORE_ID_LENGTH: usize = 128;

/// Minimum and maximum length of a store name.
pub const MIN_STORE_NAME_LENGTH: usize = 3;
pub const MAX_STORE_NAME_LENGTH: usize = 64;

/// Field length limits for tuple keys (OpenFGA compatible).
pub const MAX_OBJECT_LENGTH: usize = 256;
pub const MAX_RELATION_LENGTH: usize = 50;
pub const MAX_USER_LENGTH: usize = 512;

/// Store metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the store has been soft-deleted. Deleted stores are never
    /// returned by `get_store` or `list_stores`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Store {
    /// Position of this store in the creation-ordered registry.
    pub fn position(&self) -> StorePosition {
        StorePosition {
            created_at: self.created_at,
            id: self.id.clone(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A point in the store registry, ordered by `(created_at, id)`.
///
/// Field order matters: the derived `Ord` compares `created_at` first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorePosition {
    pub created_at: DateTime<Utc>,
    pub id: String,
}

/// An `(object, relation, user)` authorization fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TupleKey {
    /// Object in `type:id` form.
    pub object: String,
    pub relation: String,
    pub user: String,
}

impl TupleKey {
    pub fn new(
        object: impl Into<String>,
        relation: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            object: object.into(),
            relation: relation.into(),
            user: user.into(),
        }
    }

    /// The type portion of the object (`repo` for `repo:openfga`).
    pub fn object_type(&self) -> &str {
        self.object
            .split_once(':')
            .map(|(object_type, _)| object_type)
            .unwrap_or(&self.object)
    }
}

impl fmt::Display for TupleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.user)
    }
}

/// Kind of mutation recorded in the changelog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TupleOperation {
    Write,
    Delete,
}

impl TupleOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TupleOperation::Write => "TUPLE_OPERATION_WRITE",
            TupleOperation::Delete => "TUPLE_OPERATION_DELETE",
        }
    }

    /// Parses the persisted representation produced by [`TupleOperation::as_str`].
    pub fn parse(value: &str) -> StorageResult<Self> {
        match value {
            "TUPLE_OPERATION_WRITE" => Ok(TupleOperation::Write),
            "TUPLE_OPERATION_DELETE" => Ok(TupleOperation::Delete),
            other => Err(StorageError::InternalError {
                message: format!("unknown tuple operation in changelog: {other}"),
            }),
        }
    }
}

impl fmt::Display for TupleOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single changelog entry.
///
/// Entries are append-only: once committed they are never mutated or
/// reordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupleChange {
    pub tuple_key: TupleKey,
    pub operation: TupleOperation,
    pub timestamp: DateTime<Utc>,
    /// Tie-break identifier for entries sharing a timestamp.
    pub ulid: String,
}

impl TupleChange {
    pub fn position(&self) -> ChangelogPosition {
        ChangelogPosition {
            timestamp: self.timestamp,
            ulid: self.ulid.clone(),
        }
    }
}

/// A point in a store's changelog, ordered by `(timestamp, ulid)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChangelogPosition {
    pub timestamp: DateTime<Utc>,
    pub ulid: String,
}

/// Filter for reading the changelog.
#[derive(Debug, Clone, Default)]
pub struct ReadChangesFilter {
    /// Only changes whose object has this type.
    pub object_type: Option<String>,
    /// Only changes strictly after this position.
    pub after: Option<ChangelogPosition>,
    /// Only changes with a timestamp at or before this instant.
    pub until: Option<DateTime<Utc>>,
}

impl ReadChangesFilter {
    /// Returns true if the change satisfies every bound of the filter.
    pub fn matches(&self, change: &TupleChange) -> bool {
        self.object_type
            .as_deref()
            .map_or(true, |ot| change.tuple_key.object_type() == ot)
            && self
                .after
                .as_ref()
                .map_or(true, |after| change.position() > *after)
            && self.until.map_or(true, |until| change.timestamp <= until)
    }
}

/// Abstract storage interface for the store registry and tuple changelog.
///
/// Implementations must be thread-safe (Send + Sync) and support
/// async operations. Every paginated read is strictly ordered and resumes
/// strictly after the supplied position, so callers can build cursors out of
/// the last item they received.
#[async_trait]
pub trait DataStore: Send + Sync + 'static {
    // Store operations

    /// Creates a new store.
    async fn create_store(&self, id: &str, name: &str) -> StorageResult<Store>;

    /// Gets a store by ID. Soft-deleted stores are reported as not found.
    async fn get_store(&self, id: &str) -> StorageResult<Store>;

    /// Soft-deletes a store. The store disappears from listings immediately.
    async fn delete_store(&self, id: &str) -> StorageResult<()>;

    /// Lists up to `page_size` live stores strictly after `after`, in
    /// creation order.
    async fn list_stores(
        &self,
        after: Option<&StorePosition>,
        page_size: usize,
    ) -> StorageResult<Vec<Store>>;

    // Tuple operations

    /// Atomically applies deletes and writes, appending one changelog entry
    /// per tuple. Either every operation is applied or none is.
    async fn write_tuples(
        &self,
        store_id: &str,
        writes: Vec<TupleKey>,
        deletes: Vec<TupleKey>,
    ) -> StorageResult<()>;

    // Changelog operations

    /// Reads up to `page_size` changelog entries matching `filter`, ordered
    /// by `(timestamp, ulid)` ascending.
    async fn read_changes(
        &self,
        store_id: &str,
        filter: &ReadChangesFilter,
        page_size: usize,
    ) -> StorageResult<Vec<TupleChange>>;
}

/// Rejects a batch that mentions the same tuple more than once.
pub fn validate_unique_keys(writes: &[TupleKey], deletes: &[TupleKey]) -> StorageResult<()> {
    let mut seen = HashSet::with_capacity(writes.len() + deletes.len());
    for key in writes.iter().chain(deletes) {
        if !seen.insert(key) {
            return Err(StorageError::InvalidInput {
                message: format!("duplicate tuple in write request: {key}"),
            });
        }
    }
    Ok(())
}

/// Validates a store ID.
pub fn validate_store_id(id: &str) -> StorageResult<()> {
    if id.is_empty() {
        return Err(StorageError::InvalidInput {
            message: "store_id cannot be empty".to_string(),
        });
    }
    if id.len() > MAX_STORE_ID_LENGTH {
        return Err(StorageError::InvalidInput {
            message: format!("store_id exceeds maximum length of {MAX_STORE_ID_LENGTH}"),
        });
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(StorageError::InvalidInput {
            message: format!("store_id contains invalid characters: {id}"),
        });
    }
    Ok(())
}

/// Validates a store name: 3-64 characters of letters, digits, spaces and `._-/`.
pub fn validate_store_name(name: &str) -> StorageResult<()> {
    let len = name.chars().count();
    if !(MIN_STORE_NAME_LENGTH..=MAX_STORE_NAME_LENGTH).contains(&len) {
        return Err(StorageError::InvalidInput {
            message: format!(
                "store name must be between {MIN_STORE_NAME_LENGTH} and {MAX_STORE_NAME_LENGTH} characters"
            ),
        });
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-' | '/'))
    {
        return Err(StorageError::InvalidInput {
            message: format!("store name contains invalid characters: {name}"),
        });
    }
    Ok(())
}

/// Validates an object type used as a changelog filter.
pub fn validate_object_type(object_type: &str) -> StorageResult<()> {
    if object_type.is_empty()
        || object_type.len() > MAX_OBJECT_LENGTH
        || object_type.contains([':', '#', '@'])
        || object_type.chars().any(char::is_whitespace)
    {
        return Err(StorageError::InvalidInput {
            message: format!("invalid object type: {object_type:?}"),
        });
    }
    Ok(())
}

/// Validates a tuple key before it is written or deleted.
pub fn validate_tuple_key(key: &TupleKey) -> StorageResult<()> {
    let invalid = |message: String| Err(StorageError::InvalidInput { message });

    match key.object.split_once(':') {
        Some((object_type, object_id)) if !object_type.is_empty() && !object_id.is_empty() => {
            validate_object_type(object_type)?;
        }
        _ => return invalid(format!("object must be in type:id format: {}", key.object)),
    }
    if key.object.len() > MAX_OBJECT_LENGTH {
        return invalid(format!(
            "object exceeds maximum length of {MAX_OBJECT_LENGTH}"
        ));
    }

    if key.relation.is_empty() || key.relation.contains([':', '#', '@']) {
        return invalid(format!("invalid relation: {:?}", key.relation));
    }
    if key.relation.len() > MAX_RELATION_LENGTH {
        return invalid(format!(
            "relation exceeds maximum length of {MAX_RELATION_LENGTH}"
        ));
    }

    if key.user.is_empty() || key.user.chars().any(char::is_whitespace) {
        return invalid(format!("invalid user: {:?}", key.user));
    }
    if key.user.len() > MAX_USER_LENGTH {
        return invalid(format!("user exceeds maximum length of {MAX_USER_LENGTH}"));
    }

    Ok(())
}
