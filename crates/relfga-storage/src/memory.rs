//! In-memory storage implementation for testing.
//!
//! Each store owns a `StoreLog`: the set of live tuples plus an append-only
//! changelog. Timestamps handed out by the in-memory clock are strictly
//! increasing, so the changelog vector is always sorted by
//! `(timestamp, ulid)` and paginated reads can binary-search the resume point.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, instrument};
use ulid::Ulid;

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    validate_store_id, validate_store_name, validate_tuple_key, validate_unique_keys, DataStore,
    ReadChangesFilter, Store, StorePosition, TupleChange, TupleKey, TupleOperation,
};

/// Live tuples and changelog of a single store.
#[derive(Debug, Default)]
struct StoreLog {
    tuples: HashSet<TupleKey>,
    changes: Vec<TupleChange>,
}

/// Hands out strictly increasing timestamps, even if the wall clock stalls
/// or steps backwards.
#[derive(Debug, Default)]
struct MonotonicClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl MonotonicClock {
    fn next(&self) -> StorageResult<DateTime<Utc>> {
        let mut last = self.last.lock().map_err(|_| StorageError::InternalError {
            message: "memory clock lock poisoned".to_string(),
        })?;
        let now = Utc::now();
        let next = match *last {
            Some(prev) if now <= prev => prev + Duration::nanoseconds(1),
            _ => now,
        };
        *last = Some(next);
        Ok(next)
    }
}

/// In-memory implementation of DataStore.
///
/// # Performance Characteristics
///
/// - **Write tuples**: O(W) for W operations (HashSet membership + append)
/// - **Read changes**: O(log N + K) (binary search to the cursor, then scan)
/// - **List stores**: O(S log S) (stores are sorted per call)
///
/// Uses DashMap for thread-safe concurrent access. A write holds the shard
/// lock of its store's log for the whole batch, which makes batches atomic
/// with respect to concurrent readers.
#[derive(Debug, Default)]
pub struct MemoryDataStore {
    stores: DashMap<String, Store>,
    logs: DashMap<String, StoreLog>,
    clock: MonotonicClock,
}

impl MemoryDataStore {
    /// Creates a new in-memory data store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory data store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn ensure_live(&self, store_id: &str) -> StorageResult<()> {
        match self.stores.get(store_id) {
            Some(store) if !store.is_deleted() => Ok(()),
            _ => Err(StorageError::StoreNotFound {
                store_id: store_id.to_string(),
            }),
        }
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn create_store(&self, id: &str, name: &str) -> StorageResult<Store> {
        // Validate inputs
        validate_store_id(id)?;
        validate_store_name(name)?;

        let now = self.clock.next()?;
        let store = Store {
            id: id.to_string(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        // Use atomic entry API to prevent race condition between check and insert
        use dashmap::mapref::entry::Entry;
        match self.stores.entry(id.to_string()) {
            Entry::Occupied(_) => {
                return Err(StorageError::StoreAlreadyExists {
                    store_id: id.to_string(),
                });
            }
            Entry::Vacant(entry) => {
                entry.insert(store.clone());
            }
        }

        self.logs.entry(id.to_string()).or_default();

        Ok(store)
    }

    async fn get_store(&self, id: &str) -> StorageResult<Store> {
        self.stores
            .get(id)
            .filter(|s| !s.is_deleted())
            .map(|s| s.value().clone())
            .ok_or_else(|| StorageError::StoreNotFound {
                store_id: id.to_string(),
            })
    }

    #[instrument(skip(self), fields(store_id = %id))]
    async fn delete_store(&self, id: &str) -> StorageResult<()> {
        // Serializes with write_tuples; a vacant entry is not inserted.
        let _log = self.logs.entry(id.to_string());
        let now = self.clock.next()?;
        let mut entry = self
            .stores
            .get_mut(id)
            .filter(|s| !s.is_deleted())
            .ok_or_else(|| StorageError::StoreNotFound {
                store_id: id.to_string(),
            })?;

        entry.deleted_at = Some(now);
        entry.updated_at = now;
        debug!("store soft-deleted");
        Ok(())
    }

    async fn list_stores(
        &self,
        after: Option<&StorePosition>,
        page_size: usize,
    ) -> StorageResult<Vec<Store>> {
        let mut stores: Vec<Store> = self
            .stores
            .iter()
            .filter(|s| !s.is_deleted())
            .map(|s| s.value().clone())
            .collect();
        stores.sort_by_key(Store::position);

        let start = match after {
            Some(after) => stores.partition_point(|s| s.position() <= *after),
            None => 0,
        };

        Ok(stores.into_iter().skip(start).take(page_size).collect())
    }

    #[instrument(skip(self, writes, deletes), fields(writes = writes.len(), deletes = deletes.len()))]
    async fn write_tuples(
        &self,
        store_id: &str,
        writes: Vec<TupleKey>,
        deletes: Vec<TupleKey>,
    ) -> StorageResult<()> {
        // Validate inputs
        validate_store_id(store_id)?;
        for key in writes.iter().chain(&deletes) {
            validate_tuple_key(key)?;
        }
        validate_unique_keys(&writes, &deletes)?;

        // Holding the log entry keeps the whole batch atomic. delete_store
        // takes the same entry, so liveness cannot change under us.
        let mut log = self.logs.entry(store_id.to_string()).or_default();
        self.ensure_live(store_id)?;

        for key in &deletes {
            if !log.tuples.contains(key) {
                return Err(StorageError::TupleNotFound {
                    object: key.object.clone(),
                    relation: key.relation.clone(),
                    user: key.user.clone(),
                });
            }
        }
        for key in &writes {
            if log.tuples.contains(key) {
                return Err(StorageError::TupleAlreadyExists {
                    object: key.object.clone(),
                    relation: key.relation.clone(),
                    user: key.user.clone(),
                });
            }
        }

        let operations = deletes
            .into_iter()
            .map(|key| (key, TupleOperation::Delete))
            .chain(writes.into_iter().map(|key| (key, TupleOperation::Write)));

        for (key, operation) in operations {
            match operation {
                TupleOperation::Delete => log.tuples.remove(&key),
                TupleOperation::Write => log.tuples.insert(key.clone()),
            };
            let timestamp = self.clock.next()?;
            log.changes.push(TupleChange {
                tuple_key: key,
                operation,
                timestamp,
                ulid: Ulid::new().to_string(),
            });
        }

        Ok(())
    }

    async fn read_changes(
        &self,
        store_id: &str,
        filter: &ReadChangesFilter,
        page_size: usize,
    ) -> StorageResult<Vec<TupleChange>> {
        self.ensure_live(store_id)?;

        let Some(log) = self.logs.get(store_id) else {
            return Ok(Vec::new());
        };

        let start = match filter.after {
            Some(ref after) => log.changes.partition_point(|c| c.position() <= *after),
            None => 0,
        };

        Ok(log.changes[start..]
            .iter()
            .take_while(|c| filter.until.map_or(true, |until| c.timestamp <= until))
            .filter(|c| filter.matches(c))
            .take(page_size)
            .cloned()
            .collect())
    }
}
