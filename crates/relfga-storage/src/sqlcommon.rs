//! Helpers shared by the SQL backends.

use chrono::{DateTime, Duration, Utc};
use ulid::Generator;

use crate::error::{StorageError, StorageResult};
use crate::traits::{TupleKey, TupleOperation};

/// Default health check / query timeouts in seconds.
pub(crate) const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Current time truncated to microseconds.
///
/// Both Postgres `TIMESTAMPTZ` and MySQL `DATETIME(6)` keep microsecond
/// precision. Truncating before the value is bound means the timestamp we
/// hand back to callers is exactly the one the database will return later,
/// so cursors built from either compare equal.
pub(crate) fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

/// Timestamp for a write batch, given the newest changelog timestamp of the
/// store.
///
/// Must be called while the store row is locked. The result is strictly after
/// `last`, so batches committed later never sort before ones already visible
/// to readers, even when the wall clock stalls or steps back.
pub(crate) fn next_batch_timestamp(last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = now_micros();
    match last {
        Some(prev) if now <= prev => prev + Duration::microseconds(1),
        _ => now,
    }
}

/// A changelog row waiting to be inserted.
#[derive(Debug, Clone)]
pub(crate) struct PendingChange {
    pub tuple_key: TupleKey,
    pub operation: TupleOperation,
    pub ulid: String,
}

/// Orders a write batch the way it is applied (deletes first, then writes)
/// and assigns each entry a monotonically increasing ULID.
///
/// All entries of a batch share one timestamp; the ULIDs keep them in
/// application order.
pub(crate) fn pending_changes(
    timestamp: DateTime<Utc>,
    writes: &[TupleKey],
    deletes: &[TupleKey],
) -> StorageResult<Vec<PendingChange>> {
    let mut generator = Generator::new();
    let operations = deletes
        .iter()
        .map(|key| (key, TupleOperation::Delete))
        .chain(writes.iter().map(|key| (key, TupleOperation::Write)));

    operations
        .map(|(key, operation)| {
            let ulid = generator
                .generate_from_datetime(timestamp.into())
                .map_err(|e| StorageError::InternalError {
                    message: format!("failed to allocate changelog ulid: {e}"),
                })?;
            Ok(PendingChange {
                tuple_key: key.clone(),
                operation,
                ulid: ulid.to_string(),
            })
        })
        .collect()
}

/// Maps a uniqueness violation on the tuples table to the storage error the
/// write path reports.
pub(crate) fn tuple_exists_error(key: &TupleKey) -> StorageError {
    StorageError::TupleAlreadyExists {
        object: key.object.clone(),
        relation: key.relation.clone(),
        user: key.user.clone(),
    }
}

pub(crate) fn tuple_missing_error(key: &TupleKey) -> StorageError {
    StorageError::TupleNotFound {
        object: key.object.clone(),
        relation: key.relation.clone(),
        user: key.user.clone(),
    }
}
