//! Continuation tokens: typed pagination cursors and their wire form.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use relfga_storage::{ChangelogPosition, StorePosition};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::encoder::Encoder;
use crate::error::{ServerError, ServerResult};

/// Resume point handed to clients between pages.
///
/// Store listings and changelog reads are separate pagination spaces; each
/// query accepts only its own variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContinuationToken {
    /// Position in the store listing.
    Stores {
        created_at: DateTime<Utc>,
        id: String,
    },
    /// Position in a store's changelog, plus the type filter it was minted under.
    Changes {
        store_id: String,
        timestamp: DateTime<Utc>,
        ulid: String,
        /// Empty when the read was unfiltered.
        #[serde(default)]
        object_type: String,
    },
}

impl ContinuationToken {
    pub fn from_store_position(position: StorePosition) -> Self {
        ContinuationToken::Stores {
            created_at: position.created_at,
            id: position.id,
        }
    }

    pub fn from_changelog_position(
        store_id: &str,
        position: ChangelogPosition,
        object_type: &str,
    ) -> Self {
        ContinuationToken::Changes {
            store_id: store_id.to_string(),
            timestamp: position.timestamp,
            ulid: position.ulid,
            object_type: object_type.to_string(),
        }
    }
}

/// Converts [`ContinuationToken`]s to and from opaque strings.
///
/// The cursor is serialized as JSON and the bytes are handed to the
/// configured [`Encoder`]. Shape checks are left to the queries.
#[derive(Debug, Clone)]
pub struct TokenSerializer {
    encoder: Arc<dyn Encoder>,
}

impl TokenSerializer {
    pub fn new(encoder: Arc<dyn Encoder>) -> Self {
        Self { encoder }
    }

    /// Serializes a cursor into a token string.
    pub fn serialize(&self, token: &ContinuationToken) -> ServerResult<String> {
        let payload = serde_json::to_vec(token).map_err(|e| ServerError::Internal {
            message: format!("failed to serialize continuation token: {e}"),
        })?;
        self.encoder
            .encode(&payload)
            .map_err(|e| ServerError::Internal {
                message: format!("failed to encode continuation token: {e}"),
            })
    }

    /// Parses a token string. An empty string means "from the start".
    pub fn deserialize(&self, token: &str) -> ServerResult<Option<ContinuationToken>> {
        if token.is_empty() {
            return Ok(None);
        }

        let payload = self.encoder.decode(token).map_err(|e| {
            debug!(error = %e, "rejecting undecodable continuation token");
            ServerError::InvalidContinuationToken
        })?;
        let cursor = serde_json::from_slice(&payload).map_err(|e| {
            debug!(error = %e, "rejecting continuation token with bad payload");
            ServerError::InvalidContinuationToken
        })?;
        Ok(Some(cursor))
    }
}
