use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use relfga_storage::traits::{validate_object_type, validate_store_id};
use relfga_storage::{ChangelogPosition, DataStore, ReadChangesFilter};
use tracing::{debug, instrument};

use super::PageSizeLimits;
use crate::error::{ServerError, ServerResult};
use crate::token::{ContinuationToken, TokenSerializer};
use crate::types::{ReadChangesRequest, ReadChangesResponse, TupleChangeInfo};

/// Pages through a store's tuple changelog.
///
/// Changes younger than the horizon offset are held back until they age
/// past it. When nothing new is available the caller's token is handed back
/// unchanged, so a client can keep polling with the same token.
pub struct ReadChangesQuery<D: DataStore> {
    datastore: Arc<D>,
    tokens: TokenSerializer,
    limits: PageSizeLimits,
    horizon_offset: chrono::Duration,
}

impl<D: DataStore> ReadChangesQuery<D> {
    pub fn new(
        datastore: Arc<D>,
        tokens: TokenSerializer,
        limits: PageSizeLimits,
        horizon_offset: Duration,
    ) -> Self {
        Self {
            datastore,
            tokens,
            limits,
            horizon_offset: chrono::Duration::from_std(horizon_offset)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    #[instrument(
        skip(self, request),
        fields(store_id = %request.store_id, object_type = %request.r#type, page_size = ?request.page_size)
    )]
    pub async fn execute(&self, request: ReadChangesRequest) -> ServerResult<ReadChangesResponse> {
        let result = self.read(request).await;

        let outcome = match &result {
            Ok(response) if response.changes.is_empty() => "empty",
            Ok(_) => "page",
            Err(_) => "error",
        };
        metrics::counter!("relfga_read_changes_total", "outcome" => outcome).increment(1);

        result
    }

    async fn read(&self, request: ReadChangesRequest) -> ServerResult<ReadChangesResponse> {
        validate_store_id(&request.store_id)?;
        if !request.r#type.is_empty() {
            validate_object_type(&request.r#type)?;
        }

        let after = self.resume_position(&request)?;
        let page_size = self.limits.resolve(request.page_size)?;

        let filter = ReadChangesFilter {
            object_type: (!request.r#type.is_empty()).then(|| request.r#type.clone()),
            after,
            until: self.horizon(),
        };
        let changes = self
            .datastore
            .read_changes(&request.store_id, &filter, page_size)
            .await?;

        let Some(last) = changes.last() else {
            debug!("no new changes");
            return Ok(ReadChangesResponse {
                changes: Vec::new(),
                continuation_token: request.continuation_token,
            });
        };

        let next = ContinuationToken::from_changelog_position(
            &request.store_id,
            last.position(),
            &request.r#type,
        );
        let continuation_token = self.tokens.serialize(&next)?;
        debug!(count = changes.len(), "read changes");

        Ok(ReadChangesResponse {
            changes: changes.into_iter().map(TupleChangeInfo::from).collect(),
            continuation_token,
        })
    }

    /// Decodes the request token into a changelog position.
    fn resume_position(
        &self,
        request: &ReadChangesRequest,
    ) -> ServerResult<Option<ChangelogPosition>> {
        match self.tokens.deserialize(&request.continuation_token)? {
            None => Ok(None),
            Some(ContinuationToken::Changes {
                store_id,
                timestamp,
                ulid,
                object_type,
            }) => {
                if store_id != request.store_id {
                    debug!(token_store_id = %store_id, "continuation token minted for another store");
                    return Err(ServerError::InvalidContinuationToken);
                }
                // A token from an unfiltered read may be narrowed to a type.
                if !object_type.is_empty() && object_type != request.r#type {
                    return Err(ServerError::MismatchObjectType);
                }
                Ok(Some(ChangelogPosition { timestamp, ulid }))
            }
            Some(_) => Err(ServerError::InvalidContinuationToken),
        }
    }

    /// Newest timestamp a read may return, or `None` without a horizon.
    fn horizon(&self) -> Option<DateTime<Utc>> {
        if self.horizon_offset.is_zero() {
            return None;
        }
        Some(
            Utc::now()
                .checked_sub_signed(self.horizon_offset)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        )
    }
}
