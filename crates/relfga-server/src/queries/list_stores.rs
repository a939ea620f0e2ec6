use std::sync::Arc;

use relfga_storage::{DataStore, StorePosition};
use tracing::{debug, instrument};

use super::PageSizeLimits;
use crate::error::{ServerError, ServerResult};
use crate::token::{ContinuationToken, TokenSerializer};
use crate::types::{ListStoresRequest, ListStoresResponse, StoreInfo};

/// Pages through live stores in creation order.
///
/// A full page always carries a token, even if it happens to be the last
/// one; the follow-up call then returns an empty page with an empty token.
pub struct ListStoresQuery<D: DataStore> {
    datastore: Arc<D>,
    tokens: TokenSerializer,
    limits: PageSizeLimits,
}

impl<D: DataStore> ListStoresQuery<D> {
    pub fn new(datastore: Arc<D>, tokens: TokenSerializer, limits: PageSizeLimits) -> Self {
        Self {
            datastore,
            tokens,
            limits,
        }
    }

    #[instrument(skip(self, request), fields(page_size = ?request.page_size))]
    pub async fn execute(&self, request: ListStoresRequest) -> ServerResult<ListStoresResponse> {
        let after = match self.tokens.deserialize(&request.continuation_token)? {
            None => None,
            Some(ContinuationToken::Stores { created_at, id }) => {
                Some(StorePosition { created_at, id })
            }
            Some(_) => return Err(ServerError::InvalidContinuationToken),
        };
        let page_size = self.limits.resolve(request.page_size)?;

        let stores = self.datastore.list_stores(after.as_ref(), page_size).await?;

        let continuation_token = match stores.last() {
            Some(last) if stores.len() == page_size => self
                .tokens
                .serialize(&ContinuationToken::from_store_position(last.position()))?,
            _ => String::new(),
        };
        debug!(count = stores.len(), "listed stores");

        Ok(ListStoresResponse {
            stores: stores.into_iter().map(StoreInfo::from).collect(),
            continuation_token,
        })
    }
}
