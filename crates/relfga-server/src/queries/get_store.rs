use std::sync::Arc;

use relfga_storage::DataStore;
use tracing::instrument;

use crate::error::ServerResult;
use crate::types::{GetStoreRequest, StoreInfo};

/// Looks up a single live store.
pub struct GetStoreQuery<D: DataStore> {
    datastore: Arc<D>,
}

impl<D: DataStore> GetStoreQuery<D> {
    pub fn new(datastore: Arc<D>) -> Self {
        Self { datastore }
    }

    #[instrument(skip(self, request), fields(store_id = %request.store_id))]
    pub async fn execute(&self, request: GetStoreRequest) -> ServerResult<StoreInfo> {
        let store = self.datastore.get_store(&request.store_id).await?;
        Ok(store.into())
    }
}
