use std::sync::Arc;

use relfga_storage::DataStore;
use tracing::{info, instrument};

use crate::error::ServerResult;
use crate::types::DeleteStoreRequest;

/// Soft-deletes a store. The store drops out of listings at once, including
/// listings already in progress.
pub struct DeleteStoreCommand<D: DataStore> {
    datastore: Arc<D>,
}

impl<D: DataStore> DeleteStoreCommand<D> {
    pub fn new(datastore: Arc<D>) -> Self {
        Self { datastore }
    }

    #[instrument(skip(self, request), fields(store_id = %request.store_id))]
    pub async fn execute(&self, request: DeleteStoreRequest) -> ServerResult<()> {
        self.datastore.delete_store(&request.store_id).await?;
        info!("store deleted");
        Ok(())
    }
}
