use std::sync::Arc;

use relfga_storage::traits::validate_store_name;
use relfga_storage::DataStore;
use tracing::{info, instrument};
use ulid::Ulid;

use crate::error::ServerResult;
use crate::types::{CreateStoreRequest, StoreInfo};

/// Creates a store under a freshly allocated ULID.
pub struct CreateStoreCommand<D: DataStore> {
    datastore: Arc<D>,
}

impl<D: DataStore> CreateStoreCommand<D> {
    pub fn new(datastore: Arc<D>) -> Self {
        Self { datastore }
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn execute(&self, request: CreateStoreRequest) -> ServerResult<StoreInfo> {
        validate_store_name(&request.name)?;

        let id = Ulid::new().to_string();
        let store = self.datastore.create_store(&id, &request.name).await?;
        info!(store_id = %store.id, "store created");

        Ok(store.into())
    }
}
