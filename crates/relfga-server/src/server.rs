//! Entry point wiring a datastore and configuration into every query and
//! command.

use std::sync::Arc;

use relfga_storage::DataStore;
use tracing::info;

use crate::commands::{CreateStoreCommand, DeleteStoreCommand, WriteCommand};
use crate::config::{ConfigLoadError, ContinuationTokenSettings, ServerConfig};
use crate::encoder::{Base64Encoder, Encoder, HmacEncoder, NoopEncoder};
use crate::error::ServerResult;
use crate::queries::{GetStoreQuery, ListStoresQuery, ReadChangesQuery};
use crate::token::TokenSerializer;
use crate::types::{
    CreateStoreRequest, DeleteStoreRequest, GetStoreRequest, ListStoresRequest,
    ListStoresResponse, ReadChangesRequest, ReadChangesResponse, StoreInfo, WriteRequest,
};

/// Builds the continuation token encoder named in the configuration.
pub fn build_encoder(
    settings: &ContinuationTokenSettings,
) -> Result<Arc<dyn Encoder>, ConfigLoadError> {
    match settings.encoder.as_str() {
        "noop" => Ok(Arc::new(NoopEncoder)),
        "base64" => Ok(Arc::new(Base64Encoder)),
        "hmac" => {
            let key = settings.key.as_deref().unwrap_or_default();
            let encoder = HmacEncoder::new(key.as_bytes()).map_err(|e| ConfigLoadError::Invalid {
                message: format!("continuation_token.key: {e}"),
            })?;
            Ok(Arc::new(encoder))
        }
        other => Err(ConfigLoadError::Invalid {
            message: format!("unknown continuation_token.encoder: {other}"),
        }),
    }
}

/// All queries and commands over one datastore.
///
/// Cheap to share behind an `Arc`; every method can run concurrently.
pub struct Server<D: DataStore> {
    list_stores: ListStoresQuery<D>,
    get_store: GetStoreQuery<D>,
    read_changes: ReadChangesQuery<D>,
    create_store: CreateStoreCommand<D>,
    delete_store: DeleteStoreCommand<D>,
    write: WriteCommand<D>,
}

impl<D: DataStore> Server<D> {
    /// Creates a server over `datastore` using the given configuration.
    pub fn new(datastore: Arc<D>, config: &ServerConfig) -> Result<Self, ConfigLoadError> {
        config.validate()?;

        let tokens = TokenSerializer::new(build_encoder(&config.continuation_token)?);
        let limits = config.pagination.limits();
        info!(
            encoder = %config.continuation_token.encoder,
            horizon_offset_ms = config.changelog.horizon_offset_ms,
            "server configured"
        );

        Ok(Self {
            list_stores: ListStoresQuery::new(Arc::clone(&datastore), tokens.clone(), limits),
            get_store: GetStoreQuery::new(Arc::clone(&datastore)),
            read_changes: ReadChangesQuery::new(
                Arc::clone(&datastore),
                tokens,
                limits,
                config.changelog.horizon_offset(),
            ),
            create_store: CreateStoreCommand::new(Arc::clone(&datastore)),
            delete_store: DeleteStoreCommand::new(Arc::clone(&datastore)),
            write: WriteCommand::new(datastore),
        })
    }

    pub async fn create_store(&self, request: CreateStoreRequest) -> ServerResult<StoreInfo> {
        self.create_store.execute(request).await
    }

    pub async fn get_store(&self, request: GetStoreRequest) -> ServerResult<StoreInfo> {
        self.get_store.execute(request).await
    }

    pub async fn delete_store(&self, request: DeleteStoreRequest) -> ServerResult<()> {
        self.delete_store.execute(request).await
    }

    pub async fn list_stores(&self, request: ListStoresRequest) -> ServerResult<ListStoresResponse> {
        self.list_stores.execute(request).await
    }

    pub async fn write(&self, request: WriteRequest) -> ServerResult<()> {
        self.write.execute(request).await
    }

    pub async fn read_changes(
        &self,
        request: ReadChangesRequest,
    ) -> ServerResult<ReadChangesResponse> {
        self.read_changes.execute(request).await
    }
}
