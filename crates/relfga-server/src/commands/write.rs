use std::sync::Arc;

use relfga_storage::DataStore;
use tracing::{debug, instrument};

use crate::error::{ServerError, ServerResult};
use crate::types::{WriteRequest, MAX_TUPLES_PER_WRITE};

/// Applies a batch of tuple writes and deletes.
///
/// The batch is atomic: if any tuple cannot be written or deleted nothing is
/// applied and no changelog entries appear.
pub struct WriteCommand<D: DataStore> {
    datastore: Arc<D>,
}

impl<D: DataStore> WriteCommand<D> {
    pub fn new(datastore: Arc<D>) -> Self {
        Self { datastore }
    }

    /// Validates the shape of a write request before touching storage.
    pub fn validate(&self, request: &WriteRequest) -> ServerResult<()> {
        let total = request.writes.len() + request.deletes.len();
        if total == 0 {
            return Err(ServerError::InvalidArgument {
                message: "write request must contain at least one write or delete".to_string(),
            });
        }
        if total > MAX_TUPLES_PER_WRITE {
            return Err(ServerError::InvalidArgument {
                message: format!(
                    "write request exceeds the limit of {MAX_TUPLES_PER_WRITE} tuples, got {total}"
                ),
            });
        }
        Ok(())
    }

    #[instrument(
        skip(self, request),
        fields(store_id = %request.store_id, writes = request.writes.len(), deletes = request.deletes.len())
    )]
    pub async fn execute(&self, request: WriteRequest) -> ServerResult<()> {
        self.validate(&request)?;

        self.datastore
            .write_tuples(&request.store_id, request.writes, request.deletes)
            .await?;
        debug!("write applied");
        Ok(())
    }
}
