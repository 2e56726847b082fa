// Services shared by every rewrite: worker transport, id allocation and
// configuration.

use std::sync::Arc;

use fed_types::FederationConfig;

use crate::client::FederatedClient;
use crate::ident::{AtomicIdAllocator, IdAllocator};

#[derive(Clone)]
pub struct FedRuntime {
    client: Arc<dyn FederatedClient>,
    ids: Arc<dyn IdAllocator>,
    config: FederationConfig,
}

impl FedRuntime {
    /// Runtime drawing ids from the process-wide allocator.
    pub fn new(client: Arc<dyn FederatedClient>, config: FederationConfig) -> Self {
        Self::with_ids(client, AtomicIdAllocator::process_wide(), config)
    }

    pub fn with_ids(
        client: Arc<dyn FederatedClient>,
        ids: Arc<dyn IdAllocator>,
        config: FederationConfig,
    ) -> Self {
        Self { client, ids, config }
    }

    pub fn client(&self) -> &dyn FederatedClient {
        self.client.as_ref()
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    pub fn next_id(&self) -> i64 {
        self.ids.next_id()
    }
}
