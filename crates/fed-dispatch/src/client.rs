// Transport seam between the coordinator and its workers.

use async_trait::async_trait;

use fed_types::WorkerAddress;

use crate::error::Result;
use crate::request::{FederatedRequest, FederatedResponse};

/// Sends an ordered batch to one worker and waits for its responses.
///
/// Implementations must execute the batch in order and return exactly one
/// response per request. Transport failures (unreachable worker, broken
/// framing) are `Err`; a request the worker rejected is an unsuccessful
/// [`FederatedResponse`].
#[async_trait]
pub trait FederatedClient: Send + Sync {
    async fn send(
        &self,
        worker: &WorkerAddress,
        batch: Vec<FederatedRequest>,
    ) -> Result<Vec<FederatedResponse>>;
}
