//! Batch envelope encode/decode for worker transport.
//!
//! A batch (all requests of one dispatch to one worker, in send order) is
//! serialized with bincode, standard config. Responses come back as a batch
//! of the same length.

use crate::error::{FedError, Result};
use crate::request::{FederatedRequest, FederatedResponse};

pub fn encode_request_batch(batch: &[FederatedRequest]) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(batch, bincode::config::standard())
        .map_err(|e| FedError::Serialization(e.to_string()))
}

pub fn decode_request_batch(data: &[u8]) -> Result<Vec<FederatedRequest>> {
    let (batch, _) = bincode::serde::decode_from_slice(data, bincode::config::standard())
        .map_err(|e| FedError::Serialization(e.to_string()))?;
    Ok(batch)
}

pub fn encode_response_batch(batch: &[FederatedResponse]) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(batch, bincode::config::standard())
        .map_err(|e| FedError::Serialization(e.to_string()))
}

pub fn decode_response_batch(data: &[u8]) -> Result<Vec<FederatedResponse>> {
    let (batch, _) = bincode::serde::decode_from_slice(data, bincode::config::standard())
        .map_err(|e| FedError::Serialization(e.to_string()))?;
    Ok(batch)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
