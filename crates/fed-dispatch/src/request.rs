//! Worker request protocol.
//!
//! A [`FederatedRequest`] acts on one remote id of one worker. Requests for
//! one logical step are grouped into a [`RequestSet`] (one dispatch phase);
//! [`crate::map::FederationMap::execute`] turns a list of phases into one
//! ordered batch per partition.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fed_types::{DataType, Instruction, LocalData};

use crate::error::{FedError, Result};

// ── Request ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    /// Run an instruction against resident operands; registers `id` as the
    /// result.
    Execute,
    /// Upload a value (or an empty placeholder) and bind it to `id`.
    Store,
    /// Read back the value bound to `id`.
    Fetch,
    /// Release `id`.
    Clear,
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Execute => write!(f, "EXECUTE"),
            Self::Store   => write!(f, "STORE"),
            Self::Fetch   => write!(f, "FETCH"),
            Self::Clear   => write!(f, "CLEAR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RequestPayload {
    None,
    /// Worker-ready instruction string.
    Instruction(String),
    Data(LocalData),
    /// Empty variable of the given type, filled by a later instruction.
    Placeholder { data_type: DataType },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederatedRequest {
    pub kind: RequestType,
    pub id: i64,
    /// Transaction of the coordinator operation; stamped at dispatch.
    pub tid: Option<Uuid>,
    pub payload: RequestPayload,
}

impl FederatedRequest {
    pub fn execute(id: i64, instruction: &Instruction) -> Self {
        Self::new(RequestType::Execute, id, RequestPayload::Instruction(instruction.to_string()))
    }

    pub fn store(id: i64, data: LocalData) -> Self {
        Self::new(RequestType::Store, id, RequestPayload::Data(data))
    }

    pub fn placeholder(id: i64, data_type: DataType) -> Self {
        Self::new(RequestType::Store, id, RequestPayload::Placeholder { data_type })
    }

    pub fn fetch(id: i64) -> Self {
        Self::new(RequestType::Fetch, id, RequestPayload::None)
    }

    pub fn clear(id: i64) -> Self {
        Self::new(RequestType::Clear, id, RequestPayload::None)
    }

    fn new(kind: RequestType, id: i64, payload: RequestPayload) -> Self {
        Self {
            kind,
            id,
            tid: None,
            payload,
        }
    }

    pub fn with_tid(mut self, tid: Uuid) -> Self {
        self.tid = Some(tid);
        self
    }

    pub fn instruction(&self) -> Option<&str> {
        match &self.payload {
            RequestPayload::Instruction(s) => Some(s),
            _ => None,
        }
    }
}

// ── Response ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Success,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederatedResponse {
    pub status: ResponseStatus,
    pub data: Option<LocalData>,
}

impl FederatedResponse {
    pub fn success() -> Self {
        Self {
            status: ResponseStatus::Success,
            data: None,
        }
    }

    pub fn with_data(data: LocalData) -> Self {
        Self {
            status: ResponseStatus::Success,
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error(message.into()),
            data: None,
        }
    }

    pub fn is_successful(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.status {
            ResponseStatus::Success => None,
            ResponseStatus::Error(msg) => Some(msg),
        }
    }
}

// ── Request Set ───────────────────────────────────────────────────────────────

/// Requests making up one dispatch phase over a federation map.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestSet {
    /// The same request goes to every partition.
    All(FederatedRequest),
    /// One optional request per partition, in partition order. `None`
    /// partitions sit this phase out.
    PerPartition(Vec<Option<FederatedRequest>>),
}

impl RequestSet {
    pub fn per_partition(requests: Vec<FederatedRequest>) -> Self {
        Self::PerPartition(requests.into_iter().map(Some).collect())
    }

    pub fn for_partition(&self, index: usize) -> Option<&FederatedRequest> {
        match self {
            Self::All(req) => Some(req),
            Self::PerPartition(reqs) => reqs.get(index).and_then(Option::as_ref),
        }
    }

    /// True if partition `index` receives a request in this phase.
    pub fn targets(&self, index: usize) -> bool {
        self.for_partition(index).is_some()
    }

    /// Remote id of the first request in the set.
    pub fn id(&self) -> Option<i64> {
        match self {
            Self::All(req) => Some(req.id),
            Self::PerPartition(reqs) => reqs.iter().flatten().map(|r| r.id).next(),
        }
    }

    /// Number of requests this phase emits over `partitions` partitions.
    pub fn request_count(&self, partitions: usize) -> usize {
        match self {
            Self::All(_) => partitions,
            Self::PerPartition(reqs) => reqs.iter().flatten().count(),
        }
    }

    pub(crate) fn check_len(&self, partitions: usize) -> Result<()> {
        match self {
            Self::PerPartition(reqs) if reqs.len() != partitions => Err(FedError::Execution(format!(
                "request set covers {} partitions, map has {partitions}",
                reqs.len()
            ))),
            _ => Ok(()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fed_types::DenseBlock;

    #[test]
    fn request_set_lookup() {
        let set = RequestSet::PerPartition(vec![
            None,
            Some(FederatedRequest::clear(7)),
            None,
        ]);
        assert!(!set.targets(0));
        assert!(set.targets(1));
        assert!(!set.targets(5));
        assert_eq!(set.id(), Some(7));
        assert_eq!(set.request_count(3), 1);
        assert!(set.check_len(3).is_ok());
        assert!(set.check_len(4).is_err());

        let all = RequestSet::All(FederatedRequest::fetch(3));
        assert!(all.targets(9));
        assert_eq!(all.request_count(4), 4);
    }

    #[test]
    fn response_status() {
        assert!(FederatedResponse::success().is_successful());
        let err = FederatedResponse::error("boom");
        assert!(!err.is_successful());
        assert_eq!(err.error_message(), Some("boom"));
    }

    #[test]
    fn request_serde() {
        let req = FederatedRequest::store(
            5,
            LocalData::Matrix(DenseBlock::zeros(2, 2)),
        )
        .with_tid(Uuid::new_v4());
        let json = serde_json::to_string(&req).unwrap();
        let back: FederatedRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }
}
