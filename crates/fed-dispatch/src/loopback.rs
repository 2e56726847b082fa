//! In-process worker set.
//!
//! [`LoopbackCluster`] stands in for remote workers: every batch goes through
//! the wire codec, is logged in arrival order and applied to a per-worker
//! variable table. EXECUTE requests are not interpreted numerically; the
//! worker checks that every remote id the instruction reads is resident and
//! binds the request id to the instruction text. That is enough to observe
//! request ordering and id lifecycles.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use fed_types::{
    instruction::COPY_OPCODE, DataType, FType, FederatedRange, IndexRange, Instruction, LocalData, Operand,
    WorkerAddress,
};

use crate::client::FederatedClient;
use crate::error::{FedError, Result};
use crate::map::{FederationMap, Partition};
use crate::request::{FederatedRequest, FederatedResponse, RequestPayload, RequestType};
use crate::transport;

#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Data(LocalData),
    Placeholder(DataType),
    /// Result of an instruction, kept as its text.
    Derived(String),
}

#[derive(Debug, Clone)]
pub struct LoggedRequest {
    pub worker: WorkerAddress,
    pub request: FederatedRequest,
}

#[derive(Default)]
pub struct LoopbackCluster {
    vars: Mutex<HashMap<WorkerAddress, HashMap<i64, StoredValue>>>,
    log: Mutex<Vec<LoggedRequest>>,
    failing: Mutex<HashSet<WorkerAddress>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LoopbackCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `data` on `worker` under `id`, bypassing the request log.
    pub fn seed(&self, worker: &WorkerAddress, id: i64, data: LocalData) {
        lock(&self.vars)
            .entry(worker.clone())
            .or_default()
            .insert(id, StoredValue::Data(data));
    }

    /// Split `data` into contiguous row blocks, one per worker, seed each
    /// block under `id` and return the describing `Row` map.
    pub fn partition_rows(&self, id: i64, data: &LocalData, workers: &[WorkerAddress]) -> Result<FederationMap> {
        self.partition_along(id, data, workers, 0)
    }

    /// Column-block counterpart of [`Self::partition_rows`].
    pub fn partition_cols(&self, id: i64, data: &LocalData, workers: &[WorkerAddress]) -> Result<FederationMap> {
        self.partition_along(id, data, workers, 1)
    }

    fn partition_along(&self, id: i64, data: &LocalData, workers: &[WorkerAddress], axis: usize) -> Result<FederationMap> {
        let extent = if axis == 0 { data.rows() } else { data.cols() };
        let n = workers.len() as u64;
        if n == 0 || n > extent {
            return Err(FedError::Execution(format!(
                "cannot split extent {extent} over {n} workers"
            )));
        }
        let step = extent / n;

        let mut partitions = Vec::with_capacity(workers.len());
        for (i, worker) in workers.iter().enumerate() {
            let b = i as u64 * step;
            let e = if i as u64 == n - 1 { extent } else { b + step };
            let range = if axis == 0 {
                FederatedRange::new([b, 0], [e, data.cols()])?
            } else {
                FederatedRange::new([0, b], [data.rows(), e])?
            };
            self.seed(worker, id, data.slice(&IndexRange::from(range))?);
            partitions.push(Partition::new(range, worker.clone(), id, data.data_type()));
        }
        let ftype = if axis == 0 { FType::Row } else { FType::Col };
        FederationMap::new(id, ftype, partitions)
    }

    /// Make every later batch to `worker` fail at the transport level.
    pub fn fail_worker(&self, worker: &WorkerAddress) {
        lock(&self.failing).insert(worker.clone());
    }

    /// Every request received so far, in arrival order.
    pub fn log(&self) -> Vec<LoggedRequest> {
        lock(&self.log).clone()
    }

    pub fn clear_log(&self) {
        lock(&self.log).clear();
    }

    pub fn requests_to(&self, worker: &WorkerAddress) -> Vec<FederatedRequest> {
        lock(&self.log)
            .iter()
            .filter(|l| &l.worker == worker)
            .map(|l| l.request.clone())
            .collect()
    }

    pub fn holds(&self, worker: &WorkerAddress, id: i64) -> bool {
        lock(&self.vars)
            .get(worker)
            .is_some_and(|vars| vars.contains_key(&id))
    }

    pub fn value(&self, worker: &WorkerAddress, id: i64) -> Option<StoredValue> {
        lock(&self.vars).get(worker).and_then(|vars| vars.get(&id)).cloned()
    }

    fn apply(vars: &mut HashMap<i64, StoredValue>, req: &FederatedRequest) -> FederatedResponse {
        match (req.kind, &req.payload) {
            (RequestType::Store, RequestPayload::Data(data)) => {
                vars.insert(req.id, StoredValue::Data(data.clone()));
                FederatedResponse::success()
            }
            (RequestType::Store, RequestPayload::Placeholder { data_type }) => {
                vars.insert(req.id, StoredValue::Placeholder(*data_type));
                FederatedResponse::success()
            }
            (RequestType::Fetch, _) => match vars.get(&req.id) {
                Some(StoredValue::Data(data)) => FederatedResponse::with_data(data.clone()),
                Some(_) => FederatedResponse::error(format!("variable {} holds no materialized data", req.id)),
                None => FederatedResponse::error(format!("unknown variable {}", req.id)),
            },
            (RequestType::Clear, _) => match vars.remove(&req.id) {
                Some(_) => FederatedResponse::success(),
                None => FederatedResponse::error(format!("unknown variable {}", req.id)),
            },
            (RequestType::Execute, RequestPayload::Instruction(text)) => Self::execute(vars, req.id, text),
            (kind, _) => FederatedResponse::error(format!("malformed {kind} request")),
        }
    }

    fn execute(vars: &mut HashMap<i64, StoredValue>, id: i64, text: &str) -> FederatedResponse {
        let inst = match Instruction::parse(text) {
            Ok(inst) => inst,
            Err(e) => return FederatedResponse::error(e.to_string()),
        };

        if inst.opcode() == COPY_OPCODE {
            let src = inst.field(2).ok().and_then(|f| f.parse::<i64>().ok());
            return match src.and_then(|s| vars.get(&s).cloned()) {
                Some(value) => {
                    vars.insert(id, value);
                    FederatedResponse::success()
                }
                None => FederatedResponse::error(format!("copy source missing in `{text}`")),
            };
        }

        for field in &inst.fields()[2..] {
            let Ok(op) = Operand::parse(field) else { continue };
            if op.literal || op.data_type == DataType::Scalar {
                continue;
            }
            match op.name.parse::<i64>() {
                Ok(ref_id) if ref_id != id && !vars.contains_key(&ref_id) => {
                    return FederatedResponse::error(format!("unknown variable {ref_id} in `{text}`"));
                }
                Ok(_) => {}
                Err(_) => {
                    return FederatedResponse::error(format!("unresolved operand `{}` in `{text}`", op.name));
                }
            }
        }
        vars.insert(id, StoredValue::Derived(text.to_string()));
        FederatedResponse::success()
    }
}

#[async_trait]
impl FederatedClient for LoopbackCluster {
    async fn send(&self, worker: &WorkerAddress, batch: Vec<FederatedRequest>) -> Result<Vec<FederatedResponse>> {
        if lock(&self.failing).contains(worker) {
            return Err(FedError::Dispatch {
                worker: worker.to_string(),
                message: "connection refused".into(),
            });
        }

        let wire = transport::encode_request_batch(&batch)?;
        let batch = transport::decode_request_batch(&wire)?;
        debug!(%worker, requests = batch.len(), bytes = wire.len(), "loopback batch");

        let responses: Vec<FederatedResponse> = {
            let mut all = lock(&self.vars);
            let vars = all.entry(worker.clone()).or_default();
            let mut log = lock(&self.log);
            batch
                .iter()
                .map(|req| {
                    log.push(LoggedRequest {
                        worker: worker.clone(),
                        request: req.clone(),
                    });
                    Self::apply(vars, req)
                })
                .collect()
        };

        let wire = transport::encode_response_batch(&responses)?;
        transport::decode_response_batch(&wire)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
