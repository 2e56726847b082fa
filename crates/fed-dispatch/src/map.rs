//! Partition maps.
//!
//! A [`FederationMap`] records which worker holds which box of a logical
//! matrix or frame, and under which remote id. Maps are values: every
//! operation that changes geometry or ids returns a new map, so a map
//! attached to one object is never mutated through another.
//!
//! The map is also the dispatch unit. [`FederationMap::execute`] takes the
//! phases of one operation, builds one ordered batch per partition and sends
//! all batches concurrently, failing the whole call on the first error.

use std::collections::HashSet;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use fed_types::{DataType, FType, FederatedRange, IndexRange, LocalData, WorkerAddress};

use crate::error::{FedError, Result};
use crate::request::{FederatedRequest, FederatedResponse, RequestSet};
use crate::runtime::FedRuntime;

// ── Partition ─────────────────────────────────────────────────────────────────

/// Remote handle of one partition: `(worker, remote id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederatedData {
    pub address: WorkerAddress,
    pub var_id: i64,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub range: FederatedRange,
    pub data: FederatedData,
}

impl Partition {
    pub fn new(range: FederatedRange, address: WorkerAddress, var_id: i64, data_type: DataType) -> Self {
        Self {
            range,
            data: FederatedData {
                address,
                var_id,
                data_type,
            },
        }
    }

    fn with_range(&self, range: FederatedRange) -> Self {
        Self {
            range,
            data: self.data.clone(),
        }
    }

    fn with_var_id(&self, var_id: i64) -> Self {
        Self {
            range: self.range,
            data: FederatedData {
                var_id,
                ..self.data.clone()
            },
        }
    }
}

// ── Federation Map ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FederationMapRepr")]
pub struct FederationMap {
    id: i64,
    ftype: FType,
    partitions: Vec<Partition>,
}

#[derive(Deserialize)]
struct FederationMapRepr {
    id: i64,
    ftype: FType,
    partitions: Vec<Partition>,
}

impl TryFrom<FederationMapRepr> for FederationMap {
    type Error = FedError;

    fn try_from(r: FederationMapRepr) -> Result<Self> {
        Self::new(r.id, r.ftype, r.partitions)
    }
}

impl FederationMap {
    /// Partitions of every kind but `Broadcast` must be pairwise disjoint.
    pub fn new(id: i64, ftype: FType, partitions: Vec<Partition>) -> Result<Self> {
        if ftype != FType::Broadcast {
            check_disjoint(&partitions, &[])?;
        }
        Ok(Self {
            id,
            ftype,
            partitions,
        })
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn ftype(&self) -> FType {
        self.ftype
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Distinct workers, in partition order.
    pub fn workers(&self) -> Vec<&WorkerAddress> {
        let mut seen = HashSet::new();
        self.partitions
            .iter()
            .map(|p| &p.data.address)
            .filter(|a| seen.insert(*a))
            .collect()
    }

    /// Largest end coordinate on `axis`; 0 for an empty map.
    pub fn max_index(&self, axis: usize) -> u64 {
        self.partitions
            .iter()
            .map(|p| p.range.end()[axis])
            .max()
            .unwrap_or(0)
    }

    /// Logical `(rows, cols)` covered by the map.
    pub fn dims(&self) -> (u64, u64) {
        (self.max_index(0), self.max_index(1))
    }

    // ── Geometry ─────────────────────────────────────────────────────────

    /// True iff both maps are partitioned as `ftype` and cut the
    /// partitioned axis at the same points, in the same order.
    pub fn is_aligned(&self, other: &FederationMap, ftype: FType) -> bool {
        if self.ftype != ftype || other.ftype != ftype {
            return false;
        }
        match ftype {
            FType::Broadcast => {
                self.partitions.first().map(|p| p.range) == other.partitions.first().map(|p| p.range)
            }
            FType::Full => {
                self.partitions.len() == other.partitions.len()
                    && self
                        .partitions
                        .iter()
                        .zip(&other.partitions)
                        .all(|(a, b)| a.range == b.range)
            }
            FType::Row | FType::Col => {
                let axis = if ftype == FType::Row { 0 } else { 1 };
                let cuts = |m: &FederationMap| -> Vec<(u64, u64)> {
                    m.partitions
                        .iter()
                        .map(|p| (p.range.begin()[axis], p.range.end()[axis]))
                        .collect()
                };
                cuts(self) == cuts(other)
            }
        }
    }

    /// True if partition `i` of both maps lives on the same worker, for
    /// every `i`.
    pub fn is_colocated(&self, other: &FederationMap) -> bool {
        self.partitions.len() == other.partitions.len()
            && self
                .partitions
                .iter()
                .zip(&other.partitions)
                .all(|(a, b)| a.data.address == b.data.address)
    }

    /// Partitions overlapping `ix`, each paired with its clipped box.
    pub fn intersecting<'a>(
        &'a self,
        ix: &IndexRange,
    ) -> impl Iterator<Item = (&'a Partition, FederatedRange)> + 'a {
        let target = ix.as_range();
        self.partitions
            .iter()
            .filter_map(move |p| p.range.intersect(&target).map(|clipped| (p, clipped)))
    }

    /// Map of the partitions overlapping `ix`, clipped to it. Coordinates
    /// stay in the original frame; disjoint partitions are dropped, so the
    /// result may be empty.
    pub fn filter(&self, ix: &IndexRange) -> FederationMap {
        FederationMap {
            id: self.id,
            ftype: self.ftype,
            partitions: self
                .intersecting(ix)
                .map(|(p, clipped)| p.with_range(clipped))
                .collect(),
        }
    }

    /// Same partitions, new coordinator-side id. Partition remote ids are
    /// kept: every worker still holds exactly what it held before.
    pub fn ident_copy(&self, new_id: i64) -> FederationMap {
        FederationMap {
            id: new_id,
            ..self.clone()
        }
    }

    /// Merge `other` into this map after translating it by
    /// `(row_offset, col_offset)`. Binding along the partitioned axis keeps
    /// the kind; binding across it yields `Full`.
    ///
    /// Callers must have established placement; overlapping geometry is a
    /// contract violation and reported as [`FedError::Alignment`].
    pub fn bind(&self, row_offset: u64, col_offset: u64, other: &FederationMap) -> Result<FederationMap> {
        if row_offset != 0 && col_offset != 0 {
            return Err(FedError::Alignment(format!(
                "bind offsets ({row_offset}, {col_offset}) span both axes"
            )));
        }
        let axis = if col_offset == 0 { 0 } else { 1 };

        let shifted: Vec<Partition> = other
            .partitions
            .iter()
            .map(|p| p.with_range(p.range.shift(row_offset, col_offset)))
            .collect();
        check_disjoint(&self.partitions, &shifted)?;

        let ftype = if self.ftype == other.ftype && self.ftype.axis() == Some(axis) {
            self.ftype
        } else {
            FType::Full
        };

        let mut partitions = self.partitions.clone();
        partitions.extend(shifted);
        Ok(FederationMap {
            id: self.id,
            ftype,
            partitions,
        })
    }

    /// Fresh remote ids for an artifact created on every partition: the
    /// first partition on each worker gets the returned base id, every
    /// further partition sharing that worker gets its own id.
    pub fn result_ids(&self, rt: &FedRuntime) -> (i64, Vec<i64>) {
        let base = rt.next_id();
        let mut seen = HashSet::new();
        let ids = self
            .partitions
            .iter()
            .map(|p| if seen.insert(&p.data.address) { base } else { rt.next_id() })
            .collect();
        (base, ids)
    }

    /// Same map with partition `i` bound to remote id `ids[i]`.
    pub fn with_var_ids(&self, ids: &[i64]) -> Result<FederationMap> {
        if ids.len() != self.partitions.len() {
            return Err(FedError::Execution(format!(
                "{} remote ids for {} partitions",
                ids.len(),
                self.partitions.len()
            )));
        }
        Ok(FederationMap {
            id: self.id,
            ftype: self.ftype,
            partitions: self
                .partitions
                .iter()
                .zip(ids)
                .map(|(p, &id)| p.with_var_id(id))
                .collect(),
        })
    }

    /// Same geometry, bound to `id` on every worker (the id a dispatch just
    /// registered).
    pub fn copy_with_new_id(&self, id: i64) -> FederationMap {
        FederationMap {
            id,
            ftype: self.ftype,
            partitions: self.partitions.iter().map(|p| p.with_var_id(id)).collect(),
        }
    }

    /// [`Self::copy_with_new_id`] with every partition's end on `axis` moved
    /// to `end`; used when a worker-side op widens each partition.
    pub fn copy_with_new_id_resized(&self, id: i64, axis: usize, end: u64) -> Result<FederationMap> {
        let partitions = self
            .partitions
            .iter()
            .map(|p| -> Result<Partition> { Ok(p.with_var_id(id).with_range(p.range.with_end(axis, end)?)) })
            .collect::<Result<Vec<_>>>()?;
        Ok(FederationMap {
            id,
            ftype: self.ftype,
            partitions,
        })
    }

    /// Express every range relative to `origin`.
    pub fn rebase(&self, origin: [u64; 2]) -> Result<FederationMap> {
        let partitions = self
            .partitions
            .iter()
            .map(|p| -> Result<Partition> { Ok(p.with_range(p.range.rebase(origin)?)) })
            .collect::<Result<Vec<_>>>()?;
        Ok(FederationMap {
            id: self.id,
            ftype: self.ftype,
            partitions,
        })
    }

    // ── Request builders ─────────────────────────────────────────────────

    /// Store the whole of `data` under `id` on every partition's worker.
    pub fn broadcast(&self, id: i64, data: &LocalData) -> RequestSet {
        RequestSet::All(FederatedRequest::store(id, data.clone()))
    }

    /// Store `data[slices[i]]` under `ids[i]` on partition `i`'s worker.
    /// Partitions with no slice get no request.
    pub fn broadcast_sliced(&self, ids: &[i64], data: &LocalData, slices: &[Option<IndexRange>]) -> Result<RequestSet> {
        let n = self.partitions.len();
        if slices.len() != n || ids.len() != n {
            return Err(FedError::Execution(format!(
                "{} slice specs and {} ids for {n} partitions",
                slices.len(),
                ids.len()
            )));
        }
        let requests = slices
            .iter()
            .zip(ids)
            .map(|(slice, &id)| -> Result<Option<FederatedRequest>> {
                match slice {
                    Some(ix) => Ok(Some(FederatedRequest::store(id, data.slice(ix)?))),
                    None => Ok(None),
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RequestSet::PerPartition(requests))
    }

    /// Release every remote id `shipped` created, once per worker and id.
    pub fn cleanup(&self, shipped: &RequestSet) -> RequestSet {
        let mut seen = HashSet::new();
        RequestSet::PerPartition(
            self.partitions
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    shipped
                        .for_partition(i)
                        .filter(|req| seen.insert((&p.data.address, req.id)))
                        .map(|req| FederatedRequest::clear(req.id))
                })
                .collect(),
        )
    }

    // ── Dispatch ─────────────────────────────────────────────────────────

    /// Send `phases` to the workers and wait for every batch.
    ///
    /// Partition `i` receives its requests of each phase, in phase order, as
    /// one batch; batches of different partitions run concurrently. The
    /// result holds each partition's responses in partition order (empty for
    /// partitions no phase targets). With `wait_for_all`, an unsuccessful
    /// response fails the call; transport errors and timeouts always do.
    /// Side effects of batches that completed before a failure are not
    /// rolled back.
    pub async fn execute(
        &self,
        rt: &FedRuntime,
        tid: Uuid,
        wait_for_all: bool,
        phases: &[RequestSet],
    ) -> Result<Vec<Vec<FederatedResponse>>> {
        for phase in phases {
            phase.check_len(self.partitions.len())?;
        }
        let timeout = rt.config().dispatch_timeout;

        let calls = self.partitions.iter().enumerate().map(|(i, p)| {
            let batch: Vec<FederatedRequest> = phases
                .iter()
                .filter_map(|phase| phase.for_partition(i))
                .map(|req| req.clone().with_tid(tid))
                .collect();

            async move {
                if batch.is_empty() {
                    return Ok(Vec::new());
                }
                let worker = &p.data.address;
                let expected = batch.len();
                debug!(%tid, %worker, partition = i, requests = expected, "dispatching batch");

                let responses = tokio::time::timeout(timeout, rt.client().send(worker, batch))
                    .await
                    .map_err(|_| FedError::Timeout {
                        worker: worker.to_string(),
                        secs: timeout.as_secs(),
                    })??;

                if responses.len() != expected {
                    return Err(FedError::Dispatch {
                        worker: worker.to_string(),
                        message: format!("expected {expected} responses, got {}", responses.len()),
                    });
                }
                if wait_for_all {
                    if let Some(message) = responses.iter().find_map(FederatedResponse::error_message) {
                        warn!(%tid, %worker, partition = i, %message, "worker rejected request");
                        return Err(FedError::Dispatch {
                            worker: worker.to_string(),
                            message: message.to_string(),
                        });
                    }
                }
                Ok::<_, FedError>(responses)
            }
        });

        try_join_all(calls).await
    }

    /// Pull every partition back to the coordinator and assemble the full
    /// object.
    pub async fn acquire(&self, rt: &FedRuntime, tid: Uuid) -> Result<LocalData> {
        let first = self
            .partitions
            .first()
            .ok_or_else(|| FedError::Execution(format!("cannot acquire empty federation map {}", self.id)))?;

        // Every broadcast replica is complete; one fetch suffices.
        let fetch = if self.ftype == FType::Broadcast {
            let mut reqs = vec![None; self.partitions.len()];
            reqs[0] = Some(FederatedRequest::fetch(first.data.var_id));
            RequestSet::PerPartition(reqs)
        } else {
            RequestSet::PerPartition(
                self.partitions
                    .iter()
                    .map(|p| Some(FederatedRequest::fetch(p.data.var_id)))
                    .collect(),
            )
        };
        let responses = self.execute(rt, tid, true, &[fetch]).await?;

        let (rows, cols) = self.dims();
        let mut out = LocalData::empty(first.data.data_type, rows, cols, None)?;
        for (p, resp) in self.partitions.iter().zip(&responses) {
            let Some(resp) = resp.first() else { continue };
            let block = resp.data.as_ref().ok_or_else(|| FedError::Dispatch {
                worker: p.data.address.to_string(),
                message: format!("fetch of {} returned no data", p.data.var_id),
            })?;
            if (block.rows(), block.cols()) != (p.range.rows(), p.range.cols()) {
                return Err(FedError::Dispatch {
                    worker: p.data.address.to_string(),
                    message: format!(
                        "fetch of {} returned a {}x{} block for partition {}",
                        p.data.var_id,
                        block.rows(),
                        block.cols(),
                        p.range
                    ),
                });
            }
            out.place(p.range.begin(), block)?;
        }
        Ok(out)
    }
}

/// Wrap a coordinator-local block as a single-partition `Row` federation on
/// `address`. The returned store request must be dispatched before the map
/// is used.
pub fn federate_local_data(id: i64, address: WorkerAddress, data: &LocalData) -> Result<(FederationMap, FederatedRequest)> {
    let range = FederatedRange::new([0, 0], [data.rows(), data.cols()])?;
    let map = FederationMap::new(
        id,
        FType::Row,
        vec![Partition::new(range, address, id, data.data_type())],
    )?;
    Ok((map, FederatedRequest::store(id, data.clone())))
}

fn check_disjoint(existing: &[Partition], added: &[Partition]) -> Result<()> {
    let all: Vec<&Partition> = existing.iter().chain(added).collect();
    for (i, a) in all.iter().enumerate() {
        for b in &all[i + 1..] {
            if a.range.overlaps(&b.range) {
                return Err(FedError::Alignment(format!(
                    "partition {} on {} overlaps {} on {}",
                    a.range, a.data.address, b.range, b.data.address
                )));
            }
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
