//! Concatenation of two objects, at least one of them federated.
//!
//! Placement decides the plan:
//!
//! | lhs / rhs                          | axis  | plan                                  |
//! |------------------------------------|-------|---------------------------------------|
//! | aligned, co-located, same kind     | cross | one worker-side append per partition  |
//! | same kind otherwise                | any   | metadata bind, no requests            |
//! | ROW federated + local              | cbind | sliced broadcast, append, cleanup     |
//! | ROW federated + local              | rbind | federate local block, then bind       |

use tracing::{debug, info};
use uuid::Uuid;

use fed_types::{
    config::ExecutionMode, FType, Instruction, IndexRange, LocalData, Operand, TypesError, ValueType,
};

use crate::context::{ExecutionContext, FedObject};
use crate::error::{FedError, Result};
use crate::map::{federate_local_data, FederationMap};
use crate::request::{FederatedRequest, RequestSet};
use crate::runtime::FedRuntime;

use super::{data_operand, expect_parts, is_frame, worker_instruction};

const LHS: usize = 2;
const RHS: usize = 3;
const OUT: usize = 4;

#[derive(Debug, Clone)]
pub struct AppendOp {
    inst: Instruction,
    lhs: Operand,
    rhs: Operand,
    out: Operand,
    cbind: bool,
}

impl AppendOp {
    /// `append` carries a trailing cbind flag; `cbind`/`rbind` imply it.
    pub fn parse(inst: Instruction) -> Result<Self> {
        let cbind = match inst.opcode() {
            "cbind" => {
                expect_parts(&inst, 4)?;
                true
            }
            "rbind" => {
                expect_parts(&inst, 4)?;
                false
            }
            _ => {
                expect_parts(&inst, 5)?;
                inst.field(5)?.parse::<bool>().map_err(|_| {
                    TypesError::InvalidInstruction(format!("append flag must be true or false in `{inst}`"))
                })?
            }
        };
        Ok(Self {
            lhs: data_operand(&inst, LHS)?,
            rhs: data_operand(&inst, RHS)?,
            out: data_operand(&inst, OUT)?,
            inst,
            cbind,
        })
    }

    fn axis(&self) -> usize {
        if self.cbind { 1 } else { 0 }
    }

    fn axis_name(&self) -> &'static str {
        if self.cbind { "columns" } else { "rows" }
    }

    pub async fn process(&self, ec: &mut ExecutionContext, rt: &FedRuntime, tid: Uuid) -> Result<()> {
        let lhs = ec.object(&self.lhs.name)?.clone();
        let rhs = ec.object(&self.rhs.name)?.clone();

        // Conforming extent on the axis that is not concatenated.
        if (self.cbind && lhs.rows != rhs.rows) || (!self.cbind && lhs.cols != rhs.cols) {
            return Err(FedError::DimensionMismatch(format!(
                "cannot append {} {}x{} and {} {}x{} along {}",
                self.lhs.name,
                lhs.rows,
                lhs.cols,
                self.rhs.name,
                rhs.rows,
                rhs.cols,
                self.axis_name()
            )));
        }
        let (rows, cols) = if self.cbind {
            (lhs.rows, lhs.cols + rhs.cols)
        } else {
            (lhs.rows + rhs.rows, lhs.cols)
        };

        let map = match (lhs.is_federated(), rhs.is_federated()) {
            (true, true) => self.append_federated(&lhs, &rhs, rows, cols, rt, tid).await?,
            (true, false) if lhs.is_federated_as(FType::Row) => {
                self.append_local(&lhs, rhs.local_data()?, true, cols, rt, tid).await?
            }
            (false, true) if rhs.is_federated_as(FType::Row) => {
                self.append_local(&rhs, lhs.local_data()?, false, cols, rt, tid).await?
            }
            _ => return Err(self.unsupported(&lhs, &rhs)),
        };

        let mut out = FedObject::federated(map, self.out.data_type, rows, cols);
        if is_frame(&self.out) {
            out = out.with_schema(self.output_schema(&lhs, &rhs));
        }
        ec.set_object(self.out.name.clone(), out);
        Ok(())
    }

    async fn append_federated(
        &self,
        lhs: &FedObject,
        rhs: &FedObject,
        rows: u64,
        cols: u64,
        rt: &FedRuntime,
        tid: Uuid,
    ) -> Result<FederationMap> {
        let (a, b) = (lhs.fed_map()?, rhs.fed_map()?);
        if a.ftype() != b.ftype() || a.ftype() == FType::Broadcast {
            return Err(self.unsupported(lhs, rhs));
        }

        // Partitions cut across the concatenated axis: each worker already
        // holds both halves of its rows (or columns).
        let across = a.ftype().axis().is_some_and(|ax| ax != self.axis());
        if across && a.is_aligned(b, a.ftype()) && a.is_colocated(b) {
            let (out_id, out_ids) = a.result_ids(rt);
            let requests = a
                .partitions()
                .iter()
                .zip(b.partitions())
                .zip(&out_ids)
                .map(|((pa, pb), &out)| -> Result<FederatedRequest> {
                    let inst = worker_instruction(&self.inst, &[(LHS, pa.data.var_id), (RHS, pb.data.var_id)], OUT, out)?;
                    Ok(FederatedRequest::execute(out, &inst))
                })
                .collect::<Result<Vec<_>>>()?;
            info!(%tid, out_id, partitions = a.len(), "aligned federated append");
            a.execute(rt, tid, true, &[RequestSet::per_partition(requests)]).await?;
            let extent = if self.cbind { cols } else { rows };
            return a.copy_with_new_id_resized(out_id, self.axis(), extent)?.with_var_ids(&out_ids);
        }

        let id = rt.next_id();
        let (row_offset, col_offset) = if self.cbind { (0, lhs.cols) } else { (lhs.rows, 0) };
        debug!(%tid, id, row_offset, col_offset, "binding federation maps");
        a.ident_copy(id).bind(row_offset, col_offset, &b.ident_copy(id))
    }

    /// `fed` is the ROW-federated operand; `fed_is_lhs` keeps the operand
    /// order of the instruction.
    async fn append_local(
        &self,
        fed: &FedObject,
        local: &LocalData,
        fed_is_lhs: bool,
        cols: u64,
        rt: &FedRuntime,
        tid: Uuid,
    ) -> Result<FederationMap> {
        let map = fed.fed_map()?;
        if self.cbind {
            self.broadcast_append(map, local, fed_is_lhs, cols, rt, tid).await
        } else {
            let id = rt.next_id();
            let (local_map, store) = federate_local_data(id, rt.config().local_worker.clone(), local)?;
            info!(%tid, id, worker = %rt.config().local_worker, "federating local append operand");
            local_map.execute(rt, tid, true, &[RequestSet::All(store)]).await?;
            if fed_is_lhs {
                map.ident_copy(id).bind(fed.rows, 0, &local_map)
            } else {
                local_map.bind(local.rows(), 0, &map.ident_copy(id))
            }
        }
    }

    async fn broadcast_append(
        &self,
        map: &FederationMap,
        local: &LocalData,
        fed_is_lhs: bool,
        cols: u64,
        rt: &FedRuntime,
        tid: Uuid,
    ) -> Result<FederationMap> {
        let (fed_field, local_field) = if fed_is_lhs { (LHS, RHS) } else { (RHS, LHS) };
        let (bcast_id, bcast_ids) = map.result_ids(rt);
        let (out_id, out_ids) = map.result_ids(rt);

        let slices = map
            .partitions()
            .iter()
            .map(|p| -> Result<Option<IndexRange>> {
                Ok(Some(IndexRange::new(p.range.begin()[0], p.range.end()[0], 0, local.cols())?))
            })
            .collect::<Result<Vec<_>>>()?;
        let broadcast = map.broadcast_sliced(&bcast_ids, local, &slices)?;

        let appends = map
            .partitions()
            .iter()
            .zip(bcast_ids.iter().zip(&out_ids))
            .map(|(p, (&bcast, &out))| -> Result<FederatedRequest> {
                let inst = worker_instruction(&self.inst, &[(fed_field, p.data.var_id), (local_field, bcast)], OUT, out)?;
                Ok(FederatedRequest::execute(out, &inst))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut phases = vec![broadcast.clone()];
        if rt.config().execution_mode == ExecutionMode::Bulk {
            phases.push(RequestSet::per_partition(
                out_ids
                    .iter()
                    .map(|&out| FederatedRequest::placeholder(out, self.out.data_type))
                    .collect(),
            ));
        }
        phases.push(RequestSet::per_partition(appends));

        info!(%tid, bcast_id, out_id, partitions = map.len(), "broadcast append");
        map.execute(rt, tid, true, &phases).await?;
        map.execute(rt, tid, true, &[map.cleanup(&broadcast)]).await?;

        map.copy_with_new_id_resized(out_id, 1, cols)?.with_var_ids(&out_ids)
    }

    fn output_schema(&self, lhs: &FedObject, rhs: &FedObject) -> Vec<ValueType> {
        let left = lhs.schema.clone().unwrap_or_default();
        if self.cbind {
            let mut schema = left;
            schema.extend(rhs.schema.iter().flatten().copied());
            schema
        } else {
            left
        }
    }

    fn unsupported(&self, lhs: &FedObject, rhs: &FedObject) -> FedError {
        FedError::Unsupported {
            op: "append".into(),
            detail: format!(
                "{} ({}) with {} ({}) along {}",
                self.lhs.name,
                lhs.kind_name(),
                self.rhs.name,
                rhs.kind_name(),
                self.axis_name()
            ),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fed_types::{DataType, FederationConfig, FrameBlock};

    use super::*;
    use crate::loopback::{LoopbackCluster, StoredValue};
    use crate::request::{RequestPayload, RequestType};
    use crate::rewrite::fixtures::*;
    use crate::rewrite::FedInstruction;

    const CBIND: &str = "FED°append°A·MATRIX·FP64°B·MATRIX·FP64°C·MATRIX·FP64°true";
    const RBIND: &str = "FED°append°A·MATRIX·FP64°B·MATRIX·FP64°C·MATRIX·FP64°false";

    async fn run(ec: &mut ExecutionContext, rt: &FedRuntime, text: &str) -> Result<()> {
        FedInstruction::parse(text)?.process(ec, rt, Uuid::new_v4()).await
    }

    #[tokio::test]
    async fn cbind_row_federated_with_local() {
        let cluster = Arc::new(LoopbackCluster::new());
        let rt = runtime(&cluster, FederationConfig::default());
        let mut ec = ExecutionContext::new();
        federated_rows(&mut ec, &cluster, "A", 1, &matrix(100, 50), 4);
        ec.set_object("B", FedObject::local(matrix(100, 10)));

        run(&mut ec, &rt, CBIND).await.unwrap();

        let out = ec.object("C").unwrap();
        assert_eq!((out.rows, out.cols), (100, 60));
        let map = out.fed_map().unwrap();
        assert_eq!(map.dims(), (100, 60));
        assert_eq!(map.ftype(), FType::Row);

        // ids: 1000 broadcast slice, 1001 result
        for (i, w) in workers(4).iter().enumerate() {
            let reqs = cluster.requests_to(w);
            let kinds: Vec<RequestType> = reqs.iter().map(|r| r.kind).collect();
            assert_eq!(kinds, vec![RequestType::Store, RequestType::Execute, RequestType::Clear]);

            let RequestPayload::Data(slice) = &reqs[0].payload else { panic!("store without data") };
            assert_eq!((slice.rows(), slice.cols()), (25, 10));
            assert_eq!(reqs[0].id, 1000);
            assert_eq!(
                reqs[1].instruction(),
                Some("CP°append°1·MATRIX·FP64°1000·MATRIX·FP64°1001·MATRIX·FP64°true")
            );
            assert_eq!(reqs[2].id, 1000);

            assert!(cluster.holds(w, 1001));
            assert!(!cluster.holds(w, 1000));
            assert_eq!(map.partitions()[i].data.var_id, 1001);
        }
        // the slice carries the partition's rows of B
        let first = &cluster.requests_to(&worker(1))[0];
        assert_eq!(first.payload, RequestPayload::Data(matrix(100, 10).slice(&IndexRange::new(25, 50, 0, 10).unwrap()).unwrap()));
    }

    #[tokio::test]
    async fn cleanup_follows_acknowledged_appends() {
        let cluster = Arc::new(LoopbackCluster::new());
        let rt = runtime(&cluster, FederationConfig::default());
        let mut ec = ExecutionContext::new();
        federated_rows(&mut ec, &cluster, "A", 1, &matrix(100, 50), 4);
        ec.set_object("B", FedObject::local(matrix(100, 10)));

        run(&mut ec, &rt, CBIND).await.unwrap();

        let log = cluster.log();
        let last_execute = log.iter().rposition(|l| l.request.kind == RequestType::Execute).unwrap();
        let first_clear = log.iter().position(|l| l.request.kind == RequestType::Clear).unwrap();
        assert!(last_execute < first_clear);
        assert_eq!(log.iter().filter(|l| l.request.kind == RequestType::Clear).count(), 4);
    }

    #[tokio::test]
    async fn bulk_mode_adds_placeholder() {
        let cluster = Arc::new(LoopbackCluster::new());
        let config = FederationConfig {
            execution_mode: ExecutionMode::Bulk,
            ..FederationConfig::default()
        };
        let rt = runtime(&cluster, config);
        let mut ec = ExecutionContext::new();
        federated_rows(&mut ec, &cluster, "A", 1, &matrix(20, 5), 2);
        ec.set_object("B", FedObject::local(matrix(20, 3)));

        run(&mut ec, &rt, CBIND).await.unwrap();

        let reqs = cluster.requests_to(&worker(0));
        assert_eq!(reqs.len(), 4);
        assert_eq!(reqs[1].kind, RequestType::Store);
        assert_eq!(reqs[1].payload, RequestPayload::Placeholder { data_type: DataType::Matrix });
        assert_eq!(reqs[1].id, 1001);
        assert_eq!(reqs[2].kind, RequestType::Execute);
    }

    #[tokio::test]
    async fn local_lhs_keeps_operand_order() {
        let cluster = Arc::new(LoopbackCluster::new());
        let rt = runtime(&cluster, FederationConfig::default());
        let mut ec = ExecutionContext::new();
        ec.set_object("A", FedObject::local(matrix(20, 3)));
        federated_rows(&mut ec, &cluster, "B", 7, &matrix(20, 5), 2);

        run(&mut ec, &rt, CBIND).await.unwrap();

        let reqs = cluster.requests_to(&worker(1));
        assert_eq!(
            reqs[1].instruction(),
            Some("CP°append°1000·MATRIX·FP64°7·MATRIX·FP64°1001·MATRIX·FP64°true")
        );
        assert_eq!(ec.object("C").unwrap().cols, 8);
    }

    #[tokio::test]
    async fn rbind_unaligned_row_maps_is_metadata_only() {
        let cluster = Arc::new(LoopbackCluster::new());
        let rt = runtime(&cluster, FederationConfig::default());
        let mut ec = ExecutionContext::new();
        federated_rows(&mut ec, &cluster, "A", 1, &matrix(40, 6), 2);
        federated_rows(&mut ec, &cluster, "B", 2, &matrix(30, 6), 3);

        run(&mut ec, &rt, RBIND).await.unwrap();

        assert!(cluster.log().is_empty());
        let out = ec.object("C").unwrap();
        assert_eq!((out.rows, out.cols), (70, 6));
        let map = out.fed_map().unwrap();
        assert_eq!(map.ftype(), FType::Row);
        assert_eq!(map.len(), 5);
        assert_eq!(map.dims(), (70, 6));
        assert_eq!(map.id(), 1000);
        // remote handles unchanged
        let ids: Vec<i64> = map.partitions().iter().map(|p| p.data.var_id).collect();
        assert_eq!(ids, vec![1, 1, 2, 2, 2]);
        let total: u64 = map.partitions().iter().map(|p| p.range.rows()).sum();
        assert_eq!(total, 70);
    }

    #[tokio::test]
    async fn cbind_local_after_rbind_keeps_colocated_results_apart() {
        let cluster = Arc::new(LoopbackCluster::new());
        let rt = runtime(&cluster, FederationConfig::default());
        let mut ec = ExecutionContext::new();
        federated_rows(&mut ec, &cluster, "A", 1, &matrix(40, 6), 2);
        federated_rows(&mut ec, &cluster, "B", 2, &matrix(30, 6), 2);
        run(&mut ec, &rt, RBIND).await.unwrap();
        ec.set_object("D", FedObject::local(matrix(70, 2)));

        run(&mut ec, &rt, "FED°append°C·MATRIX·FP64°D·MATRIX·FP64°E·MATRIX·FP64°true").await.unwrap();

        let map = ec.object("E").unwrap().fed_map().unwrap().clone();
        assert_eq!(map.dims(), (70, 8));
        // w1 and w2 each hold one block of A and one of B
        let ids: Vec<i64> = map.partitions().iter().map(|p| p.data.var_id).collect();
        assert_eq!(ids, vec![1004, 1004, 1005, 1006]);
        for p in map.partitions() {
            assert!(matches!(cluster.value(&p.data.address, p.data.var_id), Some(StoredValue::Derived(_))));
        }
        let Some(StoredValue::Derived(text)) = cluster.value(&worker(0), 1005) else { panic!("missing result") };
        assert!(text.starts_with("CP°append°2·MATRIX·FP64°1002·MATRIX·FP64"));

        // every broadcast slice released, none leaked
        let log = cluster.log();
        let stores = log.iter().filter(|l| l.request.kind == RequestType::Store).count();
        let clears = log.iter().filter(|l| l.request.kind == RequestType::Clear).count();
        assert_eq!((stores, clears), (4, 4));
        for id in 1001..=1003 {
            assert!(!cluster.holds(&worker(0), id) && !cluster.holds(&worker(1), id));
        }
    }

    #[tokio::test]
    async fn cbind_aligned_row_maps_runs_on_workers() {
        let cluster = Arc::new(LoopbackCluster::new());
        let rt = runtime(&cluster, FederationConfig::default());
        let mut ec = ExecutionContext::new();
        federated_rows(&mut ec, &cluster, "A", 1, &matrix(40, 6), 2);
        federated_rows(&mut ec, &cluster, "B", 2, &matrix(40, 4), 2);

        run(&mut ec, &rt, CBIND).await.unwrap();

        for w in workers(2) {
            let reqs = cluster.requests_to(&w);
            assert_eq!(reqs.len(), 1);
            assert_eq!(
                reqs[0].instruction(),
                Some("CP°append°1·MATRIX·FP64°2·MATRIX·FP64°1000·MATRIX·FP64°true")
            );
        }
        let map = ec.object("C").unwrap().fed_map().unwrap().clone();
        assert_eq!(map.dims(), (40, 10));
        assert_eq!(map.len(), 2);
    }

    #[tokio::test]
    async fn cbind_unaligned_row_maps_yields_full() {
        let cluster = Arc::new(LoopbackCluster::new());
        let rt = runtime(&cluster, FederationConfig::default());
        let mut ec = ExecutionContext::new();
        federated_rows(&mut ec, &cluster, "A", 1, &matrix(40, 6), 2);
        federated_rows(&mut ec, &cluster, "B", 2, &matrix(40, 4), 4);

        run(&mut ec, &rt, CBIND).await.unwrap();

        assert!(cluster.log().is_empty());
        let map = ec.object("C").unwrap().fed_map().unwrap().clone();
        assert_eq!(map.ftype(), FType::Full);
        assert_eq!(map.dims(), (40, 10));
    }

    #[tokio::test]
    async fn rbind_with_local_federates_it() {
        let cluster = Arc::new(LoopbackCluster::new());
        let rt = runtime(&cluster, FederationConfig::default());
        let mut ec = ExecutionContext::new();
        federated_rows(&mut ec, &cluster, "A", 1, &matrix(40, 6), 2);
        ec.set_object("B", FedObject::local(matrix(5, 6)));

        run(&mut ec, &rt, RBIND).await.unwrap();

        let local_worker = FederationConfig::default().local_worker;
        let reqs = cluster.requests_to(&local_worker);
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].kind, RequestType::Store);
        assert!(matches!(cluster.value(&local_worker, 1000), Some(StoredValue::Data(_))));

        let map = ec.object("C").unwrap().fed_map().unwrap().clone();
        assert_eq!(map.ftype(), FType::Row);
        assert_eq!(map.dims(), (45, 6));
        let last = map.partitions().last().unwrap();
        assert_eq!(last.range.begin(), [40, 0]);
        assert_eq!(last.data.address, local_worker);
        assert_eq!(last.data.var_id, 1000);
    }

    #[tokio::test]
    async fn mismatched_rows_fail_before_dispatch() {
        let cluster = Arc::new(LoopbackCluster::new());
        let rt = runtime(&cluster, FederationConfig::default());
        let mut ec = ExecutionContext::new();
        federated_rows(&mut ec, &cluster, "A", 1, &matrix(40, 6), 2);
        ec.set_object("B", FedObject::local(matrix(39, 2)));

        let err = run(&mut ec, &rt, CBIND).await.unwrap_err();
        assert!(matches!(err, FedError::DimensionMismatch(ref m) if m.contains("40x6") && m.contains("39x2")));
        assert!(cluster.log().is_empty());
        assert!(!ec.contains("C"));
    }

    #[tokio::test]
    async fn col_federated_with_local_is_unsupported() {
        let cluster = Arc::new(LoopbackCluster::new());
        let rt = runtime(&cluster, FederationConfig::default());
        let mut ec = ExecutionContext::new();
        federated_cols(&mut ec, &cluster, "A", 1, &matrix(10, 6), 2);
        ec.set_object("B", FedObject::local(matrix(10, 2)));

        let err = run(&mut ec, &rt, CBIND).await.unwrap_err();
        let FedError::Unsupported { op, detail } = err else { panic!("expected unsupported") };
        assert_eq!(op, "append");
        assert!(detail.contains("COL") && detail.contains("LOCAL") && detail.contains("columns"));
    }

    #[tokio::test]
    async fn frame_cbind_concatenates_schema() {
        let cluster = Arc::new(LoopbackCluster::new());
        let rt = runtime(&cluster, FederationConfig::default());
        let mut ec = ExecutionContext::new();

        let left = LocalData::Frame(
            FrameBlock::new(
                vec![ValueType::String, ValueType::Int64],
                vec![vec!["a".into(), "b".into()], vec!["1".into(), "2".into()]],
            )
            .unwrap(),
        );
        let right = LocalData::Frame(
            FrameBlock::new(vec![ValueType::Boolean], vec![vec!["true".into(), "false".into()]]).unwrap(),
        );
        let map = cluster.partition_rows(1, &left, &workers(2)).unwrap();
        ec.set_object(
            "A",
            FedObject::federated(map, DataType::Frame, 2, 2).with_schema(vec![ValueType::String, ValueType::Int64]),
        );
        ec.set_object("B", FedObject::local(right));

        run(&mut ec, &rt, "FED°cbind°A·FRAME·STRING°B·FRAME·STRING°C·FRAME·STRING").await.unwrap();

        let out = ec.object("C").unwrap();
        assert_eq!(
            out.schema.as_deref(),
            Some(&[ValueType::String, ValueType::Int64, ValueType::Boolean][..])
        );
        assert_eq!(out.cols, 3);
    }
}
