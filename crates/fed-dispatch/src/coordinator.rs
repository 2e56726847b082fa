//! Entry point for federated instructions.
//!
//! The coordinator parses an instruction string into a [`FedInstruction`],
//! opens a transaction id for it and runs the matching rewriter against the
//! caller's [`ExecutionContext`]. It holds no per-operation state; one
//! coordinator may serve many contexts.

use tracing::{info, warn};
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::rewrite::{FedInstruction, OpKind};
use crate::runtime::FedRuntime;

pub struct FedCoordinator {
    runtime: FedRuntime,
}

impl FedCoordinator {
    pub fn new(runtime: FedRuntime) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &FedRuntime {
        &self.runtime
    }

    /// Parse and execute one instruction, binding its output in `ec`.
    ///
    /// On error nothing is bound; remote side effects of batches that
    /// already completed are left in place.
    pub async fn process(&self, ec: &mut ExecutionContext, instruction: &str) -> Result<OpKind> {
        let inst = FedInstruction::parse(instruction)?;
        let kind = inst.kind();
        let tid = Uuid::new_v4();

        info!(%tid, op = %kind, "processing federated instruction");
        match inst.process(ec, &self.runtime, tid).await {
            Ok(()) => Ok(kind),
            Err(e) => {
                warn!(%tid, op = %kind, error = %e, "federated instruction failed");
                Err(e)
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use fed_types::{DenseBlock, FederationConfig, LocalData};

    use super::*;
    use crate::context::FedObject;
    use crate::error::FedError;
    use crate::ident::AtomicIdAllocator;
    use crate::loopback::{LoopbackCluster, StoredValue};
    use crate::request::RequestType;
    use crate::rewrite::fixtures::{federated_rows, matrix, worker};

    fn coordinator(cluster: &Arc<LoopbackCluster>) -> FedCoordinator {
        FedCoordinator::new(FedRuntime::with_ids(
            cluster.clone(),
            Arc::new(AtomicIdAllocator::starting_at(500)),
            FederationConfig::default(),
        ))
    }

    #[tokio::test]
    async fn chained_instructions() {
        let cluster = Arc::new(LoopbackCluster::new());
        let coord = coordinator(&cluster);
        let mut ec = ExecutionContext::new();
        federated_rows(&mut ec, &cluster, "X", 1, &matrix(100, 50), 4);
        ec.set_object("Y", FedObject::local(matrix(100, 10)));

        let kind = coord
            .process(&mut ec, "FED°append°X·MATRIX·FP64°Y·MATRIX·FP64°Z·MATRIX·FP64°true")
            .await
            .unwrap();
        assert_eq!(kind, OpKind::Append);

        let kind = coord
            .process(
                &mut ec,
                "FED°rightIndex°Z·MATRIX·FP64°31·SCALAR·INT64·true°70·SCALAR·INT64·true°45·SCALAR·INT64·true°60·SCALAR·INT64·true°S·MATRIX·FP64",
            )
            .await
            .unwrap();
        assert_eq!(kind, OpKind::RightIndex);

        let s = ec.object("S").unwrap();
        assert_eq!((s.rows, s.cols), (40, 16));
        // the slice reads the appended result (id 501) on the workers
        let w2 = cluster.requests_to(&worker(1));
        assert!(w2.last().unwrap().instruction().unwrap().starts_with("CP°rightIndex°501·MATRIX·FP64"));
    }

    fn assert_results_resident(cluster: &LoopbackCluster, obj: &FedObject) -> Vec<i64> {
        let map = obj.fed_map().unwrap();
        let keys: HashSet<_> = map.partitions().iter().map(|p| (p.data.address.clone(), p.data.var_id)).collect();
        assert_eq!(keys.len(), map.len());
        for (address, id) in &keys {
            assert!(cluster.holds(address, *id), "{address} lost {id}");
        }
        map.partitions().iter().map(|p| p.data.var_id).collect()
    }

    #[tokio::test]
    async fn rbind_then_index_keeps_every_colocated_block() {
        let cluster = Arc::new(LoopbackCluster::new());
        let coord = coordinator(&cluster);
        let mut ec = ExecutionContext::new();
        federated_rows(&mut ec, &cluster, "A", 1, &matrix(40, 6), 2);
        federated_rows(&mut ec, &cluster, "B", 2, &matrix(30, 6), 2);
        ec.set_object("V", FedObject::local(matrix(70, 6)));

        coord
            .process(&mut ec, "FED°append°A·MATRIX·FP64°B·MATRIX·FP64°C·MATRIX·FP64°false")
            .await
            .unwrap();
        coord
            .process(
                &mut ec,
                "FED°rightIndex°C·MATRIX·FP64°1·SCALAR·INT64·true°70·SCALAR·INT64·true°1·SCALAR·INT64·true°6·SCALAR·INT64·true°S·MATRIX·FP64",
            )
            .await
            .unwrap();

        // w1 and w2 each hold a block of A and a block of B
        let ids = assert_results_resident(&cluster, ec.object("S").unwrap());
        assert_eq!(ids, vec![501, 501, 502, 503]);
        let Some(StoredValue::Derived(text)) = cluster.value(&worker(0), 501) else { panic!("missing slice of A") };
        assert!(text.starts_with("CP°rightIndex°1·MATRIX·FP64"));
        let Some(StoredValue::Derived(text)) = cluster.value(&worker(0), 502) else { panic!("missing slice of B") };
        assert!(text.starts_with("CP°rightIndex°2·MATRIX·FP64"));

        cluster.clear_log();
        coord
            .process(
                &mut ec,
                "FED°leftIndex°S·MATRIX·FP64°V·MATRIX·FP64°1·SCALAR·INT64·true°70·SCALAR·INT64·true°1·SCALAR·INT64·true°6·SCALAR·INT64·true°T·MATRIX·FP64",
            )
            .await
            .unwrap();

        let ids = assert_results_resident(&cluster, ec.object("T").unwrap());
        assert_eq!(ids, vec![507, 507, 508, 509]);
        let Some(StoredValue::Derived(text)) = cluster.value(&worker(0), 508) else { panic!("missing write to B") };
        assert!(text.starts_with("CP°leftIndex°502·MATRIX·FP64°505·MATRIX·FP64"));

        let log = cluster.log();
        let count = |kind: RequestType| log.iter().filter(|l| l.request.kind == kind).count();
        assert_eq!(count(RequestType::Store), 4);
        assert_eq!(count(RequestType::Clear), 4);
        for id in 504..=506 {
            assert!(!cluster.holds(&worker(0), id) && !cluster.holds(&worker(1), id));
        }
    }

    #[tokio::test]
    async fn transaction_ids_differ_per_instruction() {
        let cluster = Arc::new(LoopbackCluster::new());
        let coord = coordinator(&cluster);
        let mut ec = ExecutionContext::new();
        federated_rows(&mut ec, &cluster, "X", 1, &matrix(10, 4), 2);
        ec.set_object("Y", FedObject::local(LocalData::Matrix(DenseBlock::zeros(10, 1))));

        for _ in 0..2 {
            coord
                .process(&mut ec, "FED°append°X·MATRIX·FP64°Y·MATRIX·FP64°Z·MATRIX·FP64°true")
                .await
                .unwrap();
        }
        let tids: HashSet<_> = cluster.log().iter().filter_map(|l| l.request.tid).collect();
        assert_eq!(tids.len(), 2);
    }

    #[tokio::test]
    async fn unknown_operand_is_reported() {
        let cluster = Arc::new(LoopbackCluster::new());
        let coord = coordinator(&cluster);
        let mut ec = ExecutionContext::new();

        let err = coord
            .process(&mut ec, "FED°append°X·MATRIX·FP64°Y·MATRIX·FP64°Z·MATRIX·FP64°true")
            .await
            .unwrap_err();
        assert!(matches!(err, FedError::UnknownVariable(ref name) if name == "X"));
    }
}
