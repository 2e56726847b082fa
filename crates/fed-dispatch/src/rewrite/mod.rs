//! Federated instruction rewriters.
//!
//! Each supported operation class is one variant of [`FedInstruction`].
//! Parsing validates the instruction shape up front; `process` resolves the
//! operands in the [`ExecutionContext`], emits per-partition requests through
//! [`FederationMap::execute`](crate::map::FederationMap::execute) and binds
//! the output object with its new partition map.

mod append;
mod frame_scalar;
mod indexing;

use std::fmt;

use uuid::Uuid;

use fed_types::{instruction::WORKER_EXEC_TYPE, DataType, Instruction, Operand, TypesError};

use crate::context::ExecutionContext;
use crate::error::{FedError, Result};
use crate::runtime::FedRuntime;

pub use append::AppendOp;
pub use frame_scalar::FrameScalarOp;
pub use indexing::{LeftIndexOp, RightIndexOp};

// ── Operation Kinds ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Append,
    FrameScalar,
    RightIndex,
    LeftIndex,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Append => "append",
            Self::FrameScalar => "frame-scalar",
            Self::RightIndex => "right-index",
            Self::LeftIndex => "left-index",
        })
    }
}

// ── Instructions ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum FedInstruction {
    Append(AppendOp),
    FrameScalar(FrameScalarOp),
    RightIndex(RightIndexOp),
    LeftIndex(LeftIndexOp),
}

impl FedInstruction {
    pub fn parse(text: &str) -> Result<Self> {
        let inst = Instruction::parse(text)?;
        match inst.opcode() {
            "append" | "cbind" | "rbind" => AppendOp::parse(inst).map(Self::Append),
            "rightIndex" => RightIndexOp::parse(inst).map(Self::RightIndex),
            "leftIndex" => LeftIndexOp::parse(inst).map(Self::LeftIndex),
            _ if FrameScalarOp::matches(&inst) => FrameScalarOp::parse(inst).map(Self::FrameScalar),
            opcode => Err(FedError::Unsupported {
                op: opcode.to_string(),
                detail: "no federated rewrite for this opcode".into(),
            }),
        }
    }

    pub fn kind(&self) -> OpKind {
        match self {
            Self::Append(_) => OpKind::Append,
            Self::FrameScalar(_) => OpKind::FrameScalar,
            Self::RightIndex(_) => OpKind::RightIndex,
            Self::LeftIndex(_) => OpKind::LeftIndex,
        }
    }

    pub async fn process(&self, ec: &mut ExecutionContext, rt: &FedRuntime, tid: Uuid) -> Result<()> {
        match self {
            Self::Append(op) => op.process(ec, rt, tid).await,
            Self::FrameScalar(op) => op.process(ec, rt, tid).await,
            Self::RightIndex(op) => op.process(ec, rt, tid).await,
            Self::LeftIndex(op) => op.process(ec, rt, tid).await,
        }
    }
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// Worker-side form of `inst` for one partition: exec type `CP`, the
/// operands at each `(field, remote id)` of `inputs` renamed to that id and
/// the output at `out_field` renamed to `out_id`.
pub(crate) fn worker_instruction(
    inst: &Instruction,
    inputs: &[(usize, i64)],
    out_field: usize,
    out_id: i64,
) -> Result<Instruction> {
    let mut rewritten = inst.with_exec_type(WORKER_EXEC_TYPE);
    for &(field, id) in inputs {
        rewritten = rewritten.rename_operand(field, id.to_string())?;
    }
    Ok(rewritten.rename_operand(out_field, out_id.to_string())?)
}

/// Parsed operand at `field` that must name a matrix or frame.
pub(crate) fn data_operand(inst: &Instruction, field: usize) -> Result<Operand> {
    let op = inst.operand(field)?;
    if !op.data_type.is_matrix_or_frame() || op.literal {
        return Err(TypesError::InvalidOperand(format!(
            "`{}` of `{inst}` must be a matrix or frame, found {}",
            op.name, op.data_type
        ))
        .into());
    }
    Ok(op)
}

pub(crate) fn expect_parts(inst: &Instruction, parts: usize) -> Result<()> {
    if inst.num_parts() != parts {
        return Err(TypesError::InvalidInstruction(format!(
            "{} expects {parts} fields after the exec type, got {} in `{inst}`",
            inst.opcode(),
            inst.num_parts()
        ))
        .into());
    }
    Ok(())
}

pub(crate) fn is_frame(op: &Operand) -> bool {
    op.data_type == DataType::Frame
}

// ── Test fixtures ─────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::Arc;

    use fed_types::{DenseBlock, FederationConfig, LocalData, WorkerAddress};

    use crate::context::{ExecutionContext, FedObject};
    use crate::ident::AtomicIdAllocator;
    use crate::loopback::LoopbackCluster;
    use crate::runtime::FedRuntime;

    pub fn worker(i: usize) -> WorkerAddress {
        WorkerAddress::new(format!("w{}", i + 1), 8001)
    }

    pub fn workers(n: usize) -> Vec<WorkerAddress> {
        (0..n).map(worker).collect()
    }

    pub fn runtime(cluster: &Arc<LoopbackCluster>, config: FederationConfig) -> FedRuntime {
        FedRuntime::with_ids(cluster.clone(), Arc::new(AtomicIdAllocator::starting_at(1000)), config)
    }

    /// Matrix with cell `(r, c) = r * 1000 + c`.
    pub fn matrix(rows: u64, cols: u64) -> LocalData {
        LocalData::Matrix(DenseBlock::from_fn(rows, cols, |r, c| (r * 1000 + c) as f64))
    }

    /// Bind `name` to a `rows x cols` matrix split by rows over `n` workers
    /// under remote id `id`.
    pub fn federated_rows(
        ec: &mut ExecutionContext,
        cluster: &LoopbackCluster,
        name: &str,
        id: i64,
        data: &LocalData,
        n: usize,
    ) {
        let map = cluster.partition_rows(id, data, &workers(n)).unwrap();
        ec.set_object(name, FedObject::federated(map, data.data_type(), data.rows(), data.cols()));
    }

    pub fn federated_cols(
        ec: &mut ExecutionContext,
        cluster: &LoopbackCluster,
        name: &str,
        id: i64,
        data: &LocalData,
        n: usize,
    ) {
        let map = cluster.partition_cols(id, data, &workers(n)).unwrap();
        ec.set_object(name, FedObject::federated(map, data.data_type(), data.rows(), data.cols()));
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
