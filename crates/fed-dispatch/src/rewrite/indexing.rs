//! Bounded reads (`rightIndex`) and writes (`leftIndex`) on federated
//! objects.
//!
//! Both translate the requested box into partition-local coordinates and
//! substitute them, 1-based and inclusive, into each worker's copy of the
//! instruction. Reads drop partitions outside the box; writes leave them
//! unchanged but still bind them to the result id with a plain copy.

use tracing::{debug, info};
use uuid::Uuid;

use fed_types::{FType, Instruction, IndexRange, LocalData, Operand, ValueType};

use crate::context::{ExecutionContext, FedObject};
use crate::error::{FedError, Result};
use crate::map::FederationMap;
use crate::request::{FederatedRequest, RequestSet};
use crate::runtime::FedRuntime;

use super::{data_operand, expect_parts, worker_instruction};

/// Resolve the four bound operands starting at `from` into a 0-based box.
fn resolve_range(ec: &ExecutionContext, inst: &Instruction, from: usize) -> Result<IndexRange> {
    let mut bounds = [0i64; 4];
    for (i, bound) in bounds.iter_mut().enumerate() {
        *bound = ec.scalar(&inst.operand(from + i)?)?.as_i64()?;
    }
    let [rl, ru, cl, cu] = bounds;
    IndexRange::from_one_based(rl, ru, cl, cu).map_err(|e| FedError::IndexOutOfBounds(e.to_string()))
}

fn check_bounds(name: &str, obj: &FedObject, ix: &IndexRange) -> Result<()> {
    if ix.row_end > obj.rows || ix.col_end > obj.cols {
        return Err(FedError::IndexOutOfBounds(format!(
            "{ix} outside {name} of {}x{}",
            obj.rows, obj.cols
        )));
    }
    Ok(())
}

// ── Right Index ───────────────────────────────────────────────────────────────

/// `EXEC°rightIndex°in°rl°ru°cl°cu°out`
#[derive(Debug, Clone)]
pub struct RightIndexOp {
    inst: Instruction,
    input: Operand,
    out: Operand,
}

impl RightIndexOp {
    const INPUT: usize = 2;
    const BOUNDS: usize = 3;
    const OUT: usize = 7;

    pub fn parse(inst: Instruction) -> Result<Self> {
        expect_parts(&inst, 7)?;
        Ok(Self {
            input: data_operand(&inst, Self::INPUT)?,
            out: data_operand(&inst, Self::OUT)?,
            inst,
        })
    }

    pub async fn process(&self, ec: &mut ExecutionContext, rt: &FedRuntime, tid: Uuid) -> Result<()> {
        let input = ec.object(&self.input.name)?.clone();
        let map = input.fed_map()?;
        let ix = resolve_range(ec, &self.inst, Self::BOUNDS)?;
        check_bounds(&self.input.name, &input, &ix)?;

        let filtered = map.filter(&ix);
        if filtered.is_empty() {
            return Err(FedError::IndexOutOfBounds(format!(
                "{ix} intersects no partition of {}",
                self.input.name
            )));
        }

        let (out_id, out_ids) = filtered.result_ids(rt);
        let mut requests = Vec::with_capacity(filtered.len());
        for ((p, clipped), &out) in map.intersecting(&ix).zip(&out_ids) {
            let local = IndexRange::from(clipped.rebase(p.range.begin())?);
            let inst = self.inst.with_index_literals(Self::BOUNDS, &local.to_one_based())?;
            let inst = worker_instruction(&inst, &[(Self::INPUT, p.data.var_id)], Self::OUT, out)?;
            debug!(%tid, worker = %p.data.address, %local, out, "slice partition");
            requests.push(FederatedRequest::execute(out, &inst));
        }

        info!(%tid, %ix, out_id, partitions = filtered.len(), "right index");
        filtered
            .execute(rt, tid, true, &[RequestSet::per_partition(requests)])
            .await?;

        let result = filtered.rebase(ix.origin())?.copy_with_new_id(out_id).with_var_ids(&out_ids)?;
        let (rows, cols) = result.dims();
        let schema = self.sliced_schema(&input, map, &ix)?;
        let mut out = FedObject::federated(result, self.out.data_type, rows, cols);
        if let Some(schema) = schema {
            out = out.with_schema(schema);
        }
        ec.set_object(self.out.name.clone(), out);
        Ok(())
    }

    /// Column partitions contribute their clipped schema spans in partition
    /// order; every other kind holds whole rows, so one span suffices.
    fn sliced_schema(&self, input: &FedObject, map: &FederationMap, ix: &IndexRange) -> Result<Option<Vec<ValueType>>> {
        if input.schema.is_none() {
            return Ok(None);
        }
        if map.ftype() != FType::Col {
            return input.schema_slice(ix.col_begin, ix.col_end).map(Some);
        }
        let mut schema = Vec::new();
        for (_, clipped) in map.intersecting(ix) {
            schema.extend(input.schema_slice(clipped.begin()[1], clipped.end()[1])?);
        }
        Ok(Some(schema))
    }
}

// ── Left Index ────────────────────────────────────────────────────────────────

/// What a left-indexing write does to one target partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartitionWrite {
    /// Overwrite `local` (partition coordinates) with `slice` of the value.
    Write { local: IndexRange, slice: IndexRange },
    /// Partition untouched; bind its data to the result id.
    CopyUnchanged,
}

/// `EXEC°leftIndex°target°value°rl°ru°cl°cu°out`
#[derive(Debug, Clone)]
pub struct LeftIndexOp {
    inst: Instruction,
    target: Operand,
    value: Operand,
    out: Operand,
}

impl LeftIndexOp {
    const TARGET: usize = 2;
    const VALUE: usize = 3;
    const BOUNDS: usize = 4;
    const OUT: usize = 8;

    pub fn parse(inst: Instruction) -> Result<Self> {
        expect_parts(&inst, 8)?;
        Ok(Self {
            target: data_operand(&inst, Self::TARGET)?,
            value: data_operand(&inst, Self::VALUE)?,
            out: data_operand(&inst, Self::OUT)?,
            inst,
        })
    }

    pub async fn process(&self, ec: &mut ExecutionContext, rt: &FedRuntime, tid: Uuid) -> Result<()> {
        let target = ec.object(&self.target.name)?.clone();
        let value = ec.object(&self.value.name)?.clone();
        let map = target.fed_map()?;
        let ix = resolve_range(ec, &self.inst, Self::BOUNDS)?;

        check_bounds(&self.target.name, &target, &ix)?;
        if value.rows != ix.rows() || value.cols != ix.cols() {
            return Err(FedError::DimensionMismatch(format!(
                "{ix} of {} is {}x{}, value {} is {}x{}",
                self.target.name,
                ix.rows(),
                ix.cols(),
                self.value.name,
                value.rows,
                value.cols
            )));
        }

        let decisions = plan_writes(map, &ix)?;
        let data: LocalData = if value.is_federated() {
            value.fed_map()?.acquire(rt, tid).await?
        } else {
            value.local_data()?.clone()
        };

        let (bcast_id, bcast_ids) = map.result_ids(rt);
        let (out_id, out_ids) = map.result_ids(rt);

        let slices: Vec<Option<IndexRange>> = decisions
            .iter()
            .map(|d| match d {
                PartitionWrite::Write { slice, .. } => Some(*slice),
                PartitionWrite::CopyUnchanged => None,
            })
            .collect();
        let broadcast = map.broadcast_sliced(&bcast_ids, &data, &slices)?;

        let writes = map
            .partitions()
            .iter()
            .zip(&decisions)
            .zip(bcast_ids.iter().zip(&out_ids))
            .map(|((p, decision), (&bcast, &out))| -> Result<FederatedRequest> {
                let inst = match decision {
                    PartitionWrite::Write { local, .. } => {
                        let inst = self.inst.with_index_literals(Self::BOUNDS, &local.to_one_based())?;
                        worker_instruction(&inst, &[(Self::TARGET, p.data.var_id), (Self::VALUE, bcast)], Self::OUT, out)?
                    }
                    PartitionWrite::CopyUnchanged => Instruction::copy_variable(p.data.var_id, out),
                };
                Ok(FederatedRequest::execute(out, &inst))
            })
            .collect::<Result<Vec<_>>>()?;

        let written = slices.iter().flatten().count();
        info!(%tid, %ix, bcast_id, out_id, written, copied = map.len() - written, "left index");
        map.execute(rt, tid, true, &[broadcast.clone(), RequestSet::per_partition(writes)])
            .await?;
        if written > 0 {
            map.execute(rt, tid, true, &[map.cleanup(&broadcast)]).await?;
        }

        let mut out = FedObject::federated(map.copy_with_new_id(out_id).with_var_ids(&out_ids)?, target.data_type, target.rows, target.cols);
        if let Some(schema) = target.schema.clone() {
            out = out.with_schema(schema);
        }
        ec.set_object(self.out.name.clone(), out);
        Ok(())
    }
}

/// One decision per partition, in partition order. A written partition
/// receives the part of the value that lands inside its own box.
fn plan_writes(map: &FederationMap, ix: &IndexRange) -> Result<Vec<PartitionWrite>> {
    let target = ix.as_range();
    map.partitions()
        .iter()
        .map(|p| -> Result<PartitionWrite> {
            Ok(match p.range.intersect(&target) {
                Some(clipped) => PartitionWrite::Write {
                    local: clipped.rebase(p.range.begin())?.into(),
                    slice: clipped.rebase(ix.origin())?.into(),
                },
                None => PartitionWrite::CopyUnchanged,
            })
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
