// Elementwise frame ⊕ scalar over a federated frame.
//
// The scalar is inlined into each worker instruction as a literal, so no
// data is shipped. Geometry, dimensions and schema carry over unchanged.

use tracing::info;
use uuid::Uuid;

use fed_types::{DataType, Instruction, Operand};

use crate::context::{ExecutionContext, FedObject};
use crate::error::{FedError, Result};
use crate::request::{FederatedRequest, RequestSet};
use crate::runtime::FedRuntime;

use super::{expect_parts, worker_instruction};

const FRAME: usize = 2;
const SCALAR: usize = 3;
const OUT: usize = 4;

#[derive(Debug, Clone)]
pub struct FrameScalarOp {
    inst: Instruction,
    frame: Operand,
    scalar: Operand,
    out: Operand,
}

impl FrameScalarOp {
    /// Binary instruction whose first input is a frame and second a scalar.
    pub fn matches(inst: &Instruction) -> bool {
        inst.num_parts() == 4
            && inst.operand(FRAME).is_ok_and(|op| op.data_type == DataType::Frame)
            && inst.operand(SCALAR).is_ok_and(|op| op.data_type == DataType::Scalar)
    }

    pub fn parse(inst: Instruction) -> Result<Self> {
        expect_parts(&inst, 4)?;
        Ok(Self {
            frame: inst.operand(FRAME)?,
            scalar: inst.operand(SCALAR)?,
            out: inst.operand(OUT)?,
            inst,
        })
    }

    pub async fn process(&self, ec: &mut ExecutionContext, rt: &FedRuntime, tid: Uuid) -> Result<()> {
        let input = ec.object(&self.frame.name)?.clone();
        if !input.is_federated() {
            return Err(FedError::Unsupported {
                op: self.inst.opcode().to_string(),
                detail: format!("{} is not federated", self.frame.name),
            });
        }
        let map = input.fed_map()?;

        let value = ec.scalar(&self.scalar)?;
        let literal = Operand::literal(&value, self.scalar.value_type).to_string();
        let inlined = self.inst.replace_fields(SCALAR, &[literal])?;

        let (out_id, out_ids) = map.result_ids(rt);
        let requests = map
            .partitions()
            .iter()
            .zip(&out_ids)
            .map(|(p, &out)| -> Result<FederatedRequest> {
                let inst = worker_instruction(&inlined, &[(FRAME, p.data.var_id)], OUT, out)?;
                Ok(FederatedRequest::execute(out, &inst))
            })
            .collect::<Result<Vec<_>>>()?;

        info!(%tid, opcode = self.inst.opcode(), out_id, partitions = map.len(), "frame-scalar");
        map.execute(rt, tid, true, &[RequestSet::per_partition(requests)]).await?;

        let mut out = FedObject::federated(map.copy_with_new_id(out_id).with_var_ids(&out_ids)?, DataType::Frame, input.rows, input.cols);
        if let Some(schema) = input.schema.clone() {
            out = out.with_schema(schema);
        }
        ec.set_object(self.out.name.clone(), out);
        Ok(())
    }
}
