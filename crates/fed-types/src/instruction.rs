//! Instruction field codec.
//!
//! An instruction is a `°`-delimited field list:
//!
//! ```text
//! FED°rightIndex°X·MATRIX·FP64°31·SCALAR·INT64·true°...°_mVar7·MATRIX·FP64
//! │   │          │              │
//! │   │          │              └─ literal operand (trailing `·true`)
//! │   │          └─ operand: name·DATATYPE·VALUETYPE
//! │   └─ opcode
//! └─ exec type
//! ```
//!
//! Rewriters split an instruction, substitute a contiguous run of fields and
//! re-join it; every other field is preserved verbatim.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypesError;

pub const OPERAND_DELIMITER: &str = "°";
pub const DATATYPE_PREFIX: &str = "·";
pub const LITERAL_FLAG: &str = "true";

/// Exec type stamped on instructions shipped to workers.
pub const WORKER_EXEC_TYPE: &str = "CP";

/// Opcode of the worker-side variable copy.
pub const COPY_OPCODE: &str = "cpvar";

// ── Data / Value Types ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Matrix,
    Frame,
    Scalar,
}

impl DataType {
    pub fn is_matrix_or_frame(&self) -> bool {
        matches!(self, Self::Matrix | Self::Frame)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Matrix => write!(f, "MATRIX"),
            Self::Frame  => write!(f, "FRAME"),
            Self::Scalar => write!(f, "SCALAR"),
        }
    }
}

impl FromStr for DataType {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MATRIX" => Ok(Self::Matrix),
            "FRAME" => Ok(Self::Frame),
            "SCALAR" => Ok(Self::Scalar),
            other => Err(TypesError::InvalidOperand(format!("unknown data type: {other}"))),
        }
    }
}

/// Element type of a matrix, a frame column or a scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Fp64,
    Fp32,
    Int64,
    Int32,
    Boolean,
    String,
    Unknown,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fp64    => "FP64",
            Self::Fp32    => "FP32",
            Self::Int64   => "INT64",
            Self::Int32   => "INT32",
            Self::Boolean => "BOOLEAN",
            Self::String  => "STRING",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

impl FromStr for ValueType {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FP64" => Ok(Self::Fp64),
            "FP32" => Ok(Self::Fp32),
            "INT64" => Ok(Self::Int64),
            "INT32" => Ok(Self::Int32),
            "BOOLEAN" => Ok(Self::Boolean),
            "STRING" => Ok(Self::String),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(TypesError::InvalidOperand(format!("unknown value type: {other}"))),
        }
    }
}

// ── Operand ───────────────────────────────────────────────────────────────────

/// One operand field: a variable reference or an inline literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operand {
    pub name: String,
    pub data_type: DataType,
    pub value_type: ValueType,
    pub literal: bool,
}

impl Operand {
    pub fn variable(name: impl Into<String>, data_type: DataType, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            data_type,
            value_type,
            literal: false,
        }
    }

    /// Scalar literal carrying `value` inline.
    pub fn literal(value: impl fmt::Display, value_type: ValueType) -> Self {
        Self {
            name: value.to_string(),
            data_type: DataType::Scalar,
            value_type,
            literal: true,
        }
    }

    pub fn parse(field: &str) -> Result<Self, TypesError> {
        let parts: Vec<&str> = field.split(DATATYPE_PREFIX).collect();
        if parts.len() < 3 || parts.len() > 4 || parts[0].is_empty() {
            return Err(TypesError::InvalidOperand(field.to_string()));
        }
        Ok(Self {
            name: parts[0].to_string(),
            data_type: parts[1].parse()?,
            value_type: parts[2].parse()?,
            literal: parts.get(3).is_some_and(|f| *f == LITERAL_FLAG),
        })
    }

    /// Same operand pointing at a different variable name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{DATATYPE_PREFIX}{}{DATATYPE_PREFIX}{}",
            self.name, self.data_type, self.value_type
        )?;
        if self.literal {
            write!(f, "{DATATYPE_PREFIX}{LITERAL_FLAG}")?;
        }
        Ok(())
    }
}

// ── Instruction ───────────────────────────────────────────────────────────────

/// Split form of an instruction string. Every edit returns a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    fields: Vec<String>,
}

impl Instruction {
    pub fn parse(s: &str) -> Result<Self, TypesError> {
        let fields: Vec<String> = s.split(OPERAND_DELIMITER).map(str::to_string).collect();
        if fields.len() < 2 || fields.iter().take(2).any(|f| f.is_empty()) {
            return Err(TypesError::InvalidInstruction(s.to_string()));
        }
        Ok(Self { fields })
    }

    /// `CP°cpvar°src°dst`: bind `dst` to the object held under `src`.
    pub fn copy_variable(src: impl fmt::Display, dst: impl fmt::Display) -> Self {
        Self {
            fields: vec![
                WORKER_EXEC_TYPE.to_string(),
                COPY_OPCODE.to_string(),
                src.to_string(),
                dst.to_string(),
            ],
        }
    }

    pub fn exec_type(&self) -> &str {
        &self.fields[0]
    }

    pub fn opcode(&self) -> &str {
        &self.fields[1]
    }

    /// Number of fields after the exec type.
    pub fn num_parts(&self) -> usize {
        self.fields.len() - 1
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Result<&str, TypesError> {
        self.fields
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| self.out_of_range(index))
    }

    pub fn operand(&self, index: usize) -> Result<Operand, TypesError> {
        Operand::parse(self.field(index)?)
    }

    /// Index of the last operand field, skipping trailing flags such as the
    /// append cbind marker.
    pub fn last_operand_index(&self) -> usize {
        (2..self.fields.len())
            .rev()
            .find(|&i| self.fields[i].contains(DATATYPE_PREFIX))
            .unwrap_or(self.fields.len() - 1)
    }

    /// Replace fields `from..from + values.len()`.
    pub fn replace_fields(&self, from: usize, values: &[String]) -> Result<Self, TypesError> {
        let to = from + values.len();
        if to > self.fields.len() || from < 2 {
            return Err(self.out_of_range(to));
        }
        let mut fields = self.fields.clone();
        fields[from..to].clone_from_slice(values);
        Ok(Self { fields })
    }

    /// Replace a run of fields with INT64 literals.
    pub fn with_index_literals(&self, from: usize, values: &[u64]) -> Result<Self, TypesError> {
        let literals: Vec<String> = values
            .iter()
            .map(|v| Operand::literal(v, ValueType::Int64).to_string())
            .collect();
        self.replace_fields(from, &literals)
    }

    /// Point the operand at `index` to another variable, keeping its types.
    pub fn rename_operand(&self, index: usize, name: impl Into<String>) -> Result<Self, TypesError> {
        let renamed = self.operand(index)?.renamed(name);
        self.replace_fields(index, &[renamed.to_string()])
    }

    pub fn with_exec_type(&self, exec_type: &str) -> Self {
        let mut fields = self.fields.clone();
        fields[0] = exec_type.to_string();
        Self { fields }
    }

    fn out_of_range(&self, index: usize) -> TypesError {
        TypesError::InvalidInstruction(format!(
            "field {index} out of range for `{self}` ({} fields)",
            self.fields.len()
        ))
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fields.join(OPERAND_DELIMITER))
    }
}

impl FromStr for Instruction {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
