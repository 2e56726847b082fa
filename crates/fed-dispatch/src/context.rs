//! Coordinator symbol table.
//!
//! Instructions name their operands; the [`ExecutionContext`] resolves a
//! name to either a data object (federated or coordinator-local) or a scalar.
//! Rewriters read their inputs from it and bind their output into it.

use std::collections::HashMap;
use std::fmt;

use fed_types::{DataType, FType, LocalData, Operand, ValueType};

use crate::error::{FedError, Result};
use crate::map::FederationMap;

// ── Scalars ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Int(i64),
    Double(f64),
    Bool(bool),
    Str(String),
}

impl ScalarValue {
    /// Parse a literal operand according to its value type.
    pub fn parse(text: &str, value_type: ValueType) -> Result<Self> {
        let bad = || FedError::Execution(format!("cannot read `{text}` as {value_type}"));
        Ok(match value_type {
            ValueType::Int64 | ValueType::Int32 => Self::Int(text.parse().map_err(|_| bad())?),
            ValueType::Fp64 | ValueType::Fp32 => Self::Double(text.parse().map_err(|_| bad())?),
            ValueType::Boolean => match text.to_ascii_lowercase().as_str() {
                "true" => Self::Bool(true),
                "false" => Self::Bool(false),
                _ => return Err(bad()),
            },
            ValueType::String | ValueType::Unknown => Self::Str(text.to_string()),
        })
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Int(_) => ValueType::Int64,
            Self::Double(_) => ValueType::Fp64,
            Self::Bool(_) => ValueType::Boolean,
            Self::Str(_) => ValueType::String,
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Self::Int(v) => Ok(*v),
            Self::Double(v) if v.fract() == 0.0 => Ok(*v as i64),
            other => Err(FedError::Execution(format!("expected an integer scalar, got {other}"))),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v)    => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Bool(v)   => write!(f, "{v}"),
            Self::Str(v)    => f.write_str(v),
        }
    }
}

// ── Data Objects ──────────────────────────────────────────────────────────────

/// A matrix or frame known to the coordinator. Exactly one of `fed_map` and
/// `local` is set.
#[derive(Debug, Clone)]
pub struct FedObject {
    pub data_type: DataType,
    pub rows: u64,
    pub cols: u64,
    /// Column schema, frames only.
    pub schema: Option<Vec<ValueType>>,
    fed_map: Option<FederationMap>,
    local: Option<LocalData>,
}

impl FedObject {
    pub fn federated(map: FederationMap, data_type: DataType, rows: u64, cols: u64) -> Self {
        Self {
            data_type,
            rows,
            cols,
            schema: None,
            fed_map: Some(map),
            local: None,
        }
    }

    pub fn local(data: LocalData) -> Self {
        let schema = match &data {
            LocalData::Frame(f) => Some(f.schema().to_vec()),
            LocalData::Matrix(_) => None,
        };
        Self {
            data_type: data.data_type(),
            rows: data.rows(),
            cols: data.cols(),
            schema,
            fed_map: None,
            local: Some(data),
        }
    }

    pub fn with_schema(mut self, schema: Vec<ValueType>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn is_federated(&self) -> bool {
        self.fed_map.is_some()
    }

    /// Federated with partition kind `ftype`.
    pub fn is_federated_as(&self, ftype: FType) -> bool {
        self.fed_map.as_ref().is_some_and(|m| m.ftype() == ftype)
    }

    /// Partition kind, or `"LOCAL"` for coordinator-resident data.
    pub fn kind_name(&self) -> String {
        self.fed_map
            .as_ref()
            .map_or_else(|| "LOCAL".to_string(), |m| m.ftype().to_string())
    }

    pub fn fed_map(&self) -> Result<&FederationMap> {
        self.fed_map
            .as_ref()
            .ok_or_else(|| FedError::Execution("object is not federated".into()))
    }

    pub fn local_data(&self) -> Result<&LocalData> {
        self.local
            .as_ref()
            .ok_or_else(|| FedError::Execution("object has no coordinator-local data".into()))
    }

    /// Schema columns `[from, to)`, or an empty list for matrices.
    pub fn schema_slice(&self, from: u64, to: u64) -> Result<Vec<ValueType>> {
        match &self.schema {
            None => Ok(Vec::new()),
            Some(s) => s
                .get(from as usize..to as usize)
                .map(<[ValueType]>::to_vec)
                .ok_or_else(|| {
                    FedError::IndexOutOfBounds(format!(
                        "schema columns {from}..{to} of a {}-column frame",
                        s.len()
                    ))
                }),
        }
    }
}

// ── Execution Context ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Variable {
    Object(FedObject),
    Scalar(ScalarValue),
}

#[derive(Debug, Default)]
pub struct ExecutionContext {
    vars: HashMap<String, Variable>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_object(&mut self, name: impl Into<String>, object: FedObject) {
        self.vars.insert(name.into(), Variable::Object(object));
    }

    pub fn set_scalar(&mut self, name: impl Into<String>, value: ScalarValue) {
        self.vars.insert(name.into(), Variable::Scalar(value));
    }

    pub fn remove(&mut self, name: &str) -> Option<Variable> {
        self.vars.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn object(&self, name: &str) -> Result<&FedObject> {
        match self.vars.get(name) {
            Some(Variable::Object(o)) => Ok(o),
            Some(Variable::Scalar(_)) => Err(FedError::Execution(format!("`{name}` is a scalar, expected matrix or frame"))),
            None => Err(FedError::UnknownVariable(name.to_string())),
        }
    }

    /// Value of a scalar operand: inline for literals, looked up otherwise.
    pub fn scalar(&self, operand: &Operand) -> Result<ScalarValue> {
        if operand.literal {
            return ScalarValue::parse(&operand.name, operand.value_type);
        }
        match self.vars.get(&operand.name) {
            Some(Variable::Scalar(v)) => Ok(v.clone()),
            Some(Variable::Object(_)) => Err(FedError::Execution(format!(
                "`{}` is a data object, expected scalar",
                operand.name
            ))),
            None => Err(FedError::UnknownVariable(operand.name.clone())),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fed_types::{DenseBlock, FrameBlock};

    #[test]
    fn scalar_resolution() {
        let mut ec = ExecutionContext::new();
        ec.set_scalar("rl", ScalarValue::Int(31));

        let lit = Operand::literal(70, ValueType::Int64);
        assert_eq!(ec.scalar(&lit).unwrap(), ScalarValue::Int(70));

        let var = Operand::variable("rl", DataType::Scalar, ValueType::Int64);
        assert_eq!(ec.scalar(&var).unwrap().as_i64().unwrap(), 31);

        let missing = Operand::variable("ru", DataType::Scalar, ValueType::Int64);
        assert!(matches!(ec.scalar(&missing), Err(FedError::UnknownVariable(_))));
    }

    #[test]
    fn object_lookup() {
        let mut ec = ExecutionContext::new();
        ec.set_object("X", FedObject::local(LocalData::Matrix(DenseBlock::zeros(3, 2))));
        ec.set_scalar("s", ScalarValue::Double(1.5));

        let x = ec.object("X").unwrap();
        assert_eq!((x.rows, x.cols), (3, 2));
        assert!(!x.is_federated());
        assert_eq!(x.kind_name(), "LOCAL");
        assert!(ec.object("s").is_err());
        assert!(matches!(ec.object("Y"), Err(FedError::UnknownVariable(_))));
    }

    #[test]
    fn local_frame_carries_schema() {
        let f = FrameBlock::new(
            vec![ValueType::String, ValueType::Int64],
            vec![vec!["a".into()], vec!["1".into()]],
        )
        .unwrap();
        let obj = FedObject::local(LocalData::Frame(f));
        assert_eq!(obj.schema_slice(1, 2).unwrap(), vec![ValueType::Int64]);
        assert!(obj.schema_slice(1, 3).is_err());
    }

    #[test]
    fn scalar_parse_by_type() {
        assert_eq!(ScalarValue::parse("2.5", ValueType::Fp64).unwrap(), ScalarValue::Double(2.5));
        assert!(ScalarValue::parse("x", ValueType::Int64).is_err());
        assert_eq!(ScalarValue::Double(4.0).as_i64().unwrap(), 4);
        assert!(ScalarValue::Str("a".into()).as_i64().is_err());
    }

    #[test]
    fn boolean_literals_are_strict() {
        assert_eq!(ScalarValue::parse("TRUE", ValueType::Boolean).unwrap(), ScalarValue::Bool(true));
        assert_eq!(ScalarValue::parse("false", ValueType::Boolean).unwrap(), ScalarValue::Bool(false));
        for text in ["yes", "1", "", "truthy"] {
            assert!(ScalarValue::parse(text, ValueType::Boolean).is_err(), "accepted `{text}`");
        }
    }
}
