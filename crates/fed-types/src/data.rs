// Coordinator-resident blocks: the local operands that get sliced and
// shipped to workers, and the target of result materialization.

use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::instruction::{DataType, ValueType};
use crate::range::IndexRange;

// ── Dense Matrix ──────────────────────────────────────────────────────────────

/// Row-major dense matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DenseBlockRepr")]
pub struct DenseBlock {
    rows: u64,
    cols: u64,
    values: Vec<f64>,
}

#[derive(Deserialize)]
struct DenseBlockRepr {
    rows: u64,
    cols: u64,
    values: Vec<f64>,
}

impl TryFrom<DenseBlockRepr> for DenseBlock {
    type Error = TypesError;

    fn try_from(r: DenseBlockRepr) -> Result<Self, Self::Error> {
        Self::new(r.rows, r.cols, r.values)
    }
}

impl DenseBlock {
    pub fn new(rows: u64, cols: u64, values: Vec<f64>) -> Result<Self, TypesError> {
        if values.len() as u64 != rows * cols {
            return Err(TypesError::Data(format!(
                "{} values for a {rows}x{cols} matrix",
                values.len()
            )));
        }
        Ok(Self { rows, cols, values })
    }

    pub fn zeros(rows: u64, cols: u64) -> Self {
        Self {
            rows,
            cols,
            values: vec![0.0; (rows * cols) as usize],
        }
    }

    /// Matrix whose cell `(r, c)` holds `f(r, c)`.
    pub fn from_fn(rows: u64, cols: u64, f: impl Fn(u64, u64) -> f64) -> Self {
        let mut values = Vec::with_capacity((rows * cols) as usize);
        for r in 0..rows {
            for c in 0..cols {
                values.push(f(r, c));
            }
        }
        Self { rows, cols, values }
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn cols(&self) -> u64 {
        self.cols
    }

    pub fn get(&self, row: u64, col: u64) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.values.get((row * self.cols + col) as usize).copied()
    }

    fn slice(&self, ix: &IndexRange) -> DenseBlock {
        let mut values = Vec::with_capacity((ix.rows() * ix.cols()) as usize);
        for r in ix.row_begin..ix.row_end {
            let start = (r * self.cols + ix.col_begin) as usize;
            let end = (r * self.cols + ix.col_end) as usize;
            values.extend_from_slice(&self.values[start..end]);
        }
        DenseBlock {
            rows: ix.rows(),
            cols: ix.cols(),
            values,
        }
    }

    fn place(&mut self, at: [u64; 2], block: &DenseBlock) {
        for r in 0..block.rows {
            let dst = ((at[0] + r) * self.cols + at[1]) as usize;
            let src = (r * block.cols) as usize;
            self.values[dst..dst + block.cols as usize]
                .copy_from_slice(&block.values[src..src + block.cols as usize]);
        }
    }
}

// ── Frame ─────────────────────────────────────────────────────────────────────

/// Column-major frame with a per-column schema. Cells are kept in their
/// string form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FrameBlockRepr")]
pub struct FrameBlock {
    rows: u64,
    schema: Vec<ValueType>,
    columns: Vec<Vec<String>>,
}

#[derive(Deserialize)]
struct FrameBlockRepr {
    rows: u64,
    schema: Vec<ValueType>,
    columns: Vec<Vec<String>>,
}

// `rows` is kept as sent so that zero-column frames keep their height.
impl TryFrom<FrameBlockRepr> for FrameBlock {
    type Error = TypesError;

    fn try_from(r: FrameBlockRepr) -> Result<Self, Self::Error> {
        if r.schema.len() != r.columns.len() || r.columns.iter().any(|c| c.len() as u64 != r.rows) {
            return Err(TypesError::Data(format!(
                "frame payload with {} schema columns and {} data columns does not match {} rows",
                r.schema.len(),
                r.columns.len(),
                r.rows
            )));
        }
        Ok(Self {
            rows: r.rows,
            schema: r.schema,
            columns: r.columns,
        })
    }
}

impl FrameBlock {
    pub fn new(schema: Vec<ValueType>, columns: Vec<Vec<String>>) -> Result<Self, TypesError> {
        if schema.len() != columns.len() {
            return Err(TypesError::Data(format!(
                "schema has {} columns, data has {}",
                schema.len(),
                columns.len()
            )));
        }
        let rows = columns.first().map_or(0, Vec::len) as u64;
        if columns.iter().any(|c| c.len() as u64 != rows) {
            return Err(TypesError::Data("ragged frame columns".into()));
        }
        Ok(Self { rows, schema, columns })
    }

    pub fn empty(rows: u64, schema: Vec<ValueType>) -> Self {
        let columns = vec![vec![String::new(); rows as usize]; schema.len()];
        Self { rows, schema, columns }
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn cols(&self) -> u64 {
        self.schema.len() as u64
    }

    pub fn schema(&self) -> &[ValueType] {
        &self.schema
    }

    pub fn get(&self, row: u64, col: u64) -> Option<&str> {
        self.columns
            .get(col as usize)
            .and_then(|c| c.get(row as usize))
            .map(String::as_str)
    }

    fn slice(&self, ix: &IndexRange) -> FrameBlock {
        let (r0, r1) = (ix.row_begin as usize, ix.row_end as usize);
        let (c0, c1) = (ix.col_begin as usize, ix.col_end as usize);
        FrameBlock {
            rows: ix.rows(),
            schema: self.schema[c0..c1].to_vec(),
            columns: self.columns[c0..c1]
                .iter()
                .map(|col| col[r0..r1].to_vec())
                .collect(),
        }
    }

    fn place(&mut self, at: [u64; 2], block: &FrameBlock) {
        for (c, col) in block.columns.iter().enumerate() {
            let dst = &mut self.columns[at[1] as usize + c];
            let r0 = at[0] as usize;
            dst[r0..r0 + col.len()].clone_from_slice(col);
            self.schema[at[1] as usize + c] = block.schema[c];
        }
    }
}

// ── Local Data ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocalData {
    Matrix(DenseBlock),
    Frame(FrameBlock),
}

impl LocalData {
    /// Zero matrix or blank frame of the given shape, used as an assembly
    /// target. Frame columns start as `ValueType::String` unless a schema is
    /// supplied.
    pub fn empty(data_type: DataType, rows: u64, cols: u64, schema: Option<&[ValueType]>) -> Result<Self, TypesError> {
        match data_type {
            DataType::Matrix => Ok(Self::Matrix(DenseBlock::zeros(rows, cols))),
            DataType::Frame => {
                let schema = schema
                    .map(<[ValueType]>::to_vec)
                    .unwrap_or_else(|| vec![ValueType::String; cols as usize]);
                Ok(Self::Frame(FrameBlock::empty(rows, schema)))
            }
            DataType::Scalar => Err(TypesError::Data("scalars have no block form".into())),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Self::Matrix(_) => DataType::Matrix,
            Self::Frame(_) => DataType::Frame,
        }
    }

    pub fn rows(&self) -> u64 {
        match self {
            Self::Matrix(m) => m.rows(),
            Self::Frame(f) => f.rows(),
        }
    }

    pub fn cols(&self) -> u64 {
        match self {
            Self::Matrix(m) => m.cols(),
            Self::Frame(f) => f.cols(),
        }
    }

    /// Copy out the cells inside `ix`, which must lie within this block.
    pub fn slice(&self, ix: &IndexRange) -> Result<LocalData, TypesError> {
        if ix.row_end > self.rows() || ix.col_end > self.cols() {
            return Err(TypesError::Data(format!(
                "slice {ix} exceeds block {}x{}",
                self.rows(),
                self.cols()
            )));
        }
        Ok(match self {
            Self::Matrix(m) => Self::Matrix(m.slice(ix)),
            Self::Frame(f) => Self::Frame(f.slice(ix)),
        })
    }

    /// Write `block` into this one with its top-left corner at `at`.
    pub fn place(&mut self, at: [u64; 2], block: &LocalData) -> Result<(), TypesError> {
        if at[0] + block.rows() > self.rows() || at[1] + block.cols() > self.cols() {
            return Err(TypesError::Data(format!(
                "{}x{} block at {at:?} exceeds target {}x{}",
                block.rows(),
                block.cols(),
                self.rows(),
                self.cols()
            )));
        }
        match (self, block) {
            (Self::Matrix(dst), Self::Matrix(src)) => dst.place(at, src),
            (Self::Frame(dst), Self::Frame(src)) => dst.place(at, src),
            _ => return Err(TypesError::Data("cannot mix matrix and frame blocks".into())),
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_slice() {
        let m = DenseBlock::from_fn(4, 3, |r, c| (r * 10 + c) as f64);
        let s = LocalData::Matrix(m)
            .slice(&IndexRange::new(1, 3, 1, 3).unwrap())
            .unwrap();
        match s {
            LocalData::Matrix(b) => {
                assert_eq!((b.rows(), b.cols()), (2, 2));
                assert_eq!(b.get(0, 0), Some(11.0));
                assert_eq!(b.get(1, 1), Some(22.0));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn slice_out_of_bounds() {
        let d = LocalData::Matrix(DenseBlock::zeros(2, 2));
        assert!(d.slice(&IndexRange::new(0, 3, 0, 1).unwrap()).is_err());
    }

    #[test]
    fn dense_place_reassembles() {
        let full = DenseBlock::from_fn(4, 2, |r, c| (r * 2 + c) as f64);
        let src = LocalData::Matrix(full.clone());
        let mut out = LocalData::empty(DataType::Matrix, 4, 2, None).unwrap();
        let top = src.slice(&IndexRange::new(0, 2, 0, 2).unwrap()).unwrap();
        let bottom = src.slice(&IndexRange::new(2, 4, 0, 2).unwrap()).unwrap();
        out.place([0, 0], &top).unwrap();
        out.place([2, 0], &bottom).unwrap();
        assert_eq!(out, LocalData::Matrix(full));
    }

    #[test]
    fn frame_slice_schema() {
        let f = FrameBlock::new(
            vec![ValueType::String, ValueType::Int64, ValueType::Fp64],
            vec![
                vec!["a".into(), "b".into()],
                vec!["1".into(), "2".into()],
                vec!["0.5".into(), "1.5".into()],
            ],
        )
        .unwrap();
        let s = LocalData::Frame(f).slice(&IndexRange::new(1, 2, 1, 3).unwrap()).unwrap();
        match s {
            LocalData::Frame(b) => {
                assert_eq!(b.schema(), &[ValueType::Int64, ValueType::Fp64]);
                assert_eq!(b.get(0, 0), Some("2"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn ragged_frame_rejected() {
        let r = FrameBlock::new(
            vec![ValueType::String, ValueType::String],
            vec![vec!["a".into()], vec![]],
        );
        assert!(r.is_err());
    }

    #[test]
    fn malformed_payloads_rejected_on_deserialize() {
        let short = r#"{"rows":2,"cols":2,"values":[1.0,2.0,3.0]}"#;
        assert!(serde_json::from_str::<DenseBlock>(short).is_err());

        let ragged = r#"{"rows":2,"schema":["String"],"columns":[["a"]]}"#;
        assert!(serde_json::from_str::<FrameBlock>(ragged).is_err());

        let ok = serde_json::to_string(&DenseBlock::zeros(2, 3)).unwrap();
        assert_eq!(serde_json::from_str::<DenseBlock>(&ok).unwrap(), DenseBlock::zeros(2, 3));
    }
}
