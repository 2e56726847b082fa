//! Partition geometry: worker addresses, partition boxes and requested
//! index ranges.
//!
//! All boxes are 0-based and half-open: `[begin, end)` on both axes. Axis 0
//! is rows, axis 1 is columns.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypesError;

// ── Worker Address ────────────────────────────────────────────────────────────

/// Network location of a federated worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerAddress {
    pub host: String,
    pub port: u16,
}

impl WorkerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for WorkerAddress {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| TypesError::InvalidAddress(s.to_string()))?;
        if host.is_empty() {
            return Err(TypesError::InvalidAddress(s.to_string()));
        }
        let port = port
            .parse()
            .map_err(|_| TypesError::InvalidAddress(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

// ── Partition Kind ────────────────────────────────────────────────────────────

/// How a federated object is split across workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FType {
    /// Horizontal split: every partition spans all columns.
    Row,
    /// Vertical split: every partition spans all rows.
    Col,
    /// Arbitrary 2-D blocks.
    Full,
    /// Every worker holds the complete object.
    Broadcast,
}

impl FType {
    /// Axis along which partitions are cut, if the kind has a single one.
    pub fn axis(&self) -> Option<usize> {
        match self {
            Self::Row => Some(0),
            Self::Col => Some(1),
            Self::Full | Self::Broadcast => None,
        }
    }
}

impl fmt::Display for FType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Row       => write!(f, "ROW"),
            Self::Col       => write!(f, "COL"),
            Self::Full      => write!(f, "FULL"),
            Self::Broadcast => write!(f, "BROADCAST"),
        }
    }
}

// ── Federated Range ───────────────────────────────────────────────────────────

/// Box owned by one partition of a federated object.
///
/// Immutable: every derivation returns a new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RangeRepr")]
pub struct FederatedRange {
    begin: [u64; 2],
    end: [u64; 2],
}

#[derive(Deserialize)]
struct RangeRepr {
    begin: [u64; 2],
    end: [u64; 2],
}

impl TryFrom<RangeRepr> for FederatedRange {
    type Error = TypesError;

    fn try_from(r: RangeRepr) -> Result<Self, Self::Error> {
        Self::new(r.begin, r.end)
    }
}

impl FederatedRange {
    /// Requires `begin[k] < end[k]` on both axes.
    pub fn new(begin: [u64; 2], end: [u64; 2]) -> Result<Self, TypesError> {
        if begin[0] >= end[0] || begin[1] >= end[1] {
            return Err(TypesError::InvalidRange(format!(
                "empty or inverted box {begin:?}..{end:?}"
            )));
        }
        Ok(Self { begin, end })
    }

    pub fn begin(&self) -> [u64; 2] {
        self.begin
    }

    pub fn end(&self) -> [u64; 2] {
        self.end
    }

    pub fn rows(&self) -> u64 {
        self.end[0] - self.begin[0]
    }

    pub fn cols(&self) -> u64 {
        self.end[1] - self.begin[1]
    }

    pub fn extent(&self, axis: usize) -> u64 {
        self.end[axis] - self.begin[axis]
    }

    pub fn cells(&self) -> u64 {
        self.rows() * self.cols()
    }

    /// Overlapping box, or `None` when the boxes are disjoint.
    pub fn intersect(&self, other: &FederatedRange) -> Option<FederatedRange> {
        let begin = [
            self.begin[0].max(other.begin[0]),
            self.begin[1].max(other.begin[1]),
        ];
        let end = [
            self.end[0].min(other.end[0]),
            self.end[1].min(other.end[1]),
        ];
        Self::new(begin, end).ok()
    }

    pub fn overlaps(&self, other: &FederatedRange) -> bool {
        self.intersect(other).is_some()
    }

    pub fn contains(&self, other: &FederatedRange) -> bool {
        self.begin[0] <= other.begin[0]
            && self.begin[1] <= other.begin[1]
            && self.end[0] >= other.end[0]
            && self.end[1] >= other.end[1]
    }

    /// Translate by a non-negative offset.
    pub fn shift(&self, row_offset: u64, col_offset: u64) -> FederatedRange {
        FederatedRange {
            begin: [self.begin[0] + row_offset, self.begin[1] + col_offset],
            end: [self.end[0] + row_offset, self.end[1] + col_offset],
        }
    }

    /// Express this box relative to `origin`, which must not lie beyond
    /// `begin` on either axis.
    pub fn rebase(&self, origin: [u64; 2]) -> Result<FederatedRange, TypesError> {
        if origin[0] > self.begin[0] || origin[1] > self.begin[1] {
            return Err(TypesError::InvalidRange(format!(
                "origin {origin:?} lies past box begin {:?}",
                self.begin
            )));
        }
        Ok(FederatedRange {
            begin: [self.begin[0] - origin[0], self.begin[1] - origin[1]],
            end: [self.end[0] - origin[0], self.end[1] - origin[1]],
        })
    }

    /// Same box with the end on `axis` replaced.
    pub fn with_end(&self, axis: usize, end: u64) -> Result<FederatedRange, TypesError> {
        let mut next = self.end;
        next[axis] = end;
        Self::new(self.begin, next)
    }
}

impl fmt::Display for FederatedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}:{}, {}:{}]",
            self.begin[0], self.end[0], self.begin[1], self.end[1]
        )
    }
}

// ── Index Range ───────────────────────────────────────────────────────────────

/// Requested slice of a logical object, 0-based half-open.
///
/// Instructions carry slice bounds 1-based and inclusive;
/// [`IndexRange::from_one_based`] and [`IndexRange::to_one_based`] convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRange {
    pub row_begin: u64,
    pub row_end: u64,
    pub col_begin: u64,
    pub col_end: u64,
}

impl IndexRange {
    pub fn new(row_begin: u64, row_end: u64, col_begin: u64, col_end: u64) -> Result<Self, TypesError> {
        if row_begin >= row_end || col_begin >= col_end {
            return Err(TypesError::InvalidRange(format!(
                "empty index range [{row_begin}:{row_end}, {col_begin}:{col_end})"
            )));
        }
        Ok(Self {
            row_begin,
            row_end,
            col_begin,
            col_end,
        })
    }

    /// From inclusive 1-based bounds `rl:ru, cl:cu`.
    pub fn from_one_based(rl: i64, ru: i64, cl: i64, cu: i64) -> Result<Self, TypesError> {
        if rl < 1 || cl < 1 || ru < rl || cu < cl {
            return Err(TypesError::InvalidRange(format!(
                "invalid 1-based index range [{rl}:{ru}, {cl}:{cu}]"
            )));
        }
        Self::new(rl as u64 - 1, ru as u64, cl as u64 - 1, cu as u64)
    }

    /// Inclusive 1-based bounds `[rl, ru, cl, cu]`.
    pub fn to_one_based(&self) -> [u64; 4] {
        [self.row_begin + 1, self.row_end, self.col_begin + 1, self.col_end]
    }

    pub fn rows(&self) -> u64 {
        self.row_end - self.row_begin
    }

    pub fn cols(&self) -> u64 {
        self.col_end - self.col_begin
    }

    pub fn origin(&self) -> [u64; 2] {
        [self.row_begin, self.col_begin]
    }

    pub fn as_range(&self) -> FederatedRange {
        FederatedRange {
            begin: [self.row_begin, self.col_begin],
            end: [self.row_end, self.col_end],
        }
    }

    /// Box covering a whole `rows x cols` object.
    pub fn full(rows: u64, cols: u64) -> Result<Self, TypesError> {
        Self::new(0, rows, 0, cols)
    }
}

impl From<FederatedRange> for IndexRange {
    fn from(r: FederatedRange) -> Self {
        Self {
            row_begin: r.begin[0],
            row_end: r.end[0],
            col_begin: r.begin[1],
            col_end: r.end[1],
        }
    }
}

impl fmt::Display for IndexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [rl, ru, cl, cu] = self.to_one_based();
        write!(f, "[{rl}:{ru}, {cl}:{cu}]")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
