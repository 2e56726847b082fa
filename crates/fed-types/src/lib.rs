pub mod config;
pub mod data;
pub mod error;
pub mod instruction;
pub mod range;

pub use config::{ExecutionMode, FederationConfig};
pub use data::{DenseBlock, FrameBlock, LocalData};
pub use error::TypesError;
pub use instruction::{DataType, Instruction, Operand, ValueType};
pub use range::{FType, FederatedRange, IndexRange, WorkerAddress};
