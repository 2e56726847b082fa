// Leaf error type for value construction and instruction parsing.

#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("invalid operand: {0}")]
    InvalidOperand(String),

    #[error("invalid instruction: {0}")]
    InvalidInstruction(String),

    #[error("invalid worker address: {0}")]
    InvalidAddress(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("local data error: {0}")]
    Data(String),
}
