use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("invalid interval: left {left} must be below right {right}")]
    InvalidInterval { left: i64, right: i64 },

    #[error("move of interval [{left}, {right}] to {insertion} would nest it inside itself")]
    CycleDetected { left: i64, right: i64, insertion: i64 },
}
