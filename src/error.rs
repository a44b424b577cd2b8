use pyo3::exceptions::PyValueError;
use pyo3::PyErr;
use thiserror::Error;

/// Errors surfaced by the mining engine. Configuration and data problems
/// are rejected synchronously before the search starts; `Io` can only occur
/// while streaming patterns to a line sink.
#[derive(Debug, Error)]
pub enum MineError {
    #[error("min_utility must be >= 0, got {0}")]
    InvalidMinUtility(i64),
    #[error("item {item} has negative utility {value}; the pruning bounds require non-negative values")]
    NegativeUtility { item: i64, value: i64 },
    #[error("dataset too large: {0}")]
    DatasetTooLarge(&'static str),
    #[error("pattern output failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MineError> for PyErr {
    fn from(err: MineError) -> PyErr {
        match err {
            MineError::Io(e) => e.into(),
            other => PyValueError::new_err(other.to_string()),
        }
    }
}
