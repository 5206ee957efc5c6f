use thiserror::Error;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("model file {0} not found")]
    FileNotFound(PathBuf),

    #[error("invalid device: {0}")]
    InvalidDevice(String),

    #[error("input nil or empty: predict needs at least one tensor")]
    EmptyInput,

    #[error("unsupported tensor kind: {0}")]
    UnsupportedTensorKind(String),

    #[error("zero number of output tensors: engine produced no outputs")]
    NoOutputs,

    #[error("engine error: {0}")]
    EngineError(String),

    #[error("malformed profile: {0}")]
    MalformedProfile(String),

    #[error("usage error: {0}")]
    UsageError(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("undefined element kind: {0}")]
    UndefinedElementKind(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protobuf parsing error: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("Invalid ONNX model: {0}")]
    InvalidModel(String),

    #[error("Invalid operator: {0}")]
    InvalidOperator(String),
}

impl Error {
    /// Contract failures point at a bug in the caller or in the marshaling
    /// table; the operation that hit them is aborted and never retried.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::ShapeMismatch(_) | Error::UndefinedElementKind(_))
    }

    /// Engine-reported failures leave the session usable for later calls.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::EngineError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_errors_are_distinguishable() {
        let messages = vec![
            Error::FileNotFound(PathBuf::from("missing.onnx")).to_string(),
            Error::InvalidDevice("cuda:0 requested but no GPU is available".to_string()).to_string(),
            Error::EmptyInput.to_string(),
            Error::UnsupportedTensorKind("non-contiguous".to_string()).to_string(),
            Error::NoOutputs.to_string(),
        ];

        assert!(messages[0].contains("not found"));
        assert!(messages[1].contains("invalid device"));
        assert!(messages[2].contains("empty"));
        assert!(messages[3].contains("unsupported tensor kind"));
        assert!(messages[4].contains("zero number of output tensors"));
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::ShapeMismatch("x".into()).is_contract_violation());
        assert!(Error::UndefinedElementKind("x".into()).is_contract_violation());
        assert!(!Error::EmptyInput.is_contract_violation());
        assert!(Error::EngineError("boom".into()).is_recoverable());
        assert!(!Error::NoOutputs.is_recoverable());
    }
}
