use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvError {
    // Not supported by any path, retrying will not help
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    // Malformed descriptor or argument binding, caller error
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    // Plan construction or scratch allocation could not get memory
    #[error("Out of memory error: {0}")]
    OutOfMemory(String),

    // Internal invariant violated
    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

pub type Result<T> = std::result::Result<T, ConvError>;

/// Plain status code for callers that only want to know how a call ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    Unimplemented,
    InvalidArguments,
    OutOfMemory,
    RuntimeError,
}

impl ConvError {
    pub fn status(&self) -> Status {
        match self {
            ConvError::Unimplemented(_) => Status::Unimplemented,
            ConvError::InvalidArguments(_) => Status::InvalidArguments,
            ConvError::OutOfMemory(_) => Status::OutOfMemory,
            ConvError::RuntimeError(_) => Status::RuntimeError,
        }
    }
}

impl<T> From<&Result<T>> for Status {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Status::Success,
            Err(err) => err.status(),
        }
    }
}

impl From<std::collections::TryReserveError> for ConvError {
    fn from(err: std::collections::TryReserveError) -> Self {
        ConvError::OutOfMemory(err.to_string())
    }
}

impl From<rayon::ThreadPoolBuildError> for ConvError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        ConvError::RuntimeError(format!("Failed to build compute thread pool: {}", err))
    }
}
