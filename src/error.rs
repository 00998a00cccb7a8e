use thiserror::Error;

use crate::{device::DeviceType, num::Dtype};

pub type Result<T> = std::result::Result<T, Error>;

/// Violations of the shape/stride algebra, detected at the call that would
/// break the invariant and never silently corrected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("shape has {shape} dimensions but strides has {strides}")]
    Rank { shape: usize, strides: usize },
    #[error("dimension {dim} out of range for tensor of {ndim} dimensions")]
    DimOutOfRange { ndim: usize, dim: usize },
    #[error("dimensions [{start}, {end}] are not mergable")]
    NotMergable { start: usize, end: usize },
    #[error("split of axis {axis} (extent {extent}) into product {product}")]
    SplitMismatch {
        axis: usize,
        extent: usize,
        product: usize,
    },
    #[error("order is not a permutation of the dimensions")]
    NotPermutation,
    #[error("tensor of {0} dimensions not supported by this operator")]
    Ndim(usize),
    #[error("tensor shape {0:?} does not match {1:?}")]
    Mismatch(Vec<usize>, Vec<usize>),
    #[error("output tensor has a broadcast dimension at {0}")]
    BroadcastOutput(usize),
    #[error("innermost dimension must be contiguous, stride is {0}")]
    InnerStride(isize),
}

/// Everything a fallible operation can report. The C surface flattens this
/// into [`Status`] codes; the Rust surface keeps the structured payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("null pointer")]
    NullPointer,
    #[error("no backend compiled in for device type {0}")]
    DeviceTypeNotSupported(DeviceType),
    #[error("tensor dtype {0} not supported by this operator")]
    BadTensorDtype(Dtype),
    #[error("tensor shape error: {0}")]
    BadTensorShape(#[from] ShapeError),
    #[error("workspace of {provided} bytes, operator requires {required}")]
    InsufficientWorkspace { required: usize, provided: usize },
    #[error("device resource failure: {0}")]
    DeviceResourceFailure(String),
    #[error("operator creation failed: {0}")]
    OperatorCreationFailed(String),
    #[error("operator execution failed: {0}")]
    OperatorExecutionFailed(String),
}

/// Flat status codes for the C-callable surface.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success = 0,
    NullPointer = 1,
    DeviceTypeNotSupported = 2,
    BadTensorDtype = 3,
    BadTensorShape = 4,
    InsufficientWorkspace = 5,
    DeviceResourceFailure = 6,
    OperatorCreationFailed = 7,
    OperatorExecutionFailed = 8,
}

impl From<&Error> for Status {
    fn from(value: &Error) -> Self {
        match value {
            Error::NullPointer => Status::NullPointer,
            Error::DeviceTypeNotSupported(_) => Status::DeviceTypeNotSupported,
            Error::BadTensorDtype(_) => Status::BadTensorDtype,
            Error::BadTensorShape(_) => Status::BadTensorShape,
            Error::InsufficientWorkspace { .. } => Status::InsufficientWorkspace,
            Error::DeviceResourceFailure(_) => Status::DeviceResourceFailure,
            Error::OperatorCreationFailed(_) => Status::OperatorCreationFailed,
            Error::OperatorExecutionFailed(_) => Status::OperatorExecutionFailed,
        }
    }
}

impl<T> From<Result<T>> for Status {
    fn from(value: Result<T>) -> Self {
        match value {
            Ok(_) => Status::Success,
            Err(err) => Status::from(&err),
        }
    }
}
