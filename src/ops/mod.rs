//! Operator descriptors and their per-device dispatch.
//!
//! Every operator follows the same four-operation contract: `create`
//! validates tensor descriptors and parameters against a device handle and
//! precomputes the layout analysis the kernel needs; `workspace_size` reports
//! the scratch bytes `calculate` requires; `calculate` runs against raw
//! buffers any number of times; dropping the descriptor releases its
//! resources. `create` routes on the handle's device type; every later call
//! routes on the backend tag stamped into the descriptor, so a descriptor can
//! never be misdirected to the wrong backend.

use crate::{
    error::{Error, Result, ShapeError},
    num::Dtype,
    tensor::TensorDescriptor,
};

pub mod add;
pub mod cast;
pub mod causal_softmax;
pub mod elementwise;
pub mod gemm;
pub mod mul;
pub(crate) mod reduce;
pub mod rms_norm;
pub mod swiglu;

/// Reject dtypes outside an operator's supported set.
pub(crate) fn check_dtype(dtype: Dtype, supported: &[Dtype]) -> Result<()> {
    match supported.contains(&dtype) {
        true => Ok(()),
        false => Err(Error::BadTensorDtype(dtype)),
    }
}

/// Require every input to share the output's extents exactly.
pub(crate) fn check_same_shape(
    output: &TensorDescriptor,
    inputs: &[&TensorDescriptor],
) -> Result<()> {
    for input in inputs {
        if input.shape() != output.shape() {
            return Err(ShapeError::Mismatch(
                output.shape().to_vec(),
                input.shape().to_vec(),
            ))?;
        }
    }
    Ok(())
}

/// Require every input to carry the output's dtype.
pub(crate) fn check_same_dtype(
    output: &TensorDescriptor,
    inputs: &[&TensorDescriptor],
) -> Result<()> {
    for input in inputs {
        if input.dtype() != output.dtype() {
            return Err(Error::BadTensorDtype(input.dtype()));
        }
    }
    Ok(())
}

/// Raw buffer address allowed to cross worker threads.
///
/// Kernels hand workers non-overlapping output regions, which is what makes
/// the shared address sound.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SendPtr<T>(pub *mut T);

unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}
