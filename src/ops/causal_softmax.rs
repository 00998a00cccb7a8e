//! Causally masked softmax over the last dimension.
//!
//! For a `[seq, total]` attention-score tile with `total ≥ seq`, row `i` may
//! attend to columns `j ≤ i + (total - seq)`; masked columns come out as
//! zero probability. Rows are staged through the handle's pooled f32
//! scratch, so half-precision inputs are normalized in full precision.

use std::sync::Arc;

use half::{bf16, f16};

use super::{SendPtr, check_dtype, check_same_shape};
use crate::{
    device::{Handle, RawStream, cpu::Internal},
    error::{Error, Result, ShapeError},
    num::{Dtype, Float},
    tensor::TensorDescriptor,
};

/// Shape/stride analysis shared by every backend of this operator.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Info {
    dtype: Dtype,
    batch: usize,
    seq: usize,
    total: usize,
    x_strides: [isize; 2],
    y_strides: [isize; 2],
}

impl Info {
    pub fn create(y: &TensorDescriptor, x: &TensorDescriptor) -> Result<Self> {
        let dtype = y.dtype();
        check_dtype(dtype, &[Dtype::F16, Dtype::BF16, Dtype::F32])?;
        if x.dtype() != dtype {
            return Err(Error::BadTensorDtype(x.dtype()));
        }
        check_same_shape(y, &[x])?;
        if !matches!(y.ndim(), 2 | 3) {
            return Err(ShapeError::Ndim(y.ndim()))?;
        }
        if let Some(&dim) = y.broadcast_dims().first() {
            return Err(ShapeError::BroadcastOutput(dim))?;
        }
        for desc in [y, x] {
            let inner = desc.stride(desc.ndim() - 1);
            if inner != 1 {
                return Err(ShapeError::InnerStride(inner))?;
            }
        }

        let ndim = y.ndim();
        let seq = y.dim(ndim - 2);
        let total = y.dim(ndim - 1);
        if total < seq {
            return Err(Error::OperatorCreationFailed(format!(
                "sequence extent {seq} exceeds total extent {total}"
            )));
        }
        let batch = match ndim {
            3 => y.dim(0),
            _ => 1,
        };
        let strides = |desc: &TensorDescriptor| match ndim {
            3 => [desc.stride(0), desc.stride(1)],
            _ => [0, desc.stride(0)],
        };
        Ok(Self {
            dtype,
            batch,
            seq,
            total,
            x_strides: strides(x),
            y_strides: strides(y),
        })
    }
}

/// One row per worker, each staged in a privately owned pooled scratch.
unsafe fn causal_softmax<T: Float>(
    info: &Info,
    internal: &Internal,
    y: *mut T,
    x: *const T,
) -> Result<()> {
    let Info {
        batch,
        seq,
        total,
        x_strides,
        y_strides,
        ..
    } = *info;
    let offset = total - seq;
    let y = SendPtr(y);
    let x = SendPtr(x.cast_mut());

    let row = |index: usize| -> Result<()> {
        let (x, y) = (x, y);
        let b = (index / seq) as isize;
        let i = index % seq;
        let x = unsafe { x.0.cast_const().offset(b * x_strides[0] + i as isize * x_strides[1]) };
        let y = unsafe { y.0.offset(b * y_strides[0] + i as isize * y_strides[1]) };
        let allowed = offset + i + 1;

        internal.with_scratch(allowed, |buf| {
            for (j, value) in buf.iter_mut().enumerate() {
                *value = unsafe { x.add(j).read() }.to_f32();
            }
            let max = buf.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0;
            for value in buf.iter_mut() {
                *value = (*value - max).exp();
                sum += *value;
            }
            for (j, value) in buf.iter().enumerate() {
                unsafe { y.add(j).write(T::from_f32(value / sum)) };
            }
            for j in allowed..total {
                unsafe { y.add(j).write(T::from_f32(0.0)) };
            }
            Ok(())
        })
    };

    #[cfg(feature = "rayon")]
    let result = {
        use rayon::prelude::*;
        (0..batch * seq).into_par_iter().try_for_each(row)
    };
    #[cfg(not(feature = "rayon"))]
    let result = (0..batch * seq).try_for_each(row);
    result
}

pub mod cpu {
    use super::*;

    #[derive(Debug)]
    pub struct Descriptor {
        info: Info,
        internal: Arc<Internal>,
    }

    impl Descriptor {
        pub fn create(
            handle: &crate::device::cpu::Handle,
            y: &TensorDescriptor,
            x: &TensorDescriptor,
        ) -> Result<Self> {
            let info = Info::create(y, x)?;
            let internal = handle.internal().clone();
            Ok(Self { info, internal })
        }

        #[inline]
        pub fn workspace_size(&self) -> usize {
            0
        }

        /// # Safety
        /// Buffers must cover every offset the creation-time descriptors
        /// address.
        pub unsafe fn calculate(
            &self,
            _workspace: *mut u8,
            workspace_size: usize,
            y: *mut u8,
            x: *const u8,
            _stream: RawStream,
        ) -> Result<()> {
            if workspace_size < self.workspace_size() {
                return Err(Error::InsufficientWorkspace {
                    required: self.workspace_size(),
                    provided: workspace_size,
                });
            }
            let info = &self.info;
            let internal = &self.internal;
            match info.dtype {
                Dtype::F16 => unsafe { causal_softmax::<f16>(info, internal, y.cast(), x.cast()) },
                Dtype::BF16 => unsafe {
                    causal_softmax::<bf16>(info, internal, y.cast(), x.cast())
                },
                Dtype::F32 => unsafe { causal_softmax::<f32>(info, internal, y.cast(), x.cast()) },
                dtype => Err(Error::BadTensorDtype(dtype)),
            }
        }
    }
}

/// Opaque causal-softmax descriptor, tagged by the backend it was created
/// for.
#[derive(Debug)]
pub enum Descriptor {
    Cpu(cpu::Descriptor),
}

impl Descriptor {
    pub fn create(handle: &Handle, y: &TensorDescriptor, x: &TensorDescriptor) -> Result<Self> {
        match handle {
            Handle::Cpu(handle) => Ok(Self::Cpu(cpu::Descriptor::create(handle, y, x)?)),
        }
    }

    #[inline]
    pub fn workspace_size(&self) -> usize {
        match self {
            Self::Cpu(desc) => desc.workspace_size(),
        }
    }

    /// # Safety
    /// Buffers must cover every offset the creation-time descriptors address
    /// and stay untouched until the enqueued work completes.
    pub unsafe fn calculate(
        &self,
        workspace: *mut u8,
        workspace_size: usize,
        y: *mut u8,
        x: *const u8,
        stream: RawStream,
    ) -> Result<()> {
        match self {
            Self::Cpu(desc) => unsafe { desc.calculate(workspace, workspace_size, y, x, stream) },
        }
    }
}
