//! Row-wise RMS normalization: `y = x ⊙ w / sqrt(mean(x²) + ε)`.
//!
//! Activations of 2 dimensions (`[batch, dim]`) or 3 (`[batch, nhead, dim]`)
//! are normalized along the innermost dimension; the weight is a contiguous
//! `[dim]` vector, either in the activation dtype or in f32 for the
//! half-precision activations.

use half::{bf16, f16};

use super::{SendPtr, check_dtype, check_same_shape, reduce};
use crate::{
    device::{Handle, RawStream},
    error::{Error, Result, ShapeError},
    num::{Dtype, Float},
    tensor::TensorDescriptor,
};

/// Shape/stride analysis shared by every backend of this operator.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Info {
    atype: Dtype,
    wtype: Dtype,
    epsilon: f32,
    batch: usize,
    nhead: usize,
    dim: usize,
    x_strides: [isize; 2],
    y_strides: [isize; 2],
}

impl Info {
    pub fn create(
        y: &TensorDescriptor,
        x: &TensorDescriptor,
        w: &TensorDescriptor,
        epsilon: f32,
    ) -> Result<Self> {
        let atype = x.dtype();
        check_dtype(atype, &[Dtype::F16, Dtype::BF16, Dtype::F32, Dtype::F64])?;
        if y.dtype() != atype {
            return Err(Error::BadTensorDtype(y.dtype()));
        }
        let wtype = w.dtype();
        match atype {
            Dtype::F16 | Dtype::BF16 => check_dtype(wtype, &[atype, Dtype::F32])?,
            _ => check_dtype(wtype, &[atype])?,
        }

        check_same_shape(y, &[x])?;
        if !matches!(y.ndim(), 2 | 3) {
            return Err(ShapeError::Ndim(y.ndim()))?;
        }
        if let Some(&dim) = y.broadcast_dims().first() {
            return Err(ShapeError::BroadcastOutput(dim))?;
        }

        let ndim = y.ndim();
        let dim = y.dim(ndim - 1);
        if w.ndim() != 1 || w.dim(0) != dim {
            return Err(ShapeError::Mismatch(w.shape().to_vec(), vec![dim]))?;
        }
        for desc in [y, x, w] {
            let inner = desc.stride(desc.ndim() - 1);
            if inner != 1 {
                return Err(ShapeError::InnerStride(inner))?;
            }
        }

        let batch = y.dim(0);
        let nhead = match ndim {
            3 => y.dim(1),
            _ => 1,
        };
        let strides = |desc: &TensorDescriptor| match ndim {
            3 => [desc.stride(0), desc.stride(1)],
            _ => [desc.stride(0), 0],
        };
        Ok(Self {
            atype,
            wtype,
            epsilon,
            batch,
            nhead,
            dim,
            x_strides: strides(x),
            y_strides: strides(y),
        })
    }
}

/// One block per `(batch, head)` row; workers never share an output region.
unsafe fn rms_norm<T: Float, W: Float>(info: &Info, y: *mut T, x: *const T, w: *const W) {
    let Info {
        batch,
        nhead,
        dim,
        x_strides,
        y_strides,
        epsilon,
        ..
    } = *info;
    let y = SendPtr(y);
    let x = SendPtr(x.cast_mut());
    let w = SendPtr(w.cast_mut());

    let block = |index: usize| {
        let (x, y, w) = (x, y, w);
        let i = (index / nhead) as isize;
        let j = (index % nhead) as isize;
        let x = unsafe { x.0.cast_const().offset(i * x_strides[0] + j * x_strides[1]) };
        let y = unsafe { y.0.offset(i * y_strides[0] + j * y_strides[1]) };
        let w = w.0.cast_const();

        let ss = unsafe { reduce::sum_squared(x, dim, 1) };
        let rms = 1.0 / (ss / dim as f64 + epsilon as f64).sqrt();

        for k in 0..dim as isize {
            let value = unsafe { x.offset(k).read() }.to_f64()
                * unsafe { w.offset(k).read() }.to_f64()
                * rms;
            unsafe { y.offset(k).write(T::from_f64(value)) };
        }
    };

    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        (0..batch * nhead).into_par_iter().for_each(block);
    }
    #[cfg(not(feature = "rayon"))]
    (0..batch * nhead).for_each(block);
}

pub mod cpu {
    use super::*;

    #[derive(Debug)]
    pub struct Descriptor {
        info: Info,
    }

    impl Descriptor {
        pub fn create(
            _handle: &crate::device::cpu::Handle,
            y: &TensorDescriptor,
            x: &TensorDescriptor,
            w: &TensorDescriptor,
            epsilon: f32,
        ) -> Result<Self> {
            let info = Info::create(y, x, w, epsilon)?;
            Ok(Self { info })
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
            w: *const u8,
            _stream: RawStream,
        ) -> Result<()> {
            if workspace_size < self.workspace_size() {
                return Err(Error::InsufficientWorkspace {
                    required: self.workspace_size(),
                    provided: workspace_size,
                });
            }
            let info = &self.info;
            match (info.atype, info.wtype) {
                (Dtype::F16, Dtype::F16) => unsafe {
                    rms_norm::<f16, f16>(info, y.cast(), x.cast(), w.cast())
                },
                (Dtype::F16, Dtype::F32) => unsafe {
                    rms_norm::<f16, f32>(info, y.cast(), x.cast(), w.cast())
                },
                (Dtype::BF16, Dtype::BF16) => unsafe {
                    rms_norm::<bf16, bf16>(info, y.cast(), x.cast(), w.cast())
                },
                (Dtype::BF16, Dtype::F32) => unsafe {
                    rms_norm::<bf16, f32>(info, y.cast(), x.cast(), w.cast())
                },
                (Dtype::F32, Dtype::F32) => unsafe {
                    rms_norm::<f32, f32>(info, y.cast(), x.cast(), w.cast())
                },
                (Dtype::F64, Dtype::F64) => unsafe {
                    rms_norm::<f64, f64>(info, y.cast(), x.cast(), w.cast())
                },
                (atype, _) => return Err(Error::BadTensorDtype(atype)),
            }
            Ok(())
        }
    }
}

/// Opaque RMS-normalization descriptor, tagged by the backend it was created
/// for.
#[derive(Debug)]
pub enum Descriptor {
    Cpu(cpu::Descriptor),
}

impl Descriptor {
    pub fn create(
        handle: &Handle,
        y: &TensorDescriptor,
        x: &TensorDescriptor,
        w: &TensorDescriptor,
        epsilon: f32,
    ) -> Result<Self> {
        match handle {
            Handle::Cpu(handle) => Ok(Self::Cpu(cpu::Descriptor::create(handle, y, x, w, epsilon)?)),
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
        w: *const u8,
        stream: RawStream,
    ) -> Result<()> {
        match self {
            Self::Cpu(desc) => unsafe {
                desc.calculate(workspace, workspace_size, y, x, w, stream)
            },
        }
    }
}
