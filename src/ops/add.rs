//! Elementwise addition.

use half::{bf16, f16};

use super::{check_dtype, check_same_dtype, check_same_shape};
use crate::{
    device::{Handle, RawStream},
    error::{Error, Result},
    num::Dtype,
    tensor::TensorDescriptor,
};

pub mod cpu {
    use super::super::elementwise::{self, Info};
    use super::*;

    #[derive(Debug)]
    pub struct Descriptor {
        dtype: Dtype,
        info: Info,
    }

    impl Descriptor {
        pub fn create(
            _handle: &crate::device::cpu::Handle,
            output: &TensorDescriptor,
            a: &TensorDescriptor,
            b: &TensorDescriptor,
        ) -> Result<Self> {
            let dtype = output.dtype();
            check_dtype(dtype, &[Dtype::F16, Dtype::BF16, Dtype::F32, Dtype::F64])?;
            check_same_dtype(output, &[a, b])?;
            check_same_shape(output, &[a, b])?;
            let info = Info::create(output, &[a, b])?;
            Ok(Self { dtype, info })
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
            output: *mut u8,
            a: *const u8,
            b: *const u8,
            _stream: RawStream,
        ) -> Result<()> {
            if workspace_size < self.workspace_size() {
                return Err(Error::InsufficientWorkspace {
                    required: self.workspace_size(),
                    provided: workspace_size,
                });
            }
            let info = &self.info;
            match self.dtype {
                Dtype::F16 => unsafe {
                    elementwise::binary::<f16>(info, output, a, b, |x, y| {
                        f16::from_f32(x.to_f32() + y.to_f32())
                    })
                },
                Dtype::BF16 => unsafe {
                    elementwise::binary::<bf16>(info, output, a, b, |x, y| {
                        bf16::from_f32(x.to_f32() + y.to_f32())
                    })
                },
                Dtype::F32 => unsafe {
                    elementwise::binary::<f32>(info, output, a, b, |x, y| x + y)
                },
                Dtype::F64 => unsafe {
                    elementwise::binary::<f64>(info, output, a, b, |x, y| x + y)
                },
                dtype => return Err(Error::BadTensorDtype(dtype)),
            }
            Ok(())
        }
    }
}

/// Opaque addition descriptor, tagged by the backend it was created for.
#[derive(Debug)]
pub enum Descriptor {
    Cpu(cpu::Descriptor),
}

impl Descriptor {
    /// Validate descriptors against the handle's device and build the
    /// backend descriptor.
    pub fn create(
        handle: &Handle,
        output: &TensorDescriptor,
        a: &TensorDescriptor,
        b: &TensorDescriptor,
    ) -> Result<Self> {
        match handle {
            Handle::Cpu(handle) => Ok(Self::Cpu(cpu::Descriptor::create(handle, output, a, b)?)),
        }
    }

    /// Scratch bytes `calculate` needs; stable for the descriptor's lifetime.
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
        output: *mut u8,
        a: *const u8,
        b: *const u8,
        stream: RawStream,
    ) -> Result<()> {
        match self {
            Self::Cpu(desc) => unsafe {
                desc.calculate(workspace, workspace_size, output, a, b, stream)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::null_mut;

    use super::*;
    use crate::{device::DeviceType, error::ShapeError};

    #[test]
    fn test_add_f32() -> Result<()> {
        fastrand::seed(42);
        let handle = Handle::create(DeviceType::Cpu, 0)?;

        let desc = TensorDescriptor::contiguous(Dtype::F32, [2, 3]);
        let op = Descriptor::create(&handle, &desc, &desc, &desc)?;
        assert_eq!(op.workspace_size(), 0);

        let a: Vec<f32> = (0..6).map(|_| fastrand::f32()).collect();
        let b: Vec<f32> = (0..6).map(|_| fastrand::f32()).collect();
        let mut c = vec![0.0f32; 6];
        unsafe {
            op.calculate(
                null_mut(),
                0,
                c.as_mut_ptr().cast(),
                a.as_ptr().cast(),
                b.as_ptr().cast(),
                null_mut(),
            )?;
        }
        for i in 0..6 {
            assert_eq!(c[i], a[i] + b[i]);
        }
        Ok(())
    }

    #[test]
    fn test_add_f16_broadcast_input() -> Result<()> {
        let handle = Handle::create(DeviceType::Cpu, 0)?;

        let output = TensorDescriptor::contiguous(Dtype::F16, [2, 4]);
        let a = TensorDescriptor::new(Dtype::F16, [2, 4], [0, 1])?;
        let b = TensorDescriptor::contiguous(Dtype::F16, [2, 4]);
        let op = Descriptor::create(&handle, &output, &a, &b)?;

        let row: Vec<f16> = [1.0f32, 2.0, 3.0, 4.0]
            .into_iter()
            .map(f16::from_f32)
            .collect();
        let full: Vec<f16> = (0..8).map(|i| f16::from_f32(i as f32)).collect();
        let mut out = vec![f16::ZERO; 8];
        unsafe {
            op.calculate(
                null_mut(),
                0,
                out.as_mut_ptr().cast(),
                row.as_ptr().cast(),
                full.as_ptr().cast(),
                null_mut(),
            )?;
        }
        for i in 0..8 {
            let expected = row[i % 4].to_f32() + full[i].to_f32();
            assert_eq!(out[i].to_f32(), expected);
        }
        Ok(())
    }

    #[test]
    fn test_mismatched_shapes() -> Result<()> {
        let handle = Handle::create(DeviceType::Cpu, 0)?;
        let output = TensorDescriptor::contiguous(Dtype::F32, [2, 3]);
        let a = TensorDescriptor::contiguous(Dtype::F32, [3, 2]);
        let err = Descriptor::create(&handle, &output, &a, &output).unwrap_err();
        assert!(matches!(
            err,
            Error::BadTensorShape(ShapeError::Mismatch(..))
        ));
        Ok(())
    }

    #[test]
    fn test_unsupported_dtype() -> Result<()> {
        let handle = Handle::create(DeviceType::Cpu, 0)?;
        let desc = TensorDescriptor::contiguous(Dtype::I32, [4]);
        let err = Descriptor::create(&handle, &desc, &desc, &desc).unwrap_err();
        assert_eq!(err, Error::BadTensorDtype(Dtype::I32));
        Ok(())
    }
}
