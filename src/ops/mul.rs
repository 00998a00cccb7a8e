//! Elementwise multiplication.

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
                        f16::from_f32(x.to_f32() * y.to_f32())
                    })
                },
                Dtype::BF16 => unsafe {
                    elementwise::binary::<bf16>(info, output, a, b, |x, y| {
                        bf16::from_f32(x.to_f32() * y.to_f32())
                    })
                },
                Dtype::F32 => unsafe {
                    elementwise::binary::<f32>(info, output, a, b, |x, y| x * y)
                },
                Dtype::F64 => unsafe {
                    elementwise::binary::<f64>(info, output, a, b, |x, y| x * y)
                },
                dtype => return Err(Error::BadTensorDtype(dtype)),
            }
            Ok(())
        }
    }
}

/// Opaque multiplication descriptor, tagged by the backend it was created
/// for.
#[derive(Debug)]
pub enum Descriptor {
    Cpu(cpu::Descriptor),
}

impl Descriptor {
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
    use crate::device::DeviceType;

    #[test]
    fn test_mul_f64() -> Result<()> {
        fastrand::seed(42);
        let handle = Handle::create(DeviceType::Cpu, 0)?;

        let desc = TensorDescriptor::contiguous(Dtype::F64, [3, 5]);
        let op = Descriptor::create(&handle, &desc, &desc, &desc)?;

        let a: Vec<f64> = (0..15).map(|_| fastrand::f64()).collect();
        let b: Vec<f64> = (0..15).map(|_| fastrand::f64()).collect();
        let mut c = vec![0.0f64; 15];
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
        for i in 0..15 {
            assert_eq!(c[i], a[i] * b[i]);
        }
        Ok(())
    }

    #[test]
    fn test_mul_strided_output() -> Result<()> {
        let handle = Handle::create(DeviceType::Cpu, 0)?;

        // output rows padded to 4 elements in a larger buffer
        let output = TensorDescriptor::new(Dtype::F32, [2, 3], [4, 1])?;
        let input = TensorDescriptor::contiguous(Dtype::F32, [2, 3]);
        let op = Descriptor::create(&handle, &output, &input, &input)?;

        let a: Vec<f32> = (1..=6).map(|i| i as f32).collect();
        let b = vec![2.0f32; 6];
        let mut c = vec![f32::NAN; 8];
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
        assert_eq!(&c[0..3], &[2.0, 4.0, 6.0]);
        assert!(c[3].is_nan());
        assert_eq!(&c[4..7], &[8.0, 10.0, 12.0]);
        assert!(c[7].is_nan());
        Ok(())
    }
}
