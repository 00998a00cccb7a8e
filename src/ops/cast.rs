//! Dtype conversion. Values pass through an `f64` intermediate, which is
//! exact for every supported source except the upper range of the 64-bit
//! integers; float-to-int conversion saturates.

use half::{bf16, f16};

use super::{check_dtype, check_same_shape};
use crate::{
    device::{Handle, RawStream},
    error::{Error, Result},
    num::{Dtype, Scalar},
    tensor::TensorDescriptor,
};

const SUPPORTED: [Dtype; 8] = [
    Dtype::F16,
    Dtype::BF16,
    Dtype::F32,
    Dtype::F64,
    Dtype::I32,
    Dtype::I64,
    Dtype::U32,
    Dtype::U64,
];

trait CastScalar: Scalar {
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_cast_scalar {
    ($ty:ty) => {
        impl CastScalar for $ty {
            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(value: f64) -> Self {
                value as $ty
            }
        }
    };
}

impl_cast_scalar!(f32);
impl_cast_scalar!(f64);
impl_cast_scalar!(i32);
impl_cast_scalar!(i64);
impl_cast_scalar!(u32);
impl_cast_scalar!(u64);

impl CastScalar for f16 {
    #[inline]
    fn to_f64(self) -> f64 {
        f16::to_f64(self)
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        f16::from_f64(value)
    }
}

impl CastScalar for bf16 {
    #[inline]
    fn to_f64(self) -> f64 {
        bf16::to_f64(self)
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        bf16::from_f64(value)
    }
}

pub mod cpu {
    use super::super::elementwise::{self, Info};
    use super::*;

    #[derive(Debug)]
    pub struct Descriptor {
        from: Dtype,
        to: Dtype,
        info: Info,
    }

    impl Descriptor {
        pub fn create(
            _handle: &crate::device::cpu::Handle,
            output: &TensorDescriptor,
            input: &TensorDescriptor,
        ) -> Result<Self> {
            let from = input.dtype();
            let to = output.dtype();
            check_dtype(from, &SUPPORTED)?;
            check_dtype(to, &SUPPORTED)?;
            check_same_shape(output, &[input])?;
            let info = Info::create(output, &[input])?;
            Ok(Self { from, to, info })
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
            input: *const u8,
            _stream: RawStream,
        ) -> Result<()> {
            if workspace_size < self.workspace_size() {
                return Err(Error::InsufficientWorkspace {
                    required: self.workspace_size(),
                    provided: workspace_size,
                });
            }
            match self.from {
                Dtype::F16 => unsafe { self.convert_from::<f16>(output, input) },
                Dtype::BF16 => unsafe { self.convert_from::<bf16>(output, input) },
                Dtype::F32 => unsafe { self.convert_from::<f32>(output, input) },
                Dtype::F64 => unsafe { self.convert_from::<f64>(output, input) },
                Dtype::I32 => unsafe { self.convert_from::<i32>(output, input) },
                Dtype::I64 => unsafe { self.convert_from::<i64>(output, input) },
                Dtype::U32 => unsafe { self.convert_from::<u32>(output, input) },
                Dtype::U64 => unsafe { self.convert_from::<u64>(output, input) },
                dtype => Err(Error::BadTensorDtype(dtype)),
            }
        }

        unsafe fn convert_from<S: CastScalar>(
            &self,
            output: *mut u8,
            input: *const u8,
        ) -> Result<()> {
            let info = &self.info;
            macro_rules! convert {
                ($ty:ty) => {
                    unsafe {
                        elementwise::unary::<S, $ty>(info, output, input, |x| {
                            <$ty>::from_f64(x.to_f64())
                        })
                    }
                };
            }
            match self.to {
                Dtype::F16 => convert!(f16),
                Dtype::BF16 => convert!(bf16),
                Dtype::F32 => convert!(f32),
                Dtype::F64 => convert!(f64),
                Dtype::I32 => convert!(i32),
                Dtype::I64 => convert!(i64),
                Dtype::U32 => convert!(u32),
                Dtype::U64 => convert!(u64),
                dtype => return Err(Error::BadTensorDtype(dtype)),
            }
            Ok(())
        }
    }
}

/// Opaque cast descriptor, tagged by the backend it was created for.
#[derive(Debug)]
pub enum Descriptor {
    Cpu(cpu::Descriptor),
}

impl Descriptor {
    pub fn create(
        handle: &Handle,
        output: &TensorDescriptor,
        input: &TensorDescriptor,
    ) -> Result<Self> {
        match handle {
            Handle::Cpu(handle) => Ok(Self::Cpu(cpu::Descriptor::create(handle, output, input)?)),
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
        input: *const u8,
        stream: RawStream,
    ) -> Result<()> {
        match self {
            Self::Cpu(desc) => unsafe {
                desc.calculate(workspace, workspace_size, output, input, stream)
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
    fn test_cast_f32_to_f16() -> Result<()> {
        fastrand::seed(42);
        let handle = Handle::create(DeviceType::Cpu, 0)?;

        let output = TensorDescriptor::contiguous(Dtype::F16, [8]);
        let input = TensorDescriptor::contiguous(Dtype::F32, [8]);
        let op = Descriptor::create(&handle, &output, &input)?;

        let x: Vec<f32> = (0..8).map(|_| fastrand::f32() * 10.0).collect();
        let mut y = vec![f16::ZERO; 8];
        unsafe {
            op.calculate(
                null_mut(),
                0,
                y.as_mut_ptr().cast(),
                x.as_ptr().cast(),
                null_mut(),
            )?;
        }
        for i in 0..8 {
            assert_eq!(y[i], f16::from_f32(x[i]));
        }
        Ok(())
    }

    #[test]
    fn test_cast_i32_to_f64() -> Result<()> {
        let handle = Handle::create(DeviceType::Cpu, 0)?;

        let output = TensorDescriptor::contiguous(Dtype::F64, [4]);
        let input = TensorDescriptor::contiguous(Dtype::I32, [4]);
        let op = Descriptor::create(&handle, &output, &input)?;

        let x = [-2i32, -1, 0, 7];
        let mut y = [0.0f64; 4];
        unsafe {
            op.calculate(
                null_mut(),
                0,
                y.as_mut_ptr().cast(),
                x.as_ptr().cast(),
                null_mut(),
            )?;
        }
        assert_eq!(y, [-2.0, -1.0, 0.0, 7.0]);
        Ok(())
    }

    #[test]
    fn test_cast_saturates() -> Result<()> {
        let handle = Handle::create(DeviceType::Cpu, 0)?;

        let output = TensorDescriptor::contiguous(Dtype::U32, [2]);
        let input = TensorDescriptor::contiguous(Dtype::F32, [2]);
        let op = Descriptor::create(&handle, &output, &input)?;

        let x = [-3.0f32, 1e20];
        let mut y = [1u32; 2];
        unsafe {
            op.calculate(
                null_mut(),
                0,
                y.as_mut_ptr().cast(),
                x.as_ptr().cast(),
                null_mut(),
            )?;
        }
        assert_eq!(y, [0, u32::MAX]);
        Ok(())
    }

    #[test]
    fn test_cast_rejects_unsupported() -> Result<()> {
        let handle = Handle::create(DeviceType::Cpu, 0)?;
        let output = TensorDescriptor::contiguous(Dtype::I8, [4]);
        let input = TensorDescriptor::contiguous(Dtype::F32, [4]);
        let err = Descriptor::create(&handle, &output, &input).unwrap_err();
        assert_eq!(err, Error::BadTensorDtype(Dtype::I8));
        Ok(())
    }
}
