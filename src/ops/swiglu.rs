//! SwiGLU gated activation: `c = a ⊙ silu(b)`, with the gate carried by the
//! second operand.

use half::{bf16, f16};

use super::{check_dtype, check_same_dtype, check_same_shape};
use crate::{
    device::{Handle, RawStream},
    error::{Error, Result},
    num::Dtype,
    tensor::TensorDescriptor,
};

#[inline]
fn silu(x: f32) -> f32 {
    x / (1.0 + (-x).exp())
}

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
                        f16::from_f32(x.to_f32() * silu(y.to_f32()))
                    })
                },
                Dtype::BF16 => unsafe {
                    elementwise::binary::<bf16>(info, output, a, b, |x, y| {
                        bf16::from_f32(x.to_f32() * silu(y.to_f32()))
                    })
                },
                Dtype::F32 => unsafe {
                    elementwise::binary::<f32>(info, output, a, b, |x, y| x * silu(y))
                },
                Dtype::F64 => unsafe {
                    elementwise::binary::<f64>(info, output, a, b, |x, y| {
                        x * (y / (1.0 + (-y).exp()))
                    })
                },
                dtype => return Err(Error::BadTensorDtype(dtype)),
            }
            Ok(())
        }
    }
}

/// Opaque SwiGLU descriptor, tagged by the backend it was created for.
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

    macro_rules! assert_approx_eq {
        ($i:expr, $a:expr, $b:expr, $eps:expr) => {
            assert!(
                ($a - $b).abs() < $eps,
                "assertion failed at {}: `(left ~= right)`\n  left: `{}`\n right: `{}`",
                $i,
                $a,
                $b
            );
        };
    }

    #[test]
    fn test_swiglu_f32() -> Result<()> {
        fastrand::seed(42);
        let handle = Handle::create(DeviceType::Cpu, 0)?;

        let desc = TensorDescriptor::contiguous(Dtype::F32, [4, 8]);
        let op = Descriptor::create(&handle, &desc, &desc, &desc)?;

        let a: Vec<f32> = (0..32).map(|_| fastrand::f32() * 2.0 - 1.0).collect();
        let b: Vec<f32> = (0..32).map(|_| fastrand::f32() * 2.0 - 1.0).collect();
        let mut c = vec![0.0f32; 32];
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
        for i in 0..32 {
            let expected = a[i] * b[i] / (1.0 + (-b[i]).exp());
            assert_approx_eq!(i, c[i], expected, 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_swiglu_f16() -> Result<()> {
        fastrand::seed(42);
        let handle = Handle::create(DeviceType::Cpu, 0)?;

        let desc = TensorDescriptor::contiguous(Dtype::F16, [16]);
        let op = Descriptor::create(&handle, &desc, &desc, &desc)?;

        let a: Vec<f16> = (0..16)
            .map(|_| f16::from_f32(fastrand::f32() * 2.0 - 1.0))
            .collect();
        let b: Vec<f16> = (0..16)
            .map(|_| f16::from_f32(fastrand::f32() * 2.0 - 1.0))
            .collect();
        let mut c = vec![f16::ZERO; 16];
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
        for i in 0..16 {
            let x = a[i].to_f32();
            let y = b[i].to_f32();
            let expected = x * y / (1.0 + (-y).exp());
            assert_approx_eq!(i, c[i].to_f32(), expected, 1e-2);
        }
        Ok(())
    }
}
