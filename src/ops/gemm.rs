//! General matrix multiplication: `C = α · A·B + β · C`.
//!
//! Operands are 2-D matrices or batched 3-D stacks; either operand may carry
//! a batch of one against a batched output and is then reread per batch.
//! Each matrix may be laid out row- or column-major (one of the two strides
//! must be the dense axis), which is how transposed views arrive here.
//! Half-precision operands are repacked into f32 panels inside the caller
//! workspace before the multiply; f32/f64 run directly off the strides.

use half::{bf16, f16};
use itertools::iproduct;

use super::{SendPtr, check_dtype, check_same_dtype};
use crate::{
    device::{Handle, RawStream},
    error::{Error, Result, ShapeError},
    num::{Dtype, Float},
    tensor::TensorDescriptor,
};

/// One operand viewed as a (possibly batched) BLAS matrix.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlasMatrix {
    batch: usize,
    stride: isize,
    rows: usize,
    cols: usize,
    row_stride: isize,
    col_stride: isize,
}

impl BlasMatrix {
    fn create(desc: &TensorDescriptor) -> Result<Self> {
        let ndim = desc.ndim();
        let (batch, stride) = match ndim {
            2 => (1, 0),
            3 => (desc.dim(0), desc.stride(0)),
            n => return Err(ShapeError::Ndim(n))?,
        };
        let rows = desc.dim(ndim - 2);
        let cols = desc.dim(ndim - 1);
        let row_stride = desc.stride(ndim - 2);
        let col_stride = desc.stride(ndim - 1);
        if row_stride != 1 && col_stride != 1 {
            return Err(ShapeError::InnerStride(col_stride))?;
        }
        Ok(Self {
            batch,
            stride,
            rows,
            cols,
            row_stride,
            col_stride,
        })
    }
}

/// Shape/stride analysis shared by every backend of this operator.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MatmulInfo {
    a: BlasMatrix,
    b: BlasMatrix,
    c: BlasMatrix,
    m: usize,
    n: usize,
    k: usize,
    batch: usize,
}

impl MatmulInfo {
    pub fn create(
        c: &TensorDescriptor,
        a: &TensorDescriptor,
        b: &TensorDescriptor,
    ) -> Result<Self> {
        if let Some(&dim) = c.broadcast_dims().first() {
            return Err(ShapeError::BroadcastOutput(dim))?;
        }
        let c = BlasMatrix::create(c)?;
        let mut a = BlasMatrix::create(a)?;
        let mut b = BlasMatrix::create(b)?;

        let (m, n, k) = (c.rows, c.cols, a.cols);
        if a.rows != m || a.cols != k {
            return Err(ShapeError::Mismatch(vec![a.rows, a.cols], vec![m, k]))?;
        }
        if b.rows != k || b.cols != n {
            return Err(ShapeError::Mismatch(vec![b.rows, b.cols], vec![k, n]))?;
        }

        let batch = c.batch;
        for matrix in [&mut a, &mut b] {
            match matrix.batch {
                1 => matrix.stride = 0,
                x if x == batch => {}
                x => return Err(ShapeError::Mismatch(vec![x], vec![batch]))?,
            }
        }
        Ok(Self {
            a,
            b,
            c,
            m,
            n,
            k,
            batch,
        })
    }
}

/// Strided multiply with f64 accumulation; one output row per worker.
unsafe fn gemm_direct<T: Float>(
    info: &MatmulInfo,
    c: *mut T,
    a: *const T,
    b: *const T,
    alpha: f32,
    beta: f32,
) {
    let MatmulInfo {
        a: ma,
        b: mb,
        c: mc,
        m,
        n,
        k,
        batch,
    } = *info;
    let c = SendPtr(c);
    let a = SendPtr(a.cast_mut());
    let b = SendPtr(b.cast_mut());

    let row = |index: usize| {
        let (a, b, c) = (a, b, c);
        let bi = (index / m) as isize;
        let i = (index % m) as isize;
        let a = unsafe { a.0.cast_const().offset(bi * ma.stride + i * ma.row_stride) };
        let b = unsafe { b.0.cast_const().offset(bi * mb.stride) };
        let c = unsafe { c.0.offset(bi * mc.stride + i * mc.row_stride) };

        for j in 0..n as isize {
            let mut acc = 0.0f64;
            for l in 0..k as isize {
                let x = unsafe { a.offset(l * ma.col_stride).read() }.to_f64();
                let y = unsafe { b.offset(l * mb.row_stride + j * mb.col_stride).read() }.to_f64();
                acc += x * y;
            }
            let c = unsafe { c.offset(j * mc.col_stride) };
            let value = match beta == 0.0 {
                true => alpha as f64 * acc,
                false => alpha as f64 * acc + beta as f64 * unsafe { c.read() }.to_f64(),
            };
            unsafe { c.write(T::from_f64(value)) };
        }
    };

    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        (0..batch * m).into_par_iter().for_each(row);
    }
    #[cfg(not(feature = "rayon"))]
    (0..batch * m).for_each(row);
}

/// Half-precision multiply: per batch, repack both operands into f32 panels
/// in the caller workspace, then multiply with f32 accumulation.
unsafe fn gemm_packed<T: Float>(
    info: &MatmulInfo,
    workspace: *mut u8,
    c: *mut T,
    a: *const T,
    b: *const T,
    alpha: f32,
    beta: f32,
) {
    let MatmulInfo {
        a: ma,
        b: mb,
        c: mc,
        m,
        n,
        k,
        batch,
    } = *info;
    let a_pack = workspace.cast::<f32>();
    let b_pack = unsafe { a_pack.add(m * k) };

    for bi in 0..batch as isize {
        let a = unsafe { a.offset(bi * ma.stride) };
        let b = unsafe { b.offset(bi * mb.stride) };
        for (i, l) in iproduct!(0..m as isize, 0..k as isize) {
            let value = unsafe { a.offset(i * ma.row_stride + l * ma.col_stride).read() };
            unsafe { a_pack.offset(i * k as isize + l).write(value.to_f32()) };
        }
        for (l, j) in iproduct!(0..k as isize, 0..n as isize) {
            let value = unsafe { b.offset(l * mb.row_stride + j * mb.col_stride).read() };
            unsafe { b_pack.offset(l * n as isize + j).write(value.to_f32()) };
        }

        let a_pack = SendPtr(a_pack);
        let b_pack = SendPtr(b_pack);
        let c = SendPtr(unsafe { c.offset(bi * mc.stride) });
        let row = |i: usize| {
            let (a_pack, b_pack, c) = (a_pack, b_pack, c);
            let i = i as isize;
            let a = unsafe { a_pack.0.cast_const().offset(i * k as isize) };
            let c = unsafe { c.0.offset(i * mc.row_stride) };
            for j in 0..n as isize {
                let mut acc = 0.0f32;
                for l in 0..k as isize {
                    let x = unsafe { a.offset(l).read() };
                    let y = unsafe { b_pack.0.cast_const().offset(l * n as isize + j).read() };
                    acc += x * y;
                }
                let c = unsafe { c.offset(j * mc.col_stride) };
                let value = match beta == 0.0 {
                    true => alpha * acc,
                    false => alpha * acc + beta * unsafe { c.read() }.to_f32(),
                };
                unsafe { c.write(T::from_f32(value)) };
            }
        };

        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            (0..m).into_par_iter().for_each(row);
        }
        #[cfg(not(feature = "rayon"))]
        (0..m).for_each(row);
    }
}

pub mod cpu {
    use super::*;

    #[derive(Debug)]
    pub struct Descriptor {
        dtype: Dtype,
        info: MatmulInfo,
    }

    impl Descriptor {
        pub fn create(
            _handle: &crate::device::cpu::Handle,
            c: &TensorDescriptor,
            a: &TensorDescriptor,
            b: &TensorDescriptor,
        ) -> Result<Self> {
            let dtype = c.dtype();
            check_dtype(dtype, &[Dtype::F16, Dtype::BF16, Dtype::F32, Dtype::F64])?;
            check_same_dtype(c, &[a, b])?;
            let info = MatmulInfo::create(c, a, b)?;
            Ok(Self { dtype, info })
        }

        #[inline]
        pub fn workspace_size(&self) -> usize {
            let MatmulInfo { m, n, k, .. } = self.info;
            match self.dtype {
                Dtype::F16 | Dtype::BF16 => (m * k + k * n) * size_of::<f32>(),
                _ => 0,
            }
        }

        /// # Safety
        /// Buffers must cover every offset the creation-time descriptors
        /// address; `workspace` must be valid for `workspace_size` bytes and
        /// aligned for f32.
        #[allow(clippy::too_many_arguments)]
        pub unsafe fn calculate(
            &self,
            workspace: *mut u8,
            workspace_size: usize,
            c: *mut u8,
            a: *const u8,
            b: *const u8,
            alpha: f32,
            beta: f32,
            _stream: RawStream,
        ) -> Result<()> {
            let required = self.workspace_size();
            if workspace_size < required {
                return Err(Error::InsufficientWorkspace {
                    required,
                    provided: workspace_size,
                });
            }
            let info = &self.info;
            match self.dtype {
                Dtype::F16 => unsafe {
                    gemm_packed::<f16>(info, workspace, c.cast(), a.cast(), b.cast(), alpha, beta)
                },
                Dtype::BF16 => unsafe {
                    gemm_packed::<bf16>(info, workspace, c.cast(), a.cast(), b.cast(), alpha, beta)
                },
                Dtype::F32 => unsafe {
                    gemm_direct::<f32>(info, c.cast(), a.cast(), b.cast(), alpha, beta)
                },
                Dtype::F64 => unsafe {
                    gemm_direct::<f64>(info, c.cast(), a.cast(), b.cast(), alpha, beta)
                },
                dtype => return Err(Error::BadTensorDtype(dtype)),
            }
            Ok(())
        }
    }
}

/// Opaque matrix-multiplication descriptor, tagged by the backend it was
/// created for.
#[derive(Debug)]
pub enum Descriptor {
    Cpu(cpu::Descriptor),
}

impl Descriptor {
    pub fn create(
        handle: &Handle,
        c: &TensorDescriptor,
        a: &TensorDescriptor,
        b: &TensorDescriptor,
    ) -> Result<Self> {
        match handle {
            Handle::Cpu(handle) => Ok(Self::Cpu(cpu::Descriptor::create(handle, c, a, b)?)),
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
    /// and stay untouched until the enqueued work completes; `workspace` must
    /// be valid for `workspace_size` bytes and aligned for f32.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn calculate(
        &self,
        workspace: *mut u8,
        workspace_size: usize,
        c: *mut u8,
        a: *const u8,
        b: *const u8,
        alpha: f32,
        beta: f32,
        stream: RawStream,
    ) -> Result<()> {
        match self {
            Self::Cpu(desc) => unsafe {
                desc.calculate(workspace, workspace_size, c, a, b, alpha, beta, stream)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::null_mut;

    use itertools::Itertools;

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

    fn reference(a: &[f32], b: &[f32], m: usize, n: usize, k: usize) -> Vec<f32> {
        iproduct!(0..m, 0..n)
            .map(|(i, j)| (0..k).map(|l| a[i * k + l] as f64 * b[l * n + j] as f64).sum::<f64>())
            .map(|acc| acc as f32)
            .collect()
    }

    #[test]
    fn test_gemm_f32() -> Result<()> {
        fastrand::seed(42);
        let handle = Handle::create(DeviceType::Cpu, 0)?;

        const M: usize = 13;
        const N: usize = 17;
        const K: usize = 29;
        let c_desc = TensorDescriptor::contiguous(Dtype::F32, [M, N]);
        let a_desc = TensorDescriptor::contiguous(Dtype::F32, [M, K]);
        let b_desc = TensorDescriptor::contiguous(Dtype::F32, [K, N]);
        let op = Descriptor::create(&handle, &c_desc, &a_desc, &b_desc)?;
        assert_eq!(op.workspace_size(), 0);

        let a: Vec<f32> = (0..M * K).map(|_| fastrand::f32() - 0.5).collect();
        let b: Vec<f32> = (0..K * N).map(|_| fastrand::f32() - 0.5).collect();
        let mut c = vec![0.0f32; M * N];
        unsafe {
            op.calculate(
                null_mut(),
                0,
                c.as_mut_ptr().cast(),
                a.as_ptr().cast(),
                b.as_ptr().cast(),
                1.0,
                0.0,
                null_mut(),
            )?;
        }

        let expected = reference(&a, &b, M, N, K);
        for (i, (&got, &want)) in c.iter().zip_eq(expected.iter()).enumerate() {
            assert_approx_eq!(i, got, want, 1e-4);
        }
        Ok(())
    }

    #[test]
    fn test_gemm_transposed_a() -> Result<()> {
        fastrand::seed(42);
        let handle = Handle::create(DeviceType::Cpu, 0)?;

        const M: usize = 8;
        const N: usize = 6;
        const K: usize = 10;
        let c_desc = TensorDescriptor::contiguous(Dtype::F32, [M, N]);
        // a stored as [K, M], viewed as its transpose
        let a_desc = TensorDescriptor::contiguous(Dtype::F32, [K, M]).dim_permute(&[1, 0])?;
        let b_desc = TensorDescriptor::contiguous(Dtype::F32, [K, N]);
        let op = Descriptor::create(&handle, &c_desc, &a_desc, &b_desc)?;

        let a_t: Vec<f32> = (0..K * M).map(|_| fastrand::f32() - 0.5).collect();
        let b: Vec<f32> = (0..K * N).map(|_| fastrand::f32() - 0.5).collect();
        let mut c = vec![0.0f32; M * N];
        unsafe {
            op.calculate(
                null_mut(),
                0,
                c.as_mut_ptr().cast(),
                a_t.as_ptr().cast(),
                b.as_ptr().cast(),
                1.0,
                0.0,
                null_mut(),
            )?;
        }

        let a: Vec<f32> = iproduct!(0..M, 0..K).map(|(i, l)| a_t[l * M + i]).collect();
        let expected = reference(&a, &b, M, N, K);
        for (i, (&got, &want)) in c.iter().zip_eq(expected.iter()).enumerate() {
            assert_approx_eq!(i, got, want, 1e-4);
        }
        Ok(())
    }

    #[test]
    fn test_gemm_batched_broadcast_b() -> Result<()> {
        fastrand::seed(42);
        let handle = Handle::create(DeviceType::Cpu, 0)?;

        const BATCH: usize = 3;
        const M: usize = 4;
        const N: usize = 5;
        const K: usize = 6;
        let c_desc = TensorDescriptor::contiguous(Dtype::F32, [BATCH, M, N]);
        let a_desc = TensorDescriptor::contiguous(Dtype::F32, [BATCH, M, K]);
        let b_desc = TensorDescriptor::contiguous(Dtype::F32, [K, N]);
        let op = Descriptor::create(&handle, &c_desc, &a_desc, &b_desc)?;

        let a: Vec<f32> = (0..BATCH * M * K).map(|_| fastrand::f32() - 0.5).collect();
        let b: Vec<f32> = (0..K * N).map(|_| fastrand::f32() - 0.5).collect();
        let mut c = vec![0.0f32; BATCH * M * N];
        unsafe {
            op.calculate(
                null_mut(),
                0,
                c.as_mut_ptr().cast(),
                a.as_ptr().cast(),
                b.as_ptr().cast(),
                1.0,
                0.0,
                null_mut(),
            )?;
        }

        for bi in 0..BATCH {
            let expected = reference(&a[bi * M * K..(bi + 1) * M * K], &b, M, N, K);
            for (i, &want) in expected.iter().enumerate() {
                assert_approx_eq!(bi * M * N + i, c[bi * M * N + i], want, 1e-4);
            }
        }
        Ok(())
    }

    #[test]
    fn test_gemm_f16_workspace() -> Result<()> {
        fastrand::seed(42);
        let handle = Handle::create(DeviceType::Cpu, 0)?;

        const M: usize = 12;
        const N: usize = 8;
        const K: usize = 16;
        let c_desc = TensorDescriptor::contiguous(Dtype::F16, [M, N]);
        let a_desc = TensorDescriptor::contiguous(Dtype::F16, [M, K]);
        let b_desc = TensorDescriptor::contiguous(Dtype::F16, [K, N]);
        let op = Descriptor::create(&handle, &c_desc, &a_desc, &b_desc)?;

        let size = op.workspace_size();
        assert_eq!(size, (M * K + K * N) * size_of::<f32>());

        let a: Vec<f16> = (0..M * K)
            .map(|_| f16::from_f32(fastrand::f32() - 0.5))
            .collect();
        let b: Vec<f16> = (0..K * N)
            .map(|_| f16::from_f32(fastrand::f32() - 0.5))
            .collect();
        let mut c = vec![f16::ZERO; M * N];

        // one byte short of the reported requirement
        let mut workspace = vec![0u32; size.div_ceil(4)];
        let err = unsafe {
            op.calculate(
                workspace.as_mut_ptr().cast(),
                size - 1,
                c.as_mut_ptr().cast(),
                a.as_ptr().cast(),
                b.as_ptr().cast(),
                1.0,
                0.0,
                null_mut(),
            )
        }
        .unwrap_err();
        assert_eq!(
            err,
            Error::InsufficientWorkspace {
                required: size,
                provided: size - 1
            }
        );

        unsafe {
            op.calculate(
                workspace.as_mut_ptr().cast(),
                size,
                c.as_mut_ptr().cast(),
                a.as_ptr().cast(),
                b.as_ptr().cast(),
                1.0,
                0.0,
                null_mut(),
            )?;
        }

        let a_f32: Vec<f32> = a.iter().map(|&v| v.to_f32()).collect();
        let b_f32: Vec<f32> = b.iter().map(|&v| v.to_f32()).collect();
        let expected = reference(&a_f32, &b_f32, M, N, K);
        for (i, (&got, &want)) in c.iter().zip_eq(expected.iter()).enumerate() {
            assert_approx_eq!(i, got.to_f32(), want, 1e-2);
        }
        Ok(())
    }

    #[test]
    fn test_gemm_beta_accumulates() -> Result<()> {
        let handle = Handle::create(DeviceType::Cpu, 0)?;

        let c_desc = TensorDescriptor::contiguous(Dtype::F32, [2, 2]);
        let a_desc = TensorDescriptor::contiguous(Dtype::F32, [2, 2]);
        let op = Descriptor::create(&handle, &c_desc, &a_desc, &a_desc)?;

        let a = [1.0f32, 0.0, 0.0, 1.0];
        let mut c = [10.0f32, 20.0, 30.0, 40.0];
        unsafe {
            op.calculate(
                null_mut(),
                0,
                c.as_mut_ptr().cast(),
                a.as_ptr().cast(),
                a.as_ptr().cast(),
                2.0,
                0.5,
                null_mut(),
            )?;
        }
        assert_eq!(c, [7.0, 10.0, 15.0, 22.0]);
        Ok(())
    }

    #[test]
    fn test_gemm_rejects_mismatched_k() -> Result<()> {
        let handle = Handle::create(DeviceType::Cpu, 0)?;
        let c_desc = TensorDescriptor::contiguous(Dtype::F32, [4, 5]);
        let a_desc = TensorDescriptor::contiguous(Dtype::F32, [4, 6]);
        let b_desc = TensorDescriptor::contiguous(Dtype::F32, [7, 5]);
        let err = Descriptor::create(&handle, &c_desc, &a_desc, &b_desc).unwrap_err();
        assert!(matches!(
            err,
            Error::BadTensorShape(ShapeError::Mismatch(..))
        ));
        Ok(())
    }
}
