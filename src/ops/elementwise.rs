//! Shared layout analysis and iteration driver for the elementwise family.
//!
//! One output, N inputs of identical extents. Broadcast (stride 0) input
//! dimensions are honored by the offset arithmetic; a broadcast output
//! dimension would alias writes and is rejected at creation.

use crate::{
    error::{Result, ShapeError},
    num::Scalar,
    tensor::TensorDescriptor,
};

use super::SendPtr;

/// Precomputed shape/stride analysis for one elementwise operator instance.
#[derive(Debug, Clone)]
pub(crate) struct Info {
    shape: Vec<usize>,
    output_strides: Vec<isize>,
    input_strides: Vec<Vec<isize>>,
    numel: usize,
    contiguous: bool,
}

impl Info {
    pub fn create(output: &TensorDescriptor, inputs: &[&TensorDescriptor]) -> Result<Self> {
        if let Some(&dim) = output.broadcast_dims().first() {
            return Err(ShapeError::BroadcastOutput(dim))?;
        }

        let shape = output.shape().to_vec();
        let output_strides = output.strides().to_vec();
        let input_strides = inputs.iter().map(|x| x.strides().to_vec()).collect();
        let numel = output.numel();
        let contiguous = output.is_contiguous() && inputs.iter().all(|x| x.is_contiguous());
        Ok(Self {
            shape,
            output_strides,
            input_strides,
            numel,
            contiguous,
        })
    }

    #[inline]
    pub fn numel(&self) -> usize {
        self.numel
    }

    #[inline]
    fn output_offset(&self, index: usize) -> isize {
        match self.contiguous {
            true => index as isize,
            false => offset(&self.shape, &self.output_strides, index),
        }
    }

    #[inline]
    fn input_offset(&self, input: usize, index: usize) -> isize {
        match self.contiguous {
            true => index as isize,
            false => offset(&self.shape, &self.input_strides[input], index),
        }
    }
}

/// Element offset of the flat row-major `index` under `strides`.
#[inline]
fn offset(shape: &[usize], strides: &[isize], mut index: usize) -> isize {
    let mut offset = 0;
    for (&dim, &stride) in shape.iter().zip(strides.iter()).rev() {
        offset += (index % dim) as isize * stride;
        index /= dim;
    }
    offset
}

/// Apply `f` element by element from one input buffer into the output.
///
/// # Safety
/// `output` and `input` must cover every offset the descriptors address.
pub(crate) unsafe fn unary<S: Scalar, D: Scalar>(
    info: &Info,
    output: *mut u8,
    input: *const u8,
    f: impl Fn(S) -> D + Send + Sync,
) {
    let output = SendPtr(output.cast::<D>());
    let input = SendPtr(input.cast_mut().cast::<S>());
    let write = |index: usize| {
        let (input, output) = (input, output);
        let x = unsafe { input.0.cast_const().offset(info.input_offset(0, index)).read() };
        unsafe { output.0.offset(info.output_offset(index)).write(f(x)) };
    };

    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        (0..info.numel()).into_par_iter().for_each(write);
    }
    #[cfg(not(feature = "rayon"))]
    (0..info.numel()).for_each(write);
}

/// Apply `f` element by element from two input buffers into the output.
///
/// # Safety
/// `output`, `a`, and `b` must cover every offset the descriptors address.
pub(crate) unsafe fn binary<T: Scalar>(
    info: &Info,
    output: *mut u8,
    a: *const u8,
    b: *const u8,
    f: impl Fn(T, T) -> T + Send + Sync,
) {
    let output = SendPtr(output.cast::<T>());
    let a = SendPtr(a.cast_mut().cast::<T>());
    let b = SendPtr(b.cast_mut().cast::<T>());
    let write = |index: usize| {
        let (a, b, output) = (a, b, output);
        let x = unsafe { a.0.cast_const().offset(info.input_offset(0, index)).read() };
        let y = unsafe { b.0.cast_const().offset(info.input_offset(1, index)).read() };
        unsafe { output.0.offset(info.output_offset(index)).write(f(x, y)) };
    };

    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        (0..info.numel()).into_par_iter().for_each(write);
    }
    #[cfg(not(feature = "rayon"))]
    (0..info.numel()).for_each(write);
}
