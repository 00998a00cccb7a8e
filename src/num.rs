use bytemuck::Pod;
use derive_more::Display;
use half::{bf16, f16};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Element type of a tensor. The set is fixed; operators declare which
/// members they accept at descriptor creation.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Dtype {
    F16,
    BF16,
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
}

impl Dtype {
    /// Size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            Dtype::F16 | Dtype::BF16 => 2,
            Dtype::F32 => 4,
            Dtype::F64 => 8,
            Dtype::I8 | Dtype::U8 => 1,
            Dtype::I16 | Dtype::U16 => 2,
            Dtype::I32 | Dtype::U32 => 4,
            Dtype::I64 | Dtype::U64 => 8,
        }
    }

    /// Returns `true` for the floating-point members.
    pub const fn is_float(self) -> bool {
        matches!(self, Dtype::F16 | Dtype::BF16 | Dtype::F32 | Dtype::F64)
    }
}

/// Implemented for Rust element types that back a [`Dtype`].
///
/// The `Pod` bound lets kernels reinterpret raw device bytes without copies.
pub trait Scalar: Sized + Pod + Send + Sync {
    const DTYPE: Dtype;
}

/// Floating-point scalars, with widening conversions for accumulation.
pub trait Float: Scalar {
    fn to_f32(self) -> f32;
    fn from_f32(value: f32) -> Self;
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_scalar {
    ($ty:ty, $dtype:ident) => {
        impl Scalar for $ty {
            const DTYPE: Dtype = Dtype::$dtype;
        }
    };
}

impl_scalar!(f16, F16);
impl_scalar!(bf16, BF16);
impl_scalar!(f32, F32);
impl_scalar!(f64, F64);
impl_scalar!(i8, I8);
impl_scalar!(i16, I16);
impl_scalar!(i32, I32);
impl_scalar!(i64, I64);
impl_scalar!(u8, U8);
impl_scalar!(u16, U16);
impl_scalar!(u32, U32);
impl_scalar!(u64, U64);

impl Float for f16 {
    #[inline]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        f16::from_f32(value)
    }

    #[inline]
    fn to_f64(self) -> f64 {
        f16::to_f64(self)
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        f16::from_f64(value)
    }
}

impl Float for bf16 {
    #[inline]
    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        bf16::from_f32(value)
    }

    #[inline]
    fn to_f64(self) -> f64 {
        bf16::to_f64(self)
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        bf16::from_f64(value)
    }
}

impl Float for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        value
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl Float for f64 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        value as f64
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_size() {
        assert_eq!(Dtype::F16.size(), 2);
        assert_eq!(Dtype::BF16.size(), 2);
        assert_eq!(Dtype::F32.size(), 4);
        assert_eq!(Dtype::F64.size(), 8);
        assert_eq!(Dtype::I8.size(), 1);
        assert_eq!(Dtype::U64.size(), 8);
    }

    #[test]
    fn test_scalar_dtype() {
        assert_eq!(<f16 as Scalar>::DTYPE, Dtype::F16);
        assert_eq!(<bf16 as Scalar>::DTYPE, Dtype::BF16);
        assert_eq!(<f32 as Scalar>::DTYPE, Dtype::F32);
        assert_eq!(<i32 as Scalar>::DTYPE, Dtype::I32);
        assert!(<f64 as Scalar>::DTYPE.is_float());
        assert!(!<u8 as Scalar>::DTYPE.is_float());
    }
}
