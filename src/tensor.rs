use std::sync::Arc;

use itertools::Itertools;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, ShapeError},
    num::Dtype,
};

/// Shape/stride metadata for one tensor view.
///
/// A descriptor never owns or references a data buffer. All transforms return
/// a new descriptor and leave the receiver untouched, so descriptors are
/// cheap to clone (`Arc`-backed) and safe to share across threads and across
/// operator descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TensorDescriptor {
    dtype: Dtype,
    shape: Arc<[usize]>,
    strides: Arc<[isize]>,
}

impl TensorDescriptor {
    /// Create a descriptor from explicit shape and strides, in elements.
    pub fn new(
        dtype: Dtype,
        shape: impl Into<Arc<[usize]>>,
        strides: impl Into<Arc<[isize]>>,
    ) -> Result<Self> {
        let shape = shape.into();
        let strides = strides.into();
        if shape.len() != strides.len() {
            return Err(ShapeError::Rank {
                shape: shape.len(),
                strides: strides.len(),
            })?;
        }
        Ok(Self {
            dtype,
            shape,
            strides,
        })
    }

    /// Create a dense row-major descriptor for the given shape.
    pub fn contiguous(dtype: Dtype, shape: impl Into<Arc<[usize]>>) -> Self {
        let shape = shape.into();
        let mut strides = vec![1isize; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1] as isize;
        }
        let strides = strides.into();
        Self {
            dtype,
            shape,
            strides,
        }
    }

    #[inline]
    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    #[inline]
    pub fn dim(&self, i: usize) -> usize {
        self.shape[i]
    }

    #[inline]
    pub fn stride(&self, i: usize) -> isize {
        self.strides[i]
    }

    /// Strides scaled to bytes.
    #[inline]
    pub fn byte_strides(&self) -> Vec<isize> {
        let size = self.dtype.size() as isize;
        self.strides.iter().map(|&s| s * size).collect()
    }

    /// Total number of elements; the empty shape is a scalar with one.
    #[inline]
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Whether dimension `d` relates to the dimensions after it in canonical
    /// row-major fashion. A dimension of extent 0 or 1 is trivially
    /// contiguous regardless of its stride.
    pub fn is_contiguous_dim(&self, d: usize) -> bool {
        if self.shape[d] <= 1 {
            return true;
        }
        match d + 1 == self.ndim() {
            true => self.strides[d] == 1,
            false => self.strides[d] == self.strides[d + 1] * self.shape[d + 1] as isize,
        }
    }

    /// Whether the row-major relation holds for every dimension in
    /// `[start, end]`.
    pub fn is_contiguous_range(&self, start: usize, end: usize) -> bool {
        if start > end || end >= self.ndim() {
            return false;
        }
        (start..=end).all(|d| self.is_contiguous_dim(d))
    }

    /// Whole-tensor contiguity. A scalar (no dimensions) is contiguous.
    pub fn is_contiguous(&self) -> bool {
        match self.ndim() {
            0 => true,
            n => self.is_contiguous_range(0, n - 1),
        }
    }

    /// Whether dimensions `[start, end]` can collapse into one without
    /// changing the set of addressed elements. Dimensions of extent 0 or 1
    /// never contribute addressing, so the row-major relation is checked
    /// between consecutive surviving dimensions.
    pub fn is_mergable(&self, start: usize, end: usize) -> bool {
        if start > end || end >= self.ndim() {
            return false;
        }
        let mut prev: Option<usize> = None;
        for i in start..=end {
            if self.shape[i] <= 1 {
                continue;
            }
            if let Some(p) = prev {
                if self.strides[p] != self.strides[i] * self.shape[i] as isize {
                    return false;
                }
            }
            prev = Some(i);
        }
        true
    }

    /// Collapse dimensions `[start, end]` into one of their extent product,
    /// carrying the innermost stride of the range.
    pub fn dim_merge(&self, start: usize, end: usize) -> Result<Self> {
        if start > end || end >= self.ndim() {
            return Err(ShapeError::DimOutOfRange {
                ndim: self.ndim(),
                dim: end.max(start),
            })?;
        }
        if !self.is_mergable(start, end) {
            return Err(ShapeError::NotMergable { start, end })?;
        }

        let merged: usize = self.shape[start..=end].iter().product();
        let shape: Arc<[usize]> = self.shape[..start]
            .iter()
            .copied()
            .chain([merged])
            .chain(self.shape[end + 1..].iter().copied())
            .collect();
        let strides: Arc<[isize]> = self.strides[..start]
            .iter()
            .copied()
            .chain([self.strides[end]])
            .chain(self.strides[end + 1..].iter().copied())
            .collect();
        Ok(Self {
            dtype: self.dtype,
            shape,
            strides,
        })
    }

    /// Split `axis` into the given extents, laid out row-major within the
    /// original axis; the addressed byte range is preserved exactly.
    pub fn dim_split(&self, axis: usize, dims: &[usize]) -> Result<Self> {
        if axis >= self.ndim() {
            return Err(ShapeError::DimOutOfRange {
                ndim: self.ndim(),
                dim: axis,
            })?;
        }
        let product: usize = dims.iter().product();
        if product != self.shape[axis] {
            return Err(ShapeError::SplitMismatch {
                axis,
                extent: self.shape[axis],
                product,
            })?;
        }

        let mut split = vec![0isize; dims.len()];
        let mut acc = self.strides[axis];
        for (stride, &dim) in split.iter_mut().zip(dims.iter()).rev() {
            *stride = acc;
            acc *= dim as isize;
        }

        let shape: Arc<[usize]> = self.shape[..axis]
            .iter()
            .copied()
            .chain(dims.iter().copied())
            .chain(self.shape[axis + 1..].iter().copied())
            .collect();
        let strides: Arc<[isize]> = self.strides[..axis]
            .iter()
            .copied()
            .chain(split)
            .chain(self.strides[axis + 1..].iter().copied())
            .collect();
        Ok(Self {
            dtype: self.dtype,
            shape,
            strides,
        })
    }

    /// Reorder dimensions by `order`, a permutation of `0..ndim`. Pure
    /// relabeling; no data movement is implied.
    pub fn dim_permute(&self, order: &[usize]) -> Result<Self> {
        let mut sorted = order.to_vec();
        sorted.sort_unstable();
        if sorted.len() != self.ndim() || sorted.iter().enumerate().any(|(i, &o)| i != o) {
            return Err(ShapeError::NotPermutation)?;
        }

        let shape: Arc<[usize]> = order.iter().map(|&i| self.shape[i]).collect();
        let strides: Arc<[isize]> = order.iter().map(|&i| self.strides[i]).collect();
        Ok(Self {
            dtype: self.dtype,
            shape,
            strides,
        })
    }

    /// Dimensions reread rather than advanced: stride 0 with extent > 1.
    pub fn broadcast_dims(&self) -> Vec<usize> {
        itertools::izip!(self.shape.iter(), self.strides.iter())
            .positions(|(&dim, &stride)| stride == 0 && dim > 1)
            .collect()
    }

    #[inline]
    pub fn has_broadcast_dim(&self) -> bool {
        itertools::izip!(self.shape.iter(), self.strides.iter())
            .any(|(&dim, &stride)| stride == 0 && dim > 1)
    }
}

impl std::fmt::Display for TensorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[{}]⟨{}⟩",
            self.dtype,
            self.shape.iter().format(", "),
            self.strides.iter().format(", ")
        )
    }
}
