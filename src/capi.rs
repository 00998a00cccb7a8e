//! C-callable procedural surface.
//!
//! Every entry point returns a flat [`Status`]; descriptor and handle
//! pointers are opaque `Box`es. Null pointers are rejected up front and
//! nothing panics across the boundary.

use std::os::raw::c_void;

use crate::{
    device::{DeviceType, Handle, RawStream},
    error::Status,
    num::Dtype,
    ops::{add, cast, causal_softmax, gemm, mul, rms_norm, swiglu},
    tensor::TensorDescriptor,
};

/// # Safety
/// `handle` must be a valid location to write the new pointer to.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn heddle_create_handle(
    device: DeviceType,
    device_id: usize,
    handle: *mut *mut Handle,
) -> Status {
    if handle.is_null() {
        return Status::NullPointer;
    }
    match Handle::create(device, device_id) {
        Ok(value) => {
            unsafe { handle.write(Box::into_raw(Box::new(value))) };
            Status::Success
        }
        Err(err) => Status::from(&err),
    }
}

/// # Safety
/// `handle` must come from [`heddle_create_handle`] and must outlive every
/// descriptor created against it; it is consumed here.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn heddle_destroy_handle(handle: *mut Handle) -> Status {
    if handle.is_null() {
        return Status::NullPointer;
    }
    drop(unsafe { Box::from_raw(handle) });
    Status::Success
}

/// # Safety
/// `shape` and `strides` must be valid for `ndim` reads; `desc` must be a
/// valid location to write the new pointer to.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn heddle_create_tensor_descriptor(
    dtype: Dtype,
    ndim: usize,
    shape: *const usize,
    strides: *const isize,
    desc: *mut *mut TensorDescriptor,
) -> Status {
    if desc.is_null() || (ndim > 0 && (shape.is_null() || strides.is_null())) {
        return Status::NullPointer;
    }
    let shape = match ndim {
        0 => &[][..],
        _ => unsafe { std::slice::from_raw_parts(shape, ndim) },
    };
    let strides = match ndim {
        0 => &[][..],
        _ => unsafe { std::slice::from_raw_parts(strides, ndim) },
    };
    match TensorDescriptor::new(dtype, shape, strides) {
        Ok(value) => {
            unsafe { desc.write(Box::into_raw(Box::new(value))) };
            Status::Success
        }
        Err(err) => Status::from(&err),
    }
}

/// # Safety
/// `desc` must come from [`heddle_create_tensor_descriptor`]; it is consumed
/// here.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn heddle_destroy_tensor_descriptor(desc: *mut TensorDescriptor) -> Status {
    if desc.is_null() {
        return Status::NullPointer;
    }
    drop(unsafe { Box::from_raw(desc) });
    Status::Success
}

macro_rules! impl_create_binary {
    ($fn_name:ident, $op:ident) => {
        /// # Safety
        /// All pointers must be valid; `desc` receives the new descriptor.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $fn_name(
            handle: *const Handle,
            desc: *mut *mut $op::Descriptor,
            output: *const TensorDescriptor,
            a: *const TensorDescriptor,
            b: *const TensorDescriptor,
        ) -> Status {
            if handle.is_null() || desc.is_null() || output.is_null() || a.is_null() || b.is_null()
            {
                return Status::NullPointer;
            }
            let handle = unsafe { &*handle };
            let (output, a, b) = unsafe { (&*output, &*a, &*b) };
            match $op::Descriptor::create(handle, output, a, b) {
                Ok(value) => {
                    unsafe { desc.write(Box::into_raw(Box::new(value))) };
                    Status::Success
                }
                Err(err) => Status::from(&err),
            }
        }
    };
}

macro_rules! impl_create_unary {
    ($fn_name:ident, $op:ident) => {
        /// # Safety
        /// All pointers must be valid; `desc` receives the new descriptor.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $fn_name(
            handle: *const Handle,
            desc: *mut *mut $op::Descriptor,
            output: *const TensorDescriptor,
            input: *const TensorDescriptor,
        ) -> Status {
            if handle.is_null() || desc.is_null() || output.is_null() || input.is_null() {
                return Status::NullPointer;
            }
            let handle = unsafe { &*handle };
            let (output, input) = unsafe { (&*output, &*input) };
            match $op::Descriptor::create(handle, output, input) {
                Ok(value) => {
                    unsafe { desc.write(Box::into_raw(Box::new(value))) };
                    Status::Success
                }
                Err(err) => Status::from(&err),
            }
        }
    };
}

macro_rules! impl_calculate_binary {
    ($fn_name:ident, $op:ident) => {
        /// # Safety
        /// Buffers must cover every offset the descriptor addresses and
        /// `workspace` must be valid for `workspace_size` bytes.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $fn_name(
            desc: *const $op::Descriptor,
            workspace: *mut c_void,
            workspace_size: usize,
            output: *mut c_void,
            a: *const c_void,
            b: *const c_void,
            stream: RawStream,
        ) -> Status {
            if desc.is_null() || output.is_null() || a.is_null() || b.is_null() {
                return Status::NullPointer;
            }
            let result = unsafe {
                (*desc).calculate(
                    workspace.cast(),
                    workspace_size,
                    output.cast(),
                    a.cast(),
                    b.cast(),
                    stream,
                )
            };
            Status::from(result)
        }
    };
}

macro_rules! impl_calculate_unary {
    ($fn_name:ident, $op:ident) => {
        /// # Safety
        /// Buffers must cover every offset the descriptor addresses and
        /// `workspace` must be valid for `workspace_size` bytes.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $fn_name(
            desc: *const $op::Descriptor,
            workspace: *mut c_void,
            workspace_size: usize,
            output: *mut c_void,
            input: *const c_void,
            stream: RawStream,
        ) -> Status {
            if desc.is_null() || output.is_null() || input.is_null() {
                return Status::NullPointer;
            }
            let result = unsafe {
                (*desc).calculate(
                    workspace.cast(),
                    workspace_size,
                    output.cast(),
                    input.cast(),
                    stream,
                )
            };
            Status::from(result)
        }
    };
}

macro_rules! impl_workspace_destroy {
    ($ws_name:ident, $destroy_name:ident, $op:ident) => {
        /// # Safety
        /// `desc` must be a live descriptor and `size` a valid location.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $ws_name(desc: *const $op::Descriptor, size: *mut usize) -> Status {
            if desc.is_null() || size.is_null() {
                return Status::NullPointer;
            }
            unsafe { size.write((*desc).workspace_size()) };
            Status::Success
        }

        /// # Safety
        /// `desc` must come from the matching create call; it is consumed
        /// here.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $destroy_name(desc: *mut $op::Descriptor) -> Status {
            if desc.is_null() {
                return Status::NullPointer;
            }
            drop(unsafe { Box::from_raw(desc) });
            Status::Success
        }
    };
}

impl_create_binary!(heddle_create_gemm_descriptor, gemm);
impl_create_binary!(heddle_create_add_descriptor, add);
impl_create_binary!(heddle_create_mul_descriptor, mul);
impl_create_binary!(heddle_create_swiglu_descriptor, swiglu);
impl_create_unary!(heddle_create_cast_descriptor, cast);
impl_create_unary!(heddle_create_causal_softmax_descriptor, causal_softmax);

/// # Safety
/// All pointers must be valid; `desc` receives the new descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn heddle_create_rms_norm_descriptor(
    handle: *const Handle,
    desc: *mut *mut rms_norm::Descriptor,
    y: *const TensorDescriptor,
    x: *const TensorDescriptor,
    w: *const TensorDescriptor,
    epsilon: f32,
) -> Status {
    if handle.is_null() || desc.is_null() || y.is_null() || x.is_null() || w.is_null() {
        return Status::NullPointer;
    }
    let handle = unsafe { &*handle };
    let (y, x, w) = unsafe { (&*y, &*x, &*w) };
    match rms_norm::Descriptor::create(handle, y, x, w, epsilon) {
        Ok(value) => {
            unsafe { desc.write(Box::into_raw(Box::new(value))) };
            Status::Success
        }
        Err(err) => Status::from(&err),
    }
}

impl_calculate_binary!(heddle_add, add);
impl_calculate_binary!(heddle_mul, mul);
impl_calculate_binary!(heddle_swiglu, swiglu);
impl_calculate_binary!(heddle_rms_norm, rms_norm);
impl_calculate_unary!(heddle_cast, cast);
impl_calculate_unary!(heddle_causal_softmax, causal_softmax);

/// # Safety
/// Buffers must cover every offset the descriptor addresses; `workspace`
/// must be valid for `workspace_size` bytes and aligned for f32.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn heddle_gemm(
    desc: *const gemm::Descriptor,
    workspace: *mut c_void,
    workspace_size: usize,
    c: *mut c_void,
    a: *const c_void,
    b: *const c_void,
    alpha: f32,
    beta: f32,
    stream: RawStream,
) -> Status {
    if desc.is_null() || c.is_null() || a.is_null() || b.is_null() {
        return Status::NullPointer;
    }
    let result = unsafe {
        (*desc).calculate(
            workspace.cast(),
            workspace_size,
            c.cast(),
            a.cast(),
            b.cast(),
            alpha,
            beta,
            stream,
        )
    };
    Status::from(result)
}

impl_workspace_destroy!(
    heddle_gemm_workspace_size,
    heddle_destroy_gemm_descriptor,
    gemm
);
impl_workspace_destroy!(
    heddle_add_workspace_size,
    heddle_destroy_add_descriptor,
    add
);
impl_workspace_destroy!(
    heddle_mul_workspace_size,
    heddle_destroy_mul_descriptor,
    mul
);
impl_workspace_destroy!(
    heddle_swiglu_workspace_size,
    heddle_destroy_swiglu_descriptor,
    swiglu
);
impl_workspace_destroy!(
    heddle_rms_norm_workspace_size,
    heddle_destroy_rms_norm_descriptor,
    rms_norm
);
impl_workspace_destroy!(
    heddle_cast_workspace_size,
    heddle_destroy_cast_descriptor,
    cast
);
impl_workspace_destroy!(
    heddle_causal_softmax_workspace_size,
    heddle_destroy_causal_softmax_descriptor,
    causal_softmax
);
