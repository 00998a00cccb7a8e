//! `heddle` is a hardware-abstraction layer for tensor compute primitives.
//! It gives an inference engine one uniform descriptor protocol over the CPU
//! and a set of accelerator families, each backed by its own compute
//! library.
//!
//! ## Key Components
//! 1. **Tensor Descriptors**:
//!    - Immutable shape/stride metadata ([`TensorDescriptor`]), never owning
//!      data.
//!    - An algebra of pure transforms: merge, split, permute, contiguity and
//!      broadcast analysis.
//! 2. **Device Handles**:
//!    - One context per `(device type, device id)` pair ([`Handle`]),
//!      created once and shared by every descriptor built against it.
//!    - Pooled vendor sub-resources with a pop-or-create / use / return
//!      protocol.
//! 3. **Operator Descriptors**:
//!    - Creation-validated, immutable, self-routing objects following one
//!      contract: create → workspace size → calculate → drop.
//!    - Matrix multiply, RMS normalization, causal softmax, SwiGLU,
//!      elementwise arithmetic, and dtype casts.
//! 4. **Dispatch**:
//!    - Routing keyed by the device tag stamped on each handle and
//!      descriptor; unsupported device types fail at creation, never later.
//!
//! ## Execution Model
//! The protocol is synchronous call/return. `calculate` enqueues onto a
//! caller-supplied stream where a backend is asynchronous; the CPU backend
//! completes before returning, fanning rows out across workers with no
//! shared mutable state. Workspace buffers are caller-owned and sized by the
//! descriptor.

pub mod capi;
pub mod device;
pub mod error;
pub mod num;
pub mod ops;
pub mod tensor;

pub use device::{DeviceType, Handle, RawStream};
pub use error::{Error, Result, ShapeError, Status};
pub use num::{Dtype, Float, Scalar};
pub use tensor::TensorDescriptor;
