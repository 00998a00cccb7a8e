use derive_more::Display;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub mod cpu;
pub mod pool;

pub use pool::ResourcePool;

/// Runtime tag for the CPU and the supported accelerator families.
///
/// Every tag is always nameable; whether a backend is compiled in for it is a
/// separate question answered by [`Handle::create`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DeviceType {
    Cpu,
    Nvidia,
    Iluvatar,
    Cambricon,
    Ascend,
    Metax,
    Moore,
    Kunlun,
}

/// Caller-supplied command queue, forwarded to backends untouched.
///
/// Work enqueued on one stream executes in enqueue order; ordering across
/// streams is the caller's business. The CPU backend executes synchronously
/// and ignores it; pass null when there is no stream.
pub type RawStream = *mut core::ffi::c_void;

/// Per-device context owning pooled vendor sub-resources.
///
/// Created once per process per device and shared by every operator
/// descriptor built against it. Descriptors keep a shared reference to the
/// backend internals; the handle must outlive them all.
#[derive(Debug, Clone)]
pub enum Handle {
    Cpu(cpu::Handle),
}

impl Handle {
    /// Construct the context for `(device, device_id)`, querying the device's
    /// capability limits. Fails with [`Error::DeviceTypeNotSupported`] when
    /// no backend is compiled in for the device type.
    pub fn create(device: DeviceType, device_id: usize) -> Result<Self> {
        match device {
            DeviceType::Cpu => Ok(Self::Cpu(cpu::Handle::create(device_id)?)),
            device => {
                log::warn!("no backend compiled in for {device}");
                Err(Error::DeviceTypeNotSupported(device))
            }
        }
    }

    /// The device type this handle was created for.
    #[inline]
    pub fn device(&self) -> DeviceType {
        match self {
            Self::Cpu(_) => DeviceType::Cpu,
        }
    }

    #[inline]
    pub fn device_id(&self) -> usize {
        match self {
            Self::Cpu(handle) => handle.device_id(),
        }
    }
}
