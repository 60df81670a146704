//! V4L2-Session: a streaming capture session manager for V4L2 devices
//!
//! This library drives the full lifecycle of a memory-mapped capture session,
//! from opening and format negotiation through buffer-ring streaming to
//! unconditional teardown, behind a trait that also admits mock sessions for
//! testing.

pub mod config;
pub mod device;
mod pool;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use config::{CameraConfig, CheckoutPolicy, Dimensions, FrameRate};
pub use device::V4L2Camera;
pub use traits::{Capabilities, CameraError, CameraSession, FourCC, FrameView};
