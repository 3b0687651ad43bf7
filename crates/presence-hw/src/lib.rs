//! presence-hw: Hardware abstraction for the shared attendance camera.
//!
//! Provides V4L2-based camera access, the `FrameSource` seam used by the
//! recognition engine, and RGB frame utilities.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, PixelFormat};
pub use frame::{Frame, FrameError};
