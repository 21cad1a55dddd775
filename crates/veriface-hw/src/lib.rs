//! veriface-hw — Hardware abstraction for webcam capture.
//!
//! Provides V4L2-based camera access and conversion of raw buffers
//! (YUYV, MJPG, RGB3, GREY) into packed RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{first_lit_frame, Camera, CameraError, DeviceInfo, FrameSource};
pub use frame::{decode_buffer, CropRegion, Frame, FrameError, PixelFormat};
