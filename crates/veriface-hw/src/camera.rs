//! V4L2 webcam capture via the `v4l` crate.

use crate::frame::{self, Frame, PixelFormat};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const STREAM_BUFFERS: u32 = 4;
const DARK_FRAME_PCT: f32 = 0.95;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("no usable frame after {0} attempts (all frames dark)")]
    NoLitFrame(usize),
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

fn pixel_format_from_fourcc(fourcc: FourCC) -> Option<PixelFormat> {
    match &fourcc.repr {
        b"YUYV" => Some(PixelFormat::Yuyv),
        b"MJPG" => Some(PixelFormat::Mjpg),
        b"RGB3" => Some(PixelFormat::Rgb3),
        b"GREY" => Some(PixelFormat::Grey),
        _ => None,
    }
}

/// Anything that can hand out RGB frames: a V4L2 camera, or a scripted
/// source in tests.
pub trait FrameSource {
    fn capture_frame(&self) -> Result<Frame, CameraError>;
    fn capture_lit_frame(&self, max_attempts: usize) -> Result<Frame, CameraError>;
}

/// Return the first frame that is not dark, pulling at most `max_attempts`
/// frames from `frames`.
pub fn first_lit_frame(
    frames: impl IntoIterator<Item = Result<Frame, CameraError>>,
    max_attempts: usize,
) -> Result<Frame, CameraError> {
    for frame in frames.into_iter().take(max_attempts) {
        let frame = frame?;
        if !frame.is_dark {
            return Ok(frame);
        }
        tracing::debug!(seq = frame.sequence, "skipping dark frame");
    }
    Err(CameraError::NoLitFrame(max_attempts))
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device (e.g., "/dev/video0") and request
    /// `width x height` YUYV. The driver may pick another size or format.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = pixel_format_from_fourcc(fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, MJPG, RGB3, or GREY)"
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Pixel format the driver agreed to deliver.
    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn stream(&self) -> Result<MmapStream<'_>, CameraError> {
        MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))
    }

    /// Capture a single frame, converted to RGB.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let mut stream = self.stream()?;
        self.next_frame(&mut stream)
    }

    /// Capture up to `max_attempts` frames and return the first that is not dark.
    pub fn capture_lit_frame(&self, max_attempts: usize) -> Result<Frame, CameraError> {
        let mut stream = self.stream()?;
        first_lit_frame(
            std::iter::repeat_with(|| self.next_frame(&mut stream)),
            max_attempts,
        )
    }

    /// Read and drop `count` frames so auto-exposure can settle.
    pub fn discard_frames(&self, count: usize) -> Result<(), CameraError> {
        if count == 0 {
            return Ok(());
        }
        let mut stream = self.stream()?;
        for _ in 0..count {
            stream.next().map_err(|e| {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            })?;
        }
        tracing::debug!(count, "discarded warmup frames");
        Ok(())
    }

    fn next_frame(&self, stream: &mut MmapStream<'_>) -> Result<Frame, CameraError> {
        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        // Some drivers leave bytesused at 0 for fixed-size formats.
        let used = match meta.bytesused as usize {
            0 => buf.len(),
            n => n.min(buf.len()),
        };
        let (data, width, height) =
            frame::decode_buffer(self.pixel_format, &buf[..used], self.width, self.height)
                .map_err(|e| {
                    CameraError::CaptureFailed(format!("{:?} conversion failed: {e}", self.pixel_format))
                })?;
        let is_dark = frame::is_dark_frame(&data, DARK_FRAME_PCT);

        Ok(Frame {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence: meta.sequence,
            is_dark,
        })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl FrameSource for Camera {
    fn capture_frame(&self) -> Result<Frame, CameraError> {
        Camera::capture_frame(self)
    }

    fn capture_lit_frame(&self, max_attempts: usize) -> Result<Frame, CameraError> {
        Camera::capture_lit_frame(self, max_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device() {
        let result = Camera::open("/dev/veriface-missing", 640, 480);
        assert!(matches!(result, Err(CameraError::DeviceNotFound(_))));
    }

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(pixel_format_from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(pixel_format_from_fourcc(FourCC::new(b"MJPG")), Some(PixelFormat::Mjpg));
        assert_eq!(pixel_format_from_fourcc(FourCC::new(b"RGB3")), Some(PixelFormat::Rgb3));
        assert_eq!(pixel_format_from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(pixel_format_from_fourcc(FourCC::new(b"H264")), None);
    }

    fn test_frame(sequence: u32, is_dark: bool) -> Result<Frame, CameraError> {
        Ok(Frame {
            data: vec![if is_dark { 0 } else { 180 }; 12],
            width: 2,
            height: 2,
            timestamp: std::time::Instant::now(),
            sequence,
            is_dark,
        })
    }

    #[test]
    fn test_first_lit_frame_skips_dark() {
        let frames = vec![test_frame(1, true), test_frame(2, true), test_frame(3, false)];
        let frame = first_lit_frame(frames, 5).unwrap();
        assert_eq!(frame.sequence, 3);
    }

    #[test]
    fn test_first_lit_frame_all_dark() {
        let frames = (0..10).map(|i| test_frame(i, true));
        assert!(matches!(first_lit_frame(frames, 4), Err(CameraError::NoLitFrame(4))));
    }

    #[test]
    fn test_first_lit_frame_respects_attempt_limit() {
        // The lit frame arrives one attempt too late.
        let frames = vec![test_frame(1, true), test_frame(2, true), test_frame(3, false)];
        assert!(matches!(first_lit_frame(frames, 2), Err(CameraError::NoLitFrame(2))));
    }

    #[test]
    fn test_first_lit_frame_propagates_capture_error() {
        let frames = vec![
            test_frame(1, true),
            Err(CameraError::CaptureFailed("dequeue".into())),
            test_frame(3, false),
        ];
        assert!(matches!(first_lit_frame(frames, 5), Err(CameraError::CaptureFailed(_))));
    }
}
