//! V4L2 webcam capture via the `v4l` crate.
//!
//! The device is owned by a dedicated OS thread. `take_picture` queues the
//! request and returns; the thread grabs a non-dark frame, saves it as a JPEG
//! in the capture directory and delivers the outcome through the completer.

use crate::frame::{self, Frame};
use image::codecs::jpeg::JpegEncoder;
use mimic_core::{
    capture_file_name, CameraCollaborator, CameraError, CaptureCompleter, CaptureOutcome,
};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Quality of the raw capture; the post-processor re-encodes afterwards.
const CAPTURE_JPEG_QUALITY: u8 = 95;
const DARK_THRESHOLD_PCT: f32 = 0.95;
const MAX_CAPTURE_ATTEMPTS: usize = 8;

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel).
    Grey,
    /// 16-bit little-endian grayscale (2 bytes/pixel).
    Y16,
}

/// Capture settings for [`V4l2Camera::open`].
#[derive(Debug, Clone)]
pub struct V4l2Options {
    pub device_path: String,
    pub capture_dir: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Frames discarded at startup for auto-exposure to settle.
    pub warmup_frames: usize,
}

struct Webcam {
    device: Device,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl Webcam {
    fn open(opts: &V4l2Options) -> Result<Self, CameraError> {
        let device_path = opts.device_path.as_str();
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
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::Unavailable(format!(
                "{device_path} is not a video capture device"
            )));
        }
        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = opts.width;
        fmt.height = opts.height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            PixelFormat::Y16
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or Y16)"
            )));
        };

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
            pixel_format,
        })
    }

    fn buf_to_rgb(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let pixels = (self.width * self.height) as usize;
        let converted = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height),
            PixelFormat::Grey => {
                if buf.len() < pixels {
                    return Err(CameraError::CaptureFailed(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    )));
                }
                Ok(frame::grey_to_rgb(&buf[..pixels]))
            }
            PixelFormat::Y16 => frame::y16_to_grey(buf, pixels).map(|g| frame::grey_to_rgb(&g)),
        };
        converted.map_err(|e| CameraError::CaptureFailed(format!("frame conversion failed: {e}")))
    }

    /// Grab up to `max_attempts` frames and return the first one that is not dark.
    fn capture_bright_frame(&self, max_attempts: usize) -> Result<Frame, CameraError> {
        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4).map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;

        for _ in 0..max_attempts {
            let (buf, meta) = stream.next().map_err(|e| {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            })?;
            let rgb = self.buf_to_rgb(buf)?;

            if frame::is_dark_frame(&frame::rgb_to_luma(&rgb), DARK_THRESHOLD_PCT) {
                tracing::debug!(seq = meta.sequence, "skipping dark frame");
                continue;
            }

            return Ok(Frame {
                data: rgb,
                width: self.width,
                height: self.height,
                sequence: meta.sequence,
            });
        }

        Err(CameraError::CaptureFailed(format!(
            "every frame was too dark after {max_attempts} attempts"
        )))
    }

    fn discard(&self, count: usize) {
        if count == 0 {
            return;
        }
        tracing::info!(count, "discarding warmup frames");
        if let Ok(mut stream) = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4) {
            for _ in 0..count {
                let _ = stream.next();
            }
        }
    }

    fn take_photo(&self, dir: &Path) -> Result<PathBuf, CameraError> {
        let frame = self.capture_bright_frame(MAX_CAPTURE_ATTEMPTS)?;
        tracing::debug!(
            seq = frame.sequence,
            brightness = frame.avg_brightness(),
            "frame captured"
        );
        let image = frame
            .into_image()
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, CAPTURE_JPEG_QUALITY)
            .encode_image(&image)
            .map_err(|e| CameraError::CaptureFailed(format!("JPEG encode failed: {e}")))?;

        std::fs::create_dir_all(dir).map_err(|e| {
            CameraError::CaptureFailed(format!("cannot create {}: {e}", dir.display()))
        })?;
        let path = capture_file_name(dir, &uuid::Uuid::new_v4().to_string());
        std::fs::write(&path, &jpeg).map_err(|e| {
            CameraError::CaptureFailed(format!("cannot write {}: {e}", path.display()))
        })?;
        Ok(path)
    }
}

/// Webcam capture collaborator backed by a dedicated device thread.
pub struct V4l2Camera {
    tx: mpsc::Sender<CaptureCompleter>,
    device_path: String,
}

impl V4l2Camera {
    /// Open the device and start the capture thread. Fails fast if the
    /// camera is missing or cannot negotiate a usable format.
    pub fn open(opts: V4l2Options) -> Result<Self, CameraError> {
        let webcam = Webcam::open(&opts)?;
        webcam.discard(opts.warmup_frames);

        let (tx, mut rx) = mpsc::channel::<CaptureCompleter>(1);
        let capture_dir = opts.capture_dir.clone();

        std::thread::Builder::new()
            .name("mimic-camera".into())
            .spawn(move || {
                tracing::info!("camera thread started");
                while let Some(completer) = rx.blocking_recv() {
                    let outcome = match webcam.take_photo(&capture_dir) {
                        Ok(path) => {
                            tracing::info!(path = %path.display(), "photo saved");
                            CaptureOutcome::saved(path)
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "webcam capture failed");
                            CaptureOutcome::failed(err.to_string())
                        }
                    };
                    completer.deliver(outcome);
                }
                tracing::info!("camera thread exiting");
            })
            .map_err(|e| CameraError::Unavailable(format!("failed to spawn camera thread: {e}")))?;

        Ok(Self {
            tx,
            device_path: opts.device_path,
        })
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
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

impl CameraCollaborator for V4l2Camera {
    fn take_picture(&self, completer: CaptureCompleter) -> Result<(), CameraError> {
        self.tx.try_send(completer).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => CameraError::DeviceBusy,
            mpsc::error::TrySendError::Closed(_) => {
                CameraError::Unavailable("camera thread exited".into())
            }
        })
    }
}
