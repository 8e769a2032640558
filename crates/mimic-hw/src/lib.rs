//! mimic-hw: platform collaborators for the Mimic game session.
//!
//! Local filesystem access, a photo-import camera and, with the `v4l2`
//! feature, V4L2 webcam capture.

#[cfg(feature = "v4l2")]
pub mod camera;
pub mod filesystem;
pub mod frame;
pub mod import;

#[cfg(feature = "v4l2")]
pub use camera::{DeviceInfo, PixelFormat, V4l2Camera, V4l2Options};
pub use filesystem::LocalFilesystem;
pub use frame::Frame;
pub use import::ImportCamera;
