// src/display/error.rs
use crate::display::messages::{PixelFormat, Size};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisplayError {
    /// Opening the backend, or creating the window or renderer, failed.
    #[error("Backend initialization failed: {0}")]
    BackendInit(String),
    /// Creating, resizing or uploading to the frame surface failed.
    #[error("Surface operation failed: {0}")]
    Surface(String),
    #[error("Waiting for backend events failed: {0}")]
    EventWait(String),
    #[error("Failed to spawn display thread: {0}")]
    Spawn(String),
    #[error("Pixel format {0:?} is not supported by this backend")]
    UnsupportedFormat(PixelFormat),
    /// The display worker reported a failed handshake.
    #[error("Display failed to initialize")]
    InitFailed,
    /// The display worker did not display the frame.
    #[error("Frame was not displayed")]
    FrameFailed,
    #[error("Frame has no pixels: {0}")]
    EmptyFrame(Size),
    #[error("Frame buffer too small: expected {expected} bytes, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },
}
