// src/display/messages.rs
//! Data model shared by the producer, the handoff channel and the display worker.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Width and height of a frame, the window, or the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel layout of the frames handed to the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Planar YUV 4:2:0 (Y plane, then U, then V at quarter resolution).
    Iyuv,
    /// Packed 32-bit BGRA, one row after the other.
    Bgra8888,
}

impl PixelFormat {
    /// Number of bytes a complete frame of `size` occupies.
    pub fn frame_len(self, size: Size) -> usize {
        let w = size.width as usize;
        let h = size.height as usize;
        match self {
            PixelFormat::Iyuv => w * h + 2 * (w.div_ceil(2) * h.div_ceil(2)),
            PixelFormat::Bgra8888 => w * h * 4,
        }
    }

    /// Stride of the first plane, as passed to the surface upload.
    pub fn row_stride(self, width: u32) -> usize {
        match self {
            PixelFormat::Iyuv => width as usize,
            PixelFormat::Bgra8888 => width as usize * 4,
        }
    }
}

/// A borrowed, caller-owned view of one frame.
///
/// The pixels stay owned by the producer; the display only reads them while
/// the submitting call is blocked.
#[derive(Debug, Clone, Copy)]
pub struct FrameBuffer<'a> {
    pub pixels: &'a [u8],
    pub size: Size,
}

impl<'a> FrameBuffer<'a> {
    pub fn new(pixels: &'a [u8], width: u32, height: u32) -> Self {
        Self {
            pixels,
            size: Size::new(width, height),
        }
    }
}

/// Outcome of one request handed to the display worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedbackStatus {
    /// No answer yet.
    #[default]
    None,
    Ok,
    Fail,
}

/// Lifecycle of a display worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayState {
    #[default]
    Uninitialized,
    Initializing,
    Running,
    Stopping,
    Stopped,
}

impl DisplayState {
    /// True while a worker thread owns (or is acquiring) backend resources
    /// and accepts new requests.
    pub fn is_alive(self) -> bool {
        matches!(self, DisplayState::Initializing | DisplayState::Running)
    }
}

/// Why the last display worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` was called, or every producer handle was dropped.
    Quit,
    /// The window was closed from outside the program.
    Closed,
    /// Initialization, a frame, or the event wait failed.
    Fault,
}

/// Events the display worker reacts to, in the order they are observed.
#[derive(Debug)]
pub enum DisplayEvent<R> {
    /// A frame request taken from the handoff channel.
    FrameReady(R),
    /// The producer asked the worker to stop.
    QuitRequested,
    /// The window was closed from outside the program.
    BackendClosed,
}

/// Events reported by a backend's blocking wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeEvent {
    /// The user (or window manager) asked for the window to close.
    CloseRequested,
    /// An application-defined event posted through an `EventLoopWaker`.
    Custom(u32),
    /// The window contents were damaged and should be presented again.
    Expose,
    /// Nothing arrived before the wait timed out.
    Timeout,
    /// Any other native event; ignored.
    Other,
}

/// Custom event ids registered by a worker with its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustomEvents {
    /// Posted after a frame request is queued.
    pub frame: u32,
    /// Posted after a stop request.
    pub quit: u32,
}

impl CustomEvents {
    pub const COUNT: u32 = 2;

    pub fn from_base(base: u32) -> Self {
        Self {
            frame: base,
            quit: base + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn iyuv_frame_len_rounds_chroma_planes_up() {
        assert_eq!(PixelFormat::Iyuv.frame_len(Size::new(640, 480)), 640 * 480 * 3 / 2);
        // 3x3 luma, 2x2 chroma planes.
        assert_eq!(PixelFormat::Iyuv.frame_len(Size::new(3, 3)), 9 + 2 * 4);
    }

    #[test]
    fn bgra_stride_is_four_bytes_per_pixel() {
        assert_eq!(PixelFormat::Bgra8888.row_stride(320), 1280);
        assert_eq!(PixelFormat::Iyuv.row_stride(320), 320);
        assert_eq!(PixelFormat::Bgra8888.frame_len(Size::new(2, 2)), 16);
    }

    #[test]
    fn only_initializing_and_running_are_alive() {
        assert!(DisplayState::Initializing.is_alive());
        assert!(DisplayState::Running.is_alive());
        assert!(!DisplayState::Uninitialized.is_alive());
        assert!(!DisplayState::Stopping.is_alive());
        assert!(!DisplayState::Stopped.is_alive());
    }
}
