// src/lib.rs
//! Presents decoded video frames on a dedicated display thread.
//!
//! A producer (decoder or network thread) calls [`VideoDisplay::submit_frame`]
//! for every frame; the call blocks until the display thread has shown the frame
//! or failed to, so the producer's buffer can be reused as soon as it returns.

pub mod config;
pub mod display;
#[cfg(target_os = "linux")]
pub mod os;

pub use config::{Config, CONFIG};
pub use display::{
    DisplayError, DisplayState, FrameBuffer, PixelFormat, Size, StopReason, VideoDisplay,
};
