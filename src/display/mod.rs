// src/display/mod.rs
//! Threaded video display.
//!
//! - VideoDisplay: lifecycle controller, the producer's entry point
//! - DisplaySession: the display worker owning every backend resource
//! - Handoff: single-slot request/response between the two threads
//! - DisplayBackend: graphics primitives (headless, X11)

pub mod backend;
pub mod controller;
pub mod drivers;
pub mod error;
mod handoff;
pub mod messages;
mod session;

pub use backend::{BackendFactory, DisplayBackend, EventLoopWaker};
pub use controller::VideoDisplay;
pub use error::DisplayError;
pub use messages::{
    CustomEvents, DisplayEvent, DisplayState, FeedbackStatus, FrameBuffer, NativeEvent,
    PixelFormat, Size, StopReason,
};
