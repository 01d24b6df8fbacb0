// src/display/drivers/mod.rs
//! Display backend implementations.

pub mod headless;

#[cfg(all(feature = "x11", target_os = "linux"))]
pub mod x11;

pub use headless::{HeadlessControl, HeadlessFactory};

#[cfg(all(feature = "x11", target_os = "linux"))]
pub use self::x11::X11Factory;
