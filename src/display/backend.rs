// src/display/backend.rs
//! Backend traits - the minimal set of graphics primitives the display worker needs.
//!
//! ## Threading Model
//! - A backend is opened, used and dropped on the display worker thread only.
//! - Backend handles are never `Send`; other threads reach the worker through
//!   the handoff channel and an `EventLoopWaker`.
//!
//! ## Lifecycle
//! 1. `BackendFactory::open()` - library-wide setup (connect to the server)
//! 2. Window, renderer, custom events, surface - created by the worker
//! 3. `wait_for_event` / `update_surface` / `render` loop
//! 4. `destroy_*` in reverse order, then `Drop` of the backend itself

use crate::display::error::DisplayError;
use crate::display::messages::{NativeEvent, PixelFormat, Size};
use std::sync::Arc;
use std::time::Duration;

/// Opens a backend on the thread that will use it.
pub trait BackendFactory: Send + Sync + 'static {
    type Backend: DisplayBackend;

    fn open(&self) -> Result<Self::Backend, DisplayError>;
}

/// Window, renderer and texture primitives of an external graphics library.
///
/// Destroy operations consume their handle, so a handle can only be released once.
pub trait DisplayBackend {
    type Window;
    type Renderer;
    type Surface;

    fn create_window(
        &mut self,
        title: &str,
        centered: bool,
        size: Size,
    ) -> Result<Self::Window, DisplayError>;

    fn resize_window(&mut self, window: &mut Self::Window, size: Size) -> Result<(), DisplayError>;

    fn create_renderer(&mut self, window: &Self::Window) -> Result<Self::Renderer, DisplayError>;

    /// Create a streaming surface the size of the window.
    fn create_surface(
        &mut self,
        renderer: &Self::Renderer,
        format: PixelFormat,
        size: Size,
    ) -> Result<Self::Surface, DisplayError>;

    /// Copy a complete frame into the surface. `pixels` is only borrowed for the call.
    fn update_surface(
        &mut self,
        surface: &mut Self::Surface,
        pixels: &[u8],
        row_stride: usize,
    ) -> Result<(), DisplayError>;

    /// Clear, draw `surface` over the whole window and present, as one unit.
    fn render(&mut self, renderer: &mut Self::Renderer, surface: &Self::Surface);

    /// Reserve `count` consecutive custom event ids and return the first one.
    fn register_custom_events(&mut self, count: u32) -> Result<u32, DisplayError>;

    /// A handle other threads use to post custom events into this backend's queue.
    fn create_waker(&mut self, window: &Self::Window)
        -> Result<Arc<dyn EventLoopWaker>, DisplayError>;

    /// Block until a native or custom event arrives, or `timeout` elapses.
    fn wait_for_event(&mut self, timeout: Duration) -> Result<NativeEvent, DisplayError>;

    fn destroy_surface(&mut self, surface: Self::Surface);

    fn destroy_renderer(&mut self, renderer: Self::Renderer);

    fn destroy_window(&mut self, window: Self::Window);
}

/// Cross-thread signaling into a backend's event queue.
///
/// Posting wakes the worker from `wait_for_event`, which then reports
/// `NativeEvent::Custom(event_type)`.
pub trait EventLoopWaker: Send + Sync {
    fn wake(&self, event_type: u32) -> Result<(), DisplayError>;
}

