// src/display/drivers/headless.rs
//! Headless display backend.
//!
//! Keeps surfaces in memory and records every call. A `HeadlessControl` handle
//! shared with the backend lets the owner inject faults, simulate the window
//! being closed, and observe which resources are alive.

use crate::display::backend::{BackendFactory, DisplayBackend, EventLoopWaker};
use crate::display::error::DisplayError;
use crate::display::messages::{NativeEvent, PixelFormat, Size};
use log::{info, trace};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// First id handed out by `register_custom_events`.
const CUSTOM_EVENT_BASE: u32 = 0x8000;

/// Most recent calls kept in the call log.
pub const CALL_LOG_LIMIT: usize = 4096;

/// A backend operation, as seen by the headless backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Open,
    CreateWindow { title: String, size: Size },
    ResizeWindow { size: Size },
    CreateRenderer,
    CreateSurface { id: u32, format: PixelFormat, size: Size },
    UpdateSurface { id: u32, len: usize, row_stride: usize },
    Render { surface: u32 },
    RegisterCustomEvents { count: u32, base: u32 },
    DestroySurface { id: u32 },
    DestroyRenderer,
    DestroyWindow,
}

/// Operations to make fail.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub open: bool,
    pub create_window: bool,
    pub create_renderer: bool,
    pub register_events: bool,
    /// Fail `create_surface` for this size only.
    pub create_surface_at: Option<Size>,
    pub update_surface: bool,
    pub wait: bool,
}

/// Resources currently held by headless backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveResources {
    pub backends: usize,
    pub windows: usize,
    pub renderers: usize,
    pub surfaces: usize,
}

impl LiveResources {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Default)]
struct HeadlessState {
    queue: VecDeque<NativeEvent>,
    calls: VecDeque<BackendCall>,
    faults: Faults,
    live: LiveResources,
    max_backends: usize,
    close_on_wake: bool,
    held: bool,
    waiting: usize,
    next_custom: u32,
    next_surface: u32,
    last_upload: Option<Vec<u8>>,
}

impl HeadlessState {
    fn record(&mut self, call: BackendCall) {
        if self.calls.len() == CALL_LOG_LIMIT {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<HeadlessState>,
    changed: Condvar,
}

/// Handle to observe and steer headless backends.
#[derive(Clone, Default)]
pub struct HeadlessControl {
    shared: Arc<Shared>,
}

impl HeadlessControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HeadlessState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn post(&self, event: NativeEvent) {
        self.lock().queue.push_back(event);
        self.shared.changed.notify_all();
    }

    /// Replace the active faults. A backend parked in `wait_for_event` re-checks them.
    pub fn set_faults(&self, faults: Faults) {
        self.lock().faults = faults;
        self.shared.changed.notify_all();
    }

    /// Simulate the user closing the window.
    pub fn close_window(&self) {
        self.post(NativeEvent::CloseRequested);
    }

    /// Make the next custom event arrive right behind a close request, as if
    /// the window were closed while the event was in flight.
    pub fn close_on_next_wake(&self) {
        self.lock().close_on_wake = true;
    }

    pub fn expose(&self) {
        self.post(NativeEvent::Expose);
    }

    /// Keep posted events queued: `wait_for_event` only times out until
    /// `release_events` is called.
    pub fn hold_events(&self) {
        self.lock().held = true;
    }

    pub fn release_events(&self) {
        self.lock().held = false;
        self.shared.changed.notify_all();
    }

    /// Number of events posted but not yet taken by a backend.
    pub fn pending_events(&self) -> usize {
        self.lock().queue.len()
    }

    /// The most recent calls, oldest first, at most `CALL_LOG_LIMIT` of them.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.iter().cloned().collect()
    }

    pub fn count_calls(&self, matches: impl Fn(&BackendCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|call| matches(call)).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn live(&self) -> LiveResources {
        self.lock().live
    }

    /// Highest number of backends that were ever open at the same time.
    pub fn max_concurrent_backends(&self) -> usize {
        self.lock().max_backends
    }

    /// Bytes of the most recent successful surface upload.
    pub fn last_upload(&self) -> Option<Vec<u8>> {
        self.lock().last_upload.clone()
    }

    /// Block until a backend is parked in `wait_for_event` with nothing queued.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while state.waiting == 0 || !state.queue.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .shared
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

/// Opens `HeadlessBackend`s that report to one `HeadlessControl`.
#[derive(Clone, Default)]
pub struct HeadlessFactory {
    control: HeadlessControl,
}

impl HeadlessFactory {
    pub fn new(control: HeadlessControl) -> Self {
        Self { control }
    }

    pub fn control(&self) -> &HeadlessControl {
        &self.control
    }
}

impl BackendFactory for HeadlessFactory {
    type Backend = HeadlessBackend;

    fn open(&self) -> Result<HeadlessBackend, DisplayError> {
        let mut state = self.control.lock();
        state.record(BackendCall::Open);
        if state.faults.open {
            return Err(DisplayError::BackendInit("headless open refused".to_string()));
        }
        state.queue.clear();
        state.live.backends += 1;
        state.max_backends = state.max_backends.max(state.live.backends);
        info!("HeadlessBackend: Opened ({} live)", state.live.backends);
        drop(state);
        Ok(HeadlessBackend {
            control: self.control.clone(),
        })
    }
}

pub struct HeadlessBackend {
    control: HeadlessControl,
}

pub struct HeadlessWindow;

pub struct HeadlessRenderer;

pub struct HeadlessSurface {
    id: u32,
    format: PixelFormat,
    size: Size,
    pixels: Vec<u8>,
}

struct HeadlessWaker {
    control: HeadlessControl,
}

impl EventLoopWaker for HeadlessWaker {
    fn wake(&self, event_type: u32) -> Result<(), DisplayError> {
        let mut state = self.control.lock();
        if std::mem::take(&mut state.close_on_wake) {
            state.queue.push_back(NativeEvent::CloseRequested);
        }
        state.queue.push_back(NativeEvent::Custom(event_type));
        drop(state);
        self.control.shared.changed.notify_all();
        Ok(())
    }
}

impl DisplayBackend for HeadlessBackend {
    type Window = HeadlessWindow;
    type Renderer = HeadlessRenderer;
    type Surface = HeadlessSurface;

    fn create_window(
        &mut self,
        title: &str,
        _centered: bool,
        size: Size,
    ) -> Result<HeadlessWindow, DisplayError> {
        let mut state = self.control.lock();
        state.record(BackendCall::CreateWindow {
            title: title.to_string(),
            size,
        });
        if state.faults.create_window {
            return Err(DisplayError::BackendInit("headless window refused".to_string()));
        }
        state.live.windows += 1;
        Ok(HeadlessWindow)
    }

    fn resize_window(&mut self, _window: &mut HeadlessWindow, size: Size) -> Result<(), DisplayError> {
        self.control.lock().record(BackendCall::ResizeWindow { size });
        Ok(())
    }

    fn create_renderer(&mut self, _window: &HeadlessWindow) -> Result<HeadlessRenderer, DisplayError> {
        let mut state = self.control.lock();
        state.record(BackendCall::CreateRenderer);
        if state.faults.create_renderer {
            return Err(DisplayError::BackendInit("headless renderer refused".to_string()));
        }
        state.live.renderers += 1;
        Ok(HeadlessRenderer)
    }

    fn create_surface(
        &mut self,
        _renderer: &HeadlessRenderer,
        format: PixelFormat,
        size: Size,
    ) -> Result<HeadlessSurface, DisplayError> {
        let mut state = self.control.lock();
        let id = state.next_surface;
        state.next_surface += 1;
        state.record(BackendCall::CreateSurface { id, format, size });
        if state.faults.create_surface_at == Some(size) {
            return Err(DisplayError::Surface(format!("headless surface {} refused", size)));
        }
        state.live.surfaces += 1;
        Ok(HeadlessSurface {
            id,
            format,
            size,
            pixels: vec![0; format.frame_len(size)],
        })
    }

    fn update_surface(
        &mut self,
        surface: &mut HeadlessSurface,
        pixels: &[u8],
        row_stride: usize,
    ) -> Result<(), DisplayError> {
        let mut state = self.control.lock();
        state.record(BackendCall::UpdateSurface {
            id: surface.id,
            len: pixels.len(),
            row_stride,
        });
        if state.faults.update_surface {
            return Err(DisplayError::Surface("headless upload refused".to_string()));
        }
        let expected = surface.format.frame_len(surface.size);
        if pixels.len() < expected || row_stride != surface.format.row_stride(surface.size.width) {
            return Err(DisplayError::Surface(format!(
                "upload of {} bytes (stride {}) does not fit {} surface",
                pixels.len(),
                row_stride,
                surface.size
            )));
        }
        surface.pixels.copy_from_slice(&pixels[..expected]);
        state.last_upload = Some(surface.pixels.clone());
        Ok(())
    }

    fn render(&mut self, _renderer: &mut HeadlessRenderer, surface: &HeadlessSurface) {
        trace!("HeadlessBackend: Render surface {}", surface.id);
        self.control
            .lock()
            .record(BackendCall::Render { surface: surface.id });
    }

    fn register_custom_events(&mut self, count: u32) -> Result<u32, DisplayError> {
        let mut state = self.control.lock();
        let base = CUSTOM_EVENT_BASE + state.next_custom;
        state.record(BackendCall::RegisterCustomEvents { count, base });
        if state.faults.register_events {
            return Err(DisplayError::BackendInit("headless events refused".to_string()));
        }
        state.next_custom += count;
        Ok(base)
    }

    fn create_waker(
        &mut self,
        _window: &HeadlessWindow,
    ) -> Result<Arc<dyn EventLoopWaker>, DisplayError> {
        Ok(Arc::new(HeadlessWaker {
            control: self.control.clone(),
        }))
    }

    fn wait_for_event(&mut self, timeout: Duration) -> Result<NativeEvent, DisplayError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.control.lock();
        loop {
            if state.faults.wait {
                return Err(DisplayError::EventWait("headless wait refused".to_string()));
            }
            if !state.held {
                if let Some(event) = state.queue.pop_front() {
                    return Ok(event);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(NativeEvent::Timeout);
            }
            state.waiting += 1;
            self.control.shared.changed.notify_all();
            state = self
                .control
                .shared
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            state.waiting -= 1;
        }
    }

    fn destroy_surface(&mut self, surface: HeadlessSurface) {
        let mut state = self.control.lock();
        state.record(BackendCall::DestroySurface { id: surface.id });
        state.live.surfaces -= 1;
    }

    fn destroy_renderer(&mut self, _renderer: HeadlessRenderer) {
        let mut state = self.control.lock();
        state.record(BackendCall::DestroyRenderer);
        state.live.renderers -= 1;
    }

    fn destroy_window(&mut self, _window: HeadlessWindow) {
        let mut state = self.control.lock();
        state.record(BackendCall::DestroyWindow);
        state.live.windows -= 1;
    }
}

impl Drop for HeadlessBackend {
    fn drop(&mut self) {
        let mut state = self.control.lock();
        state.live.backends -= 1;
        info!("HeadlessBackend: Closed ({} live)", state.live.backends);
        drop(state);
        self.control.shared.changed.notify_all();
    }
}
