// src/display/session.rs
//! DisplaySession - the display worker thread and its state machine.
//!
//! The session exclusively owns the backend and every handle created from it.
//! Other threads see it only through `SharedStatus` (state, size, quit flag,
//! waker) and the handoff channel.
//!
//! Uninitialized → Initializing → Running → Stopping → Stopped, with
//! Initializing → Stopped when the backend cannot be set up.

use crate::config::Config;
use crate::display::backend::{BackendFactory, DisplayBackend, EventLoopWaker};
use crate::display::error::DisplayError;
use crate::display::handoff::{FeedbackSender, FrameRequest, HandoffReceiver, Pending};
use crate::display::messages::{
    CustomEvents, DisplayEvent, DisplayState, FeedbackStatus, NativeEvent, PixelFormat, Size,
    StopReason,
};
use log::{debug, error, info, trace, warn};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct StatusInner {
    state: DisplayState,
    size: Option<Size>,
    quit_requested: bool,
    stop_reason: Option<StopReason>,
    waker: Option<(Arc<dyn EventLoopWaker>, CustomEvents)>,
}

pub(crate) enum QuitRequest {
    NotRunning,
    /// The worker will stop at its next wakeup. Carries the waker to post the
    /// quit event with, absent while the worker is still initializing.
    Flagged(Option<(Arc<dyn EventLoopWaker>, u32)>),
}

/// The only state shared across the producer/worker boundary.
pub(crate) struct SharedStatus {
    inner: Mutex<StatusInner>,
    changed: Condvar,
}

impl SharedStatus {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(StatusInner {
                state: DisplayState::Uninitialized,
                size: None,
                quit_requested: false,
                stop_reason: None,
                waker: None,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, update: impl FnOnce(&mut StatusInner)) {
        let mut inner = self.lock();
        update(&mut inner);
        self.changed.notify_all();
    }

    pub(crate) fn state(&self) -> DisplayState {
        self.lock().state
    }

    pub(crate) fn size(&self) -> Option<Size> {
        self.lock().size
    }

    pub(crate) fn stop_reason(&self) -> Option<StopReason> {
        self.lock().stop_reason
    }

    /// True while the current worker takes new frame requests.
    pub(crate) fn accepts_requests(&self) -> bool {
        let inner = self.lock();
        inner.state.is_alive() && !inner.quit_requested
    }

    /// Enter `Initializing` for a new worker.
    pub(crate) fn begin(&self) {
        self.transition(|inner| {
            inner.state = DisplayState::Initializing;
            inner.size = None;
            inner.quit_requested = false;
            inner.stop_reason = None;
            inner.waker = None;
        });
    }

    fn set_running(&self, size: Size, waker: Arc<dyn EventLoopWaker>, events: CustomEvents) {
        self.transition(|inner| {
            inner.state = DisplayState::Running;
            inner.size = Some(size);
            inner.waker = Some((waker, events));
        });
    }

    fn set_size(&self, size: Size) {
        self.lock().size = Some(size);
    }

    /// Leave `Running`. The reason is visible before any waiting request is failed.
    fn set_stopping(&self, reason: StopReason) {
        self.transition(|inner| {
            inner.state = DisplayState::Stopping;
            inner.stop_reason = Some(reason);
            inner.waker = None;
        });
    }

    fn set_stopped(&self, reason: StopReason) {
        self.transition(|inner| {
            inner.state = DisplayState::Stopped;
            inner.size = None;
            inner.stop_reason = Some(reason);
            inner.waker = None;
        });
    }

    /// Mark a worker that exited without reporting `Stopped` (it panicked,
    /// or never ran) as stopped by a fault.
    pub(crate) fn set_abandoned(&self) {
        if self.state() != DisplayState::Stopped {
            self.set_stopped(StopReason::Fault);
        }
    }

    /// Flag the live worker to quit.
    pub(crate) fn request_quit(&self) -> QuitRequest {
        let mut inner = self.lock();
        if !inner.state.is_alive() {
            return QuitRequest::NotRunning;
        }
        inner.quit_requested = true;
        QuitRequest::Flagged(
            inner
                .waker
                .as_ref()
                .map(|(waker, events)| (Arc::clone(waker), events.quit)),
        )
    }

    fn quit_requested(&self) -> bool {
        self.lock().quit_requested
    }

    pub(crate) fn frame_waker(&self) -> Option<(Arc<dyn EventLoopWaker>, u32)> {
        self.lock()
            .waker
            .as_ref()
            .map(|(waker, events)| (Arc::clone(waker), events.frame))
    }

    /// Block until no worker is alive or stopping. Returns false on timeout.
    pub(crate) fn wait_until_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        while matches!(
            inner.state,
            DisplayState::Initializing | DisplayState::Running | DisplayState::Stopping
        ) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            inner = self
                .changed
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

/// Parameters a worker is started with.
#[derive(Debug, Clone)]
pub(crate) struct SessionSettings {
    pub title: String,
    pub centered: bool,
    pub format: PixelFormat,
    pub size: Size,
    pub wait_timeout: Duration,
}

impl SessionSettings {
    pub(crate) fn from_config(config: &Config, size: Size) -> Self {
        Self {
            title: config.window.title.clone(),
            centered: config.window.centered,
            format: config.video.pixel_format,
            size,
            wait_timeout: Duration::from_millis(config.performance.event_wait_timeout_ms),
        }
    }
}

pub(crate) struct DisplaySession<B: DisplayBackend> {
    backend: B,
    window: Option<B::Window>,
    renderer: Option<B::Renderer>,
    surface: Option<B::Surface>,
    size: Size,
    format: PixelFormat,
    events: CustomEvents,
    wait_timeout: Duration,
    shared: Arc<SharedStatus>,
}

impl<B: DisplayBackend> DisplaySession<B> {
    /// Display worker thread body.
    ///
    /// Answers `init` once the backend is ready (or failed), then serves
    /// requests until quit, close or fault.
    pub(crate) fn run<F>(
        factory: Arc<F>,
        settings: SessionSettings,
        shared: Arc<SharedStatus>,
        requests: HandoffReceiver,
        init: FeedbackSender,
    ) where
        F: BackendFactory<Backend = B>,
    {
        info!("DisplaySession: Initializing at {}", settings.size);

        let (mut session, waker) = match Self::initialize(factory.as_ref(), &settings, &shared) {
            Ok(ready) => ready,
            Err(e) => {
                error!("DisplaySession: Failed initialization: {}", e);
                requests.close();
                shared.set_stopped(StopReason::Fault);
                init.send(FeedbackStatus::Fail);
                return;
            }
        };

        shared.set_running(session.size, waker, session.events);
        info!("DisplaySession: Running at {}", session.size);
        init.send(FeedbackStatus::Ok);

        let reason = session.event_loop(&requests);
        session.shutdown(requests, reason);
    }

    fn initialize<F>(
        factory: &F,
        settings: &SessionSettings,
        shared: &Arc<SharedStatus>,
    ) -> Result<(Self, Arc<dyn EventLoopWaker>), DisplayError>
    where
        F: BackendFactory<Backend = B>,
    {
        let backend = factory.open()?;
        let mut session = Self {
            backend,
            window: None,
            renderer: None,
            surface: None,
            size: settings.size,
            format: settings.format,
            events: CustomEvents::from_base(0),
            wait_timeout: settings.wait_timeout,
            shared: Arc::clone(shared),
        };
        match session.acquire(settings) {
            Ok(waker) => Ok((session, waker)),
            Err(e) => {
                session.release();
                Err(e)
            }
        }
    }

    fn acquire(&mut self, settings: &SessionSettings) -> Result<Arc<dyn EventLoopWaker>, DisplayError> {
        let window = self
            .backend
            .create_window(&settings.title, settings.centered, settings.size)?;
        let window = self.window.insert(window);

        let renderer = self.backend.create_renderer(window)?;
        let renderer = self.renderer.insert(renderer);

        let base = self.backend.register_custom_events(CustomEvents::COUNT)?;
        self.events = CustomEvents::from_base(base);
        debug!(
            "DisplaySession: Registered custom events frame={} quit={}",
            self.events.frame, self.events.quit
        );
        let waker = self.backend.create_waker(window)?;

        let surface = self
            .backend
            .create_surface(renderer, settings.format, settings.size)?;
        self.surface = Some(surface);
        Ok(waker)
    }

    fn event_loop(&mut self, requests: &HandoffReceiver) -> StopReason {
        loop {
            let event = match self.next_event(requests) {
                Ok(event) => event,
                Err(e) => {
                    error!("DisplaySession: Error waiting for events: {}", e);
                    return StopReason::Fault;
                }
            };

            match event {
                DisplayEvent::FrameReady(request) => {
                    trace!("DisplaySession: Frame request {}", request.size());
                    if request.complete(|pixels, size| self.show_frame(pixels, size))
                        == FeedbackStatus::Fail
                    {
                        return StopReason::Fault;
                    }
                }
                DisplayEvent::QuitRequested => return StopReason::Quit,
                DisplayEvent::BackendClosed => return StopReason::Closed,
            }
        }
    }

    /// Merge the handoff channel, the quit flag and the backend's native
    /// queue into one wait point, in that order.
    fn next_event(
        &mut self,
        requests: &HandoffReceiver,
    ) -> Result<DisplayEvent<FrameRequest>, DisplayError> {
        loop {
            // A request queued before stop() was called is still shown; the
            // controller queues nothing once the quit flag is set.
            match requests.poll() {
                Pending::Request(request) => return Ok(DisplayEvent::FrameReady(request)),
                Pending::Closed => {
                    debug!("DisplaySession: All producers gone");
                    return Ok(DisplayEvent::QuitRequested);
                }
                Pending::Empty => {}
            }
            if self.shared.quit_requested() {
                return Ok(DisplayEvent::QuitRequested);
            }

            match self.backend.wait_for_event(self.wait_timeout)? {
                NativeEvent::CloseRequested => {
                    info!("DisplaySession: Window closed by user");
                    return Ok(DisplayEvent::BackendClosed);
                }
                NativeEvent::Expose => self.present(),
                NativeEvent::Custom(id) => trace!("DisplaySession: Custom event {}", id),
                NativeEvent::Timeout | NativeEvent::Other => {}
            }
        }
    }

    fn show_frame(&mut self, pixels: &[u8], size: Size) -> FeedbackStatus {
        trace!("DisplaySession: Frame {} ({} bytes)", size, pixels.len());
        let status = match self.update_frame(pixels, size) {
            Ok(()) => FeedbackStatus::Ok,
            Err(e) => {
                error!("DisplaySession: Failed to display frame: {}", e);
                FeedbackStatus::Fail
            }
        };
        // Present even after a failure so the window stays responsive.
        self.present();
        status
    }

    fn update_frame(&mut self, pixels: &[u8], size: Size) -> Result<(), DisplayError> {
        if size != self.size {
            self.resize(size)?;
        }
        let expected = self.format.frame_len(size);
        if pixels.len() < expected {
            return Err(DisplayError::InvalidFrame {
                expected,
                actual: pixels.len(),
            });
        }
        let surface = self
            .surface
            .as_mut()
            .ok_or_else(|| DisplayError::Surface("no frame surface".to_string()))?;
        self.backend
            .update_surface(surface, pixels, self.format.row_stride(size.width))
    }

    /// Resize the window, then swap in a surface of the new size.
    /// The current size only changes once both succeed.
    fn resize(&mut self, size: Size) -> Result<(), DisplayError> {
        debug!("DisplaySession: Resizing {} -> {}", self.size, size);
        let (Some(window), Some(renderer)) = (self.window.as_mut(), self.renderer.as_ref()) else {
            return Err(DisplayError::Surface("display not initialized".to_string()));
        };
        self.backend.resize_window(window, size)?;
        let surface = self.backend.create_surface(renderer, self.format, size)?;
        if let Some(old) = self.surface.replace(surface) {
            self.backend.destroy_surface(old);
        }
        self.size = size;
        self.shared.set_size(size);
        Ok(())
    }

    fn present(&mut self) {
        if let (Some(renderer), Some(surface)) = (self.renderer.as_mut(), self.surface.as_ref()) {
            self.backend.render(renderer, surface);
        }
    }

    fn shutdown(mut self, requests: HandoffReceiver, reason: StopReason) {
        info!("DisplaySession: Stopping ({:?})", reason);
        self.shared.set_stopping(reason);

        // Nobody may stay blocked on a worker that is going away.
        let failed = requests.close();
        if failed > 0 {
            warn!("DisplaySession: Failed {} pending frame request(s)", failed);
        }

        self.release();
        let Self { backend, shared, .. } = self;
        drop(backend);
        shared.set_stopped(reason);
        info!("DisplaySession: Stopped");
    }

    fn release(&mut self) {
        if let Some(surface) = self.surface.take() {
            self.backend.destroy_surface(surface);
        }
        if let Some(renderer) = self.renderer.take() {
            self.backend.destroy_renderer(renderer);
        }
        if let Some(window) = self.window.take() {
            self.backend.destroy_window(window);
        }
    }
}
