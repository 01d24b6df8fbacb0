// src/display/controller.rs
//! VideoDisplay - lifecycle controller and producer-facing entry point.
//!
//! Starts the display worker on first use, performs the init handshake, hands
//! frames over, and stops the worker on request. At most one worker is alive
//! per controller: a new one is only spawned after the previous thread exited.

use crate::config::{Config, CONFIG};
use crate::display::backend::BackendFactory;
use crate::display::error::DisplayError;
use crate::display::handoff::{self, HandoffSender};
use crate::display::messages::{DisplayState, FeedbackStatus, FrameBuffer, Size, StopReason};
use crate::display::session::{DisplaySession, QuitRequest, SessionSettings, SharedStatus};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Handle to a worker that completed its handshake.
struct WorkerLink {
    requests: HandoffSender,
    thread: JoinHandle<()>,
}

pub struct VideoDisplay<F: BackendFactory> {
    factory: Arc<F>,
    config: Config,
    shared: Arc<SharedStatus>,
    // Also serializes requests: one submission is in flight at a time.
    worker: Mutex<Option<WorkerLink>>,
}

impl<F: BackendFactory> VideoDisplay<F> {
    /// Create a controller using the global configuration.
    pub fn new(factory: F) -> Self {
        Self::with_config(factory, CONFIG.clone())
    }

    pub fn with_config(factory: F, config: Config) -> Self {
        Self {
            factory: Arc::new(factory),
            config,
            shared: Arc::new(SharedStatus::new()),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<WorkerLink>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the display worker at `width` x `height` unless one is already running.
    ///
    /// Blocks until the worker reports that its window, renderer and surface
    /// exist, or that it failed to create them.
    pub fn ensure_started(&self, width: u32, height: u32) -> Result<(), DisplayError> {
        let mut worker = self.lock_worker();
        self.start_locked(&mut worker, Size::new(width, height))
            .map(|_| ())
    }

    fn start_locked(
        &self,
        worker: &mut Option<WorkerLink>,
        size: Size,
    ) -> Result<HandoffSender, DisplayError> {
        if let Some(link) = worker.as_ref() {
            if self.shared.accepts_requests() && !link.thread.is_finished() {
                return Ok(link.requests.clone());
            }
        }

        if let Some(previous) = worker.take() {
            debug!("VideoDisplay: Waiting for previous display thread to exit");
            if previous.thread.join().is_err() {
                warn!("VideoDisplay: Previous display thread panicked");
            }
            // A panicking worker never reports Stopped itself.
            self.shared.set_abandoned();
        }

        info!("VideoDisplay: Starting display thread at {}", size);
        self.shared.begin();
        let (requests, receiver) = handoff::handoff();
        let (init_tx, init_rx) = handoff::feedback();
        let settings = SessionSettings::from_config(&self.config, size);
        let factory = Arc::clone(&self.factory);
        let shared = Arc::clone(&self.shared);

        let thread = thread::Builder::new()
            .name("video-display".to_string())
            .spawn(move || {
                DisplaySession::<F::Backend>::run(factory, settings, shared, receiver, init_tx);
            })
            .map_err(|e| {
                self.shared.set_abandoned();
                DisplayError::Spawn(e.to_string())
            })?;

        match init_rx.wait() {
            FeedbackStatus::Ok => {
                *worker = Some(WorkerLink {
                    requests: requests.clone(),
                    thread,
                });
                Ok(requests)
            }
            FeedbackStatus::Fail | FeedbackStatus::None => {
                if thread.join().is_err() {
                    warn!("VideoDisplay: Display thread panicked during initialization");
                }
                self.shared.set_abandoned();
                Err(DisplayError::InitFailed)
            }
        }
    }

    /// Ask the running worker to stop. Returns without waiting for teardown.
    pub fn stop(&self) {
        match self.shared.request_quit() {
            QuitRequest::NotRunning => {}
            QuitRequest::Flagged(waker) => {
                info!("VideoDisplay: Stop requested");
                if let Some((waker, event_type)) = waker {
                    if let Err(e) = waker.wake(event_type) {
                        warn!("VideoDisplay: Failed to post quit event: {}", e);
                    }
                }
            }
        }
    }

    /// Frame callback: display `pixels` as a `width` x `height` frame.
    ///
    /// `None` stops the display (without waiting). Otherwise the worker is
    /// started if needed and the call blocks until the frame was presented or
    /// rejected. `pixels` is not referenced after this returns.
    pub fn submit_frame(
        &self,
        pixels: Option<&[u8]>,
        width: u32,
        height: u32,
    ) -> Result<(), DisplayError> {
        match pixels {
            None => {
                self.stop();
                Ok(())
            }
            Some(pixels) => self.present(FrameBuffer::new(pixels, width, height)),
        }
    }

    /// Display one frame, starting the worker at the frame's size if needed.
    pub fn present(&self, frame: FrameBuffer<'_>) -> Result<(), DisplayError> {
        self.validate(&frame)?;

        let mut worker = self.lock_worker();
        let requests = self.start_locked(&mut worker, frame.size)?;
        let status = requests.request(frame, || self.notify_frame());
        drop(worker);

        match status {
            FeedbackStatus::Ok => Ok(()),
            FeedbackStatus::Fail | FeedbackStatus::None => Err(DisplayError::FrameFailed),
        }
    }

    fn validate(&self, frame: &FrameBuffer<'_>) -> Result<(), DisplayError> {
        if frame.size.is_empty() {
            return Err(DisplayError::EmptyFrame(frame.size));
        }
        let expected = self.config.video.pixel_format.frame_len(frame.size);
        if frame.pixels.len() < expected {
            return Err(DisplayError::InvalidFrame {
                expected,
                actual: frame.pixels.len(),
            });
        }
        Ok(())
    }

    fn notify_frame(&self) {
        if let Some((waker, event_type)) = self.shared.frame_waker() {
            if let Err(e) = waker.wake(event_type) {
                warn!("VideoDisplay: Failed to post frame event: {}", e);
            }
        }
    }

    pub fn state(&self) -> DisplayState {
        self.shared.state()
    }

    /// Size of the window and surface while the worker is running.
    pub fn current_size(&self) -> Option<Size> {
        self.shared.size()
    }

    /// Why the most recent worker stopped, set as soon as it starts stopping.
    /// `None` while one is starting or running, and before the first start.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.shared.stop_reason()
    }

    /// True when the user closed the window. A producer should end its stream
    /// then; the next frame would open a new window.
    pub fn closed_by_user(&self) -> bool {
        self.stop_reason() == Some(StopReason::Closed)
    }

    /// Block until no worker is alive. Returns false if `timeout` elapsed first.
    pub fn wait_until_stopped(&self, timeout: Duration) -> bool {
        self.shared.wait_until_stopped(timeout)
    }
}

impl<F: BackendFactory> Drop for VideoDisplay<F> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests;
