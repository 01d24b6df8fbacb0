// src/display/handoff.rs
//! Handoff channel - single-slot request/response between producer and display worker.
//!
//! A request is a borrowed frame plus a one-shot feedback slot. The requester
//! creates a fresh slot (status `None`), enqueues the request in a channel of
//! capacity 1, and blocks until the worker answers or drops the slot. A dropped
//! slot reads as `Fail`, so a worker that stops with a request still queued
//! releases its requester instead of leaving it blocked.

use crate::display::messages::{FeedbackStatus, FrameBuffer, Size};
use log::trace;
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};

/// Raw view of a producer-owned pixel buffer.
struct FrameView {
    ptr: *const u8,
    len: usize,
}

// SAFETY: the view is only dereferenced by `FrameRequest::complete`, which
// runs while the producer is blocked in `HandoffSender::request` holding the
// borrow the view was created from.
unsafe impl Send for FrameView {}

impl FrameView {
    fn new(pixels: &[u8]) -> Self {
        Self {
            ptr: pixels.as_ptr(),
            len: pixels.len(),
        }
    }
}

/// Sending half of a one-shot feedback slot.
#[derive(Debug)]
pub(crate) struct FeedbackSender {
    tx: SyncSender<FeedbackStatus>,
}

impl FeedbackSender {
    /// Answer the request. Consumes the sender, so each slot is answered at most once.
    pub(crate) fn send(self, status: FeedbackStatus) {
        debug_assert_ne!(status, FeedbackStatus::None, "feedback must carry an outcome");
        // A requester that stopped waiting is not an error for the worker.
        let _ = self.tx.send(status);
    }
}

/// Receiving half of a one-shot feedback slot.
#[derive(Debug)]
pub(crate) struct FeedbackReceiver {
    rx: Receiver<FeedbackStatus>,
    status: FeedbackStatus,
}

impl FeedbackReceiver {
    /// Current status without blocking. Stays `None` until the request is answered.
    #[cfg(test)]
    pub(crate) fn status(&mut self) -> FeedbackStatus {
        if self.status == FeedbackStatus::None {
            match self.rx.try_recv() {
                Ok(status) => self.status = status,
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => self.status = FeedbackStatus::Fail,
            }
        }
        self.status
    }

    /// Block until the request is answered.
    pub(crate) fn wait(mut self) -> FeedbackStatus {
        if self.status == FeedbackStatus::None {
            self.status = self.rx.recv().unwrap_or(FeedbackStatus::Fail);
        }
        self.status
    }
}

pub(crate) fn feedback() -> (FeedbackSender, FeedbackReceiver) {
    let (tx, rx) = mpsc::sync_channel(1);
    (
        FeedbackSender { tx },
        FeedbackReceiver {
            rx,
            status: FeedbackStatus::None,
        },
    )
}

/// A frame waiting to be displayed.
pub(crate) struct FrameRequest {
    view: FrameView,
    size: Size,
    reply: FeedbackSender,
}

impl FrameRequest {
    pub(crate) fn size(&self) -> Size {
        self.size
    }

    /// Run `handle` over the borrowed pixels, then send its outcome.
    ///
    /// The pixels cannot escape `handle`; the requester is released only after
    /// it returns.
    pub(crate) fn complete<F>(self, handle: F) -> FeedbackStatus
    where
        F: for<'p> FnOnce(&'p [u8], Size) -> FeedbackStatus,
    {
        // SAFETY: the requester is blocked on `reply` until it is sent or dropped,
        // which happens strictly after `handle` returns.
        let pixels = unsafe { std::slice::from_raw_parts(self.view.ptr, self.view.len) };
        let status = handle(pixels, self.size);
        self.reply.send(status);
        status
    }

    /// Answer `Fail` without reading the frame.
    pub(crate) fn fail(self) {
        self.reply.send(FeedbackStatus::Fail);
    }
}

/// Keeps the requester blocked until the worker let go of the frame, even
/// when the requester unwinds.
struct PendingReply {
    feedback: Option<FeedbackReceiver>,
}

impl PendingReply {
    fn wait(mut self) -> FeedbackStatus {
        self.feedback
            .take()
            .map_or(FeedbackStatus::Fail, FeedbackReceiver::wait)
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if let Some(feedback) = self.feedback.take() {
            feedback.wait();
        }
    }
}

/// Producer side of the handoff channel.
#[derive(Clone)]
pub(crate) struct HandoffSender {
    requests: SyncSender<FrameRequest>,
}

/// What the worker found when it looked at the channel.
pub(crate) enum Pending {
    Request(FrameRequest),
    Empty,
    /// Every sender is gone; no request can arrive anymore.
    Closed,
}

/// Worker side of the handoff channel.
pub(crate) struct HandoffReceiver {
    requests: Receiver<FrameRequest>,
}

pub(crate) fn handoff() -> (HandoffSender, HandoffReceiver) {
    let (requests, rx) = mpsc::sync_channel(1);
    (HandoffSender { requests }, HandoffReceiver { requests: rx })
}

impl HandoffSender {
    /// Hand `frame` to the worker and block until it reports an outcome.
    ///
    /// `notify` runs once the request is queued; it wakes the worker's event wait.
    pub(crate) fn request(&self, frame: FrameBuffer<'_>, notify: impl FnOnce()) -> FeedbackStatus {
        let (reply, feedback) = feedback();
        let request = FrameRequest {
            view: FrameView::new(frame.pixels),
            size: frame.size,
            reply,
        };
        if self.requests.send(request).is_err() {
            trace!("Handoff: worker gone, frame {} not queued", frame.size);
            return FeedbackStatus::Fail;
        }
        let pending = PendingReply {
            feedback: Some(feedback),
        };
        notify();
        pending.wait()
    }
}

impl HandoffReceiver {
    pub(crate) fn poll(&self) -> Pending {
        match self.requests.try_recv() {
            Ok(request) => Pending::Request(request),
            Err(TryRecvError::Empty) => Pending::Empty,
            Err(TryRecvError::Disconnected) => Pending::Closed,
        }
    }

    /// Answer every queued request with `Fail` and stop accepting new ones.
    ///
    /// Returns how many requests were failed.
    pub(crate) fn close(self) -> usize {
        let mut failed = 0;
        while let Ok(request) = self.requests.try_recv() {
            request.fail();
            failed += 1;
        }
        failed
    }
}
