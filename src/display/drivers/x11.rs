// src/display/drivers/x11.rs
//! Xlib display backend.
//!
//! - One window per display worker, mapped at creation
//! - BGRA frames kept in a client-side staging surface, presented via XPutImage
//! - `WM_DELETE_WINDOW` and `DestroyNotify` reported as close requests
//! - Custom events delivered as ClientMessages sent to our own window
//!
//! The wait multiplexes the X connection through an epoll `EventMonitor`, so it
//! honors the worker's timeout. `XInitThreads` is called before the display is
//! opened because wakers send events from producer threads.

use crate::display::backend::{BackendFactory, DisplayBackend, EventLoopWaker};
use crate::display::error::DisplayError;
use crate::display::messages::{NativeEvent, PixelFormat, Size};
use crate::os::epoll::{EpollFlags, EventMonitor};
use log::{debug, info, trace, warn};
use std::ffi::CString;
use std::mem;
use std::os::raw::{c_char, c_int, c_long, c_uint};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use x11::xlib;

const X_CONNECTION_TOKEN: u64 = 1;
const CUSTOM_EVENT_BASE: u32 = 0x8000;
const BYTES_PER_PIXEL: usize = 4;

/// Opens a connection to the X server named by `DISPLAY`.
#[derive(Debug, Clone, Copy, Default)]
pub struct X11Factory;

impl BackendFactory for X11Factory {
    type Backend = X11Backend;

    fn open(&self) -> Result<X11Backend, DisplayError> {
        X11Backend::open()
    }
}

struct WakerTarget {
    display: *mut xlib::Display,
    window: xlib::Window,
    atom: xlib::Atom,
}

/// Posts ClientMessage events to the display window.
///
/// Starts without a target; `wake()` is a no-op until `set_target()` and
/// after `clear_target()`.
#[derive(Clone, Default)]
struct X11Waker {
    target: Arc<Mutex<Option<WakerTarget>>>,
}

// SAFETY: XInitThreads() is called before the display is opened, which makes
// Xlib calls on the shared display pointer thread-safe. The target is cleared
// under the mutex before the window and display are destroyed.
unsafe impl Send for X11Waker {}
unsafe impl Sync for X11Waker {}

impl X11Waker {
    fn lock(&self) -> MutexGuard<'_, Option<WakerTarget>> {
        self.target.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_target(&self, display: *mut xlib::Display, window: xlib::Window, atom: xlib::Atom) {
        *self.lock() = Some(WakerTarget {
            display,
            window,
            atom,
        });
    }

    fn clear_target(&self) {
        *self.lock() = None;
    }
}

impl EventLoopWaker for X11Waker {
    fn wake(&self, event_type: u32) -> Result<(), DisplayError> {
        let guard = self.lock();
        let Some(target) = guard.as_ref() else {
            return Ok(());
        };
        unsafe {
            let mut event: xlib::XClientMessageEvent = mem::zeroed();
            event.type_ = xlib::ClientMessage;
            event.window = target.window;
            event.message_type = target.atom;
            event.format = 32;
            event.data.set_long(0, event_type as c_long);

            let mut event = xlib::XEvent::from(event);
            let status = xlib::XSendEvent(
                target.display,
                target.window,
                xlib::False,
                xlib::NoEventMask,
                &mut event,
            );
            xlib::XFlush(target.display);
            if status == 0 {
                return Err(DisplayError::EventWait(
                    "XSendEvent could not convert the wake event".to_string(),
                ));
            }
        }
        Ok(())
    }
}

pub struct X11Backend {
    display: *mut xlib::Display,
    screen: c_int,
    wm_delete_window: xlib::Atom,
    custom_atom: xlib::Atom,
    monitor: EventMonitor,
    waker: X11Waker,
    next_custom: u32,
}

pub struct X11Window {
    id: xlib::Window,
}

pub struct X11Renderer {
    window: xlib::Window,
    gc: xlib::GC,
    visual: *mut xlib::Visual,
    depth: c_uint,
}

pub struct X11Surface {
    size: Size,
    pixels: Box<[u8]>,
}

impl X11Backend {
    fn open() -> Result<Self, DisplayError> {
        info!("X11Backend: Connecting to X server");
        unsafe {
            if xlib::XInitThreads() == 0 {
                return Err(DisplayError::BackendInit("XInitThreads failed".to_string()));
            }

            let display = xlib::XOpenDisplay(ptr::null());
            if display.is_null() {
                return Err(DisplayError::BackendInit(
                    "Failed to open X11 display. Is DISPLAY set?".to_string(),
                ));
            }

            let screen = xlib::XDefaultScreen(display);
            let wm_delete_window =
                xlib::XInternAtom(display, c"WM_DELETE_WINDOW".as_ptr(), xlib::False);
            let custom_atom =
                xlib::XInternAtom(display, c"VIDEO_DISPLAY_EVENT".as_ptr(), xlib::False);

            let connection = xlib::XConnectionNumber(display);
            let monitor = match EventMonitor::new()
                .and_then(|monitor| {
                    monitor.add(connection, X_CONNECTION_TOKEN, EpollFlags::EPOLLIN)?;
                    Ok(monitor)
                }) {
                Ok(monitor) => monitor,
                Err(e) => {
                    xlib::XCloseDisplay(display);
                    return Err(DisplayError::BackendInit(format!("{:#}", e)));
                }
            };

            Ok(Self {
                display,
                screen,
                wm_delete_window,
                custom_atom,
                monitor,
                waker: X11Waker::default(),
                next_custom: 0,
            })
        }
    }

    /// Pop the next queued X event we care about, without blocking.
    fn next_queued(&mut self) -> Option<NativeEvent> {
        unsafe {
            while xlib::XPending(self.display) > 0 {
                let mut event: xlib::XEvent = mem::zeroed();
                xlib::XNextEvent(self.display, &mut event);
                match self.translate(&event) {
                    NativeEvent::Other => continue,
                    translated => return Some(translated),
                }
            }
        }
        None
    }

    fn translate(&self, event: &xlib::XEvent) -> NativeEvent {
        match event.get_type() {
            xlib::ClientMessage => {
                let message = unsafe { event.client_message };
                let first = message.data.get_long(0);
                if message.message_type == self.custom_atom {
                    NativeEvent::Custom(first as u32)
                } else if first as xlib::Atom == self.wm_delete_window {
                    NativeEvent::CloseRequested
                } else {
                    NativeEvent::Other
                }
            }
            xlib::Expose => {
                // Only the last event of an expose series triggers a redraw.
                if unsafe { event.expose }.count == 0 {
                    NativeEvent::Expose
                } else {
                    NativeEvent::Other
                }
            }
            xlib::DestroyNotify => NativeEvent::CloseRequested,
            _ => NativeEvent::Other,
        }
    }
}

impl DisplayBackend for X11Backend {
    type Window = X11Window;
    type Renderer = X11Renderer;
    type Surface = X11Surface;

    fn create_window(
        &mut self,
        title: &str,
        centered: bool,
        size: Size,
    ) -> Result<X11Window, DisplayError> {
        let title = CString::new(title)
            .map_err(|e| DisplayError::BackendInit(format!("Invalid window title: {}", e)))?;
        unsafe {
            let root = xlib::XRootWindow(self.display, self.screen);
            let (x, y) = if centered {
                let screen_w = xlib::XDisplayWidth(self.display, self.screen);
                let screen_h = xlib::XDisplayHeight(self.display, self.screen);
                (
                    ((screen_w - size.width as c_int) / 2).max(0),
                    ((screen_h - size.height as c_int) / 2).max(0),
                )
            } else {
                (0, 0)
            };
            let black = xlib::XBlackPixel(self.display, self.screen);

            let id = xlib::XCreateSimpleWindow(
                self.display,
                root,
                x,
                y,
                size.width,
                size.height,
                0,
                black,
                black,
            );
            if id == 0 {
                return Err(DisplayError::BackendInit("Failed to create X11 window".to_string()));
            }

            xlib::XStoreName(self.display, id, title.as_ptr());
            xlib::XSelectInput(
                self.display,
                id,
                xlib::ExposureMask | xlib::StructureNotifyMask,
            );
            let mut protocols = [self.wm_delete_window];
            xlib::XSetWMProtocols(self.display, id, protocols.as_mut_ptr(), 1);

            xlib::XMapWindow(self.display, id);
            xlib::XFlush(self.display);

            info!("X11Backend: Created window {} at ({}, {}) size {}", id, x, y, size);
            Ok(X11Window { id })
        }
    }

    fn resize_window(&mut self, window: &mut X11Window, size: Size) -> Result<(), DisplayError> {
        debug!("X11Backend: Resizing window {} to {}", window.id, size);
        unsafe {
            xlib::XResizeWindow(self.display, window.id, size.width, size.height);
            xlib::XFlush(self.display);
        }
        Ok(())
    }

    fn create_renderer(&mut self, window: &X11Window) -> Result<X11Renderer, DisplayError> {
        unsafe {
            let depth = xlib::XDefaultDepth(self.display, self.screen);
            if depth != 24 && depth != 32 {
                return Err(DisplayError::BackendInit(format!(
                    "Unsupported visual depth {}",
                    depth
                )));
            }
            let gc = xlib::XCreateGC(self.display, window.id, 0, ptr::null_mut());
            if gc.is_null() {
                return Err(DisplayError::BackendInit("XCreateGC failed".to_string()));
            }
            Ok(X11Renderer {
                window: window.id,
                gc,
                visual: xlib::XDefaultVisual(self.display, self.screen),
                depth: depth as c_uint,
            })
        }
    }

    fn create_surface(
        &mut self,
        _renderer: &X11Renderer,
        format: PixelFormat,
        size: Size,
    ) -> Result<X11Surface, DisplayError> {
        if format != PixelFormat::Bgra8888 {
            return Err(DisplayError::UnsupportedFormat(format));
        }
        Ok(X11Surface {
            size,
            pixels: vec![0u8; format.frame_len(size)].into_boxed_slice(),
        })
    }

    fn update_surface(
        &mut self,
        surface: &mut X11Surface,
        pixels: &[u8],
        row_stride: usize,
    ) -> Result<(), DisplayError> {
        let row_len = surface.size.width as usize * BYTES_PER_PIXEL;
        let rows = surface.size.height as usize;
        if rows == 0 {
            return Ok(());
        }
        let needed = row_stride * (rows - 1) + row_len;
        if row_stride < row_len || pixels.len() < needed {
            return Err(DisplayError::Surface(format!(
                "upload of {} bytes (stride {}) does not fit {} surface",
                pixels.len(),
                row_stride,
                surface.size
            )));
        }
        for (row, dst) in surface.pixels.chunks_exact_mut(row_len).enumerate() {
            let start = row * row_stride;
            dst.copy_from_slice(&pixels[start..start + row_len]);
        }
        Ok(())
    }

    fn render(&mut self, renderer: &mut X11Renderer, surface: &X11Surface) {
        trace!("X11Backend: Presenting {} frame", surface.size);
        unsafe {
            // The image covers the whole window, so drawing it also clears it.
            let image = xlib::XCreateImage(
                self.display,
                renderer.visual,
                renderer.depth,
                xlib::ZPixmap,
                0,
                surface.pixels.as_ptr() as *mut c_char,
                surface.size.width,
                surface.size.height,
                32,
                0,
            );
            if image.is_null() {
                warn!("X11Backend: XCreateImage failed, frame not presented");
                return;
            }

            xlib::XPutImage(
                self.display,
                renderer.window,
                renderer.gc,
                image,
                0,
                0,
                0,
                0,
                surface.size.width,
                surface.size.height,
            );

            // The pixels belong to the surface; keep XDestroyImage from freeing them.
            (*image).data = ptr::null_mut();
            xlib::XDestroyImage(image);
            xlib::XFlush(self.display);
        }
    }

    fn register_custom_events(&mut self, count: u32) -> Result<u32, DisplayError> {
        let base = CUSTOM_EVENT_BASE
            .checked_add(self.next_custom)
            .ok_or_else(|| DisplayError::BackendInit("custom event ids exhausted".to_string()))?;
        self.next_custom += count;
        Ok(base)
    }

    fn create_waker(
        &mut self,
        window: &X11Window,
    ) -> Result<Arc<dyn EventLoopWaker>, DisplayError> {
        self.waker
            .set_target(self.display, window.id, self.custom_atom);
        Ok(Arc::new(self.waker.clone()))
    }

    /// Drain Xlib's queue, else block on the X connection for up to `timeout`.
    ///
    /// A waker's `XSendEvent`/`XFlush` on another thread may read incoming
    /// events into Xlib's queue between the drain and the epoll wait. Those
    /// events are only seen when the wait returns, so their delay is bounded
    /// by `timeout` (`performance.event_wait_timeout_ms`).
    fn wait_for_event(&mut self, timeout: Duration) -> Result<NativeEvent, DisplayError> {
        // Events already read into Xlib's queue do not make the socket readable.
        if let Some(event) = self.next_queued() {
            return Ok(event);
        }

        let ready = self
            .monitor
            .wait(timeout)
            .map_err(|e| DisplayError::EventWait(format!("{:#}", e)))?;
        if ready
            .iter()
            .any(|r| r.flags.intersects(EpollFlags::EPOLLERR | EpollFlags::EPOLLHUP))
        {
            return Err(DisplayError::EventWait("X server connection lost".to_string()));
        }

        Ok(self.next_queued().unwrap_or(NativeEvent::Timeout))
    }

    fn destroy_surface(&mut self, surface: X11Surface) {
        debug!("X11Backend: Releasing {} surface", surface.size);
    }

    fn destroy_renderer(&mut self, renderer: X11Renderer) {
        unsafe {
            xlib::XFreeGC(self.display, renderer.gc);
        }
    }

    fn destroy_window(&mut self, window: X11Window) {
        self.waker.clear_target();
        unsafe {
            xlib::XDestroyWindow(self.display, window.id);
            xlib::XFlush(self.display);
        }
        info!("X11Backend: Destroyed window {}", window.id);
    }
}

impl Drop for X11Backend {
    fn drop(&mut self) {
        self.waker.clear_target();
        unsafe {
            xlib::XCloseDisplay(self.display);
        }
        info!("X11Backend: Connection closed");
    }
}
