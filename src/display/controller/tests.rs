// src/display/controller/tests.rs
//! Tests for VideoDisplay against the headless backend.

use super::*;
use crate::config::{Config, PerformanceConfig, VideoConfig, WindowConfig};
use crate::display::drivers::headless::{
    BackendCall, Faults, HeadlessControl, HeadlessFactory, LiveResources,
};
use crate::display::messages::{PixelFormat, StopReason};
use std::time::Instant;
use test_log::test;

const SETTLE: Duration = Duration::from_secs(5);

fn test_config() -> Config {
    Config {
        window: WindowConfig {
            title: "Test video".to_string(),
            centered: false,
        },
        video: VideoConfig {
            pixel_format: PixelFormat::Bgra8888,
        },
        // Long enough that the worker only wakes up on events.
        performance: PerformanceConfig {
            event_wait_timeout_ms: 10_000,
        },
    }
}

fn display() -> (VideoDisplay<HeadlessFactory>, HeadlessControl) {
    let control = HeadlessControl::new();
    let display = VideoDisplay::with_config(HeadlessFactory::new(control.clone()), test_config());
    (display, control)
}

fn frame(width: u32, height: u32, fill: u8) -> Vec<u8> {
    vec![fill; (width * height * 4) as usize]
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + SETTLE;
    while !condition() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    true
}

fn is_open(call: &BackendCall) -> bool {
    matches!(call, BackendCall::Open)
}

fn is_resize(call: &BackendCall) -> bool {
    matches!(call, BackendCall::ResizeWindow { .. })
}

// --- Startup ---

#[test]
fn first_frame_starts_the_display_and_is_uploaded() {
    let (display, control) = display();
    assert_eq!(display.state(), DisplayState::Uninitialized);

    let pixels = frame(4, 3, 0x5a);
    display.submit_frame(Some(&pixels), 4, 3).unwrap();

    assert_eq!(display.state(), DisplayState::Running);
    assert_eq!(display.current_size(), Some(Size::new(4, 3)));
    assert_eq!(control.last_upload(), Some(pixels));
    assert_eq!(control.count_calls(is_open), 1);
    assert!(control.calls().contains(&BackendCall::CreateWindow {
        title: "Test video".to_string(),
        size: Size::new(4, 3),
    }));
    assert!(control.count_calls(|c| matches!(c, BackendCall::Render { .. })) >= 1);
}

#[test]
fn ensure_started_creates_resources_at_the_requested_size() {
    let (display, control) = display();
    display.ensure_started(8, 6).unwrap();

    assert_eq!(display.state(), DisplayState::Running);
    assert_eq!(display.current_size(), Some(Size::new(8, 6)));
    assert_eq!(
        control.live(),
        LiveResources {
            backends: 1,
            windows: 1,
            renderers: 1,
            surfaces: 1,
        }
    );

    // Already running: no second worker.
    display.ensure_started(8, 6).unwrap();
    assert_eq!(control.count_calls(is_open), 1);
}

#[test]
fn renderer_failure_reports_init_failed_and_releases_the_window() {
    let (display, control) = display();
    control.set_faults(Faults {
        create_renderer: true,
        ..Faults::default()
    });

    let pixels = frame(4, 4, 1);
    assert_eq!(
        display.submit_frame(Some(&pixels), 4, 4),
        Err(DisplayError::InitFailed)
    );
    assert_eq!(display.state(), DisplayState::Stopped);
    assert!(control.live().is_empty());
    assert_eq!(control.count_calls(|c| *c == BackendCall::DestroyWindow), 1);
}

#[test]
fn backend_open_failure_reports_init_failed() {
    let (display, control) = display();
    control.set_faults(Faults {
        open: true,
        ..Faults::default()
    });

    assert_eq!(display.ensure_started(4, 4), Err(DisplayError::InitFailed));
    assert_eq!(display.state(), DisplayState::Stopped);
    assert_eq!(
        control.count_calls(|c| matches!(c, BackendCall::CreateWindow { .. })),
        0
    );
    assert!(control.live().is_empty());
}

#[test]
fn surface_failure_at_startup_releases_renderer_and_window() {
    let (display, control) = display();
    control.set_faults(Faults {
        create_surface_at: Some(Size::new(4, 4)),
        ..Faults::default()
    });

    assert_eq!(display.ensure_started(4, 4), Err(DisplayError::InitFailed));
    assert!(control.live().is_empty());
    assert_eq!(control.count_calls(|c| *c == BackendCall::DestroyRenderer), 1);
    assert_eq!(control.count_calls(|c| *c == BackendCall::DestroyWindow), 1);
}

#[test]
fn display_starts_after_an_earlier_init_failure() {
    let (display, control) = display();
    control.set_faults(Faults {
        register_events: true,
        ..Faults::default()
    });
    assert_eq!(display.ensure_started(4, 4), Err(DisplayError::InitFailed));

    control.set_faults(Faults::default());
    let pixels = frame(4, 4, 2);
    display.submit_frame(Some(&pixels), 4, 4).unwrap();
    assert_eq!(display.state(), DisplayState::Running);
    assert_eq!(control.count_calls(is_open), 2);
    assert_eq!(control.max_concurrent_backends(), 1);
}

// --- Frames ---

#[test]
fn frame_of_the_same_size_does_not_resize() {
    let (display, control) = display();
    let pixels = frame(4, 4, 3);
    display.submit_frame(Some(&pixels), 4, 4).unwrap();
    display.submit_frame(Some(&pixels), 4, 4).unwrap();

    assert_eq!(control.count_calls(is_resize), 0);
    assert_eq!(
        control.count_calls(|c| matches!(c, BackendCall::CreateSurface { .. })),
        1
    );
}

#[test]
fn frame_of_a_new_size_resizes_window_and_swaps_surface() {
    let (display, control) = display();
    display.submit_frame(Some(&frame(4, 4, 1)), 4, 4).unwrap();

    let larger = frame(8, 6, 9);
    display.submit_frame(Some(&larger), 8, 6).unwrap();

    assert_eq!(display.current_size(), Some(Size::new(8, 6)));
    assert_eq!(control.last_upload(), Some(larger));
    assert_eq!(control.live().surfaces, 1);

    let calls = control.calls();
    let resize = calls
        .iter()
        .position(|c| *c == BackendCall::ResizeWindow { size: Size::new(8, 6) })
        .unwrap();
    let create = calls
        .iter()
        .position(|c| matches!(c, BackendCall::CreateSurface { id: 1, .. }))
        .unwrap();
    let destroy = calls
        .iter()
        .position(|c| *c == BackendCall::DestroySurface { id: 0 })
        .unwrap();
    assert!(resize < create && create < destroy);
}

#[test]
fn failed_resize_fails_the_frame_and_stops_the_display() {
    let (display, control) = display();
    control.set_faults(Faults {
        create_surface_at: Some(Size::new(8, 8)),
        ..Faults::default()
    });
    display.submit_frame(Some(&frame(4, 4, 1)), 4, 4).unwrap();

    assert_eq!(
        display.submit_frame(Some(&frame(8, 8, 1)), 8, 8),
        Err(DisplayError::FrameFailed)
    );
    assert!(display.wait_until_stopped(SETTLE));
    assert_eq!(control.count_calls(is_resize), 1);
    assert!(control.live().is_empty());
}

#[test]
fn upload_failure_still_presents_then_stops_the_display() {
    let (display, control) = display();
    display.ensure_started(4, 4).unwrap();
    control.set_faults(Faults {
        update_surface: true,
        ..Faults::default()
    });

    assert_eq!(
        display.submit_frame(Some(&frame(4, 4, 7)), 4, 4),
        Err(DisplayError::FrameFailed)
    );
    assert!(display.wait_until_stopped(SETTLE));
    assert!(control.live().is_empty());

    let calls = control.calls();
    let upload = calls
        .iter()
        .position(|c| matches!(c, BackendCall::UpdateSurface { .. }))
        .unwrap();
    assert!(matches!(calls[upload + 1], BackendCall::Render { .. }));

    // The next frame brings the display back.
    control.set_faults(Faults::default());
    display.submit_frame(Some(&frame(4, 4, 8)), 4, 4).unwrap();
    assert_eq!(display.state(), DisplayState::Running);
    assert_eq!(control.count_calls(is_open), 2);
}

#[test]
fn short_buffer_is_rejected_without_starting_the_display() {
    let (display, control) = display();
    let pixels = vec![0u8; 10];

    assert_eq!(
        display.submit_frame(Some(&pixels), 4, 4),
        Err(DisplayError::InvalidFrame {
            expected: 64,
            actual: 10,
        })
    );
    assert_eq!(display.state(), DisplayState::Uninitialized);
    assert!(control.calls().is_empty());
}

#[test]
fn empty_frame_is_rejected() {
    let (display, _control) = display();
    assert_eq!(
        display.submit_frame(Some(&[][..]), 0, 4),
        Err(DisplayError::EmptyFrame(Size::new(0, 4)))
    );
}

// --- Stopping ---

#[test]
fn none_frame_stops_and_releases_each_resource_once() {
    let (display, control) = display();
    display.submit_frame(Some(&frame(4, 4, 1)), 4, 4).unwrap();

    display.submit_frame(None, 0, 0).unwrap();
    assert!(display.wait_until_stopped(SETTLE));
    assert_eq!(display.state(), DisplayState::Stopped);
    assert_eq!(display.current_size(), None);
    assert!(control.live().is_empty());

    assert_eq!(
        control.count_calls(|c| matches!(c, BackendCall::DestroySurface { .. })),
        1
    );
    assert_eq!(control.count_calls(|c| *c == BackendCall::DestroyRenderer), 1);
    assert_eq!(control.count_calls(|c| *c == BackendCall::DestroyWindow), 1);
}

#[test]
fn stop_reports_quit_as_the_stop_reason() {
    let (display, _control) = display();
    assert_eq!(display.stop_reason(), None);
    display.ensure_started(4, 4).unwrap();

    display.stop();
    assert!(display.wait_until_stopped(SETTLE));
    assert_eq!(display.stop_reason(), Some(StopReason::Quit));
    assert!(!display.closed_by_user());
}

#[test]
fn failures_report_fault_as_the_stop_reason() {
    let (display, control) = display();
    control.set_faults(Faults {
        create_window: true,
        ..Faults::default()
    });
    assert_eq!(display.ensure_started(4, 4), Err(DisplayError::InitFailed));
    assert_eq!(display.stop_reason(), Some(StopReason::Fault));

    control.set_faults(Faults::default());
    display.ensure_started(4, 4).unwrap();
    control.set_faults(Faults {
        update_surface: true,
        ..Faults::default()
    });
    assert_eq!(
        display.submit_frame(Some(&frame(4, 4, 1)), 4, 4),
        Err(DisplayError::FrameFailed)
    );
    assert!(display.wait_until_stopped(SETTLE));
    assert_eq!(display.stop_reason(), Some(StopReason::Fault));
}

#[test]
fn stopped_is_reported_only_after_the_backend_is_closed() {
    let (display, control) = display();
    for n in 0..50u8 {
        display.submit_frame(Some(&frame(4, 4, n)), 4, 4).unwrap();
        display.stop();
        assert!(display.wait_until_stopped(SETTLE));
        assert!(control.live().is_empty(), "cycle {}: {:?}", n, control.live());
    }
    assert_eq!(control.max_concurrent_backends(), 1);
}

#[test]
fn frame_queued_before_stop_is_still_displayed() {
    let (display, control) = display();
    display.ensure_started(4, 4).unwrap();
    assert!(control.wait_until_idle(SETTLE));

    // Park the worker so the frame and the stop both arrive before it wakes.
    control.hold_events();
    let pixels = frame(4, 4, 0x42);
    std::thread::scope(|scope| {
        let producer = scope.spawn(|| display.submit_frame(Some(&pixels), 4, 4));
        assert!(wait_for(|| control.pending_events() == 1));

        display.stop();
        assert_eq!(control.pending_events(), 2);
        control.release_events();

        assert_eq!(producer.join().unwrap(), Ok(()));
    });

    assert!(display.wait_until_stopped(SETTLE));
    assert_eq!(control.last_upload(), Some(pixels));
    assert_eq!(display.stop_reason(), Some(StopReason::Quit));
}

#[test]
fn expose_presents_the_current_frame_again() {
    let (display, control) = display();
    display.submit_frame(Some(&frame(4, 4, 1)), 4, 4).unwrap();
    assert!(control.wait_until_idle(SETTLE));
    control.clear_calls();

    control.expose();
    assert!(wait_for(|| {
        control.count_calls(|c| matches!(c, BackendCall::Render { .. })) == 1
    }));
    assert_eq!(
        control.count_calls(|c| matches!(c, BackendCall::UpdateSurface { .. })),
        0
    );
    assert_eq!(display.state(), DisplayState::Running);
}

#[test]
fn stop_without_a_display_does_nothing() {
    let (display, control) = display();
    display.stop();
    display.stop();
    assert_eq!(display.state(), DisplayState::Uninitialized);
    assert!(control.calls().is_empty());
}

#[test]
fn frame_after_stop_starts_a_fresh_display() {
    let (display, control) = display();
    display.submit_frame(Some(&frame(4, 4, 1)), 4, 4).unwrap();
    display.stop();

    display.submit_frame(Some(&frame(4, 4, 2)), 4, 4).unwrap();
    assert_eq!(display.state(), DisplayState::Running);
    assert_eq!(control.count_calls(is_open), 2);
    assert_eq!(control.max_concurrent_backends(), 1);
}

#[test]
fn closing_the_window_while_idle_stops_the_display() {
    let (display, control) = display();
    display.submit_frame(Some(&frame(4, 4, 1)), 4, 4).unwrap();
    assert!(control.wait_until_idle(SETTLE));

    control.close_window();
    assert!(display.wait_until_stopped(SETTLE));
    assert!(control.live().is_empty());
    assert!(display.closed_by_user());
    assert_eq!(display.stop_reason(), Some(StopReason::Closed));

    // A producer that keeps going gets a new window.
    display.submit_frame(Some(&frame(4, 4, 2)), 4, 4).unwrap();
    assert_eq!(display.state(), DisplayState::Running);
    assert_eq!(display.stop_reason(), None);
    assert!(!display.closed_by_user());
    assert_eq!(control.max_concurrent_backends(), 1);
}

#[test]
fn closing_the_window_with_a_frame_in_flight_fails_that_frame() {
    let (display, control) = display();
    display.submit_frame(Some(&frame(4, 4, 1)), 4, 4).unwrap();
    assert!(control.wait_until_idle(SETTLE));

    // The close request is handled before the frame event behind it.
    control.close_on_next_wake();
    assert_eq!(
        display.submit_frame(Some(&frame(4, 4, 2)), 4, 4),
        Err(DisplayError::FrameFailed)
    );
    // Known by the time the failed frame returns.
    assert!(display.closed_by_user());

    assert!(display.wait_until_stopped(SETTLE));
    assert!(control.live().is_empty());
    assert_eq!(
        control.count_calls(|c| matches!(c, BackendCall::UpdateSurface { .. })),
        1
    );
}

#[test]
fn event_wait_error_stops_the_display() {
    let (display, control) = display();
    display.ensure_started(4, 4).unwrap();
    assert!(control.wait_until_idle(SETTLE));

    control.set_faults(Faults {
        wait: true,
        ..Faults::default()
    });
    assert!(display.wait_until_stopped(SETTLE));
    assert!(control.live().is_empty());
}

#[test]
fn dropping_the_controller_stops_the_display() {
    let (display, control) = display();
    display.submit_frame(Some(&frame(4, 4, 1)), 4, 4).unwrap();

    drop(display);
    assert!(wait_for(|| control.live().is_empty()));
}

// --- Concurrency ---

#[test]
fn concurrent_producers_share_one_display() {
    let (display, control) = display();
    let display = Arc::new(display);

    let producers: Vec<_> = (0..4u8)
        .map(|n| {
            let display = Arc::clone(&display);
            std::thread::spawn(move || {
                let pixels = frame(4, 4, n);
                for _ in 0..10 {
                    display.submit_frame(Some(&pixels), 4, 4).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert_eq!(control.count_calls(is_open), 1);
    assert_eq!(control.max_concurrent_backends(), 1);
    assert_eq!(
        control.count_calls(|c| matches!(c, BackendCall::UpdateSurface { .. })),
        40
    );
}
