// src/main.rs

//! Demo producer: pushes a moving test pattern through the display, switches
//! resolution halfway, then stops.
//!
//! Uses the X11 backend when built with `--features x11`, otherwise the
//! headless backend.

use anyhow::Context;
use log::{info, warn};
use std::time::{Duration, Instant};
use video_display::display::BackendFactory;
use video_display::{PixelFormat, Size, VideoDisplay, CONFIG};

const FRAMES_PER_SIZE: u32 = 90;
const FRAME_INTERVAL: Duration = Duration::from_millis(33);
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Fill `pixels` with a BGRA gradient that scrolls with `tick`.
fn paint_bgra(pixels: &mut [u8], size: Size, tick: u32) {
    let width = size.width as usize;
    for (i, px) in pixels.chunks_exact_mut(4).enumerate() {
        let x = (i % width) as u32;
        let y = (i / width) as u32;
        px[0] = (x.wrapping_add(tick) & 0xff) as u8;
        px[1] = (y.wrapping_add(tick / 2) & 0xff) as u8;
        px[2] = ((x ^ y) & 0xff) as u8;
        px[3] = 0xff;
    }
}

/// Fill `pixels` with an I420 frame: luma gradient, flat chroma.
fn paint_iyuv(pixels: &mut [u8], size: Size, tick: u32) {
    let width = size.width as usize;
    let luma_len = width * size.height as usize;
    let (luma, chroma) = pixels.split_at_mut(luma_len);
    for (i, y) in luma.iter_mut().enumerate() {
        *y = (((i % width) as u32).wrapping_add(tick) & 0xff) as u8;
    }
    chroma.fill(0x80);
}

fn run<F: BackendFactory>(factory: F) -> anyhow::Result<()> {
    let display = VideoDisplay::new(factory);
    let format = display.config().video.pixel_format;
    info!("Demo: Producing {:?} frames", format);

    let mut tick = 0u32;
    for size in [Size::new(640, 480), Size::new(1280, 720)] {
        let mut pixels = vec![0u8; format.frame_len(size)];
        for _ in 0..FRAMES_PER_SIZE {
            let started = Instant::now();
            match format {
                PixelFormat::Bgra8888 => paint_bgra(&mut pixels, size, tick),
                PixelFormat::Iyuv => paint_iyuv(&mut pixels, size, tick),
            }
            let shown = display.submit_frame(Some(&pixels), size.width, size.height);
            if shown.is_err() && display.closed_by_user() {
                info!("Demo: Window closed, ending the stream");
                return Ok(());
            }
            shown.with_context(|| format!("Failed to display {} frame {}", size, tick))?;
            tick += 1;
            if let Some(rest) = FRAME_INTERVAL.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
        info!("Demo: Displayed {} frames at {}", FRAMES_PER_SIZE, size);
    }

    display
        .submit_frame(None, 0, 0)
        .context("Failed to stop the display")?;
    if !display.wait_until_stopped(STOP_TIMEOUT) {
        warn!("Demo: Display thread still running after {:?}", STOP_TIMEOUT);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    info!("Starting video-display demo...");
    info!("Window title: '{}'", CONFIG.window.title);

    #[cfg(all(feature = "x11", target_os = "linux"))]
    let result = run(video_display::display::drivers::X11Factory);
    #[cfg(not(all(feature = "x11", target_os = "linux")))]
    let result = run(video_display::display::drivers::HeadlessFactory::default());

    result?;
    info!("video-display demo exited cleanly.");
    Ok(())
}
