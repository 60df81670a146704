//! Capture demo binary exercising a full streaming session.

use v4l2_session::config::{CameraConfig, Dimensions, FrameRate};
use v4l2_session::device::V4L2Camera;
use v4l2_session::traits::{CameraSession, FourCC};
use v4l2_session::validation::{validate_frame_size, DEFAULT_MAX_FRAME_BYTES};

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> v4l2_session::traits::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let device_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| String::from("/dev/video0"));

    let config = CameraConfig {
        device_path,
        dimensions: Dimensions::HD,
        format: FourCC::YUYV,
        frame_rate: FrameRate::Fps30,
        ..CameraConfig::default()
    };

    let mut camera = V4L2Camera::new(config);
    camera.open()?;

    println!("Device: {}", camera.capabilities().card);
    println!("Driver: {}", camera.capabilities().driver);

    if camera.try_soe() {
        println!("Timestamps: start-of-exposure");
    } else {
        println!("Timestamps: end-of-frame");
    }

    camera.configure()?;
    println!("Buffers: {} mapped", camera.mapped_buffer_count());

    camera.start_streaming()?;

    for _ in 0..10 {
        let frame = camera.capture_frame()?;
        if let Err(err) = validate_frame_size(&frame, DEFAULT_MAX_FRAME_BYTES) {
            eprintln!("Warning: {err}");
        }
        println!(
            "Frame: {} bytes, driver {} us, monotonic {} us, offset {} us",
            frame.data.len(),
            frame.driver_timestamp_us,
            frame.monotonic_timestamp_us,
            frame
                .monotonic_timestamp_us
                .saturating_sub(frame.driver_timestamp_us)
        );
        camera.release_frame()?;
    }

    camera.stop_streaming()?;
    Ok(())
}
