//! Mock session implementation for testing without hardware.

use std::collections::VecDeque;

use crate::config::{CameraConfig, CheckoutPolicy, SUPPORTED_FORMATS};
use crate::traits::{Capabilities, CameraError, CameraSession, FourCC, FrameView, Result};

/// The modeled driver grants at most this many buffers per request.
pub const DRIVER_BUFFER_CAP: u32 = 8;

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// Mock capture session driving the full lifecycle in memory.
///
/// Mirrors the driver-facing state machine: an in-memory buffer ring, a
/// simulated driver queue, and a device-I/O counter tests use to prove that
/// configure touches the device exactly once.
pub struct MockCamera {
    config: CameraConfig,
    caps: Capabilities,
    opened: bool,
    configured: bool,
    streaming: bool,
    checked_out: Option<u32>,
    buffers: Vec<Vec<u8>>,
    queued: VecDeque<u32>,
    pattern: TestPattern,
    frame_count: u32,
    device_io_calls: u32,
}

impl MockCamera {
    /// Create a closed mock session for `config`.
    #[must_use]
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            caps: Capabilities::default(),
            opened: false,
            configured: false,
            streaming: false,
            checked_out: None,
            buffers: Vec::new(),
            queued: VecDeque::new(),
            pattern: TestPattern::ColorBars,
            frame_count: 0,
            device_io_calls: 0,
        }
    }

    /// Use `pattern` for generated frames.
    #[must_use]
    pub fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Number of simulated device-I/O batches issued so far.
    #[must_use]
    pub const fn device_io_calls(&self) -> u32 {
        self.device_io_calls
    }

    /// Buffers currently sitting in the simulated driver queue.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    /// Push an arbitrary index to the front of the simulated driver queue.
    ///
    /// Models a misbehaving driver handing back an index outside the pool.
    pub fn inject_queued_index(&mut self, index: u32) {
        self.queued.push_front(index);
    }
}

impl CameraSession for MockCamera {
    fn open(&mut self) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.opened = true;
        self.caps = Capabilities {
            driver: "mock".to_owned(),
            card: "Mock Camera".to_owned(),
        };
        self.device_io_calls += 1;
        Ok(())
    }

    fn configure(&mut self) -> Result<()> {
        if !self.opened || self.configured {
            return Ok(());
        }

        let requested = self.config.format;
        if !SUPPORTED_FORMATS.contains(&requested) {
            return Err(CameraError::UnsupportedFormat(requested));
        }
        self.device_io_calls += 1;

        // As with a real REQBUFS, the granted count wins over the request.
        let granted = self.config.buffer_count.min(DRIVER_BUFFER_CAP);
        let frame_bytes = self.config.dimensions.pixel_count() as usize * 2;
        self.buffers = (0..granted).map(|_| vec![0u8; frame_bytes]).collect();
        self.queued = (0..granted).collect();
        self.configured = true;
        Ok(())
    }

    fn start_streaming(&mut self) -> Result<()> {
        if !self.configured {
            return Err(CameraError::IoctlFailure {
                op: "VIDIOC_STREAMON",
                source: std::io::Error::from_raw_os_error(libc::EINVAL),
            });
        }
        self.streaming = true;
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<FrameView<'_>> {
        if !self.streaming {
            return Err(CameraError::IoctlFailure {
                op: "VIDIOC_DQBUF",
                source: std::io::Error::from_raw_os_error(libc::EINVAL),
            });
        }
        if self.checked_out.is_some() && self.config.checkout_policy == CheckoutPolicy::Strict {
            return Err(CameraError::BufferCheckedOut);
        }

        let Some(index) = self.queued.pop_front() else {
            // A real driver would block forever here; the mock fails instead
            // so tests cannot hang.
            return Err(CameraError::IoctlFailure {
                op: "VIDIOC_DQBUF",
                source: std::io::Error::from_raw_os_error(libc::EAGAIN),
            });
        };

        #[allow(clippy::cast_possible_truncation)]
        let count = self.buffers.len() as u32;
        let pattern = self.pattern;
        let width = self.config.dimensions.width();
        let height = self.config.dimensions.height();
        let format = self.config.format;
        let interval_us = 1_000_000 / u64::from(self.config.frame_rate.as_u32());

        let Some(buffer) = self.buffers.get_mut(index as usize) else {
            return Err(CameraError::InvalidBufferIndex { index, count });
        };
        fill_pattern(buffer, width, height, pattern);
        // Compressed formats report fewer valid bytes than the buffer holds.
        let bytes_used = if format == FourCC::MJPG {
            buffer.len() / 2
        } else {
            buffer.len()
        };

        // Under the overwrite policy a previous checkout is simply replaced;
        // that buffer is gone from the queue and never requeued.
        self.checked_out = Some(index);
        let seq = self.frame_count;
        self.frame_count += 1;

        let driver_timestamp_us = u64::from(seq) * interval_us;

        Ok(FrameView {
            data: &buffer[..bytes_used],
            width,
            height,
            format,
            driver_timestamp_us,
            monotonic_timestamp_us: driver_timestamp_us + 500,
        })
    }

    fn release_frame(&mut self) -> Result<()> {
        let Some(index) = self.checked_out else {
            return Ok(());
        };
        self.queued.push_back(index);
        self.checked_out = None;
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<()> {
        // Mirrors a tolerant driver: stopping an idle stream succeeds.
        self.streaming = false;
        Ok(())
    }

    fn has_valid_frame(&self) -> bool {
        self.checked_out.is_some()
    }

    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    fn mapped_buffer_count(&self) -> usize {
        self.buffers.len()
    }
}

/// Fill `data` with the YUYV rendition of `pattern`.
fn fill_pattern(data: &mut [u8], width: u32, height: u32, pattern: TestPattern) {
    match pattern {
        TestPattern::ColorBars => generate_color_bars(data, width, height),
        TestPattern::Gradient => generate_gradient(data, width, height),
        TestPattern::Solid(y, u, v) => generate_solid(data, y, u, v),
    }
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    // 8 color bars: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    // YUYV values for each bar
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128), // White
        (210, 16, 146),  // Yellow
        (170, 166, 16),  // Cyan
        (145, 54, 34),   // Green
        (106, 202, 222), // Magenta
        (81, 90, 240),   // Red
        (41, 240, 110),  // Blue
        (16, 128, 128),  // Black
    ];

    let bar_width = width / 8;

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let bar_idx = (x / bar_width).min(7) as usize;
            let (y_val, u_val, v_val) = bars[bar_idx];

            let offset = ((y * width + x) * 2) as usize;
            if offset + 3 < data.len() {
                data[offset] = y_val; // Y0
                data[offset + 1] = u_val; // U
                data[offset + 2] = y_val; // Y1
                data[offset + 3] = v_val; // V
            }
        }
    }
}

/// Generate YUYV horizontal gradient pattern.
fn generate_gradient(data: &mut [u8], width: u32, height: u32) {
    for y in 0..height {
        for x in (0..width).step_by(2) {
            #[allow(clippy::cast_possible_truncation)]
            let y_val = ((x * 255) / width) as u8;
            let offset = ((y * width + x) * 2) as usize;

            if offset + 3 < data.len() {
                data[offset] = y_val; // Y0
                data[offset + 1] = 128; // U (neutral)
                data[offset + 2] = y_val; // Y1
                data[offset + 3] = 128; // V (neutral)
            }
        }
    }
}

/// Generate solid color YUYV frame.
fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for i in (0..data.len()).step_by(4) {
        if i + 3 < data.len() {
            data[i] = y; // Y0
            data[i + 1] = u; // U
            data[i + 2] = y; // Y1
            data[i + 3] = v; // V
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Dimensions, FrameRate, MAX_BUFFERS};

    fn test_config() -> CameraConfig {
        CameraConfig {
            device_path: String::from("/dev/mock0"),
            dimensions: Dimensions::new(640, 480),
            format: FourCC::YUYV,
            frame_rate: FrameRate::Fps30,
            buffer_count: 4,
            checkout_policy: CheckoutPolicy::Strict,
        }
    }

    fn streaming_camera(config: CameraConfig) -> MockCamera {
        let mut camera = MockCamera::new(config);
        camera.open().expect("mock open");
        camera.configure().expect("mock configure");
        camera.start_streaming().expect("mock stream start");
        camera
    }

    #[test]
    fn test_open_is_idempotent() {
        let mut camera = MockCamera::new(test_config());
        camera.open().expect("first open");
        let io_after_first = camera.device_io_calls();

        camera.open().expect("second open");
        assert_eq!(camera.device_io_calls(), io_after_first);
        assert_eq!(camera.capabilities().driver, "mock");
    }

    #[test]
    fn test_configure_is_idempotent() {
        let mut camera = MockCamera::new(test_config());
        camera.open().expect("open");
        camera.configure().expect("first configure");
        let io_after_first = camera.device_io_calls();
        let mapped = camera.mapped_buffer_count();
        let queued = camera.queued_count();

        camera.configure().expect("second configure");
        assert_eq!(camera.device_io_calls(), io_after_first);
        assert_eq!(camera.mapped_buffer_count(), mapped);
        assert_eq!(camera.queued_count(), queued);
    }

    #[test]
    fn test_configure_primes_every_buffer() {
        let mut camera = MockCamera::new(test_config());
        camera.open().expect("open");
        camera.configure().expect("configure");
        assert_eq!(camera.mapped_buffer_count(), 4);
        assert_eq!(camera.queued_count(), 4);
        assert!(!camera.has_valid_frame());
    }

    #[test]
    fn test_granted_buffer_count_wins_over_request() {
        let mut camera = MockCamera::new(CameraConfig {
            buffer_count: MAX_BUFFERS,
            ..test_config()
        });
        camera.open().expect("open");
        camera.configure().expect("configure");

        let granted = DRIVER_BUFFER_CAP as usize;
        assert_eq!(camera.mapped_buffer_count(), granted);
        assert_eq!(camera.queued_count(), granted);

        // The session cycles over the pool it was actually granted.
        camera.start_streaming().expect("start");
        for _ in 0..granted + 2 {
            let frame = camera.capture_frame().expect("capture");
            assert!(!frame.data.is_empty());
            drop(frame);
            camera.release_frame().expect("release");
        }
        assert_eq!(camera.queued_count(), granted);
    }

    #[test]
    fn test_unsupported_format_rejected_before_io() {
        let mut camera = MockCamera::new(CameraConfig {
            format: FourCC::RGB3,
            ..test_config()
        });
        camera.open().expect("open");
        let io_after_open = camera.device_io_calls();

        let err = camera
            .configure()
            .expect_err("RGB3 is outside the supported set");
        assert!(matches!(err, CameraError::UnsupportedFormat(FourCC::RGB3)));
        assert_eq!(camera.device_io_calls(), io_after_open);
        assert_eq!(camera.mapped_buffer_count(), 0);
        assert_eq!(camera.queued_count(), 0);
    }

    #[test]
    fn test_release_without_capture_is_noop() {
        let mut camera = streaming_camera(test_config());
        camera
            .release_frame()
            .expect("release with no checkout is a no-op");
        assert!(!camera.has_valid_frame());
        assert_eq!(camera.queued_count(), 4);
    }

    #[test]
    fn test_capture_before_start_fails() {
        let mut camera = MockCamera::new(test_config());
        camera.open().expect("open");
        camera.configure().expect("configure");
        let err = camera
            .capture_frame()
            .expect_err("dequeue needs a running stream");
        assert!(matches!(
            err,
            CameraError::IoctlFailure {
                op: "VIDIOC_DQBUF",
                ..
            }
        ));
    }

    #[test]
    fn test_capture_and_release_cycle() {
        let mut camera = streaming_camera(test_config());

        let frame = camera.capture_frame().expect("capture");
        assert_eq!(frame.width, 640);
        assert_eq!(frame.height, 480);
        assert_eq!(frame.format, FourCC::YUYV);
        assert_eq!(frame.data.len(), 640 * 480 * 2);
        drop(frame);

        assert!(camera.has_valid_frame());
        assert_eq!(camera.queued_count(), 3);

        camera.release_frame().expect("release");
        assert!(!camera.has_valid_frame());
        assert_eq!(camera.queued_count(), 4);
    }

    #[test]
    fn test_frame_length_tracks_bytes_used() {
        let mut camera = streaming_camera(CameraConfig {
            format: FourCC::MJPG,
            ..test_config()
        });
        let capacity = 640 * 480 * 2;

        let frame = camera.capture_frame().expect("capture");
        assert_eq!(frame.data.len(), capacity / 2);
        assert!(frame.data.len() <= capacity);
        assert_eq!(frame.format, FourCC::MJPG);
    }

    #[test]
    fn test_out_of_range_driver_index_is_rejected() {
        let mut camera = streaming_camera(test_config());
        camera.inject_queued_index(99);

        let err = camera
            .capture_frame()
            .expect_err("an index outside the pool must be rejected");
        assert!(matches!(
            err,
            CameraError::InvalidBufferIndex { index: 99, count: 4 }
        ));
        // The rejection leaves the checkout slot empty; valid indices still
        // cycle afterwards.
        assert!(!camera.has_valid_frame());
        let frame = camera.capture_frame().expect("next queued index is valid");
        assert!(!frame.data.is_empty());
    }

    #[test]
    fn test_strict_policy_fails_second_capture() {
        let mut camera = streaming_camera(test_config());
        let first = camera.capture_frame().expect("first capture");
        drop(first);

        let err = camera
            .capture_frame()
            .expect_err("second capture must fail fast");
        assert!(matches!(err, CameraError::BufferCheckedOut));
        // The original checkout and the queue are untouched.
        assert!(camera.has_valid_frame());
        assert_eq!(camera.queued_count(), 3);

        camera.release_frame().expect("release still works");
        assert_eq!(camera.queued_count(), 4);
    }

    #[test]
    fn test_overwrite_policy_leaks_first_buffer() {
        let mut camera = streaming_camera(CameraConfig {
            checkout_policy: CheckoutPolicy::Overwrite,
            ..test_config()
        });

        let first = camera.capture_frame().expect("first capture");
        drop(first);
        let second = camera.capture_frame().expect("second capture overwrites");
        drop(second);

        // Two buffers left the queue; only the tracked one can come back.
        assert!(camera.has_valid_frame());
        assert_eq!(camera.queued_count(), 2);

        camera.release_frame().expect("release the tracked buffer");
        assert!(!camera.has_valid_frame());
        // The first buffer is never requeued.
        assert_eq!(camera.queued_count(), 3);
    }

    #[test]
    fn test_full_cycle_hd_mjpg() {
        let mut camera = MockCamera::new(CameraConfig {
            device_path: String::from("/dev/mock0"),
            dimensions: Dimensions::new(1280, 720),
            format: FourCC::MJPG,
            frame_rate: FrameRate::Fps30,
            buffer_count: 2,
            checkout_policy: CheckoutPolicy::Strict,
        });
        camera.open().expect("open");
        camera.configure().expect("configure");
        assert_eq!(camera.mapped_buffer_count(), 2);
        camera.start_streaming().expect("start");

        let frame = camera.capture_frame().expect("capture");
        assert_eq!(frame.width, 1280);
        assert_eq!(frame.height, 720);
        assert_eq!(frame.format, FourCC::MJPG);
        assert!(!frame.data.is_empty());
        drop(frame);

        camera.release_frame().expect("release");
        camera.stop_streaming().expect("stop");
        drop(camera);
    }

    #[test]
    fn test_stop_without_start_is_passed_through() {
        let mut camera = MockCamera::new(test_config());
        camera.open().expect("open");
        camera.configure().expect("configure");
        camera
            .stop_streaming()
            .expect("a tolerant driver stops an idle stream without error");
    }

    #[test]
    fn test_driver_timestamps_advance_by_frame_interval() {
        let mut camera = streaming_camera(test_config());
        let first_ts = camera.capture_frame().expect("first").driver_timestamp_us;
        camera.release_frame().expect("release");
        let second_ts = camera.capture_frame().expect("second").driver_timestamp_us;
        assert_eq!(second_ts - first_ts, 1_000_000 / 30);
    }

    #[test]
    fn test_color_bars_pattern() {
        let mut data = vec![0u8; 640 * 480 * 2];
        fill_pattern(&mut data, 640, 480, TestPattern::ColorBars);
        // First bar should be white (Y=235)
        assert_eq!(data[0], 235);
    }

    #[test]
    fn test_gradient_pattern() {
        let mut data = vec![0u8; 640 * 480 * 2];
        fill_pattern(&mut data, 640, 480, TestPattern::Gradient);
        // Left edge dark, right edge bright
        assert!(data[0] < 10);
        let last_row_start = 479 * 640 * 2;
        assert!(data[last_row_start + 638 * 2] > 200);
    }

    #[test]
    fn test_solid_pattern() {
        let mut data = vec![0u8; 64 * 64 * 2];
        fill_pattern(&mut data, 64, 64, TestPattern::Solid(128, 64, 192));
        assert_eq!(data[0], 128);
        assert_eq!(data[1], 64);
        assert_eq!(data[2], 128);
        assert_eq!(data[3], 192);
    }
}
