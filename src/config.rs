//! Capture session configuration: packed dimensions, frame rate, buffer
//! count, and checkout policy.

use crate::traits::FourCC;

/// Pixel formats the negotiator accepts. Anything else is rejected before
/// any device I/O happens.
pub const SUPPORTED_FORMATS: [FourCC; 2] = [FourCC::MJPG, FourCC::YUYV];

/// Fewest kernel buffers a caller should request.
pub const MIN_BUFFERS: u32 = 2;

/// Most kernel buffers a caller should request.
pub const MAX_BUFFERS: u32 = 32;

/// Frame dimensions packed into one value: width in the high 16 bits,
/// height in the low 16.
///
/// Building from `u16` halves keeps each axis within the packing's
/// structural cap of 65535 pixels per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions(u32);

impl Dimensions {
    /// 1280x720.
    pub const HD: Self = Self::new(1280, 720);
    /// 1920x1080.
    pub const FHD: Self = Self::new(1920, 1080);
    /// 2048x1080.
    pub const DCI_2K: Self = Self::new(2048, 1080);
    /// 3840x2160.
    pub const UHD_4K: Self = Self::new(3840, 2160);

    /// Pack a width/height pair.
    #[must_use]
    pub const fn new(width: u16, height: u16) -> Self {
        Self(((width as u32) << 16) | height as u32)
    }

    /// Wrap an already-packed value.
    #[must_use]
    pub const fn from_packed(packed: u32) -> Self {
        Self(packed)
    }

    /// The packed representation.
    #[must_use]
    pub const fn packed(self) -> u32 {
        self.0
    }

    /// Frame width in pixels.
    #[must_use]
    pub const fn width(self) -> u32 {
        self.0 >> 16
    }

    /// Frame height in pixels.
    #[must_use]
    pub const fn height(self) -> u32 {
        self.0 & 0xFFFF
    }

    /// Pixels per frame.
    #[must_use]
    pub const fn pixel_count(self) -> u32 {
        self.width() * self.height()
    }
}

/// Frame rates supported across the target camera set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FrameRate {
    /// 15 frames per second.
    Fps15 = 15,
    /// 30 frames per second.
    Fps30 = 30,
    /// 60 frames per second.
    Fps60 = 60,
}

impl FrameRate {
    /// Frames per second as a plain integer.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

/// What `capture_frame` does when a frame is already checked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckoutPolicy {
    /// Fail the second capture fast, leaving the existing checkout intact.
    #[default]
    Strict,
    /// Replace the tracked index. The previous buffer's return path is lost
    /// until teardown; only callers depending on the historical behavior
    /// should opt in.
    Overwrite,
}

/// Capture session configuration.
///
/// Treated as immutable once handed to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraConfig {
    /// Device node path, e.g. `/dev/video0`.
    pub device_path: String,
    /// Requested frame dimensions.
    pub dimensions: Dimensions,
    /// Requested pixel format; must be one of [`SUPPORTED_FORMATS`].
    pub format: FourCC,
    /// Requested frame rate.
    pub frame_rate: FrameRate,
    /// Kernel buffers to request, expected within
    /// `MIN_BUFFERS..=MAX_BUFFERS`. The driver has the final say on the
    /// granted count.
    pub buffer_count: u32,
    /// Double-capture handling.
    pub checkout_policy: CheckoutPolicy,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_path: String::from("/dev/video0"),
            dimensions: Dimensions::UHD_4K,
            format: FourCC::MJPG,
            frame_rate: FrameRate::Fps30,
            buffer_count: 4,
            checkout_policy: CheckoutPolicy::default(),
        }
    }
}
