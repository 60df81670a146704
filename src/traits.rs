//! Core types and the session trait for V4L2 capture.

/// Four-character pixel/container format code (e.g. YUYV, MJPG).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");

    /// The V4L2 wire value: the four ASCII bytes packed little-endian.
    #[must_use]
    pub const fn code(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// Rebuild from a V4L2 wire value.
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        Self(code.to_le_bytes())
    }
}

impl std::fmt::Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &byte in &self.0 {
            let ch = if byte.is_ascii_graphic() {
                char::from(byte)
            } else {
                '.'
            };
            write!(f, "{ch}")?;
        }
        Ok(())
    }
}

/// Driver identity reported by the device at open.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
}

/// A borrowed view over one captured frame.
///
/// The slice points directly into the kernel-mapped buffer that produced the
/// frame, sized to the driver-reported used-byte count. The borrow keeps the
/// session frozen until the view is dropped, so frame data can never be read
/// after the backing buffer has been requeued or unmapped.
#[derive(Debug)]
pub struct FrameView<'a> {
    /// Valid captured bytes, no copy.
    pub data: &'a [u8],
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format of the data.
    pub format: FourCC,
    /// Driver-reported capture time in microseconds (driver clock).
    pub driver_timestamp_us: u64,
    /// Host `CLOCK_MONOTONIC` in microseconds, sampled right after the
    /// dequeue returned. A different clock domain from the driver's; the
    /// two are reported side by side, never reconciled.
    pub monotonic_timestamp_us: u64,
}

/// Error type for camera session operations.
#[derive(Debug)]
pub enum CameraError {
    /// Opening the device node failed.
    OpenFailure {
        /// Path that was opened.
        path: String,
        /// Underlying OS error.
        source: std::io::Error,
    },
    /// The device lacks a required capability; the payload names it.
    CapabilityMismatch(&'static str),
    /// Requested fourcc is not in the supported set; no device I/O was done.
    UnsupportedFormat(FourCC),
    /// The driver substituted a different format than requested, or the
    /// format read-back disagreed with what was just set.
    FormatNegotiationFailure {
        /// Format that was requested.
        requested: FourCC,
        /// Format the driver settled on.
        actual: FourCC,
    },
    /// A kernel call was rejected.
    IoctlFailure {
        /// Name of the failing operation.
        op: &'static str,
        /// Underlying OS error.
        source: std::io::Error,
    },
    /// Memory-mapping a kernel buffer failed during configuration.
    MappingFailure {
        /// Buffer index that failed to map.
        index: u32,
        /// Underlying OS error.
        source: std::io::Error,
    },
    /// Dequeue returned an index outside the allocated pool; treated as a
    /// driver-integrity violation.
    InvalidBufferIndex {
        /// Index the driver reported.
        index: u32,
        /// Number of buffers in the pool.
        count: u32,
    },
    /// A frame is already checked out and the session enforces a single
    /// outstanding buffer.
    BufferCheckedOut,
}

impl CameraError {
    /// Whether the underlying OS failure was `EBUSY` (device already in use).
    #[must_use]
    pub fn is_device_busy(&self) -> bool {
        match self {
            Self::OpenFailure { source, .. } | Self::IoctlFailure { source, .. } => {
                source.raw_os_error() == Some(libc::EBUSY)
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for CameraError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenFailure { path, source } => {
                write!(f, "failed to open {path}: {source}")
            }
            Self::CapabilityMismatch(what) => {
                write!(f, "device does not support {what}")
            }
            Self::UnsupportedFormat(fourcc) => {
                write!(f, "unsupported pixel format {fourcc} (0x{:08X})", fourcc.code())
            }
            Self::FormatNegotiationFailure { requested, actual } => {
                write!(f, "driver negotiated {actual} instead of {requested}")
            }
            Self::IoctlFailure { op, source } => {
                write!(f, "{op} failed: {source}")
            }
            Self::MappingFailure { index, source } => {
                write!(f, "mmap failed for buffer {index}: {source}")
            }
            Self::InvalidBufferIndex { index, count } => {
                write!(f, "driver returned buffer index {index} outside pool of {count}")
            }
            Self::BufferCheckedOut => {
                write!(f, "a frame is already checked out; release it before capturing again")
            }
        }
    }
}

impl std::error::Error for CameraError {}

/// Result type for camera session operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Abstraction over the capture session lifecycle.
///
/// `V4L2Camera` implements it against real hardware; the test mock
/// implements it in memory. Callers sequence
/// open → configure → `start_streaming` → {capture/release}* →
/// `stop_streaming`, then drop the session.
pub trait CameraSession {
    /// Open the device node and verify capture + streaming capability.
    fn open(&mut self) -> Result<()>;

    /// Negotiate format and frame interval, then build and prime the buffer
    /// ring. A no-op when the session is unopened or already configured.
    fn configure(&mut self) -> Result<()>;

    /// Start the capture stream.
    fn start_streaming(&mut self) -> Result<()>;

    /// Block until the driver completes a buffer, check it out, and return
    /// a view over its valid bytes.
    fn capture_frame(&mut self) -> Result<FrameView<'_>>;

    /// Requeue the checked-out buffer. A logged no-op when nothing is
    /// checked out.
    fn release_frame(&mut self) -> Result<()>;

    /// Stop the capture stream. Passed to the driver even if streaming was
    /// never started; the driver's verdict is surfaced unmodified.
    fn stop_streaming(&mut self) -> Result<()>;

    /// Whether a buffer is currently checked out.
    fn has_valid_frame(&self) -> bool;

    /// Driver/card identity captured at open.
    fn capabilities(&self) -> &Capabilities;

    /// Number of kernel buffers currently mapped.
    fn mapped_buffer_count(&self) -> usize;
}
