//! V4L2 capture session: device lifecycle, format negotiation, and the
//! dequeue/requeue cycle over memory-mapped kernel buffers.

use std::mem;
use std::os::raw::c_void;
use std::os::unix::io::RawFd;

use log::{debug, info, warn};
use v4l::capability::Flags;
use v4l::v4l2;
use v4l::v4l_sys::{
    v4l2_buffer, v4l2_capability, v4l2_captureparm, v4l2_control, v4l2_format, v4l2_fract,
    v4l2_pix_format, v4l2_queryctrl, v4l2_streamparm,
};

use crate::config::{CameraConfig, CheckoutPolicy, SUPPORTED_FORMATS};
use crate::pool::{BufferPool, BUF_TYPE, MEMORY_MMAP};
use crate::traits::{Capabilities, CameraError, CameraSession, FourCC, FrameView, Result};

// v4l2_field / v4l2_colorspace values pushed with the format request.
const FIELD_NONE: u32 = 1;
const COLORSPACE_JPEG: u32 = 7;

// UVC timestamp-source control: V4L2_CID_USER_BASE + 0x1029.
const CID_TIMESTAMP_SOURCE: u32 = 0x0098_0900 + 0x1029;
const TIMESTAMP_SRC_SOE: i32 = 1;

/// A capture session over one V4L2 device node.
///
/// Exclusively owns the file descriptor and the mapped buffer ring; dropping
/// the session tears both down unconditionally. Drive it from one thread at
/// a time.
pub struct V4L2Camera {
    config: CameraConfig,
    fd: RawFd,
    configured: bool,
    checked_out: Option<u32>,
    pool: BufferPool,
    caps: Capabilities,
}

impl V4L2Camera {
    /// Create a closed session for `config`. No device I/O happens until
    /// [`CameraSession::open`].
    #[must_use]
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            fd: -1,
            configured: false,
            checked_out: None,
            pool: BufferPool::new(),
            caps: Capabilities::default(),
        }
    }

    /// Best-effort switch of the driver's timestamp source to
    /// start-of-exposure.
    ///
    /// UVC-class cameras expose the timestamp source as a user control; most
    /// other drivers do not. Returns whether the switch took effect. Never
    /// fails the session; call between open and configure.
    pub fn try_soe(&mut self) -> bool {
        let mut query = v4l2_queryctrl {
            id: CID_TIMESTAMP_SOURCE,
            ..unsafe { mem::zeroed() }
        };
        if unsafe {
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_QUERYCTRL,
                &mut query as *mut _ as *mut c_void,
            )
        }
        .is_err()
        {
            debug!("timestamp-source control not available");
            return false;
        }

        let mut ctrl = v4l2_control {
            id: CID_TIMESTAMP_SOURCE,
            value: TIMESTAMP_SRC_SOE,
        };
        let switched = unsafe {
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_S_CTRL,
                &mut ctrl as *mut _ as *mut c_void,
            )
        }
        .is_ok();
        if switched {
            info!("timestamp source set to start-of-exposure");
        }
        switched
    }

    /// Unconditional teardown: unmap every buffer, close the descriptor if
    /// open, reset all session fields to their closed state. Never fails;
    /// safe from any lifecycle point, including after a partial configure.
    fn cleanup(&mut self) {
        self.pool.unmap_all();
        if self.fd >= 0 {
            let _ = v4l2::close(self.fd);
        }
        self.fd = -1;
        self.configured = false;
        self.checked_out = None;
    }
}

impl CameraSession for V4L2Camera {
    fn open(&mut self) -> Result<()> {
        if self.fd >= 0 {
            return Ok(());
        }

        let fd = v4l2::open(&self.config.device_path, libc::O_RDWR).map_err(|source| {
            if source.raw_os_error() == Some(libc::EBUSY) {
                warn!("device {} is busy", self.config.device_path);
            }
            CameraError::OpenFailure {
                path: self.config.device_path.clone(),
                source,
            }
        })?;
        self.fd = fd;

        // A failure past this point closes the descriptor again, so a failed
        // open always leaves the session in its closed state.
        let mut cap: v4l2_capability = unsafe { mem::zeroed() };
        if let Err(source) = unsafe {
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_QUERYCAP,
                &mut cap as *mut _ as *mut c_void,
            )
        } {
            self.cleanup();
            return Err(CameraError::IoctlFailure {
                op: "VIDIOC_QUERYCAP",
                source,
            });
        }

        let flags = Flags::from_bits_truncate(cap.capabilities);
        if !flags.contains(Flags::VIDEO_CAPTURE) {
            self.cleanup();
            return Err(CameraError::CapabilityMismatch("video capture"));
        }
        if !flags.contains(Flags::STREAMING) {
            self.cleanup();
            return Err(CameraError::CapabilityMismatch("streaming I/O"));
        }

        self.caps = Capabilities {
            driver: nul_trimmed(&cap.driver),
            card: nul_trimmed(&cap.card),
        };
        debug!(
            "opened {}: driver={} card={}",
            self.config.device_path, self.caps.driver, self.caps.card
        );
        Ok(())
    }

    fn configure(&mut self) -> Result<()> {
        if self.fd < 0 || self.configured {
            return Ok(());
        }

        let requested = self.config.format;
        if !SUPPORTED_FORMATS.contains(&requested) {
            return Err(CameraError::UnsupportedFormat(requested));
        }

        // The kernel reads the whole struct; zero it before filling the
        // active union arm.
        let mut fmt = v4l2_format {
            type_: BUF_TYPE,
            ..unsafe { mem::zeroed() }
        };
        fmt.fmt.pix = v4l2_pix_format {
            width: self.config.dimensions.width(),
            height: self.config.dimensions.height(),
            pixelformat: requested.code(),
            field: FIELD_NONE,
            colorspace: COLORSPACE_JPEG,
            ..unsafe { mem::zeroed() }
        };
        unsafe {
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_S_FMT,
                &mut fmt as *mut _ as *mut c_void,
            )
        }
        .map_err(|source| {
            if source.raw_os_error() == Some(libc::EBUSY) {
                warn!("device {} is busy", self.config.device_path);
            }
            CameraError::IoctlFailure {
                op: "VIDIOC_S_FMT",
                source,
            }
        })?;

        let negotiated = FourCC::from_code(unsafe { fmt.fmt.pix.pixelformat });
        if negotiated != requested {
            return Err(CameraError::FormatNegotiationFailure {
                requested,
                actual: negotiated,
            });
        }
        info!("negotiated pixel format {negotiated}");

        let mut check = v4l2_format {
            type_: BUF_TYPE,
            ..unsafe { mem::zeroed() }
        };
        unsafe {
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_G_FMT,
                &mut check as *mut _ as *mut c_void,
            )
        }
        .map_err(|source| CameraError::IoctlFailure {
            op: "VIDIOC_G_FMT",
            source,
        })?;

        let readback = FourCC::from_code(unsafe { check.fmt.pix.pixelformat });
        if readback != requested {
            return Err(CameraError::FormatNegotiationFailure {
                requested,
                actual: readback,
            });
        }

        let mut parm = v4l2_streamparm {
            type_: BUF_TYPE,
            ..unsafe { mem::zeroed() }
        };
        parm.parm.capture = v4l2_captureparm {
            timeperframe: v4l2_fract {
                numerator: 1,
                denominator: self.config.frame_rate.as_u32(),
            },
            ..unsafe { mem::zeroed() }
        };
        unsafe {
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_S_PARM,
                &mut parm as *mut _ as *mut c_void,
            )
        }
        .map_err(|source| CameraError::IoctlFailure {
            op: "VIDIOC_S_PARM",
            source,
        })?;

        let granted = self.pool.allocate(self.fd, self.config.buffer_count)?;
        self.pool.enqueue_all(self.fd)?;

        self.configured = true;
        debug!(
            "configured {}: {granted} buffers mapped and queued",
            self.config.device_path
        );
        Ok(())
    }

    fn start_streaming(&mut self) -> Result<()> {
        let mut kind = BUF_TYPE;
        unsafe {
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_STREAMON,
                &mut kind as *mut _ as *mut c_void,
            )
        }
        .map_err(|source| CameraError::IoctlFailure {
            op: "VIDIOC_STREAMON",
            source,
        })
    }

    fn capture_frame(&mut self) -> Result<FrameView<'_>> {
        if self.checked_out.is_some() && self.config.checkout_policy == CheckoutPolicy::Strict {
            return Err(CameraError::BufferCheckedOut);
        }

        let mut buf = v4l2_buffer {
            type_: BUF_TYPE,
            memory: MEMORY_MMAP,
            ..unsafe { mem::zeroed() }
        };
        // Blocks until the driver completes a buffer; the session's only
        // suspension point.
        unsafe {
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_DQBUF,
                &mut buf as *mut _ as *mut c_void,
            )
        }
        .map_err(|source| CameraError::IoctlFailure {
            op: "VIDIOC_DQBUF",
            source,
        })?;
        let monotonic_timestamp_us = monotonic_micros();

        let index = buf.index;
        #[allow(clippy::cast_possible_truncation)]
        let count = self.pool.len() as u32;
        let Some(mapped) = self.pool.get(index) else {
            return Err(CameraError::InvalidBufferIndex { index, count });
        };

        if let Some(leaked) = self.checked_out.replace(index) {
            warn!("buffer {leaked} was still checked out; its return path is lost until teardown");
        }

        #[allow(clippy::cast_sign_loss)]
        let driver_timestamp_us = fold_micros(
            buf.timestamp.tv_sec.max(0) as u64,
            buf.timestamp.tv_usec.max(0) as u64,
        );

        Ok(FrameView {
            data: mapped.bytes(buf.bytesused as usize),
            width: self.config.dimensions.width(),
            height: self.config.dimensions.height(),
            format: self.config.format,
            driver_timestamp_us,
            monotonic_timestamp_us,
        })
    }

    fn release_frame(&mut self) -> Result<()> {
        let Some(index) = self.checked_out else {
            warn!("release_frame called with no frame checked out");
            return Ok(());
        };
        self.pool.enqueue(self.fd, index)?;
        self.checked_out = None;
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<()> {
        let mut kind = BUF_TYPE;
        unsafe {
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_STREAMOFF,
                &mut kind as *mut _ as *mut c_void,
            )
        }
        .map_err(|source| CameraError::IoctlFailure {
            op: "VIDIOC_STREAMOFF",
            source,
        })
    }

    fn has_valid_frame(&self) -> bool {
        self.checked_out.is_some()
    }

    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    fn mapped_buffer_count(&self) -> usize {
        self.pool.len()
    }
}

impl Drop for V4L2Camera {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Driver identity strings arrive as fixed-size NUL-padded byte arrays.
fn nul_trimmed(raw: &[u8]) -> String {
    let prefix = raw.split(|&b| b == 0).next().unwrap_or(&[]);
    String::from_utf8_lossy(prefix).into_owned()
}

/// Host monotonic clock in microseconds.
fn monotonic_micros() -> u64 {
    let mut ts: libc::timespec = unsafe { mem::zeroed() };
    // Safe because `ts` is a valid out-parameter for the duration of the
    // call.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return 0;
    }
    #[allow(clippy::cast_sign_loss)]
    {
        fold_micros(ts.tv_sec.max(0) as u64, ts.tv_nsec.max(0) as u64 / 1_000)
    }
}

/// Folds whole seconds and sub-second microseconds into one microsecond
/// count, saturating on overflow. Driver clocks are not trusted to stay in
/// range.
fn fold_micros(sec: u64, micros: u64) -> u64 {
    sec.saturating_mul(1_000_000).saturating_add(micros)
}
