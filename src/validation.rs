//! Frame validation utilities for test pattern verification.
//!
//! Checks operate directly on packed YUYV payloads, so captured frames can be
//! verified without a color-space conversion step. Also provides the size and
//! timestamp sanity checks used by the demo binary and the integration tests.

use crate::traits::FrameView;

/// Expected YUV values for SMPTE color bars (8 bars).
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
const SMPTE_BAR_YUV: [(u8, u8, u8); 8] = [
    (235, 128, 128), // White
    (210, 16, 146),  // Yellow
    (170, 166, 16),  // Cyan
    (145, 54, 34),   // Green
    (106, 202, 222), // Magenta
    (81, 90, 240),   // Red
    (41, 240, 110),  // Blue
    (16, 128, 128),  // Black
];

/// Tolerance for per-component matching (accounts for generator rounding).
const COMPONENT_TOLERANCE: u8 = 15;

/// Upper bound applied to frame payloads when callers have no tighter limit.
///
/// Large enough for uncompressed 4K YUYV, small enough to catch a corrupt
/// `bytesused` from a misbehaving driver.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Errors produced by the validation checks in this module.
#[derive(Debug)]
pub enum ValidationError {
    /// The frame carried no payload bytes.
    EmptyFrame,
    /// The frame payload exceeds the given ceiling.
    OversizedFrame {
        /// Actual payload length in bytes.
        len: usize,
        /// The ceiling that was exceeded.
        max: usize,
    },
    /// There were no samples to validate.
    EmptySequence,
    /// A timestamp went backwards relative to its predecessor.
    NonMonotonicTimestamp {
        /// Position of the offending sample.
        index: usize,
    },
    /// Sampled pixels did not match the expected pattern.
    PatternMismatch(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyFrame => write!(f, "frame contains no payload bytes"),
            Self::OversizedFrame { len, max } => {
                write!(f, "frame payload of {len} bytes exceeds the {max}-byte ceiling")
            }
            Self::EmptySequence => write!(f, "cannot validate an empty timestamp sequence"),
            Self::NonMonotonicTimestamp { index } => {
                write!(f, "timestamp at index {index} went backwards")
            }
            Self::PatternMismatch(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validates that a frame payload is non-empty and within `max_bytes`.
///
/// # Errors
///
/// Returns `EmptyFrame` for a zero-length payload and `OversizedFrame` when
/// the payload exceeds `max_bytes`.
pub fn validate_frame_size(frame: &FrameView<'_>, max_bytes: usize) -> Result<(), ValidationError> {
    if frame.data.is_empty() {
        return Err(ValidationError::EmptyFrame);
    }
    if frame.data.len() > max_bytes {
        return Err(ValidationError::OversizedFrame {
            len: frame.data.len(),
            max: max_bytes,
        });
    }
    Ok(())
}

/// Validates that a timestamp sequence never goes backwards.
///
/// Equal neighbors are accepted; drivers may complete two buffers within the
/// same microsecond.
///
/// # Errors
///
/// Returns `EmptySequence` when there is nothing to check and
/// `NonMonotonicTimestamp` naming the first sample that regressed.
pub fn validate_timestamps_monotonic(timestamps: &[u64]) -> Result<(), ValidationError> {
    if timestamps.is_empty() {
        return Err(ValidationError::EmptySequence);
    }

    for (index, pair) in timestamps.windows(2).enumerate() {
        if let [prev, curr] = pair {
            if curr < prev {
                return Err(ValidationError::NonMonotonicTimestamp { index: index + 1 });
            }
        }
    }

    Ok(())
}

/// Validates that a YUYV frame contains the SMPTE color bar pattern.
///
/// Samples the center of each of the 8 vertical stripes on the middle row and
/// compares the Y, U and V components against the expected bar values within
/// a tolerance.
///
/// # Errors
///
/// Returns `PatternMismatch` when a sampled bar is off or the frame is too
/// small to sample.
pub fn validate_color_bars(frame: &FrameView<'_>) -> Result<(), ValidationError> {
    let width = frame.width;
    let bar_width = width / 8;
    let center_y = frame.height / 2;

    if bar_width == 0 {
        return Err(ValidationError::PatternMismatch(format!(
            "frame width {width} is too narrow for eight bars"
        )));
    }

    for (bar_idx, expected) in SMPTE_BAR_YUV.iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let sample_x = (bar_idx as u32 * bar_width) + (bar_width / 2);

        let Some(actual) = yuyv_components(frame.data, width, sample_x, center_y) else {
            return Err(ValidationError::PatternMismatch(format!(
                "no pixel data at ({sample_x}, {center_y})"
            )));
        };

        if !components_match(actual, *expected, COMPONENT_TOLERANCE) {
            return Err(ValidationError::PatternMismatch(format!(
                "color bar {bar_idx} mismatch at ({sample_x}, {center_y}): \
                 expected YUV{expected:?}, got YUV{actual:?}"
            )));
        }
    }

    Ok(())
}

/// Validates that a YUYV frame contains a horizontal luma gradient.
///
/// Samples the middle row every 10 pixels, requiring the luma to never drop
/// by more than one step and to rise by at least 50 across the row.
///
/// # Errors
///
/// Returns `PatternMismatch` when the luma regresses or the overall change is
/// too small to be a gradient.
pub fn validate_gradient(frame: &FrameView<'_>) -> Result<(), ValidationError> {
    let width = frame.width;
    let center_y = frame.height / 2;

    let sample_step = 10u32;
    let mut first_luma: Option<u8> = None;
    let mut prev_luma: Option<u8> = None;
    let mut last_luma: Option<u8> = None;

    for x in (0..width).step_by(sample_step as usize) {
        let Some((luma, _, _)) = yuyv_components(frame.data, width, x, center_y) else {
            return Err(ValidationError::PatternMismatch(format!(
                "no pixel data at ({x}, {center_y})"
            )));
        };

        if first_luma.is_none() {
            first_luma = Some(luma);
        }

        if let Some(prev) = prev_luma {
            // Allow a one-step dip from generator rounding.
            if luma.saturating_add(1) < prev {
                return Err(ValidationError::PatternMismatch(format!(
                    "gradient not monotonically increasing at x={x}: \
                     luma {luma} < previous {prev}"
                )));
            }
        }

        prev_luma = Some(luma);
        last_luma = Some(luma);
    }

    if let (Some(first), Some(last)) = (first_luma, last_luma) {
        if last.saturating_sub(first) < 50 {
            return Err(ValidationError::PatternMismatch(format!(
                "insufficient luma change for a gradient: {first} to {last}"
            )));
        }
    }

    Ok(())
}

/// Y, U and V for the pixel at (`x`, `y`) in a packed YUYV payload.
///
/// Luma comes from the addressed pixel; chroma is shared across the
/// containing two-pixel macropixel.
fn yuyv_components(data: &[u8], width: u32, x: u32, y: u32) -> Option<(u8, u8, u8)> {
    let pair_x = x & !1;
    let offset = ((y * width + pair_x) * 2) as usize;
    let luma_offset = if x % 2 == 0 { offset } else { offset + 2 };

    let luma = *data.get(luma_offset)?;
    let u = *data.get(offset + 1)?;
    let v = *data.get(offset + 3)?;
    Some((luma, u, v))
}

/// Whether all three components are within `tolerance` of the expected value.
fn components_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u8) -> bool {
    let (ay, au, av) = actual;
    let (ey, eu, ev) = expected;

    ay.abs_diff(ey) <= tolerance && au.abs_diff(eu) <= tolerance && av.abs_diff(ev) <= tolerance
}
