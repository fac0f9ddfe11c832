//! Power-of-two downsample factor selection.

use serde::{Deserialize, Serialize};

use crate::domain::entities::Dimensions;
use crate::domain::errors::{LoadError, LoadResult};

/// Which source axis is compared against which requested axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMode {
    /// Half-height is compared against the requested width and half-width
    /// against the requested height.
    #[default]
    Legacy,
    /// Each source axis is compared against the same requested axis.
    Corrected,
}

/// Returns the largest power-of-two factor keeping the downsampled image
/// above the requested bounds.
///
/// The factor doubles while both halved source axes, divided by the current
/// factor, still exceed their requested bound. A zero request is
/// unconstrained: doubling continues until a halved axis reaches zero.
#[must_use]
pub fn sample_factor(source: Dimensions, requested: Dimensions, mode: SamplingMode) -> u32 {
    let half_width = source.width / 2;
    let half_height = source.height / 2;

    let (first, second) = match mode {
        SamplingMode::Legacy => ((half_height, requested.width), (half_width, requested.height)),
        SamplingMode::Corrected => ((half_width, requested.width), (half_height, requested.height)),
    };

    // half < 2^31, so the factor tops out at 2^31 without overflowing
    let mut factor = 1u32;
    while first.0 / factor > first.1 && second.0 / factor > second.1 {
        factor <<= 1;
    }
    factor
}

/// Signed entry point for callers holding toolkit coordinates.
///
/// # Errors
/// Returns [`LoadError::InvalidArgument`] if any input is negative.
pub fn checked_sample_factor(
    source_width: i64,
    source_height: i64,
    requested_width: i64,
    requested_height: i64,
    mode: SamplingMode,
) -> LoadResult<u32> {
    let source = Dimensions::try_from_signed(source_width, source_height)
        .map_err(|e| LoadError::invalid_argument(format!("source {e}")))?;
    let requested = Dimensions::try_from_signed(requested_width, requested_height)
        .map_err(|e| LoadError::invalid_argument(format!("request {e}")))?;
    Ok(sample_factor(source, requested, mode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn dims(width: u32, height: u32) -> Dimensions {
        Dimensions::new(width, height)
    }

    #[test_case(1000, 800, 100, 100, 4 ; "square_request")]
    #[test_case(400, 400, 400, 400, 1 ; "request_matches_source")]
    #[test_case(400, 400, 800, 800, 1 ; "request_larger_than_source")]
    #[test_case(4096, 4096, 100, 100, 32 ; "large_source")]
    #[test_case(1024, 512, 0, 0, 512 ; "natural_request_coarsest_bound")]
    #[test_case(1, 1, 0, 0, 1 ; "tiny_source")]
    #[test_case(0, 0, 0, 0, 1 ; "empty_source")]
    fn test_legacy_factor(sw: u32, sh: u32, rw: u32, rh: u32, expected: u32) {
        assert_eq!(
            sample_factor(dims(sw, sh), dims(rw, rh), SamplingMode::Legacy),
            expected
        );
    }

    #[test]
    fn test_cross_comparison_differs_from_corrected() {
        let source = dims(2000, 200);
        let requested = dims(50, 500);
        assert_eq!(sample_factor(source, requested, SamplingMode::Legacy), 2);
        assert_eq!(sample_factor(source, requested, SamplingMode::Corrected), 1);
    }

    #[test]
    fn test_max_dimensions_do_not_overflow() {
        let factor = sample_factor(dims(u32::MAX, u32::MAX), Dimensions::NATURAL, SamplingMode::Legacy);
        assert_eq!(factor, 1 << 31);
    }

    #[test]
    fn test_always_power_of_two_and_monotonic() {
        let sources = [dims(3000, 2000), dims(640, 480), dims(101, 7001), dims(17, 17)];
        for mode in [SamplingMode::Legacy, SamplingMode::Corrected] {
            for source in sources {
                let mut previous = 1;
                for req in (1..=400u32).rev().step_by(7) {
                    let factor = sample_factor(source, dims(req, req), mode);
                    assert!(factor.is_power_of_two(), "{factor} for {source} at {req}");
                    assert!(factor >= previous, "factor decreased for {source} at {req}");
                    previous = factor;
                }
            }
        }
    }

    #[test]
    fn test_checked_rejects_negative() {
        assert!(matches!(
            checked_sample_factor(100, 100, -1, 10, SamplingMode::Legacy),
            Err(LoadError::InvalidArgument { .. })
        ));
        assert!(checked_sample_factor(-100, 100, 1, 10, SamplingMode::Legacy).is_err());
        assert_eq!(
            checked_sample_factor(1000, 800, 100, 100, SamplingMode::Legacy).ok(),
            Some(4)
        );
    }
}
