//! Part-size strategy
//!
//! Chooses one part size per upload from the total size (when known) and the
//! store's part limits. The choice is made once and never adapts mid-upload.

/// Minimum part size (5 MiB)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum part size (95 MiB)
pub const MAX_PART_SIZE: u64 = 95 * 1024 * 1024;

/// Maximum parts allowed per large file
pub const MAX_PARTS: u32 = 10000;

/// Maximum concurrently uploading parts
pub const MAX_PARALLEL: usize = 4;

/// Part size bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartLimits {
    pub min_part_size: u64,
    pub max_part_size: u64,
    pub max_parts: u32,
}

impl Default for PartLimits {
    fn default() -> Self {
        Self {
            min_part_size: MIN_PART_SIZE,
            max_part_size: MAX_PART_SIZE,
            max_parts: MAX_PARTS,
        }
    }
}

/// Pick the part size for an upload of `total_bytes`
///
/// With a known size this is the smallest size that spreads the bytes evenly
/// over `ceil(total / max_part_size)` parts, clamped to the limits. Unknown
/// sizes get `max_part_size`.
pub fn part_size(total_bytes: Option<u64>, limits: &PartLimits) -> u64 {
    let Some(total) = total_bytes else {
        return limits.max_part_size;
    };

    let factor = total.div_ceil(limits.max_part_size).max(1);
    total
        .div_ceil(factor)
        .clamp(limits.min_part_size, limits.max_part_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_unknown_size_uses_max() {
        assert_eq!(part_size(None, &PartLimits::default()), MAX_PART_SIZE);
    }

    #[test]
    fn test_zero_size_uses_min() {
        assert_eq!(part_size(Some(0), &PartLimits::default()), MIN_PART_SIZE);
    }

    #[test]
    fn test_small_file_single_part() {
        assert_eq!(part_size(Some(12 * MIB), &PartLimits::default()), 12 * MIB);
        assert_eq!(part_size(Some(MIB), &PartLimits::default()), MIN_PART_SIZE);
    }

    #[test]
    fn test_large_file_split_evenly() {
        let total = 200 * MIB;
        let size = part_size(Some(total), &PartLimits::default());
        assert_eq!(size, total.div_ceil(3));
        assert_eq!(total.div_ceil(size), 3);
    }

    #[test]
    fn test_bounds_hold_across_sizes() {
        let limits = PartLimits::default();
        let sizes = [
            1,
            MIN_PART_SIZE - 1,
            MIN_PART_SIZE,
            MAX_PART_SIZE,
            MAX_PART_SIZE + 1,
            3 * MAX_PART_SIZE - 7,
            1024 * 1024 * MIB,
        ];
        for total in sizes {
            let size = part_size(Some(total), &limits);
            assert!(size >= limits.min_part_size && size <= limits.max_part_size);
            assert!(
                total.div_ceil(size) <= total.div_ceil(limits.max_part_size) + 1,
                "too many parts for {}",
                total
            );
        }
    }

    #[test]
    fn test_custom_limits() {
        let limits = PartLimits {
            min_part_size: 5,
            max_part_size: 10,
            max_parts: 100,
        };
        assert_eq!(part_size(Some(25), &limits), 9);
        assert_eq!(part_size(Some(3), &limits), 5);
    }

    #[test]
    fn test_max_parts_does_not_change_size() {
        // Too many parts is reported by the engine, not hidden by growing the size
        let limits = PartLimits {
            min_part_size: 1,
            max_part_size: 30,
            max_parts: 2,
        };
        assert_eq!(part_size(Some(100), &limits), 25);
    }
}
