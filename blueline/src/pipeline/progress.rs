//! Progress bands for the fixed stage order.
//!
//! Each per-sheet stage reports progress inside a fixed sub-range of the
//! 0..=100 scale so that a consumer sees steady movement regardless of how
//! many sheets the plan has.

/// A contiguous progress band on the 0..=100 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressBand {
    /// Percent at the start of the band.
    pub lo: u8,
    /// Percent at the end of the band.
    pub hi: u8,
}

/// Band of the per-sheet render stage.
pub const RENDER: ProgressBand = ProgressBand { lo: 10, hi: 25 };
/// Band of the per-sheet metadata extraction stage.
pub const METADATA: ProgressBand = ProgressBand { lo: 25, hi: 50 };
/// Band of the detection stages.
pub const DETECTION: ProgressBand = ProgressBand { lo: 50, hi: 80 };
/// Band of the per-sheet tiling stage. Tops out just below completion.
pub const TILES: ProgressBand = ProgressBand { lo: 80, hi: 99 };

impl ProgressBand {
    /// Percent after finishing item `index` (0-based) out of `total`.
    #[must_use]
    pub fn at(self, index: usize, total: usize) -> u8 {
        if total == 0 {
            return self.hi;
        }
        let span = f64::from(self.hi - self.lo);
        let fraction = (index + 1).min(total) as f64 / total as f64;
        let percent = f64::from(self.lo) + span * fraction;
        percent.round().min(100.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_endpoints() {
        assert_eq!(RENDER.at(0, 1), 25);
        assert_eq!(RENDER.at(2, 3), 25);
        assert_eq!(TILES.at(3, 4), 99);
    }

    #[test]
    fn test_band_is_monotonic() {
        let mut last = 0;
        for i in 0..10 {
            let percent = METADATA.at(i, 10);
            assert!(percent >= last);
            last = percent;
        }
        assert_eq!(last, METADATA.hi);
    }

    #[test]
    fn test_first_item_moves_off_the_floor() {
        assert!(RENDER.at(0, 10) > RENDER.lo);
    }

    #[test]
    fn test_empty_total_reports_band_end() {
        assert_eq!(DETECTION.at(0, 0), DETECTION.hi);
    }
}
