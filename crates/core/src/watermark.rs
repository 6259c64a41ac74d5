//! Watermarks and contiguous watermark ranges.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed interval `[start, end]` of instance watermarks.
///
/// A range is never empty: construction rejects `start > end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawWatermarkRange")]
pub struct WatermarkRange {
    start: i64,
    end: i64,
}

#[derive(Deserialize)]
struct RawWatermarkRange {
    start: i64,
    end: i64,
}

impl TryFrom<RawWatermarkRange> for WatermarkRange {
    type Error = crate::Error;

    fn try_from(raw: RawWatermarkRange) -> crate::Result<Self> {
        Self::new(raw.start, raw.end)
    }
}

impl WatermarkRange {
    /// Create a range, validating `start <= end`.
    pub fn new(start: i64, end: i64) -> crate::Result<Self> {
        if start > end {
            return Err(crate::Error::InvalidWatermarkRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Range covering a single watermark.
    pub fn single(watermark: i64) -> Self {
        Self {
            start: watermark,
            end: watermark,
        }
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    /// Number of watermarks covered by the range.
    pub fn count(&self) -> u64 {
        self.end.abs_diff(self.start) + 1
    }

    pub fn contains(&self, watermark: i64) -> bool {
        self.start <= watermark && watermark <= self.end
    }

    /// Build ranges from watermarks sorted in descending order, `batch_size` per range.
    ///
    /// Each range spans the min and max of its slice, so ranges are disjoint
    /// and ordered from the highest watermarks downward.
    pub fn partition_descending(watermarks: &[i64], batch_size: usize) -> Vec<Self> {
        if batch_size == 0 {
            return Vec::new();
        }
        watermarks
            .chunks(batch_size)
            .filter_map(|chunk| {
                let high = *chunk.first()?;
                let low = *chunk.last()?;
                Some(Self {
                    start: low.min(high),
                    end: high.max(low),
                })
            })
            .collect()
    }
}

impl fmt::Display for WatermarkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}
