//! Rolling history of recent samples, kept per series and target.
//!
//! The cache itself is a collaborator behind [`HistoryCache`]; this module
//! owns the key layout and the append-and-trim write path.

mod cache;

pub use cache::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::sample::{MetricSample, TargetId};

/// A charted metric series derived from samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Series {
    Cpu,
    Memory,
    #[serde(rename = "memoryGb")]
    MemoryGb,
    Disk,
    DiskIo,
    LoadAverage,
    Swap,
    SwapIo,
}

impl Series {
    pub const ALL: [Series; 8] = [
        Series::Cpu,
        Series::Memory,
        Series::MemoryGb,
        Series::Disk,
        Series::DiskIo,
        Series::LoadAverage,
        Series::Swap,
        Series::SwapIo,
    ];

    /// Cache key name of the series.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::MemoryGb => "memoryGb",
            Self::Disk => "disk",
            Self::DiskIo => "diskIo",
            Self::LoadAverage => "loadAverage",
            Self::Swap => "swap",
            Self::SwapIo => "swapIo",
        }
    }

    /// Project a sample onto this series.
    ///
    /// Returns `None` when any source field of the series is unknown.
    pub fn point(&self, sample: &MetricSample) -> Option<HistoryPoint> {
        let values = match self {
            Self::Cpu => vec![sample.cpu?],
            Self::Memory => vec![sample.memory?],
            Self::MemoryGb => vec![
                sample.memory_used_gb?,
                sample.memory_available_gb?,
                sample.memory_cache_gb?,
            ],
            Self::Disk => vec![sample.disk_usage?],
            Self::DiskIo => vec![sample.disk_read?, sample.disk_write?],
            Self::LoadAverage => sample.load_average?.to_vec(),
            Self::Swap => vec![sample.swap_usage?],
            Self::SwapIo => vec![sample.swap_in_per_sec?, sample.swap_out_per_sec?],
        };

        Some(HistoryPoint {
            time: sample.collected_at,
            values,
        })
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache key of one history sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HistoryKey {
    pub series: Series,
    pub target_id: TargetId,
}

impl HistoryKey {
    pub fn new(series: Series, target_id: TargetId) -> Self {
        Self { series, target_id }
    }
}

/// One timestamped point of a series. Single-valued series carry one value,
/// multi-valued ones (disk I/O, load average, ...) carry them in a fixed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub time: DateTime<Utc>,
    pub values: Vec<f64>,
}

impl HistoryPoint {
    /// The first value; the only one for single-valued series.
    pub fn value(&self) -> Option<f64> {
        self.values.first().copied()
    }
}

/// Append `point` to the sequence at `key`, keeping the newest `capacity` entries.
pub fn append_point(
    cache: &dyn HistoryCache,
    key: HistoryKey,
    point: HistoryPoint,
    capacity: usize,
) {
    let mut points = cache.get(&key).unwrap_or_default();
    points.push(point);
    if points.len() > capacity {
        let excess = points.len() - capacity;
        points.drain(..excess);
    }
    cache.set(key, points);
}

/// Write every series point derived from `sample` under `target_id`.
///
/// Series are updated one after the other, not atomically; a concurrent
/// reader may see some series at the new tick and others not yet.
/// Returns the number of points written.
pub fn record_sample(
    cache: &dyn HistoryCache,
    target_id: TargetId,
    sample: &MetricSample,
    capacity: usize,
) -> usize {
    let mut written = 0;
    for series in Series::ALL {
        if let Some(point) = series.point(sample) {
            append_point(cache, HistoryKey::new(series, target_id), point, capacity);
            written += 1;
        }
    }
    written
}

/// Remove every series of `target_id` from the cache.
pub fn clear_target(cache: &dyn HistoryCache, target_id: TargetId) {
    for series in Series::ALL {
        cache.remove(&HistoryKey::new(series, target_id));
    }
}
