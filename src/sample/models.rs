//! Metric sample model types.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Identifier of one monitored target (e.g. one database instance).
pub type TargetId = i64;

/// One decoded telemetry sample.
///
/// Every metric is optional: `None` means the server did not report it,
/// which is distinct from a reported `0.0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub instance_id: TargetId,
    /// CPU utilization percentage
    pub cpu: Option<f64>,
    /// Memory utilization percentage
    pub memory: Option<f64>,
    #[serde(rename = "memoryTotalGB")]
    pub memory_total_gb: Option<f64>,
    #[serde(rename = "memoryUsedGB")]
    pub memory_used_gb: Option<f64>,
    #[serde(rename = "memoryAvailableGB")]
    pub memory_available_gb: Option<f64>,
    #[serde(rename = "memoryCacheGB")]
    pub memory_cache_gb: Option<f64>,
    /// Disk utilization percentage
    pub disk_usage: Option<f64>,
    #[serde(rename = "diskTotalGB")]
    pub disk_total_gb: Option<f64>,
    #[serde(rename = "diskUsedGB")]
    pub disk_used_gb: Option<f64>,
    #[serde(rename = "diskAvailableGB")]
    pub disk_available_gb: Option<f64>,
    /// Disk read rate
    pub disk_read: Option<f64>,
    /// Disk write rate
    pub disk_write: Option<f64>,
    /// 1, 5 and 15 minute load averages
    pub load_average: Option<[f64; 3]>,
    /// Swap utilization percentage
    pub swap_usage: Option<f64>,
    #[serde(rename = "swapTotalGB")]
    pub swap_total_gb: Option<f64>,
    #[serde(rename = "swapUsedGB")]
    pub swap_used_gb: Option<f64>,
    pub swap_in_per_sec: Option<f64>,
    pub swap_out_per_sec: Option<f64>,
    pub collected_at: DateTime<Utc>,
}

impl MetricSample {
    /// An empty sample for `instance_id`: every metric unknown.
    pub fn unknown(instance_id: TargetId, collected_at: DateTime<Utc>) -> Self {
        Self {
            instance_id,
            cpu: None,
            memory: None,
            memory_total_gb: None,
            memory_used_gb: None,
            memory_available_gb: None,
            memory_cache_gb: None,
            disk_usage: None,
            disk_total_gb: None,
            disk_used_gb: None,
            disk_available_gb: None,
            disk_read: None,
            disk_write: None,
            load_average: None,
            swap_usage: None,
            swap_total_gb: None,
            swap_used_gb: None,
            swap_in_per_sec: None,
            swap_out_per_sec: None,
            collected_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_with_wire_names() {
        let mut sample = MetricSample::unknown(3, Utc::now());
        sample.memory_used_gb = Some(1.5);
        sample.swap_in_per_sec = Some(0.0);

        let value = serde_json::to_value(&sample).unwrap();
        assert_eq!(value["instanceId"], 3);
        assert_eq!(value["memoryUsedGB"], 1.5);
        assert_eq!(value["swapInPerSec"], 0.0);
        assert!(value["cpu"].is_null());
    }
}
