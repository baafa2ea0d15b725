//! Decoder for inbound `metrics` event payloads.
//!
//! Each field is read independently so one missing or mistyped metric
//! never discards the rest of the sample.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use super::models::{MetricSample, TargetId};

/// Decode error types.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
}

/// Decode one payload received on the stream for `target_id`.
///
/// An `instanceId` present in the payload overrides `target_id`. A missing
/// or unparsable `collectedAt` falls back to the current time.
pub fn decode_sample(payload: &str, target_id: TargetId) -> Result<MetricSample, DecodeError> {
    let value: Value = serde_json::from_str(payload)?;
    let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;

    let instance_id = obj
        .get("instanceId")
        .and_then(as_target_id)
        .unwrap_or(target_id);

    let collected_at = match obj.get("collectedAt").and_then(Value::as_str) {
        Some(s) => parse_collected_at(s).unwrap_or_else(|| {
            tracing::debug!("Decoder: unparsable collectedAt {:?}, using now", s);
            Utc::now()
        }),
        None => Utc::now(),
    };

    Ok(MetricSample {
        instance_id,
        cpu: number(obj, "cpu"),
        memory: number(obj, "memory"),
        memory_total_gb: number(obj, "memoryTotalGB"),
        memory_used_gb: number(obj, "memoryUsedGB"),
        memory_available_gb: number(obj, "memoryAvailableGB"),
        memory_cache_gb: number(obj, "memoryCacheGB"),
        disk_usage: number(obj, "diskUsage"),
        disk_total_gb: number(obj, "diskTotalGB"),
        disk_used_gb: number(obj, "diskUsedGB"),
        disk_available_gb: number(obj, "diskAvailableGB"),
        disk_read: number(obj, "diskRead"),
        disk_write: number(obj, "diskWrite"),
        load_average: load_average(obj),
        swap_usage: number(obj, "swapUsage"),
        swap_total_gb: number(obj, "swapTotalGB"),
        swap_used_gb: number(obj, "swapUsedGB"),
        swap_in_per_sec: number(obj, "swapInPerSec"),
        swap_out_per_sec: number(obj, "swapOutPerSec"),
        collected_at,
    })
}

fn number(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    obj.get(key).and_then(Value::as_f64).filter(|v| v.is_finite())
}

fn as_target_id(value: &Value) -> Option<TargetId> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn load_average(obj: &Map<String, Value>) -> Option<[f64; 3]> {
    let arr = obj.get("loadAverage")?.as_array()?;
    if arr.len() != 3 {
        return None;
    }
    let mut out = [0.0; 3];
    for (slot, v) in out.iter_mut().zip(arr) {
        *slot = v.as_f64().filter(|v| v.is_finite())?;
    }
    Some(out)
}

/// Parse an ISO-8601 collection timestamp.
fn parse_collected_at(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // Servers sometimes omit the offset; treat those as UTC.
    let formats = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"];
    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_decode_full_payload() {
        let payload = r#"{
            "instanceId": 7,
            "cpu": 12.5,
            "memory": 40,
            "memoryUsedGB": 3.2,
            "diskRead": 1024,
            "diskWrite": 0,
            "loadAverage": [0.5, 0.75, 1.0],
            "swapInPerSec": 0.0,
            "collectedAt": "2024-03-01T10:00:00Z"
        }"#;

        let sample = decode_sample(payload, 7).unwrap();
        assert_eq!(sample.instance_id, 7);
        assert_eq!(sample.cpu, Some(12.5));
        assert_eq!(sample.memory, Some(40.0));
        assert_eq!(sample.memory_used_gb, Some(3.2));
        assert_eq!(sample.disk_read, Some(1024.0));
        assert_eq!(sample.disk_write, Some(0.0));
        assert_eq!(sample.load_average, Some([0.5, 0.75, 1.0]));
        assert_eq!(sample.swap_in_per_sec, Some(0.0));
        assert_eq!(
            sample.collected_at,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_missing_fields_are_unknown_not_zero() {
        let sample = decode_sample(r#"{"cpu": 0}"#, 3).unwrap();
        assert_eq!(sample.instance_id, 3);
        assert_eq!(sample.cpu, Some(0.0));
        assert_eq!(sample.memory, None);
        assert_eq!(sample.disk_usage, None);
        assert_eq!(sample.load_average, None);
        assert_eq!(sample.swap_out_per_sec, None);
    }

    #[test]
    fn test_fields_fall_back_independently() {
        let payload = r#"{"cpu": "high", "memory": null, "diskUsage": 55.5, "loadAverage": [1, 2]}"#;
        let sample = decode_sample(payload, 1).unwrap();
        assert_eq!(sample.cpu, None);
        assert_eq!(sample.memory, None);
        assert_eq!(sample.disk_usage, Some(55.5));
        assert_eq!(sample.load_average, None);
    }

    #[test]
    fn test_instance_id_override() {
        let sample = decode_sample(r#"{"instanceId": "42"}"#, 1).unwrap();
        assert_eq!(sample.instance_id, 42);

        let sample = decode_sample(r#"{"instanceId": null}"#, 1).unwrap();
        assert_eq!(sample.instance_id, 1);
    }

    #[test]
    fn test_timestamp_fallback() {
        let before = Utc::now();
        let sample = decode_sample(r#"{"collectedAt": "yesterday"}"#, 1).unwrap();
        assert!(sample.collected_at >= before);

        let sample = decode_sample(r#"{"cpu": 1}"#, 1).unwrap();
        assert!(sample.collected_at >= before);
        assert!(sample.collected_at <= Utc::now());

        let sample = decode_sample(r#"{"collectedAt": "2024-03-01T10:00:00.250"}"#, 1).unwrap();
        assert_eq!(sample.collected_at.timestamp_millis() % 1000, 250);
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(decode_sample("not json", 1), Err(DecodeError::Json(_))));
        assert!(matches!(decode_sample("[1, 2, 3]", 1), Err(DecodeError::NotAnObject)));
        tokio_test::assert_err!(decode_sample("", 1));
    }
}
