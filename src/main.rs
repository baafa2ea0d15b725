//! metricstream - follow live metrics of monitored targets from the terminal.

use metricstream::{LiveMetrics, MemoryCache, MetricSample, MetricsManager, SseTransport, StreamConfig, TargetId};

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("metricstream=info".parse()?))
        .init();

    // Load configuration
    let cfg = StreamConfig::load();
    let targets = parse_targets(
        std::env::args().skip(1),
        std::env::var("METRICSTREAM_TARGETS").ok(),
    )?;
    if targets.is_empty() {
        return Err("usage: metricstream <target-id>... (or set METRICSTREAM_TARGETS)".into());
    }
    tracing::info!("Streaming metrics for {:?} from {}", targets, cfg.base_url);

    let transport = Arc::new(SseTransport::new(&cfg.base_url)?);
    let history = Arc::new(MemoryCache::new());

    let manager = MetricsManager::new(cfg, transport, history);
    manager.start();

    let mut watchers = Vec::with_capacity(targets.len());
    for target_id in targets {
        let mut live = LiveMetrics::new(manager.clone());
        live.select_target(Some(target_id));
        watchers.push(tokio::spawn(watch_target(live)));
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    for watcher in watchers {
        watcher.abort();
    }
    manager.shutdown();

    Ok(())
}

/// Log every sample of the bound target.
async fn watch_target(mut live: LiveMetrics) {
    loop {
        if let Some(sample) = live.changed().await {
            tracing::info!(
                "target {} [{}] {}",
                sample.instance_id,
                if live.is_connected() { "live" } else { "stale" },
                summarize(&sample)
            );
        }
    }
}

fn summarize(sample: &MetricSample) -> String {
    let load = match sample.load_average {
        Some([l1, l5, l15]) => format!("{:.2} {:.2} {:.2}", l1, l5, l15),
        None => "-".to_string(),
    };
    format!(
        "cpu={}% mem={}% disk={}% swap={}% load={} at {}",
        fmt_opt(sample.cpu),
        fmt_opt(sample.memory),
        fmt_opt(sample.disk_usage),
        fmt_opt(sample.swap_usage),
        load,
        sample.collected_at.to_rfc3339()
    )
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.1}", v))
}

/// Target ids from the command line, falling back to a comma-separated list.
fn parse_targets<I>(args: I, fallback: Option<String>) -> Result<Vec<TargetId>, String>
where
    I: IntoIterator<Item = String>,
{
    let mut raw: Vec<String> = args.into_iter().collect();
    if raw.is_empty() {
        if let Some(list) = fallback {
            raw = list.split(',').map(str::to_string).collect();
        }
    }

    let mut targets = Vec::new();
    for s in raw.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let id = s
            .parse::<TargetId>()
            .map_err(|_| format!("invalid target id: {:?}", s))?;
        if !targets.contains(&id) {
            targets.push(id);
        }
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_parse_targets() {
        let args = vec!["3".to_string(), " 7 ".to_string(), "3".to_string()];
        assert_eq!(parse_targets(args, Some("1".to_string())).unwrap(), vec![3, 7]);
        assert_eq!(
            parse_targets(Vec::new(), Some("1, 2,,5".to_string())).unwrap(),
            vec![1, 2, 5]
        );
        assert!(parse_targets(Vec::new(), None).unwrap().is_empty());
        assert!(parse_targets(vec!["db1".to_string()], None).is_err());
    }

    #[test]
    fn test_summarize_marks_unknown_fields() {
        let mut sample = MetricSample::unknown(1, Utc::now());
        sample.cpu = Some(0.0);
        sample.load_average = Some([1.0, 0.5, 0.25]);
        let line = summarize(&sample);
        assert!(line.starts_with("cpu=0.0% mem=-% disk=-% swap=-% load=1.00 0.50 0.25"));
    }
}
