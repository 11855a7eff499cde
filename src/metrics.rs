//! Stream counters
//!
//! Every client owns one set; register it into a prometheus registry to
//! expose it.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

#[derive(Debug, Clone)]
pub struct StreamMetrics {
    /// Delivered events by kind
    pub frames: IntCounterVec,

    /// Dropped inbound frames by reason (`envelope`, `payload`, `unknown`)
    pub dropped_frames: IntCounterVec,

    /// Outbound subscription requests by event tag
    pub requests: IntCounterVec,

    /// Keepalive pings written
    pub pings_sent: IntCounter,
}

impl StreamMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            frames: IntCounterVec::new(
                Opts::new("invest_stream_frames_total", "Events delivered to the handler"),
                &["kind"],
            )?,
            dropped_frames: IntCounterVec::new(
                Opts::new(
                    "invest_stream_dropped_frames_total",
                    "Inbound frames dropped without delivery",
                ),
                &["reason"],
            )?,
            requests: IntCounterVec::new(
                Opts::new("invest_stream_requests_total", "Subscription requests written"),
                &["event"],
            )?,
            pings_sent: IntCounter::new(
                "invest_stream_pings_sent_total",
                "Keepalive pings written",
            )?,
        })
    }

    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.frames.clone()))?;
        registry.register(Box::new(self.dropped_frames.clone()))?;
        registry.register(Box::new(self.requests.clone()))?;
        registry.register(Box::new(self.pings_sent.clone()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_gather() {
        let metrics = StreamMetrics::new().unwrap();
        let registry = Registry::new();
        metrics.register(&registry).unwrap();

        metrics.frames.with_label_values(&["candle"]).inc();
        metrics.pings_sent.inc_by(2);

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"invest_stream_frames_total".to_string()));
        assert!(names.contains(&"invest_stream_pings_sent_total".to_string()));
        assert_eq!(metrics.pings_sent.get(), 2);
    }

    #[test]
    fn test_double_registration_fails() {
        let metrics = StreamMetrics::new().unwrap();
        let registry = Registry::new();
        metrics.register(&registry).unwrap();
        assert!(metrics.register(&registry).is_err());
    }
}
