use prometheus::{IntCounter, IntGauge, Opts, Registry};

/// Per-feed counters exposed for observability
#[derive(Debug, Clone)]
pub struct IngestorMetrics {
    pub messages_received: IntCounter,
    pub messages_dropped: IntCounter,
    pub reconnects: IntCounter,
    pub subscription_messages: IntCounter,
    pub connected: IntGauge,
}

impl IngestorMetrics {
    pub fn new(feed: &str) -> prometheus::Result<Self> {
        let opts = |name: &str, help: &str| Opts::new(name, help).const_label("feed", feed);

        Ok(Self {
            messages_received: IntCounter::with_opts(opts(
                "feed_messages_received_total",
                "Text frames received from the feed",
            ))?,
            messages_dropped: IntCounter::with_opts(opts(
                "feed_messages_dropped_total",
                "Malformed frames dropped",
            ))?,
            reconnects: IntCounter::with_opts(opts(
                "feed_reconnects_total",
                "Reconnect attempts after a lost connection",
            ))?,
            subscription_messages: IntCounter::with_opts(opts(
                "feed_subscription_messages_total",
                "Subscribe messages sent",
            ))?,
            connected: IntGauge::with_opts(opts(
                "feed_connected",
                "1 while the feed connection is up",
            ))?,
        })
    }

    /// Register every metric with a host registry
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.messages_received.clone()))?;
        registry.register(Box::new(self.messages_dropped.clone()))?;
        registry.register(Box::new(self.reconnects.clone()))?;
        registry.register(Box::new(self.subscription_messages.clone()))?;
        registry.register(Box::new(self.connected.clone()))?;
        Ok(())
    }
}
