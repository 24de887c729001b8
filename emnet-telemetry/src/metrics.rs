//! ## emnet-telemetry::metrics
//! **Prometheus export of stack counters**
//!
//! Protocol counters are plain integers inside the stack's locked context,
//! and allocator counters sit in the allocator. Callers copy snapshots of
//! both in here with [`MetricsRecorder::record`] before rendering the text
//! exposition.

use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    /// `emnet_counter{name="arp_sent"}` and friends.
    pub counters: IntGaugeVec,
    /// Free buffers per pool, labelled by buffer size.
    pub pool_free: IntGaugeVec,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let counters = IntGaugeVec::new(
            Opts::new("emnet_counter", "Stack statistics counters"),
            &["name"],
        )?;
        let pool_free = IntGaugeVec::new(
            Opts::new("emnet_pool_free", "Free packet buffers per pool"),
            &["size"],
        )?;

        registry.register(Box::new(counters.clone()))?;
        registry.register(Box::new(pool_free.clone()))?;

        Ok(Self {
            registry,
            counters,
            pool_free,
        })
    }

    pub fn set_counter(&self, name: &str, value: u64) {
        self.counters
            .with_label_values(&[name])
            .set(value.min(i64::MAX as u64) as i64);
    }

    /// Copies a batch of `(name, value)` pairs.
    pub fn record<'a>(&self, counters: impl IntoIterator<Item = (&'a str, u64)>) {
        for (name, value) in counters {
            self.set_counter(name, value);
        }
    }

    pub fn set_pool_free(&self, size: usize, free: usize) {
        self.pool_free
            .with_label_values(&[&size.to_string()])
            .set(free as i64);
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
