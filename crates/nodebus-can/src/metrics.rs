//! ---
//! nb_section: "03-can-bus"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Prometheus counters for bus traffic."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
use prometheus::{IntCounter, Opts, Registry};

/// Prometheus metric handles for bus activity.
///
/// Handles are cheap to clone; every clone feeds the same counters.
#[derive(Clone)]
pub struct BusMetricsExporter {
    received: IntCounter,
    rejected: IntCounter,
    sent: IntCounter,
    decode_errors: IntCounter,
    dispatch_failures: IntCounter,
}

impl BusMetricsExporter {
    /// Register bus metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let received = IntCounter::with_opts(Opts::new(
            "nodebus_frames_received_total",
            "Frames taken off the bus",
        ))?;
        let rejected = IntCounter::with_opts(Opts::new(
            "nodebus_frames_rejected_total",
            "Frames discarded by acceptance filters",
        ))?;
        let sent = IntCounter::with_opts(Opts::new(
            "nodebus_frames_sent_total",
            "Frames handed to the transport",
        ))?;
        let decode_errors = IntCounter::with_opts(Opts::new(
            "nodebus_decode_errors_total",
            "Accepted frames whose payload failed to parse",
        ))?;
        let dispatch_failures = IntCounter::with_opts(Opts::new(
            "nodebus_dispatch_failures_total",
            "Decoded messages that could not be queued to their task",
        ))?;

        registry.register(Box::new(received.clone()))?;
        registry.register(Box::new(rejected.clone()))?;
        registry.register(Box::new(sent.clone()))?;
        registry.register(Box::new(decode_errors.clone()))?;
        registry.register(Box::new(dispatch_failures.clone()))?;

        Ok(Self {
            received,
            rejected,
            sent,
            decode_errors,
            dispatch_failures,
        })
    }

    /// Record a received frame.
    pub fn observe_received(&self) {
        self.received.inc();
    }

    /// Record a filtered-out frame.
    pub fn observe_rejected(&self) {
        self.rejected.inc();
    }

    /// Record a sent frame.
    pub fn observe_sent(&self) {
        self.sent.inc();
    }

    /// Record a payload that failed to decode.
    pub fn observe_decode_error(&self) {
        self.decode_errors.inc();
    }

    /// Record a message the dispatcher could not deliver.
    pub fn observe_dispatch_failure(&self) {
        self.dispatch_failures.inc();
    }

    /// Current counter values.
    pub fn snapshot(&self) -> BusCounters {
        BusCounters {
            received: self.received.get(),
            rejected: self.rejected.get(),
            sent: self.sent.get(),
            decode_errors: self.decode_errors.get(),
            dispatch_failures: self.dispatch_failures.get(),
        }
    }
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusCounters {
    /// Frames received.
    pub received: u64,
    /// Frames rejected by filters.
    pub rejected: u64,
    /// Frames sent.
    pub sent: u64,
    /// Payload decode failures.
    pub decode_errors: u64,
    /// Undeliverable messages.
    pub dispatch_failures: u64,
}
