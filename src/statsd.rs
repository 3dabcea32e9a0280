use rand::Rng as _;

use crate::{
    config::Destination,
    transport::{Transport, TransportError},
};

/// Root prefix applied ahead of every metric namespace.
pub const ROOT_NAMESPACE: &str = "projects";

/// Kind of a statsd sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A counter delta (`c`).
    Counter,

    /// A timing in integer milliseconds (`ms`).
    Timing,

    /// A gauge value (`g`); never sampled.
    Gauge,
}

impl MetricKind {
    /// Returns the statsd type token for the kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "c",
            MetricKind::Timing => "ms",
            MetricKind::Gauge => "g",
        }
    }
}

/// The fixed set of metric operations a sink accepts.
///
/// Implemented by [`StatsdClient`] for the wire, and by in-memory fakes in
/// tests; the tracer reports through this seam.
pub trait MetricSink {
    /// Bumps a counter by one.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when delivery fails.
    fn increment(&mut self, key: &str) -> Result<(), TransportError>;

    /// Drops a counter by one.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when delivery fails.
    fn decrement(&mut self, key: &str) -> Result<(), TransportError>;

    /// Adjusts a counter by an arbitrary delta.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when delivery fails.
    fn count(&mut self, key: &str, value: i64) -> Result<(), TransportError>;

    /// Records a timing in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when delivery fails.
    fn timing(&mut self, key: &str, value: i64) -> Result<(), TransportError>;

    /// Records a gauge value.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when delivery fails.
    fn gauge(&mut self, key: &str, value: i64) -> Result<(), TransportError>;
}

/// Client that encodes metric samples as statsd text lines and delivers them
/// to a metrics daemon.
pub struct StatsdClient {
    destination: Destination,
    transport: Transport,
    namespace: String,
    force_sampling: bool,
}

impl StatsdClient {
    /// Creates a client pushing to the given destination, with every key
    /// prefixed by `projects.<namespace>.`.
    pub fn new<N: AsRef<str>>(destination: Destination, namespace: N) -> Self {
        StatsdClient {
            destination,
            transport: Transport::new(),
            namespace: format!("{ROOT_NAMESPACE}.{}", namespace.as_ref()),
            force_sampling: false,
        }
    }

    /// Disables probabilistic dropping: sampled lines are always emitted,
    /// still carrying their `|@rate` suffix.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_force_sampling(mut self, force_sampling: bool) -> Self {
        self.force_sampling = force_sampling;
        self
    }

    /// Replaces the namespace under the root prefix.
    pub fn set_namespace<N: AsRef<str>>(&mut self, namespace: N) {
        self.namespace = format!("{ROOT_NAMESPACE}.{}", namespace.as_ref());
    }

    /// Returns the full namespace prefix, root included.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the host of the metrics daemon.
    pub fn host(&self) -> &str {
        self.destination.host()
    }

    /// Bumps a counter by one at the given sample rate.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when delivery fails.
    pub fn increment_sampled(&mut self, key: &str, sample_rate: f64) -> Result<(), TransportError> {
        self.count_sampled(key, 1, sample_rate)
    }

    /// Drops a counter by one at the given sample rate.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when delivery fails.
    pub fn decrement_sampled(&mut self, key: &str, sample_rate: f64) -> Result<(), TransportError> {
        self.count_sampled(key, -1, sample_rate)
    }

    /// Adjusts a counter by an arbitrary delta at the given sample rate.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when delivery fails.
    pub fn count_sampled(
        &mut self,
        key: &str,
        value: i64,
        sample_rate: f64,
    ) -> Result<(), TransportError> {
        self.send_metric(key, value, MetricKind::Counter, sample_rate)
    }

    /// Records a timing in milliseconds at the given sample rate.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when delivery fails.
    pub fn timing_sampled(
        &mut self,
        key: &str,
        value: i64,
        sample_rate: f64,
    ) -> Result<(), TransportError> {
        self.send_metric(key, value, MetricKind::Timing, sample_rate)
    }

    /// Closes every pooled connection to the metrics daemon.
    pub fn close(&mut self) {
        self.transport.close_all();
    }

    /// Encodes one sample as a wire line, or returns `None` when the sample
    /// is dropped by the rate draw. Dropping is silent and not an error.
    fn encode(
        &self,
        key: &str,
        value: i64,
        kind: MetricKind,
        sample_rate: f64,
    ) -> Option<String> {
        let mut value_buf = itoa::Buffer::new();
        let mut line = format!("{}.{}", self.namespace, key).to_lowercase();
        line.push(':');
        line.push_str(value_buf.format(value));
        line.push('|');
        line.push_str(kind.as_str());

        if sample_rate < 1.0 {
            let draw: f64 = rand::rng().random();
            if draw <= sample_rate || self.force_sampling {
                let mut rate_buf = ryu::Buffer::new();
                line.push_str("|@");
                line.push_str(rate_buf.format(sample_rate));
                Some(line)
            } else {
                None
            }
        } else {
            Some(line)
        }
    }

    fn send_metric(
        &mut self,
        key: &str,
        value: i64,
        kind: MetricKind,
        sample_rate: f64,
    ) -> Result<(), TransportError> {
        let Some(line) = self.encode(key, value, kind, sample_rate) else {
            return Ok(());
        };

        let mut payload = line.into_bytes();
        if !self.destination.is_udp() {
            payload.push(b'\n');
        }

        self.transport.send(&self.destination, &payload)?;
        Ok(())
    }
}

impl MetricSink for StatsdClient {
    fn increment(&mut self, key: &str) -> Result<(), TransportError> {
        self.count_sampled(key, 1, 1.0)
    }

    fn decrement(&mut self, key: &str) -> Result<(), TransportError> {
        self.count_sampled(key, -1, 1.0)
    }

    fn count(&mut self, key: &str, value: i64) -> Result<(), TransportError> {
        self.count_sampled(key, value, 1.0)
    }

    fn timing(&mut self, key: &str, value: i64) -> Result<(), TransportError> {
        self.timing_sampled(key, value, 1.0)
    }

    fn gauge(&mut self, key: &str, value: i64) -> Result<(), TransportError> {
        self.send_metric(key, value, MetricKind::Gauge, 1.0)
    }
}
