//! An in-process observability client for statsd-style metrics daemons and
//! Logstash-style structured-log collectors.
//!
//! # Usage
//!
//! The crate has three entry points, all built on the same pooled,
//! reconnect-capable transport:
//!
//! ```no_run
//! # use logwire::{Destination, LogContext, LogSettings, Logstash, Protocol, Severity, StatsdClient, Tracer};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Structured logs: one enriched JSON object per message, newline
//! // terminated, delivered whole over UDP or TCP.
//! let logs = Destination::new("logs.internal", 5170, Protocol::Udp)?;
//! let settings = LogSettings::new("checkout")?.with_channel("payments");
//! let mut logger = Logstash::new(logs, settings);
//! logger.log(Severity::Info, "payment accepted|order=1234", LogContext::new())?;
//!
//! // Metrics: statsd text lines, with optional probabilistic sampling.
//! let metrics = Destination::new("127.0.0.1", 8125, Protocol::Udp)?;
//! let mut statsd = StatsdClient::new(metrics, "checkout");
//! statsd.increment_sampled("payments.accepted", 0.1)?;
//!
//! // Spans: nested named intervals aggregated per name, flushed through
//! // the metrics path on demand.
//! let mut tracer = Tracer::new();
//! tracer.start("db.query");
//! tracer.end(None)?;
//! tracer.report(&mut statsd);
//! # Ok(()) }
//! ```
//!
//! # Behavior
//!
//! This client makes some explicit trade-offs to accomplish its task:
//!
//! - Delivery is best-effort: sends retry a bounded number of times over
//!   recycled connections and then fail, and sampled-out metrics are
//!   silently dropped. Nothing is persisted or acknowledged.
//! - Everything is synchronous and blocking; there is no internal
//!   parallelism. Clients take `&mut self`, so cross-thread use needs an
//!   external mutex.
//! - Connections are reused across sends and recycled after a fixed number
//!   of hits; there is no idle-timeout eviction.
//!
//! Discovery of build metadata, request metadata harvesting, and
//! destination-string parsing belong to the embedding application; this
//! crate consumes already-validated values and never reads environment
//! variables or files for configuration.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]

mod config;
pub use self::config::{ConfigError, Destination, LogSettings, Protocol};

mod logstash;
pub use self::logstash::{fields, LogContext, LogError, Logstash, RequestInfo, Severity};

mod pool;
pub use self::pool::{ConnectionError, ConnectionPool};

mod process;

mod statsd;
pub use self::statsd::{MetricKind, MetricSink, StatsdClient, ROOT_NAMESPACE};

mod tracer;
pub use self::tracer::{SpanLabels, SpanMismatchError, SpanSummary, Tracer};

mod transport;
pub use self::transport::{Transport, TransportError, UDP_MAX_PAYLOAD};
