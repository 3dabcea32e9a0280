use std::time::{Duration, Instant};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::error;

use crate::{process::ProcessStats, statsd::MetricSink};

const GLOBAL_PREFIX: &str = "all_hosts";
const HOST_PREFIX: &str = "by_hosts";
const ENDPOINT_PREFIX: &str = "by_endpoints";
const MEMORY_KEY: &str = "memory_usage";

/// Raised when `end` names the span it expects to close and the top of the
/// stack disagrees.
///
/// The mismatched frame has already been popped, so the stack is corrected;
/// this is a programmer-error signal, not a corruption.
#[derive(Debug, Error)]
#[error("expected span name: {expected} not as closed: {actual}")]
pub struct SpanMismatchError {
    /// Name the caller expected to close.
    pub expected: String,

    /// Name actually found on top of the stack.
    pub actual: String,
}

struct TraceFrame {
    name: String,
    started: Instant,
}

/// Aggregated measurements for one span name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanSummary {
    /// Completed or counted occurrences.
    pub count: u64,

    /// Total measured duration across completions.
    pub total: Duration,
}

/// Supplies host and endpoint labels at report time.
///
/// Callers hand the tracer a label provider instead of the tracer inspecting
/// ambient process state.
pub trait SpanLabels {
    /// Label grouping metrics by reporting host, if any.
    fn hostname(&self) -> Option<String>;

    /// Label grouping metrics by handled endpoint, if any.
    fn endpoint(&self) -> Option<String>;
}

/// Measures overlapping and recursive named spans on a LIFO stack and
/// aggregates per-name count/duration totals for periodic flush.
///
/// The tracer is an explicit context object: construct one per process (or
/// per test) and pass it to all call sites; [`reset`](Tracer::reset) restores
/// the rest state for test isolation.
#[derive(Default)]
pub struct Tracer {
    stack: Vec<TraceFrame>,
    summaries: IndexMap<String, SpanSummary>,
    host: Option<String>,
    endpoint: Option<String>,
}

impl Tracer {
    /// Creates an idle tracer.
    pub fn new() -> Self {
        Tracer::default()
    }

    /// Opens a span, pushing a frame onto the stack.
    ///
    /// Spans may nest recursively under the same name and may overlap
    /// arbitrarily; only stack order relates them.
    pub fn start<N: Into<String>>(&mut self, name: N) {
        self.stack.push(TraceFrame { name: name.into(), started: Instant::now() });
    }

    /// Bumps the count for a name without measuring a duration.
    ///
    /// A one-shot event counter; the stack is untouched.
    pub fn increment<N: Into<String>>(&mut self, name: N) {
        self.summaries.entry(name.into()).or_default().count += 1;
    }

    /// Closes the span on top of the stack and accumulates its duration.
    ///
    /// Returns `Ok(false)` without error when the stack is empty, so cleanup
    /// code can call it unconditionally.
    ///
    /// # Errors
    ///
    /// Returns a [`SpanMismatchError`] when `expected` is given and differs
    /// from the popped frame's name. The frame is popped and discarded
    /// either way, and nothing is accumulated for it.
    pub fn end(&mut self, expected: Option<&str>) -> Result<bool, SpanMismatchError> {
        let Some(frame) = self.stack.pop() else {
            return Ok(false);
        };
        let elapsed = frame.started.elapsed();

        if let Some(expected) = expected {
            if expected != frame.name {
                return Err(SpanMismatchError {
                    expected: expected.to_string(),
                    actual: frame.name,
                });
            }
        }

        let summary = self.summaries.entry(frame.name).or_default();
        summary.count += 1;
        summary.total += elapsed;
        Ok(true)
    }

    /// Ends each candidate span only while it sits on top of the stack.
    ///
    /// A safety net for cleanup code that may or may not have left spans
    /// open; non-matches are silent no-ops.
    pub fn end_if_opened(&mut self, names: &[&str]) {
        for name in names.iter().copied() {
            let on_top = self.stack.last().is_some_and(|frame| frame.name == name);
            if on_top {
                // The top frame was just checked, so a mismatch cannot occur.
                let _ = self.end(Some(name));
            }
        }
    }

    /// Ends every open span, innermost first.
    pub fn end_all(&mut self) {
        while let Ok(true) = self.end(None) {}
    }

    /// Clears the stack, the summaries, and the labels.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.summaries.clear();
        self.host = None;
        self.endpoint = None;
    }

    /// Sets or clears the host label used by [`report`](Tracer::report).
    pub fn set_host(&mut self, host: Option<String>) {
        self.host = host;
    }

    /// Returns the host label, if set.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Sets or clears the endpoint label used by [`report`](Tracer::report).
    pub fn set_endpoint(&mut self, endpoint: Option<String>) {
        self.endpoint = endpoint;
    }

    /// Returns the endpoint label, if set.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Returns the accumulated summaries, in first-completion order.
    pub fn summaries(&self) -> &IndexMap<String, SpanSummary> {
        &self.summaries
    }

    /// Renders the summaries as one human-readable line, e.g.
    /// `db.query 0.123 (2), render 0.045 (1)`.
    pub fn render_summaries(&self) -> String {
        self.summaries
            .iter()
            .map(|(name, summary)| {
                format!("{name} {:.3} ({})", summary.total.as_secs_f64(), summary.count)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Emits every summary through the sink.
    ///
    /// Each span name is sanitized to a metric-safe token, then its count
    /// and integer-millisecond timing go out under the global key, the
    /// per-host key (when a host label is set), and the per-endpoint key
    /// (when an endpoint label is set), followed by one current-memory
    /// gauge in kilobytes per key prefix.
    ///
    /// Reporting is best-effort: sink failures are logged and skipped, and
    /// the summaries stay in memory until [`reset`](Tracer::reset).
    pub fn report<S: MetricSink>(&self, sink: &mut S) {
        let mut prefixes = vec![GLOBAL_PREFIX.to_string()];
        if let Some(host) = &self.host {
            prefixes.push(format!("{HOST_PREFIX}.{host}"));
        }
        if let Some(endpoint) = &self.endpoint {
            prefixes.push(format!("{ENDPOINT_PREFIX}.{endpoint}"));
        }

        for (name, summary) in &self.summaries {
            let metric = sanitize_metric_name(name);
            for prefix in &prefixes {
                let key = format!("{prefix}.{metric}");
                if let Err(e) = sink.count(&key, summary.count as i64) {
                    error!(key = %key, error = %e, "Failed to report span count.");
                }
                if let Err(e) = sink.timing(&key, summary.total.as_millis() as i64) {
                    error!(key = %key, error = %e, "Failed to report span timing.");
                }
            }
        }

        let memory_kb = (ProcessStats::capture().current_bytes / 1024) as i64;
        for prefix in &prefixes {
            let key = format!("{prefix}.{MEMORY_KEY}");
            if let Err(e) = sink.gauge(&key, memory_kb) {
                error!(key = %key, error = %e, "Failed to report memory gauge.");
            }
        }
    }

    /// Shutdown path: ends every open span, applies the provided labels, and
    /// reports.
    pub fn finish<S: MetricSink>(&mut self, sink: &mut S, labels: &dyn SpanLabels) {
        self.end_all();
        self.set_host(labels.hostname());
        self.set_endpoint(labels.endpoint());
        self.report(sink);
    }
}

/// Collapses runs of characters outside `[A-Za-z0-9_-]` to a single `-` and
/// lowercases the rest, after trimming surrounding whitespace.
fn sanitize_metric_name(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());
    let mut in_run = false;

    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            in_run = false;
            sanitized.push(ch.to_ascii_lowercase());
        } else if !in_run {
            in_run = true;
            sanitized.push('-');
        }
    }

    sanitized
}
