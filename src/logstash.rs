use std::{fmt, net::IpAddr, panic::Location};

use ipnet::Ipv4Net;
use once_cell::sync::Lazy;
use rand::{distr::Alphanumeric, Rng as _};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    config::{Destination, LogSettings},
    process::ProcessStats,
    transport::{Transport, TransportError},
};

/// Reserved log event field names.
///
/// Fields set by the encoder always win over caller-supplied context keys.
pub mod fields {
    /// General message text.
    pub const MESSAGE: &str = "message";

    /// Lowercase severity name.
    pub const SEVERITY: &str = "severity";

    /// Position within one logger instance's lifetime.
    pub const LOG_SEQUENCE: &str = "log_sequence";

    /// Auxiliary payload split off the message.
    pub const LOG_DATA: &str = "log_data";

    /// Application label.
    pub const APPLICATION: &str = "app";

    /// Build identifier.
    pub const BUILD: &str = "build";

    /// Producing facility.
    pub const FACILITY: &str = "facility";

    /// Pseudo-unique id of one message.
    pub const MESSAGE_ID: &str = "message_id";

    /// Id shared by all messages from one logger instance.
    pub const INSTANCE_ID: &str = "instance_id";

    /// Environment label.
    pub const ENVIRONMENT: &str = "env";

    /// Channel label.
    pub const CHANNEL: &str = "channel";

    /// Originating host label.
    pub const HOSTNAME: &str = "hostname";

    /// Source file of the log call.
    pub const FILE: &str = "file";

    /// Source line of the log call.
    pub const LINE: &str = "line";

    /// Cleaned, line-capped error chain.
    pub const STACK: &str = "stack";

    /// Peak memory footprint, in megabytes.
    pub const MEM_MAX: &str = "mem_max";

    /// Current memory footprint, in megabytes.
    pub const MEM_ABS: &str = "mem_abs";

    /// Process id.
    pub const PID: &str = "pid";

    /// Remote peer address.
    pub const REMOTE_ADDR: &str = "remote_addr";

    /// `internal` or `external`, classified from the remote address.
    pub const TRAFFIC_TYPE: &str = "traffic_type";

    /// Remote peer user agent.
    pub const USER_AGENT: &str = "user_agent";

    /// Request URI being handled.
    pub const REQUEST_URI: &str = "request_uri";

    /// Path-only portion of the request URI.
    pub const REQUEST_URI_BASE: &str = "request_uri_base";
}

const FACILITY_NAME: &str = "lgstsh";

const MESSAGE_ID_SIZE: usize = 10;

const TRAFFIC_INTERNAL: &str = "internal";
const TRAFFIC_EXTERNAL: &str = "external";

static INTERNAL_NETS: Lazy<[Ipv4Net; 2]> = Lazy::new(|| {
    // RFC1918 ranges treated as internal traffic.
    ["10.0.0.0/8".parse().expect("valid network"), "192.168.0.0/16".parse().expect("valid network")]
});

/// Errors that could occur while encoding or delivering a log event.
#[derive(Debug, Error)]
pub enum LogError {
    /// The event could not be serialized.
    #[error("log event could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The event could not be delivered.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Log severities, rendered lowercase on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// System is unusable.
    Emergency,

    /// Action must be taken immediately.
    Alert,

    /// Critical conditions.
    Critical,

    /// Runtime errors that do not require immediate action.
    Error,

    /// Exceptional occurrences that are not errors.
    Warning,

    /// Normal but significant events.
    Notice,

    /// Interesting events.
    Info,

    /// Detailed debug information.
    Debug,
}

impl Severity {
    /// Returns the lowercase wire form of the severity.
    pub const fn as_str(self) -> &'static str {
        match self {
            Severity::Emergency => "emergency",
            Severity::Alert => "alert",
            Severity::Critical => "critical",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Notice => "notice",
            Severity::Info => "info",
            Severity::Debug => "debug",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied network metadata attached to every event while set.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    remote_addr: Option<IpAddr>,
    user_agent: Option<String>,
    request_uri: Option<String>,
}

impl RequestInfo {
    /// Creates empty request metadata.
    pub fn new() -> Self {
        RequestInfo::default()
    }

    /// Sets the remote peer address.
    #[must_use]
    pub fn with_remote_addr(mut self, remote_addr: IpAddr) -> Self {
        self.remote_addr = Some(remote_addr);
        self
    }

    /// Sets the remote peer user agent.
    #[must_use]
    pub fn with_user_agent<U: Into<String>>(mut self, user_agent: U) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Sets the request URI being handled.
    #[must_use]
    pub fn with_request_uri<U: Into<String>>(mut self, request_uri: U) -> Self {
        self.request_uri = Some(request_uri.into());
        self
    }
}

/// Caller-supplied context merged into one log event.
///
/// Context keys never override reserved fields, and null values are dropped.
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    context_fields: Map<String, Value>,
    exception: Option<Vec<String>>,
}

impl LogContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        LogContext::default()
    }

    /// Adds one context field.
    #[must_use]
    pub fn field<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.context_fields.insert(key.into(), value.into());
        self
    }

    /// Captures an error and its source chain for the event's `stack` field.
    ///
    /// The chain is line-capped and root-stripped when the event is built;
    /// the raw error itself is never serialized.
    #[must_use]
    pub fn exception(mut self, error: &(dyn std::error::Error + 'static)) -> Self {
        self.exception = Some(error_chain_lines(error));
        self
    }
}

fn error_chain_lines(error: &(dyn std::error::Error + 'static)) -> Vec<String> {
    let mut lines = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        lines.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    lines
}

/// Structured-log client delivering enriched JSON lines to a log collector.
///
/// Events go out whole: one JSON object plus a trailing newline per message,
/// as a single datagram over UDP (subject to the datagram ceiling) or a raw
/// write on a persistent TCP stream.
pub struct Logstash {
    destination: Destination,
    settings: LogSettings,
    transport: Transport,
    instance_id: String,
    sequence: u64,
    request_info: Option<RequestInfo>,
}

impl Logstash {
    /// Creates a logger delivering to the given destination.
    pub fn new(destination: Destination, settings: LogSettings) -> Self {
        Logstash {
            destination,
            settings,
            transport: Transport::new(),
            instance_id: random_token(MESSAGE_ID_SIZE),
            sequence: 0,
            request_info: None,
        }
    }

    /// Sets or clears the request metadata attached to subsequent events.
    pub fn set_request_info(&mut self, request_info: Option<RequestInfo>) {
        self.request_info = request_info;
    }

    /// Builds and delivers one log event, returning the bytes sent.
    ///
    /// # Errors
    ///
    /// Returns a [`LogError`] when the event cannot be serialized or
    /// delivered; oversized UDP events are a hard failure, never truncated.
    #[track_caller]
    pub fn log(
        &mut self,
        severity: Severity,
        message: &str,
        context: LogContext,
    ) -> Result<usize, LogError> {
        let location = Location::caller();
        let event = self.build_event(severity, message, context, location);

        let mut payload = serde_json::to_vec(&Value::Object(event))?;
        payload.push(b'\n');

        let sent = self.transport.send(&self.destination, &payload)?;
        Ok(sent)
    }

    /// Logs at [`Severity::Emergency`].
    ///
    /// # Errors
    ///
    /// See [`log`](Logstash::log).
    #[track_caller]
    pub fn emergency(&mut self, message: &str, context: LogContext) -> Result<usize, LogError> {
        self.log(Severity::Emergency, message, context)
    }

    /// Logs at [`Severity::Alert`].
    ///
    /// # Errors
    ///
    /// See [`log`](Logstash::log).
    #[track_caller]
    pub fn alert(&mut self, message: &str, context: LogContext) -> Result<usize, LogError> {
        self.log(Severity::Alert, message, context)
    }

    /// Logs at [`Severity::Critical`].
    ///
    /// # Errors
    ///
    /// See [`log`](Logstash::log).
    #[track_caller]
    pub fn critical(&mut self, message: &str, context: LogContext) -> Result<usize, LogError> {
        self.log(Severity::Critical, message, context)
    }

    /// Logs at [`Severity::Error`].
    ///
    /// # Errors
    ///
    /// See [`log`](Logstash::log).
    #[track_caller]
    pub fn error(&mut self, message: &str, context: LogContext) -> Result<usize, LogError> {
        self.log(Severity::Error, message, context)
    }

    /// Logs at [`Severity::Warning`].
    ///
    /// # Errors
    ///
    /// See [`log`](Logstash::log).
    #[track_caller]
    pub fn warning(&mut self, message: &str, context: LogContext) -> Result<usize, LogError> {
        self.log(Severity::Warning, message, context)
    }

    /// Logs at [`Severity::Notice`].
    ///
    /// # Errors
    ///
    /// See [`log`](Logstash::log).
    #[track_caller]
    pub fn notice(&mut self, message: &str, context: LogContext) -> Result<usize, LogError> {
        self.log(Severity::Notice, message, context)
    }

    /// Logs at [`Severity::Info`].
    ///
    /// # Errors
    ///
    /// See [`log`](Logstash::log).
    #[track_caller]
    pub fn info(&mut self, message: &str, context: LogContext) -> Result<usize, LogError> {
        self.log(Severity::Info, message, context)
    }

    /// Logs at [`Severity::Debug`].
    ///
    /// # Errors
    ///
    /// See [`log`](Logstash::log).
    #[track_caller]
    pub fn debug(&mut self, message: &str, context: LogContext) -> Result<usize, LogError> {
        self.log(Severity::Debug, message, context)
    }

    /// Closes every pooled connection to the log collector.
    pub fn close(&mut self) {
        self.transport.close_all();
    }

    fn build_event(
        &mut self,
        severity: Severity,
        message: &str,
        context: LogContext,
        location: &Location<'_>,
    ) -> Map<String, Value> {
        self.sequence += 1;

        let mut event = Map::new();

        match message.split_once('|') {
            Some((summary, auxiliary)) => {
                event.insert(fields::MESSAGE.to_string(), Value::from(summary));
                event.insert(fields::LOG_DATA.to_string(), Value::from(auxiliary));
            }
            None => {
                event.insert(fields::MESSAGE.to_string(), Value::from(message));
            }
        }
        event.insert(fields::SEVERITY.to_string(), Value::from(severity.as_str()));
        event.insert(fields::LOG_SEQUENCE.to_string(), Value::from(self.sequence));

        event.insert(
            fields::FILE.to_string(),
            Value::from(cut_file_name(location.file(), self.settings.app_root())),
        );
        event.insert(fields::LINE.to_string(), Value::from(location.line()));

        event.insert(fields::APPLICATION.to_string(), Value::from(self.settings.application()));
        event.insert(fields::BUILD.to_string(), Value::from(self.settings.build()));
        event.insert(fields::FACILITY.to_string(), Value::from(FACILITY_NAME));
        event.insert(fields::MESSAGE_ID.to_string(), Value::from(random_token(MESSAGE_ID_SIZE)));
        event.insert(fields::INSTANCE_ID.to_string(), Value::from(self.instance_id.as_str()));

        if let Some(environment) = self.settings.environment() {
            event.insert(fields::ENVIRONMENT.to_string(), Value::from(environment));
        }

        let stats = ProcessStats::capture();
        event.insert(fields::MEM_MAX.to_string(), Value::from(format_megabytes(stats.peak_bytes)));
        event.insert(
            fields::MEM_ABS.to_string(),
            Value::from(format_megabytes(stats.current_bytes)),
        );
        event.insert(fields::PID.to_string(), Value::from(stats.pid));

        if let Some(request_info) = &self.request_info {
            if let Some(remote_addr) = request_info.remote_addr {
                event.insert(fields::REMOTE_ADDR.to_string(), Value::from(remote_addr.to_string()));
                event.insert(fields::TRAFFIC_TYPE.to_string(), Value::from(traffic_type(remote_addr)));
            }
            if let Some(user_agent) = &request_info.user_agent {
                event.insert(fields::USER_AGENT.to_string(), Value::from(user_agent.as_str()));
            }
            if let Some(request_uri) = &request_info.request_uri {
                event.insert(fields::REQUEST_URI.to_string(), Value::from(request_uri.as_str()));
                if let Some(base) = request_uri_base(request_uri) {
                    event.insert(fields::REQUEST_URI_BASE.to_string(), Value::from(base));
                }
            }
        }

        if let Some(channel) = self.settings.channel() {
            event.insert(fields::CHANNEL.to_string(), Value::from(channel));
        }
        if let Some(hostname) = self.settings.hostname() {
            event.insert(fields::HOSTNAME.to_string(), Value::from(hostname));
        }

        let LogContext { context_fields, exception } = context;
        if let Some(lines) = exception {
            event.insert(
                fields::STACK.to_string(),
                Value::from(cleanup_stack(
                    &lines,
                    self.settings.stack_size(),
                    self.settings.app_root(),
                )),
            );
        }

        for (key, value) in context_fields {
            if !event.contains_key(&key) && !value.is_null() {
                event.insert(key, value);
            }
        }

        event
    }
}

fn random_token(length: usize) -> String {
    rand::rng().sample_iter(Alphanumeric).take(length).map(char::from).collect()
}

fn format_megabytes(bytes: u64) -> String {
    format!("{:.1}", bytes as f64 / (1024.0 * 1024.0))
}

fn traffic_type(remote_addr: IpAddr) -> &'static str {
    let internal = match remote_addr {
        IpAddr::V4(v4) => INTERNAL_NETS.iter().any(|net| net.contains(&v4)),
        IpAddr::V6(_) => false,
    };

    if internal {
        TRAFFIC_INTERNAL
    } else {
        TRAFFIC_EXTERNAL
    }
}

fn request_uri_base(request_uri: &str) -> Option<&str> {
    let end = request_uri.find(['?', '#']).unwrap_or(request_uri.len());
    let path = &request_uri[..end];
    if path.is_empty() {
        None
    } else {
        Some(path)
    }
}

fn cleanup_stack(lines: &[String], history_size: usize, app_root: Option<&str>) -> String {
    lines
        .iter()
        .take(history_size)
        .map(|line| cut_root(line, app_root))
        .collect::<Vec<_>>()
        .join("\n")
}

fn cut_root(text: &str, app_root: Option<&str>) -> String {
    match app_root {
        Some(root) if !root.is_empty() => text.replace(root, ""),
        _ => text.to_string(),
    }
}

fn cut_file_name(file: &str, app_root: Option<&str>) -> String {
    match app_root {
        Some(root) if !root.is_empty() => {
            let stripped = file.replace(root, "");
            stripped.trim_start_matches('/').to_string()
        }
        _ => file.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    use serde_json::{json, Value};

    use super::{
        cleanup_stack, cut_file_name, request_uri_base, traffic_type, LogContext, Logstash,
        Severity, MESSAGE_ID_SIZE,
    };
    use crate::config::{Destination, LogSettings, Protocol};

    fn logger(settings: LogSettings) -> Logstash {
        let destination = Destination::new("127.0.0.1", 5170, Protocol::Udp).unwrap();
        Logstash::new(destination, settings)
    }

    fn build(logger: &mut Logstash, severity: Severity, message: &str, context: LogContext) -> serde_json::Map<String, Value> {
        logger.build_event(severity, message, context, std::panic::Location::caller())
    }

    #[test]
    fn message_splits_on_delimiter() {
        let mut logger = logger(LogSettings::new("checkout").unwrap());

        let event = build(&mut logger, Severity::Info, "summary|detail", LogContext::new());
        assert_eq!(event["message"], json!("summary"));
        assert_eq!(event["log_data"], json!("detail"));

        let event = build(&mut logger, Severity::Info, "plain message", LogContext::new());
        assert_eq!(event["message"], json!("plain message"));
        assert!(!event.contains_key("log_data"));
    }

    #[test]
    fn events_carry_enrichment_fields() {
        let settings = LogSettings::new("checkout")
            .unwrap()
            .with_build("deadbeef")
            .with_environment("staging")
            .with_channel("payments")
            .with_hostname("web-1");
        let mut logger = logger(settings);

        let event = build(&mut logger, Severity::Warning, "slow response", LogContext::new());
        assert_eq!(event["app"], json!("checkout"));
        assert_eq!(event["build"], json!("deadbeef"));
        assert_eq!(event["facility"], json!("lgstsh"));
        assert_eq!(event["env"], json!("staging"));
        assert_eq!(event["channel"], json!("payments"));
        assert_eq!(event["hostname"], json!("web-1"));
        assert_eq!(event["severity"], json!("warning"));
        assert_eq!(event["message_id"].as_str().unwrap().len(), MESSAGE_ID_SIZE);
        assert_eq!(event["instance_id"].as_str().unwrap().len(), MESSAGE_ID_SIZE);
        assert_eq!(event["pid"], json!(std::process::id()));
        assert!(event.contains_key("mem_max"));
        assert!(event.contains_key("mem_abs"));
        assert!(event.contains_key("file"));
        assert!(event.contains_key("line"));
    }

    #[test]
    fn sequence_increases_per_event() {
        let mut logger = logger(LogSettings::new("checkout").unwrap());

        let first = build(&mut logger, Severity::Info, "one", LogContext::new());
        let second = build(&mut logger, Severity::Info, "two", LogContext::new());
        assert_eq!(first["log_sequence"], json!(1));
        assert_eq!(second["log_sequence"], json!(2));
    }

    #[test]
    fn message_ids_differ_per_event_within_one_instance() {
        let mut logger = logger(LogSettings::new("checkout").unwrap());

        let first = build(&mut logger, Severity::Info, "one", LogContext::new());
        let second = build(&mut logger, Severity::Info, "two", LogContext::new());
        assert_ne!(first["message_id"], second["message_id"]);
        assert_eq!(first["instance_id"], second["instance_id"]);
    }

    #[test]
    fn context_never_overrides_reserved_fields() {
        let mut logger = logger(LogSettings::new("checkout").unwrap());

        let context = LogContext::new()
            .field("app", "spoofed")
            .field("severity", "spoofed")
            .field("order_id", 1234)
            .field("ignored", Value::Null);
        let event = build(&mut logger, Severity::Error, "declined", context);

        assert_eq!(event["app"], json!("checkout"));
        assert_eq!(event["severity"], json!("error"));
        assert_eq!(event["order_id"], json!(1234));
        assert!(!event.contains_key("ignored"));
    }

    #[test]
    fn exception_chain_is_capped_and_stripped() {
        let io_error = std::io::Error::new(std::io::ErrorKind::Other, "disk unplugged");

        let settings = LogSettings::new("checkout").unwrap().with_stack_size(1);
        let mut logger = logger(settings);
        let context = LogContext::new().exception(&io_error);
        let event = build(&mut logger, Severity::Critical, "write failed", context);
        assert_eq!(event["stack"], json!("disk unplugged"));

        let lines = vec![
            "/srv/app/handlers/cart.rs: overflow".to_string(),
            "caused by: /srv/app/db/pool.rs: timeout".to_string(),
            "caused by: socket closed".to_string(),
        ];
        let cleaned = cleanup_stack(&lines, 2, Some("/srv/app"));
        assert_eq!(cleaned, "/handlers/cart.rs: overflow\ncaused by: /db/pool.rs: timeout");
    }

    #[test]
    fn file_names_lose_the_deployment_root() {
        assert_eq!(cut_file_name("/srv/app/src/cart.rs", Some("/srv/app")), "src/cart.rs");
        assert_eq!(cut_file_name("/srv/app/src/cart.rs", None), "/srv/app/src/cart.rs");
    }

    #[test]
    fn traffic_classification() {
        let internal10 = IpAddr::V4(Ipv4Addr::new(10, 20, 30, 40));
        let internal192 = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));
        let external = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));
        let near_miss = IpAddr::V4(Ipv4Addr::new(192, 169, 0, 1));
        let v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);

        assert_eq!(traffic_type(internal10), "internal");
        assert_eq!(traffic_type(internal192), "internal");
        assert_eq!(traffic_type(external), "external");
        assert_eq!(traffic_type(near_miss), "external");
        assert_eq!(traffic_type(v6), "external");
    }

    #[test]
    fn request_uri_base_is_path_only() {
        assert_eq!(request_uri_base("/cart/checkout?step=2"), Some("/cart/checkout"));
        assert_eq!(request_uri_base("/cart/checkout#summary"), Some("/cart/checkout"));
        assert_eq!(request_uri_base("/plain"), Some("/plain"));
        assert_eq!(request_uri_base("?only=query"), None);
    }

    #[test]
    fn request_metadata_lands_on_events_while_set() {
        let mut logger = logger(LogSettings::new("checkout").unwrap());
        logger.set_request_info(Some(
            super::RequestInfo::new()
                .with_remote_addr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)))
                .with_user_agent("curl/8.0")
                .with_request_uri("/cart?step=1"),
        ));

        let event = build(&mut logger, Severity::Info, "hit", LogContext::new());
        assert_eq!(event["remote_addr"], json!("10.0.0.7"));
        assert_eq!(event["traffic_type"], json!("internal"));
        assert_eq!(event["user_agent"], json!("curl/8.0"));
        assert_eq!(event["request_uri"], json!("/cart?step=1"));
        assert_eq!(event["request_uri_base"], json!("/cart"));

        logger.set_request_info(None);
        let event = build(&mut logger, Severity::Info, "hit", LogContext::new());
        assert!(!event.contains_key("remote_addr"));
    }
}
