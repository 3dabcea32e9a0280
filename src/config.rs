use std::fmt;

use thiserror::Error;

pub(crate) const DEFAULT_BUILD: &str = "00000000";
pub(crate) const DEFAULT_STACK_HISTORY: usize = 5;

/// Errors that could occur while validating destination or client settings.
///
/// These are fatal: an invalid configuration is surfaced immediately and is
/// never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The destination host is missing or empty.
    #[error("host is not set or empty")]
    EmptyHost,

    /// The destination port is zero.
    #[error("port is invalid")]
    InvalidPort,

    /// The application name used to label log events is missing or empty.
    #[error("application is not set or empty")]
    EmptyApplication,
}

/// Wire protocol used to reach a collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Datagram transport; one message per packet, size-limited.
    Udp,

    /// Stream transport; messages are written to a persistent connection.
    Tcp,
}

impl Protocol {
    /// Returns the transport ID for the protocol, such as `udp` for UDP.
    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated collector address.
///
/// Two destinations with equal fields are interchangeable; the canonical
/// serialization returned by [`fingerprint`](Destination::fingerprint) keys
/// the connection pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    host: String,
    port: u16,
    protocol: Protocol,
}

impl Destination {
    /// Creates a validated destination.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the host is empty or the port is zero.
    pub fn new<H>(host: H, port: u16, protocol: Protocol) -> Result<Self, ConfigError>
    where
        H: Into<String>,
    {
        let host = host.into();
        if host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        Ok(Destination { host, port, protocol })
    }

    /// Returns the destination host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the destination port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the destination protocol.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Returns `true` if the destination uses the datagram transport.
    pub fn is_udp(&self) -> bool {
        self.protocol == Protocol::Udp
    }

    /// Returns the canonical pool key for the destination.
    pub fn fingerprint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.protocol)
    }
}

/// Settings used to enrich every log event.
///
/// All values are caller-supplied: discovering the build hash, environment
/// name, or deployment root belongs to the setup layer, not to this crate.
#[derive(Debug, Clone)]
pub struct LogSettings {
    application: String,
    channel: Option<String>,
    hostname: Option<String>,
    environment: Option<String>,
    build: String,
    stack_size: usize,
    app_root: Option<String>,
}

impl LogSettings {
    /// Creates settings for the given application label.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the application label is empty.
    pub fn new<A>(application: A) -> Result<Self, ConfigError>
    where
        A: Into<String>,
    {
        let application = application.into();
        if application.is_empty() {
            return Err(ConfigError::EmptyApplication);
        }

        Ok(LogSettings {
            application,
            channel: None,
            hostname: None,
            environment: None,
            build: DEFAULT_BUILD.to_string(),
            stack_size: DEFAULT_STACK_HISTORY,
            app_root: None,
        })
    }

    /// Sets the channel label attached to every event.
    #[must_use]
    pub fn with_channel<C: Into<String>>(mut self, channel: C) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Sets the hostname label attached to every event.
    #[must_use]
    pub fn with_hostname<H: Into<String>>(mut self, hostname: H) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Sets the environment label attached to every event.
    #[must_use]
    pub fn with_environment<E: Into<String>>(mut self, environment: E) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Sets the build identifier attached to every event.
    ///
    /// Defaults to `00000000` when the caller has no build metadata.
    #[must_use]
    pub fn with_build<B: Into<String>>(mut self, build: B) -> Self {
        self.build = build.into();
        self
    }

    /// Sets the maximum number of retained stack trace lines.
    ///
    /// Defaults to 5.
    #[must_use]
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Sets the deployment root path stripped from source locations and
    /// stack trace lines for portability.
    #[must_use]
    pub fn with_app_root<R: Into<String>>(mut self, app_root: R) -> Self {
        self.app_root = Some(app_root.into());
        self
    }

    pub(crate) fn application(&self) -> &str {
        &self.application
    }

    pub(crate) fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub(crate) fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub(crate) fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    pub(crate) fn build(&self) -> &str {
        &self.build
    }

    pub(crate) fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub(crate) fn app_root(&self) -> Option<&str> {
        self.app_root.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, Destination, LogSettings, Protocol};

    #[test]
    fn destination_validation() {
        assert!(matches!(
            Destination::new("", 5170, Protocol::Udp),
            Err(ConfigError::EmptyHost)
        ));
        assert!(matches!(
            Destination::new("logs.internal", 0, Protocol::Tcp),
            Err(ConfigError::InvalidPort)
        ));

        let destination = Destination::new("logs.internal", 5170, Protocol::Udp).unwrap();
        assert_eq!(destination.host(), "logs.internal");
        assert_eq!(destination.port(), 5170);
        assert_eq!(destination.protocol(), Protocol::Udp);
        assert!(destination.is_udp());
    }

    #[test]
    fn fingerprint_is_canonical() {
        let a = Destination::new("10.1.2.3", 8125, Protocol::Tcp).unwrap();
        let b = Destination::new("10.1.2.3", 8125, Protocol::Tcp).unwrap();
        let c = Destination::new("10.1.2.3", 8125, Protocol::Udp).unwrap();

        assert_eq!(a.fingerprint(), "10.1.2.3:8125/tcp");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn settings_defaults() {
        assert!(matches!(LogSettings::new(""), Err(ConfigError::EmptyApplication)));

        let settings = LogSettings::new("checkout").unwrap();
        assert_eq!(settings.application(), "checkout");
        assert_eq!(settings.build(), "00000000");
        assert_eq!(settings.stack_size(), 5);
        assert!(settings.channel().is_none());
        assert!(settings.hostname().is_none());
        assert!(settings.environment().is_none());
        assert!(settings.app_root().is_none());

        let settings = settings
            .with_channel("payments")
            .with_hostname("web-1.internal")
            .with_environment("production")
            .with_build("deadbeef")
            .with_stack_size(3)
            .with_app_root("/srv/app");
        assert_eq!(settings.channel(), Some("payments"));
        assert_eq!(settings.hostname(), Some("web-1.internal"));
        assert_eq!(settings.environment(), Some("production"));
        assert_eq!(settings.build(), "deadbeef");
        assert_eq!(settings.stack_size(), 3);
        assert_eq!(settings.app_root(), Some("/srv/app"));
    }
}
