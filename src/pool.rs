use std::{
    collections::{hash_map::Entry, HashMap},
    io::{self, Write as _},
    net::{Ipv4Addr, TcpStream, ToSocketAddrs as _, UdpSocket},
    thread::sleep,
    time::Duration,
};

use thiserror::Error;
use tracing::debug;

use crate::config::{Destination, Protocol};

/// Maximum reuses of one pooled connection before forced recycling.
///
/// Guards against collector-side connection staleness; there is no
/// idle-timeout eviction.
pub(crate) const SOCKET_FLUSH_COUNT: u32 = 30;

const CONNECT_TRIES_COUNT: u32 = 3;
const CONNECT_RETRY_PAUSE: Duration = Duration::from_millis(5);
const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Raised when a socket could not be established after exhausting retries.
#[derive(Debug, Error)]
#[error("unable to establish connection to collector: {reason}")]
pub struct ConnectionError {
    reason: String,
}

impl ConnectionError {
    fn new(last_error: Option<io::Error>) -> Self {
        let reason = match last_error {
            Some(e) => e.to_string(),
            None => "no connection attempts were made".to_string(),
        };
        ConnectionError { reason }
    }

    /// Returns the low-level error string from the last failed attempt.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[derive(Debug)]
enum Socket {
    Udp(UdpSocket),
    Tcp(TcpStream),
}

impl Socket {
    fn connect(destination: &Destination) -> io::Result<Self> {
        match destination.protocol() {
            Protocol::Udp => {
                let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
                socket.connect((destination.host(), destination.port()))?;
                Ok(Socket::Udp(socket))
            }
            Protocol::Tcp => {
                let addr = (destination.host(), destination.port())
                    .to_socket_addrs()?
                    .next()
                    .ok_or_else(|| {
                        io::Error::new(
                            io::ErrorKind::AddrNotAvailable,
                            "destination resolved to no addresses",
                        )
                    })?;
                let stream = TcpStream::connect_timeout(&addr, TCP_CONNECT_TIMEOUT)?;
                Ok(Socket::Tcp(stream))
            }
        }
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Socket::Udp(socket) => socket.send(buf),
            Socket::Tcp(stream) => stream.write(buf),
        }
    }
}

/// A live socket owned by the pool, reused until its hit count reaches the
/// flush threshold.
#[derive(Debug)]
pub(crate) struct PooledConnection {
    socket: Socket,
    hits: u32,
}

impl PooledConnection {
    /// Issues a single best-effort write on the pooled socket.
    pub(crate) fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf)
    }
}

/// Pool of live collector sockets keyed by destination fingerprint.
///
/// The pool exclusively owns every socket handle; callers only ever borrow a
/// connection for the duration of one send. Dropping the pool closes every
/// remaining connection.
#[derive(Default)]
pub struct ConnectionPool {
    connections: HashMap<String, PooledConnection>,
}

impl ConnectionPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        ConnectionPool { connections: HashMap::new() }
    }

    /// Returns a live connection for the destination, reusing a cached one
    /// while its hit count is below the flush threshold and opening a fresh
    /// socket otherwise.
    ///
    /// Opening retries up to 3 times with a short fixed pause between
    /// attempts; UDP socket creation is connectionless and expected to
    /// succeed, TCP performs a blocking connect with a fixed timeout.
    pub(crate) fn acquire(
        &mut self,
        destination: &Destination,
    ) -> Result<&mut PooledConnection, ConnectionError> {
        let key = destination.fingerprint();

        let stale = self
            .connections
            .get(&key)
            .is_some_and(|connection| connection.hits >= SOCKET_FLUSH_COUNT);
        if stale {
            debug!(fingerprint = %key, "Recycling connection at flush threshold.");
            self.connections.remove(&key);
        }

        match self.connections.entry(key) {
            Entry::Occupied(entry) => {
                let connection = entry.into_mut();
                connection.hits += 1;
                Ok(connection)
            }
            Entry::Vacant(entry) => {
                let socket = connect_with_retries(destination)?;
                Ok(entry.insert(PooledConnection { socket, hits: 1 }))
            }
        }
    }

    /// Closes the pooled connection for the destination, if any.
    ///
    /// Idempotent; the underlying socket is released by drop.
    pub fn close(&mut self, destination: &Destination) {
        self.connections.remove(&destination.fingerprint());
    }

    /// Closes every pooled connection.
    ///
    /// Idempotent; used for explicit teardown at process end.
    pub fn close_all(&mut self) {
        self.connections.clear();
    }

    #[cfg(test)]
    pub(crate) fn connection_count(&self) -> usize {
        self.connections.len()
    }

    #[cfg(test)]
    fn hits(&self, destination: &Destination) -> Option<u32> {
        self.connections.get(&destination.fingerprint()).map(|connection| connection.hits)
    }
}

fn connect_with_retries(destination: &Destination) -> Result<Socket, ConnectionError> {
    let mut last_error = None;

    for attempt in 1..=CONNECT_TRIES_COUNT {
        match Socket::connect(destination) {
            Ok(socket) => return Ok(socket),
            Err(e) => {
                debug!(
                    fingerprint = %destination.fingerprint(),
                    attempt,
                    error = %e,
                    "Connection attempt failed."
                );
                last_error = Some(e);
                sleep(CONNECT_RETRY_PAUSE);
            }
        }
    }

    Err(ConnectionError::new(last_error))
}
