use std::io;

use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    config::Destination,
    pool::{ConnectionError, ConnectionPool},
};

/// Maximum payload length accepted for a single UDP datagram.
pub const UDP_MAX_PAYLOAD: usize = 8190;

// One initial attempt plus three retries.
const SEND_TRIES_COUNT: u32 = 4;

/// Errors that could occur while delivering a payload.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A socket could not be established after exhausting connect retries.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// A UDP payload exceeds the datagram ceiling.
    ///
    /// Raised before any connection is acquired or write attempted, since
    /// retrying cannot fix size.
    #[error("payload of {len} bytes exceeds the {} byte datagram ceiling", UDP_MAX_PAYLOAD)]
    PacketTooLarge {
        /// Length of the rejected payload.
        len: usize,
    },

    /// Every write attempt failed.
    #[error("payload could not be delivered: {reason}")]
    SendFailure {
        /// Diagnostic from the last failed attempt.
        reason: String,
    },
}

/// Best-effort sender that delivers byte payloads over pooled connections
/// with bounded retries.
#[derive(Default)]
pub struct Transport {
    pool: ConnectionPool,
}

impl Transport {
    /// Creates a transport with an empty connection pool.
    pub fn new() -> Self {
        Transport { pool: ConnectionPool::new() }
    }

    /// Sends one payload to the destination, returning the number of bytes
    /// written.
    ///
    /// Each attempt acquires a pooled connection and issues a single
    /// best-effort write; a zero-byte or failed write closes the connection
    /// so the next attempt reconnects. The first attempt reporting a
    /// positive byte count wins.
    ///
    /// # Errors
    ///
    /// [`TransportError::PacketTooLarge`] immediately for oversized UDP
    /// payloads, [`TransportError::Connection`] when a socket could not be
    /// established, and [`TransportError::SendFailure`] once the retry
    /// budget is spent, carrying the last captured write error.
    pub fn send(
        &mut self,
        destination: &Destination,
        payload: &[u8],
    ) -> Result<usize, TransportError> {
        if destination.is_udp() && payload.len() > UDP_MAX_PAYLOAD {
            return Err(TransportError::PacketTooLarge { len: payload.len() });
        }

        let mut last_error: Option<io::Error> = None;

        for attempt in 1..=SEND_TRIES_COUNT {
            let connection = self.pool.acquire(destination)?;
            match connection.send(payload) {
                Ok(sent) if sent > 0 => {
                    trace!(
                        fingerprint = %destination.fingerprint(),
                        sent,
                        attempt,
                        "Payload delivered."
                    );
                    return Ok(sent);
                }
                Ok(_) => {
                    debug!(
                        fingerprint = %destination.fingerprint(),
                        attempt,
                        "Write reported zero bytes; recycling connection."
                    );
                    self.pool.close(destination);
                }
                Err(e) => {
                    debug!(
                        fingerprint = %destination.fingerprint(),
                        attempt,
                        error = %e,
                        "Write failed; recycling connection."
                    );
                    last_error = Some(e);
                    self.pool.close(destination);
                }
            }
        }

        let reason = match last_error {
            Some(e) => e.to_string(),
            None => "no bytes were written".to_string(),
        };
        Err(TransportError::SendFailure { reason })
    }

    /// Closes the pooled connection for the destination, if any.
    pub fn close(&mut self, destination: &Destination) {
        self.pool.close(destination);
    }

    /// Closes every pooled connection.
    pub fn close_all(&mut self) {
        self.pool.close_all();
    }

    #[cfg(test)]
    pub(crate) fn pooled_connections(&self) -> usize {
        self.pool.connection_count()
    }
}
