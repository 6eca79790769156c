use std::time::Duration;

use crate::{close::CloseCode, codec::MAX_PAYLOAD_READ};

/// Interval between keepalive pings unless configured otherwise.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(20);

/// How long [`WebSocket::close`](crate::WebSocket::close) waits for the peer's close frame
/// before tearing the connection down.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(20);

/// Keepalive policy of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ping {
    /// Enqueue an empty ping frame every interval while the connection is open.
    Interval(Duration),
    /// Never send keepalive pings. Pings from the peer are still answered.
    Disabled,
}

impl Default for Ping {
    fn default() -> Self {
        Ping::Interval(DEFAULT_PING_INTERVAL)
    }
}

/// Configuration of a connection, passed to
/// [`WebSocket::connect_with_options`](crate::WebSocket::connect_with_options).
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use seqws::Options;
///
/// let options = Options::default()
///     .with_ping_interval(Duration::from_secs(5))
///     .with_header("Authorization", "Bearer token")
///     .with_no_delay();
/// ```
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Keepalive policy.
    ///
    /// Default: a ping every 20 seconds, see [`DEFAULT_PING_INTERVAL`].
    pub ping: Ping,

    /// Extra headers appended to the upgrade request, in order. Names and values are sent
    /// verbatim.
    pub headers: Vec<(String, String)>,

    /// Maximum payload of an inbound message, in bytes. A fragmented message counts as a
    /// whole. Larger messages are treated as malformed data; a message of exactly this size
    /// is accepted.
    ///
    /// Default: 1 MiB as defined in [`MAX_PAYLOAD_READ`], used when `None`.
    pub max_payload_read: Option<usize>,

    /// Sets `TCP_NODELAY` on the socket.
    ///
    /// Default: `false`
    pub no_delay: bool,
}

impl Options {
    /// Sends a keepalive ping every `interval`. A zero interval makes connecting fail with
    /// [`WebSocketError::InvalidPingInterval`](crate::WebSocketError::InvalidPingInterval).
    pub fn with_ping_interval(self, interval: Duration) -> Self {
        Self {
            ping: Ping::Interval(interval),
            ..self
        }
    }

    /// Disables keepalive pings.
    pub fn without_ping(self) -> Self {
        Self {
            ping: Ping::Disabled,
            ..self
        }
    }

    /// Appends a header to the upgrade request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the maximum payload size of inbound messages.
    pub fn with_max_payload_read(self, size: usize) -> Self {
        Self {
            max_payload_read: Some(size),
            ..self
        }
    }

    /// Enables `TCP_NODELAY`.
    pub fn with_no_delay(self) -> Self {
        Self {
            no_delay: true,
            ..self
        }
    }

    pub(crate) fn payload_limit(&self) -> usize {
        self.max_payload_read.unwrap_or(MAX_PAYLOAD_READ)
    }
}

/// Parameters of [`WebSocket::close_with`](crate::WebSocket::close_with).
#[derive(Debug, Clone)]
pub struct CloseOptions {
    /// Status code sent in the close frame. Default: [`CloseCode::Normal`] (1000).
    pub code: CloseCode,
    /// Optional reason sent after the code.
    pub reason: Option<String>,
    /// How long to wait for the peer's close frame before tearing the connection down.
    ///
    /// Default: 20 seconds, see [`DEFAULT_CLOSE_TIMEOUT`].
    pub timeout: Duration,
    /// Whether `close_with` blocks until the connection is fully closed.
    ///
    /// Default: `true`
    pub wait_for_response: bool,
}

impl Default for CloseOptions {
    fn default() -> Self {
        Self {
            code: CloseCode::Normal,
            reason: None,
            timeout: DEFAULT_CLOSE_TIMEOUT,
            wait_for_response: true,
        }
    }
}

impl CloseOptions {
    /// Sets the status code, e.g. `4000` for an application defined reason.
    pub fn with_code(self, code: impl Into<CloseCode>) -> Self {
        Self {
            code: code.into(),
            ..self
        }
    }

    /// Sets the reason text sent after the code. It must fit the 125 byte control frame
    /// payload together with the code.
    pub fn with_reason(self, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..self
        }
    }

    /// Sets how long to wait for the peer's close frame.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Returns as soon as the close frame is handed to the sender.
    pub fn without_waiting(self) -> Self {
        Self {
            wait_for_response: false,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert_eq!(options.ping, Ping::Interval(Duration::from_secs(20)));
        assert!(options.headers.is_empty());
        assert_eq!(options.payload_limit(), MAX_PAYLOAD_READ);
        assert!(!options.no_delay);

        let close = CloseOptions::default();
        assert_eq!(close.code, CloseCode::Normal);
        assert_eq!(close.reason, None);
        assert_eq!(close.timeout, Duration::from_secs(20));
        assert!(close.wait_for_response);
    }

    #[test]
    fn test_builders() {
        let options = Options::default()
            .with_header("A", "1")
            .with_header("B", "2")
            .without_ping()
            .with_max_payload_read(16);
        assert_eq!(
            options.headers,
            vec![("A".into(), "1".into()), ("B".into(), "2".into())]
        );
        assert_eq!(options.ping, Ping::Disabled);
        assert_eq!(options.payload_limit(), 16);

        let close = CloseOptions::default()
            .with_code(4000)
            .with_reason("bye")
            .with_timeout(Duration::from_millis(500))
            .without_waiting();
        assert_eq!(close.code, CloseCode::Other(4000));
        assert_eq!(close.reason.as_deref(), Some("bye"));
        assert_eq!(close.timeout, Duration::from_millis(500));
        assert!(!close.wait_for_response);
    }
}
