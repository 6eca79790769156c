//! The HTTP/1.1 upgrade exchange that opens a WebSocket session
//! ([RFC 6455 Section 4](https://datatracker.ietf.org/doc/html/rfc6455#section-4)).
//!
//! The client writes the text built by [`request`] and then feeds the server's reply to a
//! [`ResponseParser`] **one byte at a time**. The response has no length prefix, and the
//! server may send its first frame right behind it, so reading more than the parser asked
//! for could swallow WebSocket data.
use base64::prelude::*;
use nom::{
    bytes::complete::{tag, take_while1},
    character::complete::{char, crlf, digit1, not_line_ending, space0, space1},
    combinator::map_res,
    multi::many0,
    sequence::{preceded, terminated},
    IResult, Parser,
};
use sha1::{Digest, Sha1};
use thiserror::Error;
use url::Url;

/// The only protocol version spoken by this crate.
pub const WEBSOCKET_VERSION: u8 = 13;

/// Magic value appended to the key before hashing, from RFC 6455.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the size of the response head.
const MAX_RESPONSE_SIZE: usize = 8192;

/// Why the opening handshake failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// The peer closed the connection before the response was complete.
    #[error("connection closed during handshake")]
    ConnectionClosed,

    /// The response head could not be parsed as HTTP.
    #[error("malformed response")]
    Malformed,

    /// The response head exceeded 8 KiB.
    #[error("response too large")]
    TooLarge,

    /// Returned when receiving an HTTP status code other than 101.
    #[error("invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// The "Upgrade" header is missing or isn't "websocket".
    #[error("invalid upgrade header")]
    InvalidUpgradeHeader,

    /// The "Connection" header is missing or doesn't contain "upgrade".
    #[error("invalid connection header")]
    InvalidConnectionHeader,

    /// "Sec-WebSocket-Accept" doesn't match the key that was sent.
    #[error("invalid Sec-WebSocket-Accept")]
    InvalidAcceptKey,

    /// Connecting, writing the request or reading the response failed.
    #[error("{0}")]
    Io(String),
}

/// Generates a random `Sec-WebSocket-Key`.
pub fn generate_key() -> String {
    let input: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(input)
}

/// Computes the `Sec-WebSocket-Accept` value a server must answer to `key`.
pub fn generate_accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WS_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Builds the upgrade request for `url`.
///
/// `headers` are appended verbatim after the mandatory ones, in order.
pub fn request(url: &Url, key: &str, headers: &[(String, String)]) -> String {
    let host = url.host_str().unwrap_or_default();
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let target = &url[url::Position::BeforePath..url::Position::AfterQuery];

    let mut req = format!(
        "GET {target} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: {WEBSOCKET_VERSION}\r\n"
    );
    for (name, value) in headers {
        req.push_str(name);
        req.push_str(": ");
        req.push_str(value);
        req.push_str("\r\n");
    }
    req.push_str("\r\n");
    req
}

/// A validated server response.
#[derive(Debug, Clone)]
pub struct Response {
    /// Negotiated protocol version.
    pub version: u8,
    /// Response headers, in the order received.
    pub headers: Vec<(String, String)>,
}

impl Response {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Incremental parser for the server's response.
pub struct ResponseParser {
    key: String,
    buf: Vec<u8>,
}

impl ResponseParser {
    /// `key` is the `Sec-WebSocket-Key` that was sent in the request.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            buf: Vec::with_capacity(256),
        }
    }

    /// Feeds one byte. Returns `Ok(None)` while the head is incomplete and the validated
    /// response once the terminating blank line arrived.
    pub fn push(&mut self, byte: u8) -> Result<Option<Response>, HandshakeError> {
        self.buf.push(byte);
        if !self.buf.ends_with(b"\r\n\r\n") {
            if self.buf.len() >= MAX_RESPONSE_SIZE {
                return Err(HandshakeError::TooLarge);
            }
            return Ok(None);
        }

        let head = std::str::from_utf8(&self.buf).map_err(|_| HandshakeError::Malformed)?;
        let (status, headers) = match response_head(head) {
            Ok(("", parsed)) => parsed,
            _ => return Err(HandshakeError::Malformed),
        };

        let response = Response {
            version: WEBSOCKET_VERSION,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.to_string(), value.trim_end().to_string()))
                .collect(),
        };
        self.verify(status, &response)?;

        Ok(Some(response))
    }

    fn verify(&self, status: u16, response: &Response) -> Result<(), HandshakeError> {
        if status != 101 {
            return Err(HandshakeError::InvalidStatusCode(status));
        }

        if !response
            .header("Upgrade")
            .map(|h| h.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false)
        {
            return Err(HandshakeError::InvalidUpgradeHeader);
        }

        if !response
            .header("Connection")
            .map(|h| {
                h.split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
            })
            .unwrap_or(false)
        {
            return Err(HandshakeError::InvalidConnectionHeader);
        }

        if response.header("Sec-WebSocket-Accept") != Some(generate_accept_key(&self.key).as_str())
        {
            return Err(HandshakeError::InvalidAcceptKey);
        }

        Ok(())
    }
}

/// `HTTP/1.1 101 Switching Protocols\r\n`
fn status_line(input: &str) -> IResult<&str, u16> {
    let (input, _) = (tag("HTTP/"), digit1, char('.'), digit1, space1).parse(input)?;
    let (input, status) = map_res(digit1, str::parse::<u16>).parse(input)?;
    let (input, _) = terminated(not_line_ending, crlf).parse(input)?;
    Ok((input, status))
}

/// `Name: value\r\n`
fn header_line(input: &str) -> IResult<&str, (&str, &str)> {
    let (input, name) =
        take_while1(|c: char| c.is_ascii_graphic() && c != ':').parse(input)?;
    let (input, value) =
        preceded((char(':'), space0), terminated(not_line_ending, crlf)).parse(input)?;
    Ok((input, (name, value)))
}

fn response_head(input: &str) -> IResult<&str, (u16, Vec<(&str, &str)>)> {
    let (input, status) = status_line(input)?;
    let (input, headers) = terminated(many0(header_line), crlf).parse(input)?;
    Ok((input, (status, headers)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut ResponseParser, text: &str) -> Result<Option<Response>, HandshakeError> {
        let mut result = Ok(None);
        for byte in text.bytes() {
            result = parser.push(byte);
            if !matches!(result, Ok(None)) {
                break;
            }
        }
        result
    }

    fn valid_response(key: &str) -> String {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\r\n",
            generate_accept_key(key)
        )
    }

    #[test]
    fn test_accept_key_rfc_sample() {
        assert_eq!(
            generate_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaE9kHRAIEq5JXmzxo="
        );
    }

    #[test]
    fn test_generate_key_is_16_bytes() {
        let key = generate_key();
        assert_eq!(BASE64_STANDARD.decode(&key).unwrap().len(), 16);
        assert_ne!(key, generate_key());
    }

    #[test]
    fn test_request_text() {
        let url: Url = "ws://example.com:8080/chat?room=1".parse().unwrap();
        let headers = vec![("Cookie".to_string(), "name=value".to_string())];
        let req = request(&url, "KEY", &headers);

        assert!(req.starts_with("GET /chat?room=1 HTTP/1.1\r\n"));
        assert!(req.contains("Host: example.com:8080\r\n"));
        assert!(req.contains("Upgrade: websocket\r\n"));
        assert!(req.contains("Connection: Upgrade\r\n"));
        assert!(req.contains("Sec-WebSocket-Key: KEY\r\n"));
        assert!(req.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(req.ends_with("Cookie: name=value\r\n\r\n"));
    }

    #[test]
    fn test_request_default_path_and_port() {
        let url: Url = "ws://example.com".parse().unwrap();
        let req = request(&url, "KEY", &[]);
        assert!(req.starts_with("GET / HTTP/1.1\r\n"));
        assert!(req.contains("Host: example.com\r\n"));
    }

    #[test]
    fn test_parse_valid_response() {
        let mut parser = ResponseParser::new("dGhlIHNhbXBsZSBub25jZQ==");
        let text = valid_response("dGhlIHNhbXBsZSBub25jZQ==");

        let (head, last) = text.split_at(text.len() - 1);
        assert!(matches!(feed(&mut parser, head), Ok(None)));

        let response = parser.push(last.as_bytes()[0]).unwrap().unwrap();
        assert_eq!(response.version, 13);
        assert_eq!(response.header("upgrade"), Some("websocket"));
    }

    #[test]
    fn test_connection_header_token_list() {
        let text = valid_response("k").replace("Connection: Upgrade", "Connection: keep-alive, Upgrade");
        assert!(feed(&mut ResponseParser::new("k"), &text).unwrap().is_some());
    }

    #[test]
    fn test_invalid_responses() {
        let text = valid_response("k").replace("101 Switching Protocols", "404 Not Found");
        assert_eq!(
            feed(&mut ResponseParser::new("k"), &text).unwrap_err(),
            HandshakeError::InvalidStatusCode(404)
        );

        let text = valid_response("k").replace("Upgrade: websocket", "Upgrade: h2c");
        assert_eq!(
            feed(&mut ResponseParser::new("k"), &text).unwrap_err(),
            HandshakeError::InvalidUpgradeHeader
        );

        let text = valid_response("k").replace("Connection: Upgrade", "Connection: close");
        assert_eq!(
            feed(&mut ResponseParser::new("k"), &text).unwrap_err(),
            HandshakeError::InvalidConnectionHeader
        );

        let text = valid_response("other");
        assert_eq!(
            feed(&mut ResponseParser::new("k"), &text).unwrap_err(),
            HandshakeError::InvalidAcceptKey
        );

        assert_eq!(
            feed(&mut ResponseParser::new("k"), "garbage\r\n\r\n").unwrap_err(),
            HandshakeError::Malformed
        );
    }

    #[test]
    fn test_response_too_large() {
        let mut parser = ResponseParser::new("k");
        let mut result = Ok(None);
        for _ in 0..MAX_RESPONSE_SIZE {
            result = parser.push(b'a');
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result.unwrap_err(), HandshakeError::TooLarge);
    }
}
