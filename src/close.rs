//! Close status codes as defined in [RFC 6455 Section 7.4](https://datatracker.ietf.org/doc/html/rfc6455#section-7.4).
//!
//! Codes are carried as the first two bytes (big endian) of a close frame's payload.
//! Application specific codes (4000-4999) are represented by [`CloseCode::Other`].

/// Status code carried by a close frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000: the purpose for which the connection was established has been fulfilled.
    Normal,
    /// 1001: an endpoint is going away (server shutdown, browser navigating away).
    Away,
    /// 1002: the endpoint is terminating the connection due to a protocol error.
    Protocol,
    /// 1003: the endpoint received a type of data it cannot accept.
    Unsupported,
    /// 1005: no status code was present. Must not be sent on the wire.
    Status,
    /// 1006: the connection was closed abnormally. Must not be sent on the wire.
    Abnormal,
    /// 1007: message data was inconsistent with its type (e.g. non UTF-8 text).
    Invalid,
    /// 1008: a message violated the endpoint's policy.
    Policy,
    /// 1009: a message was too big to process.
    Size,
    /// 1010: the client expected an extension the server didn't negotiate.
    Extension,
    /// 1011: the server hit an unexpected condition.
    Error,
    /// 1012: the service is restarting.
    Restart,
    /// 1013: the service is overloaded, try again later.
    Again,
    /// Any other code, including the application range 4000-4999.
    Other(u16),
}

impl CloseCode {
    /// Returns whether the code may be sent in a close frame.
    pub fn is_allowed(self) -> bool {
        !matches!(u16::from(self), 0..=999 | 1004..=1006 | 1015..=2999 | 5000..=u16::MAX)
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::Protocol,
            1003 => Self::Unsupported,
            1005 => Self::Status,
            1006 => Self::Abnormal,
            1007 => Self::Invalid,
            1008 => Self::Policy,
            1009 => Self::Size,
            1010 => Self::Extension,
            1011 => Self::Error,
            1012 => Self::Restart,
            1013 => Self::Again,
            code => Self::Other(code),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Status => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Restart => 1012,
            CloseCode::Again => 1013,
            CloseCode::Other(code) => code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_codes_round_trip() {
        for code in [1000u16, 1001, 1002, 1003, 1007, 1008, 1009, 1010, 1011, 1012, 1013] {
            assert_eq!(u16::from(CloseCode::from(code)), code);
            assert!(!matches!(CloseCode::from(code), CloseCode::Other(_)));
        }
    }

    #[test]
    fn test_application_codes() {
        assert_eq!(CloseCode::from(4000), CloseCode::Other(4000));
        assert!(CloseCode::Other(4001).is_allowed());
    }

    #[test]
    fn test_reserved_codes_not_allowed() {
        assert!(!CloseCode::Status.is_allowed());
        assert!(!CloseCode::Abnormal.is_allowed());
        assert!(!CloseCode::from(999).is_allowed());
        assert!(!CloseCode::from(1015).is_allowed());
        assert!(!CloseCode::from(5000).is_allowed());
        assert!(CloseCode::Normal.is_allowed());
        assert!(CloseCode::from(3000).is_allowed());
    }
}
