//! Representation of HTTP method
use std::fmt::Display;

use crate::h1::ParseError;

/// Representation of the requested HTTP Method
/// [IETF RFC 9110 Section 9](https://www.rfc-editor.org/rfc/rfc9110#section-9)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// RFC 9110 9.3.1
    Get,
    /// RFC 9110 9.3.2
    Head,
    /// RFC 9110 9.3.3
    Post,
    /// RFC 9110 9.3.4
    Put,
    /// RFC 9110 9.3.5
    Delete,
    /// RFC 9110 9.3.6
    Connect,
    /// RFC 9110 9.3.7
    Options,
    /// RFC 9110 9.3.8
    Trace,
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
        })
    }
}

impl TryFrom<&[u8]> for Method {
    type Error = ParseError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        match value {
            b"GET" => Ok(Self::Get),
            b"HEAD" => Ok(Self::Head),
            b"POST" => Ok(Self::Post),
            b"PUT" => Ok(Self::Put),
            b"DELETE" => Ok(Self::Delete),
            b"CONNECT" => Ok(Self::Connect),
            b"OPTIONS" => Ok(Self::Options),
            b"TRACE" => Ok(Self::Trace),
            _ => Err(ParseError::Method),
        }
    }
}

#[cfg(test)]
mod test {
    use super::Method;

    #[test]
    fn try_from_accepts_every_known_method() {
        assert_eq!(Method::Get, Method::try_from(b"GET".as_slice()).unwrap());
        assert_eq!(Method::Post, Method::try_from(b"POST".as_slice()).unwrap());
        assert_eq!(
            Method::Options,
            Method::try_from(b"OPTIONS".as_slice()).unwrap()
        );
    }

    #[test]
    fn try_from_rejects_unknown_method() {
        assert!(Method::try_from(b"PATCH".as_slice()).is_err());
        assert!(Method::try_from(b"get".as_slice()).is_err());
    }

    #[test]
    fn display_round_trips_wire_form() {
        assert_eq!("GET", Method::Get.to_string());
        assert_eq!("DELETE", Method::Delete.to_string());
    }
}
