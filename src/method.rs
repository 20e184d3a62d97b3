//! The `Method` enum used by the control-scheme wire layout.
//!
//! This is a distinct type from [`http::Method`]: the wire scheme fixes a
//! small, closed, signed 8-bit enumeration (§6 of the design notes), while
//! `http::Method` is open-ended. Inbound requests are mapped from one to the
//! other at the routing boundary.

use std::convert::TryFrom;
use std::fmt;

/// HTTP method as carried on the `Connect` control record.
///
/// The discriminants are "control-scheme version 1": `UNDEFINED = -1` and
/// the rest numbered from zero. The original source carries both an
/// `UNDEFINED = 0` and an `UNDEFINED = -1` numbering across its tree; this
/// rewrite picks the signed form and does not attempt to support both on
/// the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum Method {
    /// No method could be determined (e.g. a WebSocket session).
    Undefined = -1,
    /// `GET`
    Get = 0,
    /// `HEAD`
    Head = 1,
    /// `POST`
    Post = 2,
    /// `PUT`
    Put = 3,
    /// `DELETE`
    Delete = 4,
    /// `CONNECT`
    Connect = 5,
    /// `OPTIONS`
    Options = 6,
    /// `TRACE`
    Trace = 7,
    /// `PATCH`
    Patch = 8,
}

impl Method {
    /// The wire discriminant as stored in the `Connect` record.
    pub fn to_wire(self) -> i8 {
        self as i8
    }

    /// Recover a `Method` from a wire discriminant.
    pub fn from_wire(v: i8) -> Option<Method> {
        Some(match v {
            -1 => Method::Undefined,
            0 => Method::Get,
            1 => Method::Head,
            2 => Method::Post,
            3 => Method::Put,
            4 => Method::Delete,
            5 => Method::Connect,
            6 => Method::Options,
            7 => Method::Trace,
            8 => Method::Patch,
            _ => return None,
        })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Undefined => "UNDEFINED",
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
        })
    }
}

impl TryFrom<&http::Method> for Method {
    type Error = ();

    fn try_from(m: &http::Method) -> Result<Self, Self::Error> {
        Ok(match *m {
            http::Method::GET => Method::Get,
            http::Method::HEAD => Method::Head,
            http::Method::POST => Method::Post,
            http::Method::PUT => Method::Put,
            http::Method::DELETE => Method::Delete,
            http::Method::CONNECT => Method::Connect,
            http::Method::OPTIONS => Method::Options,
            http::Method::TRACE => Method::Trace,
            http::Method::PATCH => Method::Patch,
            _ => return Err(()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_roundtrip() {
        for m in [
            Method::Undefined,
            Method::Get,
            Method::Head,
            Method::Post,
            Method::Put,
            Method::Delete,
            Method::Connect,
            Method::Options,
            Method::Trace,
            Method::Patch,
        ] {
            assert_eq!(Method::from_wire(m.to_wire()), Some(m));
        }
    }

    #[test]
    fn undefined_is_signed_minus_one() {
        assert_eq!(Method::Undefined.to_wire(), -1);
    }

    #[test]
    fn from_http_method() {
        assert_eq!(Method::try_from(&http::Method::GET).unwrap(), Method::Get);
        assert!(Method::try_from(&http::Method::from_bytes(b"PROPFIND").unwrap()).is_err());
    }
}
