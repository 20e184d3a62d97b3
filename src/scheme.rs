//! Control-message wire codec: `Connect` (id=1) and `Disconnect` (id=2).
//!
//! This mirrors the original's offset-pointer binder layout (§3/§6): each
//! record has a small fixed-size header followed by a variable-length tail
//! that string/list fields point into via an 8-byte `{offset, size}` pair
//! (offset counted from the start of the pointer field itself, size in
//! elements). All integers are little-endian; this rewrite treats that
//! choice, left unstated in the original wire notes, as part of
//! "control-scheme version 1" (§9).
//!
//! The encoder is the only side the original implements; this crate also
//! provides a decoder so the record layout is exercisable from its own test
//! suite without a separate scheme reader.

use crate::method::Method;

/// Message id of a `Connect` control record.
pub const CONNECT_ID: i32 = 1;
/// Message id of a `Disconnect` control record.
pub const DISCONNECT_ID: i32 = 2;

const CONNECT_HEADER_SIZE: usize = 27;
const DISCONNECT_HEADER_SIZE: usize = 10;
const HEADER_RECORD_SIZE: usize = 16;
const OFFSET_PTR_SIZE: usize = 8;

/// One decoded `Header { header, value }` pair from a `Connect` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Header field name.
    pub name: String,
    /// Header field value.
    pub value: String,
}

/// A decoded `Connect` control record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    /// HTTP method, `Method::Undefined` for non-HTTP sessions.
    pub method: Method,
    /// Reserved status code field; always 0 on emit.
    pub code: i16,
    /// Reserved size field; always 0 on emit.
    pub size: i64,
    /// Request path.
    pub path: String,
    /// Request headers, in arrival order.
    pub headers: Vec<Header>,
}

/// A decoded `Disconnect` control record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    /// Close code; the only field ever populated on emit (§9).
    pub code: i16,
    /// Optional error description; always empty on emit in this rewrite.
    pub error: String,
}

/// Encodes a `Connect` record for `path` with no headers, the shape every
/// node in this crate emits (§4.C/§4.D/§4.E never attach request headers
/// today, matching the original's connect sites).
pub fn encode_connect(method: Method, path: &str) -> Vec<u8> {
    encode_connect_with_headers(method, path, &[])
}

/// Encodes a `Connect` record with an explicit header list.
pub fn encode_connect_with_headers(method: Method, path: &str, headers: &[Header]) -> Vec<u8> {
    let mut buf = vec![0u8; CONNECT_HEADER_SIZE];
    buf[0] = method.to_wire() as u8;
    buf[1..3].copy_from_slice(&0i16.to_le_bytes());
    buf[3..11].copy_from_slice(&0i64.to_le_bytes());

    // path: offset-pointer at byte 11, tail starts right after the header.
    let path_bytes = path.as_bytes();
    write_offset_ptr(&mut buf, 11, CONNECT_HEADER_SIZE - 11, path_bytes.len());
    buf.extend_from_slice(path_bytes);

    // headers: offset-pointer list at byte 19, tail starts after the path.
    let headers_tail_offset = buf.len() - 19;
    write_offset_ptr(&mut buf, 19, headers_tail_offset, headers.len());
    for h in headers {
        encode_header_into(&mut buf, h);
    }

    buf
}

fn encode_header_into(buf: &mut Vec<u8>, header: &Header) {
    let record_start = buf.len();
    buf.resize(record_start + HEADER_RECORD_SIZE, 0);

    let name_bytes = header.name.as_bytes();
    let name_field = record_start;
    let name_tail_offset = buf.len() - name_field;
    write_offset_ptr(buf, name_field, name_tail_offset, name_bytes.len());
    buf.extend_from_slice(name_bytes);

    let value_bytes = header.value.as_bytes();
    let value_field = record_start + 8;
    let value_tail_offset = buf.len() - value_field;
    write_offset_ptr(buf, value_field, value_tail_offset, value_bytes.len());
    buf.extend_from_slice(value_bytes);
}

/// Encodes a `Disconnect` record. `error` is always emitted empty by every
/// node in this crate; the field exists on the wire for a future producer
/// (§9).
pub fn encode_disconnect(code: i16, error: &str) -> Vec<u8> {
    let mut buf = vec![0u8; DISCONNECT_HEADER_SIZE];
    buf[0..2].copy_from_slice(&code.to_le_bytes());
    let error_bytes = error.as_bytes();
    write_offset_ptr(&mut buf, 2, DISCONNECT_HEADER_SIZE - 2, error_bytes.len());
    buf.extend_from_slice(error_bytes);
    buf
}

fn write_offset_ptr(buf: &mut [u8], field_offset: usize, rel_offset: usize, size: usize) {
    buf[field_offset..field_offset + 4].copy_from_slice(&(rel_offset as i32).to_le_bytes());
    buf[field_offset + 4..field_offset + 8].copy_from_slice(&(size as i32).to_le_bytes());
}

fn read_offset_ptr(buf: &[u8], field_offset: usize) -> Option<(i32, i32)> {
    let rel = i32::from_le_bytes(buf.get(field_offset..field_offset + 4)?.try_into().ok()?);
    let size = i32::from_le_bytes(buf.get(field_offset + 4..field_offset + 8)?.try_into().ok()?);
    Some((rel, size))
}

fn read_string(buf: &[u8], field_offset: usize) -> Option<String> {
    let (rel, size) = read_offset_ptr(buf, field_offset)?;
    if size < 0 || rel < 0 {
        return None;
    }
    let start = field_offset.checked_add(rel as usize)?;
    let end = start.checked_add(size as usize)?;
    String::from_utf8(buf.get(start..end)?.to_vec()).ok()
}

/// Decodes a `Connect` record previously produced by [`encode_connect`] or
/// [`encode_connect_with_headers`].
pub fn decode_connect(buf: &[u8]) -> Option<Connect> {
    if buf.len() < CONNECT_HEADER_SIZE {
        return None;
    }
    let method = Method::from_wire(buf[0] as i8)?;
    let code = i16::from_le_bytes(buf[1..3].try_into().ok()?);
    let size = i64::from_le_bytes(buf[3..11].try_into().ok()?);
    let path = read_string(buf, 11)?;

    let (list_rel, list_count) = read_offset_ptr(buf, 19)?;
    let mut headers = Vec::with_capacity(list_count.max(0) as usize);
    if list_count > 0 {
        let mut record_offset = 19usize.checked_add(list_rel as usize)?;
        for _ in 0..list_count {
            let name = read_string(buf, record_offset)?;
            let value = read_string(buf, record_offset + 8)?;
            headers.push(Header { name, value });
            record_offset += HEADER_RECORD_SIZE;
        }
    }

    Some(Connect {
        method,
        code,
        size,
        path,
        headers,
    })
}

/// Decodes a `Disconnect` record previously produced by [`encode_disconnect`].
pub fn decode_disconnect(buf: &[u8]) -> Option<Disconnect> {
    if buf.len() < DISCONNECT_HEADER_SIZE {
        return None;
    }
    let code = i16::from_le_bytes(buf[0..2].try_into().ok()?);
    let error = read_string(buf, 2)?;
    Some(Disconnect { code, error })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_roundtrip_no_headers() {
        let buf = encode_connect(Method::Get, "/a");
        let record = decode_connect(&buf).unwrap();
        assert_eq!(record.method, Method::Get);
        assert_eq!(record.path, "/a");
        assert!(record.headers.is_empty());
    }

    #[test]
    fn connect_roundtrip_with_headers() {
        let headers = vec![
            Header { name: "host".into(), value: "x".into() },
            Header { name: "content-length".into(), value: "5".into() },
        ];
        let buf = encode_connect_with_headers(Method::Post, "/echo", &headers);
        let record = decode_connect(&buf).unwrap();
        assert_eq!(record.method, Method::Post);
        assert_eq!(record.path, "/echo");
        assert_eq!(record.headers, headers);
    }

    #[test]
    fn disconnect_roundtrip() {
        let buf = encode_disconnect(200, "");
        let record = decode_disconnect(&buf).unwrap();
        assert_eq!(record.code, 200);
        assert_eq!(record.error, "");
    }

    #[test]
    fn connect_header_is_27_bytes_before_tail() {
        let buf = encode_connect(Method::Undefined, "");
        assert!(buf.len() >= CONNECT_HEADER_SIZE);
    }

    #[test]
    fn disconnect_header_is_10_bytes_before_tail() {
        let buf = encode_disconnect(0, "");
        assert_eq!(buf.len(), DISCONNECT_HEADER_SIZE);
    }
}
