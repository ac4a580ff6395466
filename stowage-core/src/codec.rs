//! Binary framing for cached HTTP responses.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! magic   b"SRSP"
//! version u8
//! status  u16
//! reason  u16 len, bytes
//! headers u32 count, then per pair: u16 name len, name, u32 value len, value
//! body    u64 len, bytes
//! ```
//!
//! The body length is always explicit, so a frame may be followed by
//! trailing bytes and binary bodies never need escaping. Decoding reads
//! through a private cursor over a shared slice; the same buffer can be
//! decoded from any number of tasks at once.
use bytes::{Buf, BufMut, Bytes};
use serde::{Deserialize, Serialize};

use crate::{CodecError, compression};

const MAGIC: &[u8; 4] = b"SRSP";
const VERSION: u8 = 1;

/// Ordered header list: duplicates and insertion order are kept, lookups
/// ignore ASCII case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a value, keeping any existing ones for the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Replace every value of `name` with a single one.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.0.push((name, value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.0
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N, V> FromIterator<(N, V)> for Headers
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        )
    }
}

/// A response as it is kept in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl CachedResponse {
    /// Response with the canonical reason phrase for `status`.
    pub fn new(status: u16, headers: Headers, body: impl Into<Bytes>) -> Self {
        let reason = http::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self {
            status,
            reason,
            headers,
            body: body.into(),
        }
    }

    /// Capture an `http` response. Headers come out grouped by name, which
    /// is the only order `http::HeaderMap` can offer.
    pub fn from_http(response: http::Response<Bytes>) -> Result<Self, CodecError> {
        let (parts, body) = response.into_parts();
        let mut headers = Headers::new();
        for (name, value) in parts.headers.iter() {
            let value = value.to_str().map_err(|e| {
                CodecError::Serialization(format!("header {name}: {e}"))
            })?;
            headers.append(name.as_str(), value);
        }
        Ok(Self {
            status: parts.status.as_u16(),
            reason: parts.status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }

    pub fn into_http(self) -> Result<http::Response<Bytes>, CodecError> {
        let mut builder = http::Response::builder().status(self.status);
        for (name, value) in self.headers.iter() {
            builder = builder.header(name, value);
        }
        builder
            .body(self.body)
            .map_err(|e| CodecError::Deserialization(e.to_string()))
    }
}

pub fn encode(response: &CachedResponse) -> Result<Vec<u8>, CodecError> {
    let headers_len: usize = response
        .headers
        .iter()
        .map(|(n, v)| 6 + n.len() + v.len())
        .sum();
    let mut buf = Vec::with_capacity(
        4 + 1 + 2 + 2 + response.reason.len() + 4 + headers_len + 8
            + response.body.len(),
    );

    buf.put_slice(MAGIC);
    buf.put_u8(VERSION);
    buf.put_u16(response.status);
    put_short(&mut buf, "reason", &response.reason)?;

    let count = u32::try_from(response.headers.len())
        .map_err(|_| CodecError::Serialization("too many headers".to_string()))?;
    buf.put_u32(count);
    for (name, value) in response.headers.iter() {
        put_short(&mut buf, "header name", name)?;
        let len = u32::try_from(value.len()).map_err(|_| {
            CodecError::Serialization(format!("header {name} value too long"))
        })?;
        buf.put_u32(len);
        buf.put_slice(value.as_bytes());
    }

    buf.put_u64(response.body.len() as u64);
    buf.put_slice(&response.body);
    Ok(buf)
}

/// Decode a frame, copying the body out of `data`.
pub fn decode(data: &[u8]) -> Result<CachedResponse, CodecError> {
    let mut cursor = data;
    let (status, reason, headers, body_len) = decode_head(&mut cursor)?;
    let body = Bytes::copy_from_slice(&cursor[..body_len]);
    Ok(CachedResponse {
        status,
        reason,
        headers,
        body,
    })
}

/// Decode a frame, sharing the body with `data` instead of copying it.
pub fn decode_bytes(data: Bytes) -> Result<CachedResponse, CodecError> {
    let mut cursor = &data[..];
    let (status, reason, headers, body_len) = decode_head(&mut cursor)?;
    let offset = data.len() - cursor.len();
    Ok(CachedResponse {
        status,
        reason,
        headers,
        body: data.slice(offset..offset + body_len),
    })
}

/// Encode then compress, producing what is handed to the store.
pub fn pack(response: &CachedResponse) -> Result<Vec<u8>, CodecError> {
    compression::compress(&encode(response)?)
}

/// Decompress then decode a payload read back from the store.
pub fn unpack(data: &[u8]) -> Result<CachedResponse, CodecError> {
    let raw = compression::decompress(data)?;
    decode_bytes(Bytes::from(raw))
}

// Leaves `cursor` at the first body byte; the body is known to be complete.
fn decode_head(
    cursor: &mut &[u8],
) -> Result<(u16, String, Headers, usize), CodecError> {
    ensure(cursor, 5, "preamble")?;
    if &cursor[..4] != MAGIC {
        return Err(CodecError::InvalidFrame("bad magic".to_string()));
    }
    cursor.advance(4);
    let version = cursor.get_u8();
    if version != VERSION {
        return Err(CodecError::InvalidFrame(format!(
            "unsupported version {version}"
        )));
    }

    ensure(cursor, 2, "status")?;
    let status = cursor.get_u16();
    let reason = take_short(cursor, "reason")?;

    ensure(cursor, 4, "header count")?;
    let count = cursor.get_u32() as usize;
    // Each pair needs at least six length bytes.
    ensure(cursor, count.saturating_mul(6), "headers")?;
    let mut pairs = Vec::with_capacity(count);
    for _ in 0..count {
        let name = take_short(cursor, "header name")?;
        ensure(cursor, 4, "header value length")?;
        let len = cursor.get_u32() as usize;
        let value = take_str(cursor, len, "header value")?;
        pairs.push((name, value));
    }

    ensure(cursor, 8, "body length")?;
    let declared = cursor.get_u64();
    let body_len = usize::try_from(declared).map_err(|_| {
        CodecError::InvalidFrame(format!("body length {declared} overflows"))
    })?;
    ensure(cursor, body_len, "body")?;

    Ok((status, reason, Headers(pairs), body_len))
}

fn ensure(
    cursor: &[u8],
    needed: usize,
    section: &'static str,
) -> Result<(), CodecError> {
    if cursor.remaining() < needed {
        return Err(CodecError::Truncated {
            section,
            needed,
            available: cursor.remaining(),
        });
    }
    Ok(())
}

fn take_short(
    cursor: &mut &[u8],
    section: &'static str,
) -> Result<String, CodecError> {
    ensure(cursor, 2, section)?;
    let len = cursor.get_u16() as usize;
    take_str(cursor, len, section)
}

fn take_str(
    cursor: &mut &[u8],
    len: usize,
    section: &'static str,
) -> Result<String, CodecError> {
    ensure(cursor, len, section)?;
    let value = std::str::from_utf8(&cursor[..len])
        .map_err(|e| CodecError::InvalidFrame(format!("{section}: {e}")))?
        .to_string();
    cursor.advance(len);
    Ok(value)
}

fn put_short(
    buf: &mut Vec<u8>,
    section: &str,
    value: &str,
) -> Result<(), CodecError> {
    let len = u16::try_from(value.len()).map_err(|_| {
        CodecError::Serialization(format!("{section} longer than 65535 bytes"))
    })?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CachedResponse {
        let mut headers = Headers::new();
        headers.append("Content-Type", "text/plain");
        headers.append("Set-Cookie", "a=1");
        headers.append("Vary", "Accept-Encoding");
        headers.append("Set-Cookie", "b=2");
        CachedResponse::new(200, headers, "hello body")
    }

    #[test]
    fn round_trip_keeps_order_and_duplicates() {
        let response = sample();
        let decoded = decode(&encode(&response).unwrap()).unwrap();

        assert_eq!(decoded, response);
        assert_eq!(decoded.reason, "OK");
        let cookies: Vec<_> = decoded.headers.get_all("set-cookie").collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        let names: Vec<_> = decoded.headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Content-Type", "Set-Cookie", "Vary", "Set-Cookie"]);
    }

    #[test]
    fn empty_body_and_no_headers() {
        let response = CachedResponse::new(204, Headers::new(), Bytes::new());
        let decoded = decode(&encode(&response).unwrap()).unwrap();

        assert_eq!(decoded.status, 204);
        assert!(decoded.headers.is_empty());
        assert!(decoded.body.is_empty());
    }

    #[test]
    fn binary_body_with_frame_like_bytes() {
        let mut body = b"SRSP\x01".repeat(100);
        body.extend_from_slice(&[0u8; 32]);
        let response = CachedResponse::new(200, Headers::new(), body.clone());
        let decoded = decode(&encode(&response).unwrap()).unwrap();
        assert_eq!(decoded.body.as_ref(), body.as_slice());
    }

    #[test]
    fn trailing_padding_is_ignored() {
        let response = sample();
        let mut encoded = encode(&response).unwrap();
        encoded.extend_from_slice(&[0xAA; 64]);

        assert_eq!(decode(&encoded).unwrap(), response);
        assert_eq!(decode_bytes(Bytes::from(encoded)).unwrap(), response);
    }

    #[test]
    fn body_shorter_than_declared() {
        let encoded = encode(&sample()).unwrap();
        let res = decode(&encoded[..encoded.len() - 1]);
        assert!(matches!(
            res,
            Err(CodecError::Truncated { section: "body", .. })
        ));
    }

    #[test]
    fn truncated_header_section() {
        let encoded = encode(&sample()).unwrap();
        // Cut inside the first header name.
        let res = decode(&encoded[..4 + 1 + 2 + 2 + 2 + 4 + 3]);
        assert!(matches!(res, Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn bad_magic_and_version() {
        let mut encoded = encode(&sample()).unwrap();
        encoded[4] = 9;
        assert!(matches!(decode(&encoded), Err(CodecError::InvalidFrame(_))));

        encoded[0] = b'X';
        assert!(matches!(decode(&encoded), Err(CodecError::InvalidFrame(_))));
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn large_body_round_trip_through_pack() {
        let body: Vec<u8> = (0..5 * 1024 * 1024).map(|i| (i % 256) as u8).collect();
        let response = CachedResponse::new(200, Headers::new(), body.clone());

        let unpacked = unpack(&pack(&response).unwrap()).unwrap();
        assert_eq!(unpacked.body.len(), body.len());
        assert_eq!(unpacked.body.as_ref(), body.as_slice());
    }

    #[test]
    fn decode_bytes_shares_body() {
        let encoded = Bytes::from(encode(&sample()).unwrap());
        let decoded = decode_bytes(encoded).unwrap();
        assert_eq!(decoded.body, Bytes::from_static(b"hello body"));
    }

    #[test]
    fn headers_lookup_ignores_case() {
        let mut headers = Headers::new();
        headers.append("Accept-Encoding", "gzip");
        headers.insert("accept-encoding", "br");

        assert_eq!(headers.get("ACCEPT-ENCODING"), Some("br"));
        assert_eq!(headers.len(), 1);
        headers.remove("Accept-encoding");
        assert!(headers.is_empty());
    }

    #[test]
    fn http_conversion() {
        let response = http::Response::builder()
            .status(404)
            .header("content-type", "text/html")
            .body(Bytes::from_static(b"missing"))
            .unwrap();

        let cached = CachedResponse::from_http(response).unwrap();
        assert_eq!(cached.reason, "Not Found");
        assert_eq!(cached.headers.get("Content-Type"), Some("text/html"));

        let back = cached.into_http().unwrap();
        assert_eq!(back.status(), http::StatusCode::NOT_FOUND);
        assert_eq!(back.body().as_ref(), b"missing");
    }
}
