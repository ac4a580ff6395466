use chrono::{DateTime, TimeDelta, Utc};

use crate::CodecError;

const HEADER_LEN: usize = 16;
const NEVER: i64 = i64::MAX;

/// A value as held by a backend slot: the payload plus the timestamps
/// needed to emulate expiry on engines without native TTL.
///
/// On disk the envelope is `stored_at` and `expires_at` as big-endian
/// unix milliseconds followed by the payload, so a whole entry is always
/// written with one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub stored_at: DateTime<Utc>,
    /// `None` never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub payload: Vec<u8>,
}

impl StoredEntry {
    pub fn new(payload: Vec<u8>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            stored_at: Utc::now(),
            expires_at,
            payload,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Time left before expiry, `None` for entries that never expire.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.expires_at.map(|at| at - now)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.stored_at.timestamp_millis().to_be_bytes());
        let expires = self.expires_at.map_or(NEVER, |at| at.timestamp_millis());
        buf.extend_from_slice(&expires.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn decode(mut raw: Vec<u8>) -> Result<Self, CodecError> {
        if raw.len() < HEADER_LEN {
            return Err(CodecError::Truncated {
                section: "entry header",
                needed: HEADER_LEN,
                available: raw.len(),
            });
        }
        let stored_at = millis_at(&raw[..8])?;
        let expires_at = match read_i64(&raw[8..HEADER_LEN]) {
            NEVER => None,
            _ => Some(millis_at(&raw[8..HEADER_LEN])?),
        };
        raw.drain(..HEADER_LEN);
        Ok(Self {
            stored_at,
            expires_at,
            payload: raw,
        })
    }

    /// Read only the expiry, without touching the payload.
    pub fn peek_expired(raw: &[u8], now: DateTime<Utc>) -> bool {
        raw.len() >= HEADER_LEN && {
            let expires = read_i64(&raw[8..HEADER_LEN]);
            expires != NEVER && expires <= now.timestamp_millis()
        }
    }
}

fn read_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    i64::from_be_bytes(buf)
}

fn millis_at(bytes: &[u8]) -> Result<DateTime<Utc>, CodecError> {
    let millis = read_i64(bytes);
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        CodecError::InvalidFrame(format!("timestamp {millis} out of range"))
    })
}
