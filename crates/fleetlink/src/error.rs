//! Error taxonomy for the relay engine
//!
//! Every connection-fatal condition maps to one of these kinds, and each kind
//! carries a QUIC application close code so peers can tell a bad password from
//! a vanished broadcast.

use quinn::VarInt;

use crate::store::StoreError;

/// Application close codes sent in the QUIC CONNECTION_CLOSE frame.
pub mod close_code {
    /// Orderly teardown: shutdown, or the watched broadcast ended.
    pub const DONE: u32 = 0x0;
    pub const UNAUTHORIZED: u32 = 0x1;
    pub const FORBIDDEN: u32 = 0x2;
    pub const NOT_FOUND: u32 = 0x3;
    pub const BAD_REQUEST: u32 = 0x4;
    pub const INTERNAL: u32 = 0x5;
}

/// A connection-fatal relay error.
///
/// The relay performs no retries: every variant closes the offending
/// connection and the client is expected to reconnect. Errors on one
/// subscriber never affect others; an error on the producer ends the
/// broadcast for every subscriber of that vehicle.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The presented password did not match the stored hash.
    #[error("unauthorized")]
    Unauthorized,

    /// The dispatcher holds no grant for the requested vehicle.
    #[error("forbidden")]
    Forbidden,

    /// No such credential record, or no live broadcast for the vehicle.
    #[error("not found")]
    NotFound,

    /// Malformed handshake or an oversized/unparseable telemetry buffer.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The remote side went away mid-stream. Clean teardown, not a fault.
    #[error("peer gone: {0}")]
    PeerGone(String),

    /// Credential store failure or unexpected I/O error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Close code advertised to the peer when this error tears the
    /// connection down.
    pub fn close_code(&self) -> VarInt {
        let code = match self {
            RelayError::Unauthorized => close_code::UNAUTHORIZED,
            RelayError::Forbidden => close_code::FORBIDDEN,
            RelayError::NotFound => close_code::NOT_FOUND,
            RelayError::BadRequest(_) => close_code::BAD_REQUEST,
            RelayError::PeerGone(_) => close_code::DONE,
            RelayError::Internal(_) => close_code::INTERNAL,
        };
        VarInt::from_u32(code)
    }

    /// Short reason phrase for the CONNECTION_CLOSE frame.
    pub fn close_reason(&self) -> &'static [u8] {
        match self {
            RelayError::Unauthorized => b"unauthorized",
            RelayError::Forbidden => b"forbidden",
            RelayError::NotFound => b"not found",
            RelayError::BadRequest(_) => b"bad request",
            RelayError::PeerGone(_) => b"closed",
            RelayError::Internal(_) => b"internal error",
        }
    }
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => RelayError::NotFound,
            other => RelayError::Internal(other.to_string()),
        }
    }
}

impl From<quinn::ConnectionError> for RelayError {
    fn from(err: quinn::ConnectionError) -> Self {
        RelayError::PeerGone(err.to_string())
    }
}

impl From<quinn::ReadError> for RelayError {
    fn from(err: quinn::ReadError) -> Self {
        RelayError::PeerGone(err.to_string())
    }
}

impl From<quinn::WriteError> for RelayError {
    fn from(err: quinn::WriteError) -> Self {
        RelayError::PeerGone(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_are_distinct_per_kind() {
        let errors = [
            RelayError::Unauthorized,
            RelayError::Forbidden,
            RelayError::NotFound,
            RelayError::BadRequest("x".into()),
            RelayError::Internal("y".into()),
        ];
        let mut codes: Vec<u64> = errors.iter().map(|e| e.close_code().into_inner()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn peer_gone_closes_with_done() {
        let err = RelayError::PeerGone("eof".into());
        assert_eq!(err.close_code(), VarInt::from_u32(close_code::DONE));
    }

    #[test]
    fn store_not_found_maps_to_not_found() {
        let err: RelayError = StoreError::NotFound.into();
        assert!(matches!(err, RelayError::NotFound));
    }

    #[test]
    fn store_internal_maps_to_internal() {
        let err: RelayError = StoreError::Internal("redis gone".into()).into();
        assert!(matches!(err, RelayError::Internal(_)));
    }
}
