//! Wire protocol shared by vehicles, dispatchers, and the relay
//!
//! Both listener roles speak the same outer shape: a QUIC connection with
//! datagrams enabled, exactly one handshake datagram, and two bidirectional
//! streams in a fixed order (info first, then video).
//!
//! Handshake datagram layouts (all integers big-endian):
//!
//! ```text
//! vehicle:     ┌─────────────┬──────────────────┐
//!              │ vehicle id  │ password (UTF-8) │
//!              │  (4 bytes)  │    (rest)        │
//!              └─────────────┴──────────────────┘
//! dispatcher:  ┌─────────────┬───────────────┬──────────────────┐
//!              │ vehicle id  │ dispatcher id │ password (UTF-8) │
//!              │  (4 bytes)  │   (4 bytes)   │    (rest)        │
//!              └─────────────┴───────────────┴──────────────────┘
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::RelayError;

/// ALPN protocol id for both QUIC listeners.
pub const ALPN: &[u8] = b"fleetlink";

/// Video passes through verbatim in chunks no larger than this.
pub const MAX_VIDEO_CHUNK: usize = 4096;

/// Bound on every registry channel; overflow drops the oldest frame.
pub const CHANNEL_CAPACITY: usize = 100;

/// Telemetry reassembly cap. A buffer that grows past this without yielding
/// a complete JSON object terminates the connection.
pub const MAX_JSON_BUFFER: usize = 1 << 13;

/// Handshake sent by a vehicle offering its streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleHello {
    pub vehicle_id: u32,
    pub password: String,
}

impl VehicleHello {
    /// Parse the handshake datagram of an inbound vehicle connection.
    pub fn parse(datagram: &[u8]) -> Result<Self, RelayError> {
        if datagram.len() < 4 {
            return Err(RelayError::BadRequest(format!(
                "vehicle handshake too short: {} bytes",
                datagram.len()
            )));
        }
        let mut buf = datagram;
        let vehicle_id = buf.get_u32();
        let password = String::from_utf8(buf.to_vec())
            .map_err(|_| RelayError::BadRequest("handshake password is not UTF-8".into()))?;
        Ok(Self {
            vehicle_id,
            password,
        })
    }

    /// Encode for sending. Used by capture clients and the test suite.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + self.password.len());
        buf.put_u32(self.vehicle_id);
        buf.put_slice(self.password.as_bytes());
        buf.freeze()
    }
}

/// Handshake sent by a dispatcher requesting a vehicle's streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherHello {
    pub vehicle_id: u32,
    pub dispatcher_id: u32,
    pub password: String,
}

impl DispatcherHello {
    /// Parse the handshake datagram of an inbound dispatcher connection.
    pub fn parse(datagram: &[u8]) -> Result<Self, RelayError> {
        if datagram.len() < 8 {
            return Err(RelayError::BadRequest(format!(
                "dispatcher handshake too short: {} bytes",
                datagram.len()
            )));
        }
        let mut buf = datagram;
        let vehicle_id = buf.get_u32();
        let dispatcher_id = buf.get_u32();
        let password = String::from_utf8(buf.to_vec())
            .map_err(|_| RelayError::BadRequest("handshake password is not UTF-8".into()))?;
        Ok(Self {
            vehicle_id,
            dispatcher_id,
            password,
        })
    }

    /// Encode for sending. Used by viewer clients and the test suite.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8 + self.password.len());
        buf.put_u32(self.vehicle_id);
        buf.put_u32(self.dispatcher_id);
        buf.put_slice(self.password.as_bytes());
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vehicle_hello_roundtrip() {
        let hello = VehicleHello {
            vehicle_id: 2,
            password: "example".into(),
        };
        let parsed = VehicleHello::parse(&hello.encode()).unwrap();
        assert_eq!(parsed, hello);
    }

    #[test]
    fn vehicle_hello_wire_layout_is_big_endian() {
        let hello = VehicleHello {
            vehicle_id: 0x0102_0304,
            password: "pw".into(),
        };
        let bytes = hello.encode();
        assert_eq!(&bytes[..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[4..], b"pw");
    }

    #[test]
    fn vehicle_hello_empty_password_is_valid() {
        let parsed = VehicleHello::parse(&[0, 0, 0, 7]).unwrap();
        assert_eq!(parsed.vehicle_id, 7);
        assert_eq!(parsed.password, "");
    }

    #[test]
    fn vehicle_hello_rejects_short_datagram() {
        let err = VehicleHello::parse(&[0, 0, 1]).unwrap_err();
        assert!(matches!(err, RelayError::BadRequest(_)));
    }

    #[test]
    fn vehicle_hello_rejects_non_utf8_password() {
        let err = VehicleHello::parse(&[0, 0, 0, 1, 0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, RelayError::BadRequest(_)));
    }

    #[test]
    fn dispatcher_hello_roundtrip() {
        let hello = DispatcherHello {
            vehicle_id: 2,
            dispatcher_id: 9,
            password: "example".into(),
        };
        let parsed = DispatcherHello::parse(&hello.encode()).unwrap();
        assert_eq!(parsed, hello);
    }

    #[test]
    fn dispatcher_hello_rejects_vehicle_only_prefix() {
        // 7 bytes: enough for a vehicle hello, one short of a dispatcher one
        let err = DispatcherHello::parse(&[0, 0, 0, 2, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, RelayError::BadRequest(_)));
    }

    #[test]
    fn dispatcher_hello_scenario_s1_bytes() {
        let bytes: Vec<u8> = [0, 0, 0, 2, 0, 0, 0, 2]
            .into_iter()
            .chain(b"example".iter().copied())
            .collect();
        let parsed = DispatcherHello::parse(&bytes).unwrap();
        assert_eq!(parsed.vehicle_id, 2);
        assert_eq!(parsed.dispatcher_id, 2);
        assert_eq!(parsed.password, "example");
    }
}
