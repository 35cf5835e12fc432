//! Wire codec: framing, TTL arithmetic, and error-packet construction.
//!
//! Frames are postcard-encoded [`Packet`] values. Decoding checks the
//! protocol version so engines never see a frame from a different
//! protocol generation.

use crate::constants::PROTOCOL_VERSION;
use crate::error::CodecError;
use crate::packet::{ErrorInfo, ErrorKind, Packet, Payload};
use crate::types::Addr;

/// Encode a packet into a wire frame.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(packet).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Decode a wire frame, rejecting unknown protocol versions.
pub fn decode(raw: &[u8]) -> Result<Packet, CodecError> {
    let packet: Packet =
        postcard::from_bytes(raw).map_err(|e| CodecError::Malformed(e.to_string()))?;
    if packet.version != PROTOCOL_VERSION {
        return Err(CodecError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            actual: packet.version,
        });
    }
    Ok(packet)
}

impl Packet {
    /// Decrement the TTL before a forwarding hop.
    ///
    /// Fails with [`CodecError::TtlExpired`] when the budget is already
    /// zero; the packet must then be dropped, never forwarded unmodified.
    pub fn decrement_ttl(&mut self) -> Result<u8, CodecError> {
        match self.ttl.checked_sub(1) {
            Some(ttl) => {
                self.ttl = ttl;
                Ok(ttl)
            }
            None => Err(CodecError::TtlExpired),
        }
    }
}

/// Build an error packet addressed from `src` toward `dst`.
///
/// Carries a fresh id and the default TTL; delivery is best-effort.
pub fn build_error_packet(
    src: Addr,
    dst: Addr,
    kind: ErrorKind,
    message: impl Into<String>,
    context: Option<String>,
) -> Packet {
    Packet::new(
        src,
        dst,
        Payload::Error(ErrorInfo {
            kind,
            message: message.into(),
            context,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{ControlMessage, Datagram};

    fn sample_packet() -> Packet {
        Packet::new(
            Addr::new(10, 0, 0, 5),
            Addr::new(93, 184, 216, 34),
            Payload::Data(Datagram::opaque(40_000, 80, b"hello".to_vec())),
        )
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let packet = sample_packet();
        let raw = encode(&packet).unwrap();
        let decoded = decode(&raw).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_decode_rejects_wrong_version() {
        let mut packet = sample_packet();
        packet.version = PROTOCOL_VERSION + 1;
        let raw = postcard::to_allocvec(&packet).unwrap();

        let err = decode(&raw).unwrap_err();
        assert!(matches!(
            err,
            CodecError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_frame() {
        let raw = encode(&sample_packet()).unwrap();
        assert!(matches!(
            decode(&raw[..raw.len() / 2]),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_empty_frame() {
        assert!(matches!(decode(&[]), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_decrement_ttl() {
        let mut packet = sample_packet();
        packet.ttl = 2;
        assert_eq!(packet.decrement_ttl().unwrap(), 1);
        assert_eq!(packet.decrement_ttl().unwrap(), 0);
        assert!(matches!(
            packet.decrement_ttl(),
            Err(CodecError::TtlExpired)
        ));
        // TTL untouched by the failed decrement
        assert_eq!(packet.ttl, 0);
    }

    #[test]
    fn test_control_roundtrip() {
        let packet = Packet::new(
            Addr::new(0, 0, 0, 0),
            Addr::new(10, 0, 0, 1),
            Payload::Data(Datagram::control(ControlMessage::LeaseAck {
                address: Addr::new(10, 0, 0, 11),
            })),
        );
        let decoded = decode(&encode(&packet).unwrap()).unwrap();
        assert_eq!(
            decoded.control(),
            Some(&ControlMessage::LeaseAck {
                address: Addr::new(10, 0, 0, 11)
            })
        );
    }

    #[test]
    fn test_build_error_packet() {
        let p = build_error_packet(
            Addr::new(10, 0, 0, 1),
            Addr::new(10, 0, 0, 5),
            ErrorKind::TtlExpired,
            "ttl reached zero",
            Some("10.9.9.9".to_string()),
        );
        match &p.payload {
            Payload::Error(info) => {
                assert_eq!(info.kind, ErrorKind::TtlExpired);
                assert_eq!(info.context.as_deref(), Some("10.9.9.9"));
            }
            other => panic!("expected error payload, got {other:?}"),
        }
    }
}
