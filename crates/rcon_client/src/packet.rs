//! Remote-console packet framing.
//!
//! Hand-rolled little-endian encoding rather than a serde format: the
//! protocol is three `i32` fields and a NUL-terminated body, and the
//! framing must match the wire byte-for-byte.

use crate::RconError;

/// Largest body we will send in a single packet. Backends reject larger
/// command payloads, so oversized requests fail locally instead.
pub const MAX_OUTBOUND_PAYLOAD: usize = 1446;

/// Largest body a backend may put in one response packet.
pub const MAX_INBOUND_PAYLOAD: usize = 4096;

/// Bytes of a packet after the length prefix, excluding the body:
/// request id (4) + type (4) + two NUL terminators (2).
const HEADER_AFTER_LENGTH: usize = 10;

/// Remote-console packet types.
///
/// The numbering is the protocol's, not ours: authentication requests are
/// type 3, both auth responses and command requests are type 2, and
/// command responses are type 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Command response payload (0).
    ResponseValue,
    /// Command request, or authentication response (2).
    ExecOrAuthResponse,
    /// Authentication request carrying the secret (3).
    Auth,
}

impl PacketType {
    /// Wire value for this packet type.
    pub fn to_wire(self) -> i32 {
        match self {
            PacketType::ResponseValue => 0,
            PacketType::ExecOrAuthResponse => 2,
            PacketType::Auth => 3,
        }
    }

    /// Parses a wire value, rejecting types the protocol does not define.
    pub fn from_wire(value: i32) -> Result<Self, RconError> {
        match value {
            0 => Ok(PacketType::ResponseValue),
            2 => Ok(PacketType::ExecOrAuthResponse),
            3 => Ok(PacketType::Auth),
            other => Err(RconError::Protocol(format!(
                "unknown packet type {other}"
            ))),
        }
    }
}

/// One framed remote-console packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Caller-chosen request id, echoed by the backend. An auth response
    /// with id -1 means the secret was rejected.
    pub request_id: i32,
    /// Packet type discriminator.
    pub packet_type: PacketType,
    /// Body text. The trailing NUL terminators are framing, not payload.
    pub body: String,
}

impl Packet {
    /// Builds an authentication request carrying the secret.
    pub fn auth(request_id: i32, secret: &str) -> Self {
        Self {
            request_id,
            packet_type: PacketType::Auth,
            body: secret.to_string(),
        }
    }

    /// Builds a command execution request.
    pub fn exec(request_id: i32, command: &str) -> Self {
        Self {
            request_id,
            packet_type: PacketType::ExecOrAuthResponse,
            body: command.to_string(),
        }
    }

    /// Encodes the packet into wire bytes, including the length prefix.
    ///
    /// Fails with `Protocol` if the body exceeds [`MAX_OUTBOUND_PAYLOAD`]
    /// or contains a NUL byte (which would truncate it on the far side).
    pub fn encode(&self) -> Result<Vec<u8>, RconError> {
        if self.body.len() > MAX_OUTBOUND_PAYLOAD {
            return Err(RconError::Protocol(format!(
                "payload of {} bytes exceeds the {} byte limit",
                self.body.len(),
                MAX_OUTBOUND_PAYLOAD
            )));
        }
        if self.body.as_bytes().contains(&0) {
            return Err(RconError::Protocol(
                "payload contains a NUL byte".to_string(),
            ));
        }

        let length = HEADER_AFTER_LENGTH + self.body.len();
        let mut buffer = Vec::with_capacity(4 + length);
        buffer.extend_from_slice(&(length as i32).to_le_bytes());
        buffer.extend_from_slice(&self.request_id.to_le_bytes());
        buffer.extend_from_slice(&self.packet_type.to_wire().to_le_bytes());
        buffer.extend_from_slice(self.body.as_bytes());
        buffer.push(0);
        buffer.push(0);
        Ok(buffer)
    }

    /// Decodes a packet from the bytes following the length prefix.
    ///
    /// `data` must be exactly the `length` bytes announced by the prefix.
    pub fn decode(data: &[u8]) -> Result<Self, RconError> {
        if data.len() < HEADER_AFTER_LENGTH {
            return Err(RconError::Protocol(format!(
                "packet of {} bytes is shorter than the {} byte header",
                data.len(),
                HEADER_AFTER_LENGTH
            )));
        }
        if data.len() > HEADER_AFTER_LENGTH + MAX_INBOUND_PAYLOAD {
            return Err(RconError::Protocol(format!(
                "packet of {} bytes exceeds the inbound limit",
                data.len()
            )));
        }

        let request_id = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let packet_type = PacketType::from_wire(i32::from_le_bytes([
            data[4], data[5], data[6], data[7],
        ]))?;

        let body_bytes = &data[8..data.len() - 2];
        if data[data.len() - 2] != 0 || data[data.len() - 1] != 0 {
            return Err(RconError::Protocol(
                "packet is missing its NUL terminators".to_string(),
            ));
        }
        let body = String::from_utf8_lossy(body_bytes).into_owned();

        Ok(Self {
            request_id,
            packet_type,
            body,
        })
    }

    /// Reads the 4-byte length prefix, validating it against the framing
    /// limits before the caller allocates a read buffer for it.
    pub fn validate_length(prefix: [u8; 4]) -> Result<usize, RconError> {
        let announced = i32::from_le_bytes(prefix);
        if announced < HEADER_AFTER_LENGTH as i32 {
            return Err(RconError::Protocol(format!(
                "length prefix {announced} is below the minimum packet size"
            )));
        }
        let announced = announced as usize;
        if announced > HEADER_AFTER_LENGTH + MAX_INBOUND_PAYLOAD {
            return Err(RconError::Protocol(format!(
                "length prefix {announced} exceeds the inbound limit"
            )));
        }
        Ok(announced)
    }
}
