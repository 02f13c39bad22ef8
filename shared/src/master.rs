//! Wire format for game server to master server traffic
//!
//! Game servers announce themselves to the master server with a single
//! unconnected datagram that is resent periodically. There is no session and
//! no reply; the master keeps whatever it heard most recently.
//!
//! Layout of a `RegisterHost` datagram (multi-byte integers little-endian):
//! ```text
//! [type:1][unique_id:8][name_len:varint][name:N][connections:2][max_connections:2]
//! [addr_len:1][ipv4:4][port:2]
//! ```
//! The name length is a 7-bit variable-length integer: low groups first, high
//! bit set on every byte except the last.

use std::net::{Ipv4Addr, SocketAddrV4};
use thiserror::Error;

/// Well-known port the master server listens on
pub const MASTER_SERVER_PORT: u16 = 15002;
/// Host name the master server is resolved from when nothing else is configured
pub const DEFAULT_MASTER_HOST: &str = "localhost";
/// Port advertised to the master as the game server's listening port
pub const GAME_SERVER_PORT: u16 = 14242;
/// Capacity advertised by every game server
pub const MAX_CONNECTIONS: u16 = 32;
/// Seconds between two registrations
pub const REGISTRATION_INTERVAL_SECS: f64 = 60.0;

const IPV4_LEN: u8 = 4;
const MAX_VARINT_BYTES: usize = 5;

/// Errors produced while reading a master server datagram
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("insufficient data: need {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    #[error("string length varint is longer than 5 bytes")]
    MalformedLength,

    #[error("host name is not valid UTF-8: {0}")]
    InvalidName(#[from] std::str::Utf8Error),

    #[error("unsupported address length {0}, only IPv4 is advertised")]
    UnsupportedAddress(u8),

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

/// First byte of every datagram sent to the master server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MasterMessageType {
    RegisterHost = 0,
}

impl MasterMessageType {
    pub fn from_byte(byte: u8) -> Result<Self, WireError> {
        match byte {
            0 => Ok(MasterMessageType::RegisterHost),
            other => Err(WireError::UnknownMessageType(other)),
        }
    }
}

/// Bytes ready to be handed to an unconnected send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage(Vec<u8>);

impl EncodedMessage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tag of the message, if the leading byte is a known one
    pub fn message_type(&self) -> Option<MasterMessageType> {
        self.0
            .first()
            .and_then(|byte| MasterMessageType::from_byte(*byte).ok())
    }
}

impl AsRef<[u8]> for EncodedMessage {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Registration of a single game server with the master
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterHost {
    pub unique_id: u64,
    pub name: String,
    pub current_connections: u16,
    pub max_connections: u16,
    pub public_endpoint: SocketAddrV4,
}

impl RegisterHost {
    pub fn encode(&self) -> EncodedMessage {
        let name = self.name.as_bytes();
        let mut buf = Vec::with_capacity(1 + 8 + MAX_VARINT_BYTES + name.len() + 4 + 7);

        buf.push(MasterMessageType::RegisterHost as u8);
        buf.extend_from_slice(&self.unique_id.to_le_bytes());
        write_string(&mut buf, name);
        buf.extend_from_slice(&self.current_connections.to_le_bytes());
        buf.extend_from_slice(&self.max_connections.to_le_bytes());
        write_endpoint(&mut buf, self.public_endpoint);

        EncodedMessage(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(bytes);

        MasterMessageType::from_byte(reader.u8()?)?;

        let unique_id = u64::from_le_bytes(reader.array()?);
        let name = reader.string()?;
        let current_connections = u16::from_le_bytes(reader.array()?);
        let max_connections = u16::from_le_bytes(reader.array()?);
        let public_endpoint = reader.endpoint()?;

        if reader.remaining() > 0 {
            return Err(WireError::TrailingBytes(reader.remaining()));
        }

        Ok(RegisterHost {
            unique_id,
            name,
            current_connections,
            max_connections,
            public_endpoint,
        })
    }
}

fn write_varint(buf: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

fn write_string(buf: &mut Vec<u8>, bytes: &[u8]) {
    // Length prefix is a u32 varint
    write_varint(buf, bytes.len() as u32);
    buf.extend_from_slice(bytes);
}

fn write_endpoint(buf: &mut Vec<u8>, endpoint: SocketAddrV4) {
    buf.push(IPV4_LEN);
    buf.extend_from_slice(&endpoint.ip().octets());
    buf.extend_from_slice(&endpoint.port().to_le_bytes());
}

/// Cursor over a received datagram
struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < len {
            return Err(WireError::InsufficientData {
                needed: self.offset + len,
                available: self.buf.len(),
            });
        }
        let slice = &self.buf[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn varint(&mut self) -> Result<u32, WireError> {
        let mut value: u32 = 0;
        for i in 0..MAX_VARINT_BYTES {
            let byte = self.u8()?;
            value |= ((byte & 0x7F) as u32) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(WireError::MalformedLength)
    }

    fn string(&mut self) -> Result<String, WireError> {
        let len = self.varint()? as usize;
        let bytes = self.take(len)?;
        Ok(std::str::from_utf8(bytes)?.to_string())
    }

    fn endpoint(&mut self) -> Result<SocketAddrV4, WireError> {
        let len = self.u8()?;
        if len != IPV4_LEN {
            return Err(WireError::UnsupportedAddress(len));
        }
        let octets: [u8; 4] = self.array()?;
        let port = u16::from_le_bytes(self.array()?);
        Ok(SocketAddrV4::new(Ipv4Addr::from(octets), port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena() -> RegisterHost {
        RegisterHost {
            unique_id: 42,
            name: "Arena-1".to_string(),
            current_connections: 3,
            max_connections: MAX_CONNECTIONS,
            public_endpoint: SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 20), GAME_SERVER_PORT),
        }
    }

    #[test]
    fn test_register_host_layout() {
        let bytes = arena().encode().into_bytes();

        assert_eq!(bytes[0], MasterMessageType::RegisterHost as u8);
        assert_eq!(&bytes[1..9], &42u64.to_le_bytes());
        assert_eq!(bytes[9], 7);
        assert_eq!(&bytes[10..17], b"Arena-1");
        assert_eq!(&bytes[17..19], &3u16.to_le_bytes());
        assert_eq!(&bytes[19..21], &32u16.to_le_bytes());
        assert_eq!(bytes[21], 4);
        assert_eq!(&bytes[22..26], &[192, 168, 1, 20]);
        assert_eq!(&bytes[26..28], &GAME_SERVER_PORT.to_le_bytes());
        assert_eq!(bytes.len(), 28);
    }

    #[test]
    fn test_register_host_decode_recovers_fields() {
        let original = arena();
        let decoded = RegisterHost::decode(original.encode().as_bytes()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let host = arena();
        assert_eq!(host.encode(), host.encode());
    }

    #[test]
    fn test_long_name_uses_multibyte_length() {
        let mut host = arena();
        host.name = "x".repeat(300);
        let bytes = host.encode().into_bytes();

        // 300 = 0b10_0101100 -> 0xAC 0x02
        assert_eq!(&bytes[9..11], &[0xAC, 0x02]);
        assert_eq!(RegisterHost::decode(&bytes).unwrap().name.len(), 300);
    }

    #[test]
    fn test_utf8_name_survives() {
        let mut host = arena();
        host.name = "Skógur ⚔".to_string();
        let decoded = RegisterHost::decode(host.encode().as_bytes()).unwrap();
        assert_eq!(decoded.name, "Skógur ⚔");
    }

    #[test]
    fn test_empty_name() {
        let mut host = arena();
        host.name.clear();
        let bytes = host.encode().into_bytes();
        assert_eq!(bytes[9], 0);
        assert_eq!(RegisterHost::decode(&bytes).unwrap().name, "");
    }

    #[test]
    fn test_decode_truncated() {
        let bytes = arena().encode().into_bytes();
        let err = RegisterHost::decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(
            err,
            WireError::InsufficientData {
                needed: bytes.len(),
                available: bytes.len() - 1
            }
        );
        assert!(RegisterHost::decode(&[]).is_err());
    }

    #[test]
    fn test_decode_unknown_type() {
        let mut bytes = arena().encode().into_bytes();
        bytes[0] = 0x7F;
        assert_eq!(
            RegisterHost::decode(&bytes),
            Err(WireError::UnknownMessageType(0x7F))
        );
    }

    #[test]
    fn test_decode_rejects_ipv6_length() {
        let mut bytes = arena().encode().into_bytes();
        bytes[21] = 16;
        assert_eq!(
            RegisterHost::decode(&bytes),
            Err(WireError::UnsupportedAddress(16))
        );
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let mut bytes = arena().encode().into_bytes();
        bytes[10] = 0xFF;
        assert!(matches!(
            RegisterHost::decode(&bytes),
            Err(WireError::InvalidName(_))
        ));
    }

    #[test]
    fn test_decode_rejects_overlong_varint() {
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&[0xFF; 6]);
        assert_eq!(RegisterHost::decode(&bytes), Err(WireError::MalformedLength));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut bytes = arena().encode().into_bytes();
        bytes.push(0);
        assert_eq!(RegisterHost::decode(&bytes), Err(WireError::TrailingBytes(1)));
    }

    #[test]
    fn test_encoded_message_type() {
        let message = arena().encode();
        assert_eq!(
            message.message_type(),
            Some(MasterMessageType::RegisterHost)
        );
        assert!(!message.is_empty());
        assert_eq!(message.len(), message.as_ref().len());
    }
}
