//! Wire protocol
//!
//! Everything the broker, producers and consumers agree on at the byte
//! level:
//! - the correlation packet: `id` as a little-endian `u32` followed by the
//!   raw payload, with no length prefix (the payload is whatever remains)
//! - the consumer handshake tokens
//! - the single-byte API handshake frame that some peers send before
//!   speaking this protocol

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::utils::{Error, Result};

/// Sent by an endpoint that wants to register as a consumer.
pub const CONSUMER_HELLO: &[u8] = b"Consumer";

/// Broker reply to a successful consumer hello.
pub const CONSUMER_HELLO_ACK: &[u8] = b"Connected to broker";

/// Control frame of the higher-level API handshake. Not a packet.
pub const API_HANDSHAKE: u8 = 255;

/// Correlation packet exchanged between broker, consumers and producers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: u32,
    pub payload: Bytes,
}

impl Packet {
    pub const HEADER_LEN: usize = 4;

    pub fn new(id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::HEADER_LEN + self.payload.len());
        buf.put_u32_le(self.id);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Decode a packet. Fails with `TruncatedPacket` when the id is incomplete.
    ///
    /// ```
    /// use dispatchq::protocol::Packet;
    ///
    /// let packet = Packet::decode(&[7, 0, 0, 0, b'o', b'k']).expect("packet");
    /// assert_eq!(packet.id, 7);
    /// assert_eq!(&packet.payload[..], b"ok");
    /// ```
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_LEN {
            return Err(Error::TruncatedPacket(data.len()));
        }
        let mut buf = data;
        let id = buf.get_u32_le();
        Ok(Self {
            id,
            payload: Bytes::copy_from_slice(buf),
        })
    }

    /// True when `data` is the single-byte API handshake frame.
    pub fn is_api_handshake(data: &[u8]) -> bool {
        data.len() == 1 && data[0] == API_HANDSHAKE
    }
}

pub fn is_consumer_hello(data: &[u8]) -> bool {
    data == CONSUMER_HELLO
}

pub fn is_consumer_hello_ack(data: &[u8]) -> bool {
    data == CONSUMER_HELLO_ACK
}
