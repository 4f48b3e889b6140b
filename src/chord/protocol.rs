//! Contains utilities for the wire protocol used in the Chord network.
//!
//! Every packet is a fixed 6-byte header followed by a type-specific,
//! fixed-layout payload. Multi-byte integers are little-endian; the IPv4
//! address embedded in a `NodeDescriptor` keeps its own byte order.

use std::io::{self, Read, Write};
use std::net::Ipv4Addr;

use thiserror::Error;

use super::{Id, NodeDescriptor, CERT_MAX_LEN, ID_BYTE_LEN, SUCCESSOR_LIST_LEN};

/// Fixed magic byte identifying a well-formed header.
pub const MAGIC: u8 = 0xCC;

const HEADER_LEN: usize = 6;
const NODE_DESCRIPTOR_LEN: usize = ID_BYTE_LEN + 4 + 2;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("bad magic byte: {0:#x}")]
    BadMagic(u8),
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },
    #[error("unexpected message type: {0:#x}")]
    UnexpectedType(u8),
}

/// One byte identifying the kind of message carried by a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Ping = 0x01,
    FindSuccessor = 0x02,
    FindSuccessorResponse = 0x03,
    Notify = 0x04,
    GetPredecessor = 0x06,
    GetPredecessorResponse = 0x07,
    SetSuccessor = 0x08,
    SetPredecessor = 0x09,
    GetSuclist = 0x0A,
    GetSuclistResponse = 0x0B,
    GetCert = 0x0C,
    CertResponse = 0x0D,
}

impl MessageType {
    fn from_byte(b: u8) -> Result<Self, ProtocolError> {
        Ok(match b {
            0x01 => Self::Ping,
            0x02 => Self::FindSuccessor,
            0x03 => Self::FindSuccessorResponse,
            0x04 => Self::Notify,
            0x06 => Self::GetPredecessor,
            0x07 => Self::GetPredecessorResponse,
            0x08 => Self::SetSuccessor,
            0x09 => Self::SetPredecessor,
            0x0A => Self::GetSuclist,
            0x0B => Self::GetSuclistResponse,
            0x0C => Self::GetCert,
            0x0D => Self::CertResponse,
            other => return Err(ProtocolError::UnexpectedType(other)),
        })
    }
}

/// A decoded chord protocol message: the header's type byte plus its
/// type-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Ping,
    FindSuccessor { target: Id },
    FindSuccessorResponse(NodeDescriptor),
    Notify(NodeDescriptor),
    GetPredecessor,
    /// `None` on the wire is an empty body: "no predecessor known".
    GetPredecessorResponse(Option<NodeDescriptor>),
    SetSuccessor(NodeDescriptor),
    SetPredecessor(NodeDescriptor),
    GetSuclist,
    GetSuclistResponse([NodeDescriptor; SUCCESSOR_LIST_LEN]),
    GetCert,
    CertResponse(Vec<u8>),
}

impl Message {
    fn message_type(&self) -> MessageType {
        match self {
            Self::Ping => MessageType::Ping,
            Self::FindSuccessor { .. } => MessageType::FindSuccessor,
            Self::FindSuccessorResponse(_) => MessageType::FindSuccessorResponse,
            Self::Notify(_) => MessageType::Notify,
            Self::GetPredecessor => MessageType::GetPredecessor,
            Self::GetPredecessorResponse(_) => MessageType::GetPredecessorResponse,
            Self::SetSuccessor(_) => MessageType::SetSuccessor,
            Self::SetPredecessor(_) => MessageType::SetPredecessor,
            Self::GetSuclist => MessageType::GetSuclist,
            Self::GetSuclistResponse(_) => MessageType::GetSuclistResponse,
            Self::GetCert => MessageType::GetCert,
            Self::CertResponse(_) => MessageType::CertResponse,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Self::Ping | Self::GetPredecessor | Self::GetSuclist | Self::GetCert => Vec::new(),
            Self::FindSuccessor { target } => target.as_bytes().to_vec(),
            Self::FindSuccessorResponse(node)
            | Self::Notify(node)
            | Self::SetSuccessor(node)
            | Self::SetPredecessor(node) => encode_node(node),
            Self::GetPredecessorResponse(None) => Vec::new(),
            Self::GetPredecessorResponse(Some(node)) => encode_node(node),
            Self::GetSuclistResponse(nodes) => {
                let mut buf = Vec::with_capacity(1 + NODE_DESCRIPTOR_LEN * SUCCESSOR_LIST_LEN);
                buf.push(SUCCESSOR_LIST_LEN as u8);
                for node in nodes {
                    buf.extend_from_slice(&encode_node(node));
                }
                buf
            }
            Self::CertResponse(data) => {
                let mut buf = Vec::with_capacity(4 + data.len());
                buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
                buf.extend_from_slice(data);
                buf
            }
        }
    }

    /// Encodes the header and payload into a single framed packet.
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.payload();
        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.push(MAGIC);
        buf.push(self.message_type() as u8);
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
        buf
    }

    /// Writes this message as one framed packet to `writer`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtocolError> {
        writer.write_all(&self.encode())?;
        Ok(())
    }

    /// Reads exactly one framed packet from `reader` and decodes it.
    /// A `magic` byte other than `0xCC` is a framing error. Payload
    /// reads are capped at `min(payload_len, sizeof(expected-body))`;
    /// anything shorter than that is a short-read failure.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, ProtocolError> {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header)?;

        if header[0] != MAGIC {
            return Err(ProtocolError::BadMagic(header[0]));
        }

        let message_type = MessageType::from_byte(header[1])?;
        let payload_len = u32::from_le_bytes([header[2], header[3], header[4], header[5]]) as usize;

        decode_payload(message_type, payload_len, reader)
    }
}

fn encode_node(node: &NodeDescriptor) -> Vec<u8> {
    let mut buf = Vec::with_capacity(NODE_DESCRIPTOR_LEN);
    buf.extend_from_slice(node.id.as_bytes());
    buf.extend_from_slice(&node.ip.octets());
    buf.extend_from_slice(&node.port.to_le_bytes());
    buf
}

fn read_exact_capped<R: Read>(
    reader: &mut R,
    payload_len: usize,
    expected: usize,
) -> Result<Vec<u8>, ProtocolError> {
    let to_read = payload_len.min(expected);
    let mut buf = vec![0u8; to_read];
    reader.read_exact(&mut buf).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ProtocolError::ShortRead {
                expected: to_read,
                actual: 0,
            }
        } else {
            ProtocolError::Io(err)
        }
    })?;
    Ok(buf)
}

fn decode_node(buf: &[u8]) -> Result<NodeDescriptor, ProtocolError> {
    if buf.len() < NODE_DESCRIPTOR_LEN {
        return Err(ProtocolError::ShortRead {
            expected: NODE_DESCRIPTOR_LEN,
            actual: buf.len(),
        });
    }

    let mut id_bytes = [0u8; ID_BYTE_LEN];
    id_bytes.copy_from_slice(&buf[0..ID_BYTE_LEN]);

    let ip = Ipv4Addr::new(
        buf[ID_BYTE_LEN],
        buf[ID_BYTE_LEN + 1],
        buf[ID_BYTE_LEN + 2],
        buf[ID_BYTE_LEN + 3],
    );

    let port = u16::from_le_bytes([buf[ID_BYTE_LEN + 4], buf[ID_BYTE_LEN + 5]]);

    Ok(NodeDescriptor::new(Id::from_bytes(id_bytes), ip, port))
}

fn decode_payload<R: Read>(
    message_type: MessageType,
    payload_len: usize,
    reader: &mut R,
) -> Result<Message, ProtocolError> {
    Ok(match message_type {
        MessageType::Ping => Message::Ping,
        MessageType::GetPredecessor => Message::GetPredecessor,
        MessageType::GetSuclist => Message::GetSuclist,
        MessageType::GetCert => Message::GetCert,
        MessageType::FindSuccessor => {
            let buf = read_exact_capped(reader, payload_len, ID_BYTE_LEN)?;
            if buf.len() < ID_BYTE_LEN {
                return Err(ProtocolError::ShortRead {
                    expected: ID_BYTE_LEN,
                    actual: buf.len(),
                });
            }
            let mut id_bytes = [0u8; ID_BYTE_LEN];
            id_bytes.copy_from_slice(&buf[..ID_BYTE_LEN]);
            Message::FindSuccessor {
                target: Id::from_bytes(id_bytes),
            }
        }
        MessageType::FindSuccessorResponse => {
            let buf = read_exact_capped(reader, payload_len, NODE_DESCRIPTOR_LEN)?;
            Message::FindSuccessorResponse(decode_node(&buf)?)
        }
        MessageType::Notify => {
            let buf = read_exact_capped(reader, payload_len, NODE_DESCRIPTOR_LEN)?;
            Message::Notify(decode_node(&buf)?)
        }
        MessageType::SetSuccessor => {
            let buf = read_exact_capped(reader, payload_len, NODE_DESCRIPTOR_LEN)?;
            Message::SetSuccessor(decode_node(&buf)?)
        }
        MessageType::SetPredecessor => {
            let buf = read_exact_capped(reader, payload_len, NODE_DESCRIPTOR_LEN)?;
            Message::SetPredecessor(decode_node(&buf)?)
        }
        MessageType::GetPredecessorResponse => {
            if payload_len == 0 {
                Message::GetPredecessorResponse(None)
            } else {
                let buf = read_exact_capped(reader, payload_len, NODE_DESCRIPTOR_LEN)?;
                Message::GetPredecessorResponse(Some(decode_node(&buf)?))
            }
        }
        MessageType::GetSuclistResponse => {
            let expected = 1 + NODE_DESCRIPTOR_LEN * SUCCESSOR_LIST_LEN;
            let buf = read_exact_capped(reader, payload_len, expected)?;
            if buf.len() < expected {
                return Err(ProtocolError::ShortRead {
                    expected,
                    actual: buf.len(),
                });
            }

            let mut nodes = [NodeDescriptor::new(Id::ZERO, Ipv4Addr::UNSPECIFIED, 0); SUCCESSOR_LIST_LEN];
            for (i, node) in nodes.iter_mut().enumerate() {
                let start = 1 + i * NODE_DESCRIPTOR_LEN;
                *node = decode_node(&buf[start..start + NODE_DESCRIPTOR_LEN])?;
            }
            Message::GetSuclistResponse(nodes)
        }
        MessageType::CertResponse => {
            let expected = 4 + CERT_MAX_LEN;
            let buf = read_exact_capped(reader, payload_len, expected)?;
            if buf.len() < 4 {
                return Err(ProtocolError::ShortRead {
                    expected: 4,
                    actual: buf.len(),
                });
            }
            let cert_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
            let available = buf.len() - 4;
            let cert_len = cert_len.min(available).min(CERT_MAX_LEN);
            Message::CertResponse(buf[4..4 + cert_len].to_vec())
        }
    })
}
