//! Length-prefixed peer wire message frame: `[length: u32][id: u8][payload]`.
//! `length == 0` is a keep-alive and carries no id.
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{PeerError, PeerResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield(Vec<u8>),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
    /// An id outside 0..=8. The frame is still consumed so the stream stays
    /// aligned; the payload is discarded.
    Unknown { id: u8 },
}

impl Message {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Message::KeepAlive => "keep-alive",
            Message::Choke => "choke",
            Message::Unchoke => "unchoke",
            Message::Interested => "interested",
            Message::NotInterested => "not-interested",
            Message::Have { .. } => "have",
            Message::Bitfield(_) => "bitfield",
            Message::Request { .. } => "request",
            Message::Piece { .. } => "piece",
            Message::Cancel { .. } => "cancel",
            Message::Unknown { .. } => "unknown",
        }
    }

    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        match self {
            Message::KeepAlive => {
                buf.put_u32(0);
                return buf;
            }
            Message::Choke => write_header(&mut buf, 1, 0),
            Message::Unchoke => write_header(&mut buf, 1, 1),
            Message::Interested => write_header(&mut buf, 1, 2),
            Message::NotInterested => write_header(&mut buf, 1, 3),
            Message::Have { piece_index } => {
                write_header(&mut buf, 5, 4);
                buf.put_u32(*piece_index);
            }
            Message::Bitfield(bits) => {
                write_header(&mut buf, 1 + bits.len() as u32, 5);
                buf.put_slice(bits);
            }
            Message::Request { index, begin, length } => {
                write_header(&mut buf, 13, 6);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece { index, begin, block } => {
                write_header(&mut buf, 9 + block.len() as u32, 7);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(block);
            }
            Message::Cancel { index, begin, length } => {
                write_header(&mut buf, 13, 8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Unknown { id } => write_header(&mut buf, 1, *id),
        }
        buf
    }

    /// Writes exactly one frame to any async sink (a whole socket or a
    /// split write half).
    pub async fn write<W: AsyncWrite + Unpin>(&self, stream: &mut W) -> PeerResult<()> {
        stream.write_all(&self.encode()).await?;
        Ok(())
    }

    /// Reads exactly one frame from any async source (a whole socket or a
    /// split read half).
    pub async fn read<R: AsyncRead + Unpin>(stream: &mut R) -> PeerResult<Self> {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await?;
        let length = BigEndian::read_u32(&len_buf);
        if length == 0 {
            return Ok(Message::KeepAlive);
        }

        let mut id_buf = [0u8; 1];
        stream.read_exact(&mut id_buf).await?;
        let id = id_buf[0];

        let payload_len = (length - 1) as usize;
        let mut payload = vec![0u8; payload_len];
        stream.read_exact(&mut payload).await?;

        Self::from_id_and_payload(id, payload)
    }

    fn from_id_and_payload(id: u8, payload: Vec<u8>) -> PeerResult<Self> {
        match id {
            0 => expect_empty(id, &payload).map(|_| Message::Choke),
            1 => expect_empty(id, &payload).map(|_| Message::Unchoke),
            2 => expect_empty(id, &payload).map(|_| Message::Interested),
            3 => expect_empty(id, &payload).map(|_| Message::NotInterested),
            4 => {
                let piece_index = read_u32(id, &payload, 0)?;
                Ok(Message::Have { piece_index })
            }
            5 => Ok(Message::Bitfield(payload)),
            6 => Ok(Message::Request {
                index: read_u32(id, &payload, 0)?,
                begin: read_u32(id, &payload, 4)?,
                length: read_u32(id, &payload, 8)?,
            }),
            7 => {
                if payload.len() < 8 {
                    return Err(PeerError::TruncatedPayload(id));
                }
                Ok(Message::Piece {
                    index: read_u32(id, &payload, 0)?,
                    begin: read_u32(id, &payload, 4)?,
                    block: payload[8..].to_vec(),
                })
            }
            8 => Ok(Message::Cancel {
                index: read_u32(id, &payload, 0)?,
                begin: read_u32(id, &payload, 4)?,
                length: read_u32(id, &payload, 8)?,
            }),
            other => Ok(Message::Unknown { id: other }),
        }
    }
}

fn write_header(buf: &mut BytesMut, length: u32, id: u8) {
    buf.put_u32(length);
    buf.put_u8(id);
}

fn expect_empty(id: u8, payload: &[u8]) -> PeerResult<()> {
    if payload.is_empty() {
        Ok(())
    } else {
        Err(PeerError::TruncatedPayload(id))
    }
}

fn read_u32(id: u8, payload: &[u8], offset: usize) -> PeerResult<u32> {
    payload
        .get(offset..offset + 4)
        .map(BigEndian::read_u32)
        .ok_or(PeerError::TruncatedPayload(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn round_trip(msg: Message) -> Message {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sent = msg.clone();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            sent.write(&mut socket).await.unwrap();
        });
        let mut client = TcpStream::connect(addr).await.unwrap();
        let received = Message::read(&mut client).await.unwrap();
        server.await.unwrap();
        received
    }

    #[tokio::test]
    async fn keep_alive_round_trips_with_zero_length() {
        assert_eq!(round_trip(Message::KeepAlive).await, Message::KeepAlive);
    }

    #[tokio::test]
    async fn have_round_trips_piece_index() {
        let msg = Message::Have { piece_index: 42 };
        assert_eq!(round_trip(msg.clone()).await, msg);
    }

    #[tokio::test]
    async fn bitfield_round_trips_raw_bytes() {
        let msg = Message::Bitfield(vec![0b1010_1010, 0x00, 0xFF]);
        assert_eq!(round_trip(msg.clone()).await, msg);
    }

    #[tokio::test]
    async fn request_and_piece_round_trip() {
        let req = Message::Request { index: 1, begin: 2, length: 3 };
        assert_eq!(round_trip(req.clone()).await, req);

        let piece = Message::Piece { index: 1, begin: 0, block: vec![1, 2, 3, 4] };
        assert_eq!(round_trip(piece.clone()).await, piece);
    }

    #[tokio::test]
    async fn unknown_id_is_discarded_without_breaking_framing() {
        let msg = Message::Unknown { id: 200 };
        assert_eq!(round_trip(msg).await, Message::Unknown { id: 200 });
    }

    #[test]
    fn piece_requires_at_least_index_and_begin() {
        let err = Message::from_id_and_payload(7, vec![0, 0]).unwrap_err();
        assert!(matches!(err, PeerError::TruncatedPayload(7)));
    }
}
