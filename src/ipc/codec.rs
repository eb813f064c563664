//! Envelope codec
//!
//! Requests travel as length-prefixed frames (see [`super::transport`]) whose
//! body is the JSON encoding of the envelope. Byte fields are hex strings,
//! so a payload may take at most [`MAX_PAYLOAD_SIZE`] bytes. Integrity is
//! CRC-32/IEEE over the raw payload bytes only.

use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::common::{Error, Result};

use super::protocol::Request;
use super::transport;

/// Largest payload that fits in one frame once hex-encoded
pub const MAX_PAYLOAD_SIZE: usize = (transport::MAX_MESSAGE_SIZE as usize - 4096) / 2;

/// CRC-32/IEEE of a payload
pub fn checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Serialize an envelope into a frame body
pub fn encode(request: &Request) -> Result<Vec<u8>> {
    let size = request.message().data.len();
    if size > MAX_PAYLOAD_SIZE {
        return Err(Error::PayloadEncoding(format!(
            "payload of {} bytes exceeds the {} byte limit",
            size, MAX_PAYLOAD_SIZE
        )));
    }
    Ok(serde_json::to_vec(request)?)
}

/// Deserialize a frame body into an envelope
pub fn decode(body: &[u8]) -> Result<Request> {
    serde_json::from_slice(body).map_err(|e| Error::Decode(e.to_string()))
}

/// Encode and write one envelope
pub async fn write_request<W: AsyncWrite + Unpin>(writer: &mut W, request: &Request) -> Result<()> {
    let body = encode(request)?;
    transport::send_message(writer, &body).await?;
    Ok(())
}

/// Read and decode one envelope
///
/// Returns `Ok(None)` when the peer closed the stream at a frame boundary.
/// Truncated or malformed frames are [`Error::Decode`].
pub async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Request>> {
    let body = match transport::recv_message(reader).await {
        Ok(Some(body)) => body,
        Ok(None) => return Ok(None),
        Err(e) if matches!(e.kind(), io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData) => {
            return Err(Error::Decode(e.to_string()))
        }
        Err(e) => return Err(Error::Io(e)),
    };

    decode(&body).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::{Datatype, Header, Identifier, Message, MessageType};
    use std::io::Cursor;

    fn request(datatype: Datatype, data: &[u8]) -> Request {
        Request::new(
            b"SESS".to_vec(),
            Header {
                identifier: Identifier::new(*b"MODA"),
                message_type: MessageType::DATA,
            },
            Message::new(datatype, data.to_vec()),
        )
    }

    #[test]
    fn test_checksum_is_crc32_ieee() {
        // Standard check value for CRC-32/IEEE
        assert_eq!(checksum(b"123456789"), 0xcbf4_3926);
        assert_eq!(checksum(b""), 0);
    }

    #[test]
    fn test_round_trip_every_datatype() {
        let cases: [(Datatype, &[u8]); 7] = [
            (Datatype::Text, b"ping"),
            (Datatype::Int, b"42"),
            (Datatype::Json, br#"{"a":1}"#),
            (Datatype::Yaml, b"a: 1\n"),
            (Datatype::Bin, &[0, 159, 146, 150, 255]),
            (Datatype::Text, b""),
            (Datatype::Unknown(77), b"?"),
        ];
        for (datatype, data) in cases {
            let original = request(datatype, data);
            let decoded = decode(&encode(&original).unwrap()).unwrap();
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn test_binary_payload_is_hex_on_the_wire() {
        let data: Vec<u8> = (0..=255u8).cycle().take(64 * 1024).collect();
        let body = encode(&request(Datatype::Bin, &data)).unwrap();
        assert!(body.len() < 2 * data.len() + 512);

        let text = String::from_utf8(encode(&request(Datatype::Bin, &[0xde, 0xad])).unwrap()).unwrap();
        assert!(text.contains(r#""data":"dead""#));
        assert!(text.contains(r#""message_signature":"53455353""#));
    }

    #[test]
    fn test_payload_size_limit() {
        assert!(encode(&request(Datatype::Bin, &vec![7u8; MAX_PAYLOAD_SIZE])).is_ok());
        assert!(matches!(
            encode(&request(Datatype::Bin, &vec![7u8; MAX_PAYLOAD_SIZE + 1])),
            Err(Error::PayloadEncoding(_))
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode(b"not an envelope"), Err(Error::Decode(_))));
    }

    #[tokio::test]
    async fn test_stream_round_trip_then_orderly_eof() {
        let first = request(Datatype::Text, b"one");
        let second = request(Datatype::Json, br#"{"two":2}"#);

        let mut buf = Vec::new();
        write_request(&mut buf, &first).await.unwrap();
        write_request(&mut buf, &second).await.unwrap();

        let mut reader = Cursor::new(buf);
        assert_eq!(read_request(&mut reader).await.unwrap(), Some(first));
        assert_eq!(read_request(&mut reader).await.unwrap(), Some(second));
        assert_eq!(read_request(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_truncated_frame_is_decode_error() {
        let mut buf = Vec::new();
        write_request(&mut buf, &request(Datatype::Text, b"cut short"))
            .await
            .unwrap();
        buf.truncate(buf.len() - 3);

        let mut reader = Cursor::new(buf);
        assert!(matches!(read_request(&mut reader).await, Err(Error::Decode(_))));
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let mut buf = Vec::new();
        transport::send_message(&mut buf, b"{\"nope\":true}").await.unwrap();

        let mut reader = Cursor::new(buf);
        assert!(matches!(read_request(&mut reader).await, Err(Error::Decode(_))));
    }
}
