//! Stream framing for the QUIC transport.
//!
//! Every frame is a big-endian `u32` length followed by the body:
//!
//! ```text
//! +----------------+---------------------------+
//! | length (u32 BE)| body (length bytes)       |
//! +----------------+---------------------------+
//! ```
//!
//! The first frame in each direction is a JSON [`Handshake`]; every frame
//! after an accepted handshake carries one opaque application payload.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{NearbyError, Result};
use crate::identity::PeerId;

/// Size of the length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default frame size limit (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Handshake frames exchanged when a connection opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Handshake {
    /// Inviter introduces itself.
    Hello {
        /// Inviting peer
        peer: PeerId,
        /// Base64 invitation context
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
    /// Invitee answers.
    Reply {
        /// Transport-level decision
        accepted: bool,
        /// Answering peer
        peer: PeerId,
    },
}

impl Handshake {
    /// Create a HELLO frame.
    pub fn hello(peer: PeerId, context: Option<&[u8]>) -> Self {
        Self::Hello {
            peer,
            context: context.map(|bytes| BASE64.encode(bytes)),
        }
    }

    /// Create a REPLY frame.
    pub fn reply(peer: PeerId, accepted: bool) -> Self {
        Self::Reply { accepted, peer }
    }

    /// Decoded invitation context of a HELLO.
    pub fn context(&self) -> Result<Option<Bytes>> {
        match self {
            Self::Hello {
                context: Some(encoded),
                ..
            } => BASE64
                .decode(encoded)
                .map(|bytes| Some(Bytes::from(bytes)))
                .map_err(|e| NearbyError::Serialization(format!("Bad invitation context: {e}"))),
            _ => Ok(None),
        }
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| NearbyError::Serialization(format!("Bad handshake frame: {e}")))
    }
}

/// Prefix `payload` with its length.
pub fn encode_frame(payload: &[u8], max_frame_size: usize) -> Result<Bytes> {
    if payload.len() > max_frame_size || u32::try_from(payload.len()).is_err() {
        return Err(NearbyError::FrameTooLarge {
            size: payload.len(),
            max: max_frame_size,
        });
    }
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Write one frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], max_frame_size: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload, max_frame_size)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame; `None` when the stream ended cleanly between frames.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let size = u32::from_be_bytes(prefix) as usize;
    if size > max_frame_size {
        return Err(NearbyError::FrameTooLarge {
            size,
            max: max_frame_size,
        });
    }

    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await?;
    Ok(Some(Bytes::from(body)))
}

/// Write a handshake frame.
pub async fn write_handshake<W>(writer: &mut W, handshake: &Handshake) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &handshake.to_bytes()?, DEFAULT_MAX_FRAME_SIZE).await
}

/// Read a handshake frame; a closed stream is an error here.
pub async fn read_handshake<R>(reader: &mut R) -> Result<Handshake>
where
    R: AsyncRead + Unpin,
{
    let body = read_frame(reader, DEFAULT_MAX_FRAME_SIZE)
        .await?
        .ok_or_else(|| NearbyError::Transport("Stream closed during handshake".to_string()))?;
    Handshake::from_bytes(&body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_prefix() {
        let frame = encode_frame(b"abc", 16).unwrap();
        assert_eq!(&frame[..], &[0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_encode_too_large() {
        let result = encode_frame(&[0u8; 32], 16);
        assert!(matches!(
            result,
            Err(NearbyError::FrameTooLarge { size: 32, max: 16 })
        ));
    }

    #[tokio::test]
    async fn test_frames_keep_order() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        for payload in [&b"first"[..], b"", b"third"] {
            write_frame(&mut client, payload, 64).await.unwrap();
        }
        drop(client);

        let mut received = Vec::new();
        while let Some(frame) = read_frame(&mut server, 64).await.unwrap() {
            received.push(frame);
        }
        assert_eq!(received, vec![&b"first"[..], b"", b"third"]);
    }

    #[tokio::test]
    async fn test_read_rejects_oversized_prefix() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0, 1, 0]).await.unwrap();

        let result = read_frame(&mut server, 16).await;
        assert!(matches!(result, Err(NearbyError::FrameTooLarge { size: 256, .. })));
    }

    #[tokio::test]
    async fn test_truncated_body_is_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0, 0, 8, 1, 2]).await.unwrap();
        drop(client);

        assert!(read_frame(&mut server, 16).await.is_err());
    }

    #[tokio::test]
    async fn test_handshake_exchange() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let alice = PeerId::new("alice");

        write_handshake(&mut client, &Handshake::hello(alice.clone(), Some(b"ctx")))
            .await
            .unwrap();
        let hello = read_handshake(&mut server).await.unwrap();

        assert!(matches!(&hello, Handshake::Hello { peer, .. } if *peer == alice));
        assert_eq!(hello.context().unwrap().unwrap().as_ref(), b"ctx");
    }

    #[test]
    fn test_reply_json_shape() {
        let reply = Handshake::reply(PeerId::new("bob"), false);
        let json: serde_json::Value = serde_json::from_slice(&reply.to_bytes().unwrap()).unwrap();
        assert_eq!(json["type"], "reply");
        assert_eq!(json["accepted"], false);
    }
}
