//! UNIX domain socket transport
//!
//! Binds and dials filesystem sockets through the interprocess crate and
//! moves length-prefixed frames across them.

use std::io;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use interprocess::local_socket::tokio::{prelude::*, Listener};
use interprocess::local_socket::{GenericFilePath, ListenerOptions};

pub use interprocess::local_socket::tokio::Stream;

/// Maximum frame body size (10 MB)
pub const MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;

/// Bind a listener at a socket path
///
/// The caller is responsible for removing stale socket files first. The
/// socket is restricted to its owner (0600).
pub fn create_listener(socket: &Path) -> io::Result<Listener> {
    let name = socket.to_string_lossy().into_owned();
    let fs_name = name.to_fs_name::<GenericFilePath>()?;
    let listener = ListenerOptions::new().name(fs_name).create_tokio()?;

    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(socket, std::fs::Permissions::from_mode(0o600))?;

    Ok(listener)
}

/// Connect to a socket path
pub async fn connect(socket: &Path) -> io::Result<Stream> {
    let name = socket.to_string_lossy().into_owned();
    let fs_name = name.to_fs_name::<GenericFilePath>()?;
    Stream::connect(fs_name).await
}

/// Check if a socket file exists
pub fn socket_exists(socket: &Path) -> bool {
    socket.exists()
}

/// Send a length-prefixed message
pub async fn send_message<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    if data.len() > MAX_MESSAGE_SIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Message too large",
        ));
    }

    let len = data.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Receive a length-prefixed message
///
/// Returns `Ok(None)` if the stream ends before the first byte of a frame.
/// A stream ending anywhere inside a frame is `UnexpectedEof`.
pub async fn recv_message<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Stream ended inside frame header",
            ));
        }
        filled += n;
    }
    let len = u32::from_le_bytes(len_buf);

    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Message too large: {} bytes", len),
        ));
    }

    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data).await?;
    Ok(Some(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_frame_layout() {
        let mut out = Vec::new();
        send_message(&mut out, b"abc").await.unwrap();
        assert_eq!(out, vec![3, 0, 0, 0, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn test_empty_stream_is_orderly_close() {
        let mut reader = Cursor::new(Vec::<u8>::new());
        assert!(recv_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_header_is_unexpected_eof() {
        let mut reader = Cursor::new(vec![3u8, 0]);
        let err = recv_message(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut reader = Cursor::new((MAX_MESSAGE_SIZE + 1).to_le_bytes().to_vec());
        let err = recv_message(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_listener_and_connect() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("t.sock");
        let listener = create_listener(&socket).unwrap();
        assert!(socket_exists(&socket));

        let accept = tokio::spawn(async move {
            let mut stream = listener.accept().await.unwrap();
            let got = recv_message(&mut stream).await.unwrap();
            got.unwrap()
        });

        let mut stream = connect(&socket).await.unwrap();
        send_message(&mut stream, b"hello").await.unwrap();
        assert_eq!(accept.await.unwrap(), b"hello".to_vec());
    }
}
