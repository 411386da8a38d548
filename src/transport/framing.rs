//! Frame delimiting for stream sockets.
//!
//! Frames are length-prefixed: [4 bytes big-endian u32][frame]

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{NetError, ProtocolErrorKind};

/// Maximum frame size (16 KB by default, can be overridden).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024;

/// Read a length-prefixed frame from the reader.
///
/// Returns `ConnectionClosed` on a clean end of stream and `FrameTooLarge`
/// if the announced length exceeds `max_size`.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Vec<u8>, NetError>
where
    R: AsyncReadExt + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(NetError::protocol(ProtocolErrorKind::ConnectionClosed));
        }
        Err(e) => return Err(NetError::Io(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > max_size {
        return Err(NetError::protocol(ProtocolErrorKind::FrameTooLarge {
            size: len,
            max: max_size,
        }));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;

    Ok(buf)
}

/// Write a length-prefixed frame to the writer.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), NetError>
where
    W: AsyncWriteExt + Unpin,
{
    let len = u32::try_from(frame.len()).map_err(|_| {
        NetError::protocol(ProtocolErrorKind::FrameTooLarge {
            size: frame.len(),
            max: u32::MAX as usize,
        })
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}
