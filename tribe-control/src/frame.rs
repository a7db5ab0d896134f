//! Length-prefixed bincode frames

use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{ControlError, Result};

/// Largest request the server reads
pub const MAX_REQUEST_SIZE: usize = 1_000_000;

/// Largest response the client reads
pub const MAX_RESPONSE_SIZE: usize = 10_000_000;

pub async fn read<T, R>(reader: &mut R, max: usize) -> Result<T>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin + Send,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ControlError::ConnectionClosed
        } else {
            ControlError::Io(e)
        }
    })?;

    let len = usize::try_from(u32::from_be_bytes(len_buf)).unwrap_or(usize::MAX);
    if len > max {
        return Err(ControlError::FrameTooLarge { len, max });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    let (value, _) = bincode::serde::decode_from_slice(&body, bincode::config::legacy())?;
    Ok(value)
}

pub async fn write<T, W>(writer: &mut W, value: &T) -> Result<()>
where
    T: Serialize + Sync,
    W: AsyncWrite + Unpin + Send,
{
    let body = bincode::serde::encode_to_vec(value, bincode::config::legacy())?;
    let len = u32::try_from(body.len())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;

    Ok(())
}
