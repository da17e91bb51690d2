use atlas_core::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::envelope::Envelope;
use crate::payload::Payload;

/// Maximum envelope size accepted on read, guarding against a corrupt or
/// malicious length prefix turning into an unbounded allocation.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Write one packet: a 4-byte big-endian length followed by exactly that
/// many bytes of bincode-encoded [`Envelope`].
pub async fn write_packet<W>(writer: &mut W, payload: &Payload) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    let envelope = Envelope::wrap(payload)?;
    let bytes = bincode::serialize(&envelope)?;
    let len = u32::try_from(bytes.len())
        .map_err(|_| Error::Transport("envelope too large to frame".into()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one packet, handling short reads transparently (`read_exact` loops
/// internally until the buffer is full or the socket errors/EOFs).
pub async fn read_packet<R>(reader: &mut R) -> Result<Payload, Error>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(Error::Transport(format!(
            "envelope of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit"
        )));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    let envelope: Envelope = bincode::deserialize(&body)?;
    envelope.unwrap_payload()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{AuthFailed, Payload};
    use std::io::Cursor;

    #[tokio::test]
    async fn writes_then_reads_back_the_same_payload() {
        let payload = Payload::AuthFailed(AuthFailed {
            message: "nope".into(),
        });
        let mut buf = Vec::new();
        write_packet(&mut buf, &payload).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = read_packet(&mut cursor).await.unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn truncated_frame_is_an_io_error() {
        let payload = Payload::AuthFailed(AuthFailed {
            message: "nope".into(),
        });
        let mut buf = Vec::new();
        write_packet(&mut buf, &payload).await.unwrap();
        buf.truncate(buf.len() - 1);

        let mut cursor = Cursor::new(buf);
        assert!(read_packet(&mut cursor).await.is_err());
    }
}
