//! Length-prefixed text frames.
//!
//! Every frame is a 2-byte big-endian payload length followed by that many
//! bytes of Java's modified UTF-8, the layout `DataOutputStream::writeUTF`
//! produces on the mobile client. Modified UTF-8 differs from standard UTF-8
//! in two places: NUL is `C0 80`, and characters outside the BMP are written
//! as two 3-byte surrogates instead of one 4-byte sequence.

use cesu8::{from_java_cesu8, to_java_cesu8};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;

/// Largest payload a 16-bit length header can describe.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

const HEADER_LEN: usize = 2;

/// Encodes `text` as header + payload in a single buffer.
pub fn encode_frame(text: &str) -> Result<Vec<u8>, FrameError> {
    let payload = to_java_cesu8(text);
    let len = u16::try_from(payload.len()).map_err(|_| FrameError::FrameTooLarge(payload.len()))?;

    let mut encoded = Vec::with_capacity(HEADER_LEN + payload.len());
    encoded.extend_from_slice(&len.to_be_bytes());
    encoded.extend_from_slice(&payload);
    Ok(encoded)
}

/// Writes one frame and flushes it.
///
/// The frame is encoded up front and handed to a single `write_all`, so an
/// oversized payload writes nothing and a caller holding the writer's lock
/// never lets another frame land between the header and the payload.
pub async fn write_frame<W>(writer: &mut W, text: &str) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let encoded = encode_frame(text)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one complete frame.
///
/// Not cancel safe: dropping the future mid-frame loses the bytes already read,
/// so callers only abandon it when they are about to drop the stream as well.
pub async fn read_frame<R>(reader: &mut R) -> Result<String, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header)
        .await
        .map_err(FrameError::from_read)?;
    let len = u16::from_be_bytes(header) as usize;

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(FrameError::from_read)?;

    from_java_cesu8(&payload)
        .map(|text| text.into_owned())
        .map_err(|_| FrameError::MalformedFrame)
}
