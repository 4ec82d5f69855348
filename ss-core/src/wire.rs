//! Framing: little-endian fixed-width integers, u64 length-prefixed byte strings
//! and fixed-size arrays. Every length read from the peer is capped before allocation.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Malformed, short or over-length field from the peer.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("stream error: {0}")]
    Io(#[from] io::Error),
    #[error("field length {len} exceeds limit {max}")]
    TooLong { len: u64, max: u64 },
    #[error("path is not valid UTF-8")]
    InvalidUtf8,
}

impl FramingError {
    /// True when the peer closed the stream in the middle of a field.
    pub fn is_eof(&self) -> bool {
        matches!(self, FramingError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

pub async fn read_u8<R: AsyncRead + Unpin>(r: &mut R) -> Result<u8, FramingError> {
    Ok(r.read_u8().await?)
}

pub async fn write_u8<W: AsyncWrite + Unpin>(w: &mut W, v: u8) -> Result<(), FramingError> {
    w.write_u8(v).await?;
    Ok(())
}

/// One byte, zero is false and anything else is true.
pub async fn read_bool<R: AsyncRead + Unpin>(r: &mut R) -> Result<bool, FramingError> {
    Ok(read_u8(r).await? != 0)
}

pub async fn write_bool<W: AsyncWrite + Unpin>(w: &mut W, v: bool) -> Result<(), FramingError> {
    write_u8(w, v as u8).await
}

pub async fn read_u64<R: AsyncRead + Unpin>(r: &mut R) -> Result<u64, FramingError> {
    Ok(r.read_u64_le().await?)
}

pub async fn write_u64<W: AsyncWrite + Unpin>(w: &mut W, v: u64) -> Result<(), FramingError> {
    w.write_u64_le(v).await?;
    Ok(())
}

/// Fixed-size field (hash, identifier, signature); no length prefix.
pub async fn read_array<R: AsyncRead + Unpin, const N: usize>(
    r: &mut R,
) -> Result<[u8; N], FramingError> {
    let mut out = [0u8; N];
    r.read_exact(&mut out).await?;
    Ok(out)
}

pub async fn write_array<W: AsyncWrite + Unpin>(w: &mut W, v: &[u8]) -> Result<(), FramingError> {
    w.write_all(v).await?;
    Ok(())
}

/// Push buffered writes to the peer before waiting on its reply.
pub async fn flush<W: AsyncWrite + Unpin>(w: &mut W) -> Result<(), FramingError> {
    w.flush().await?;
    Ok(())
}

/// Flush and close our write side; the peer sees end of stream.
pub async fn close<W: AsyncWrite + Unpin>(w: &mut W) -> Result<(), FramingError> {
    w.shutdown().await?;
    Ok(())
}

/// Read `u64 length || bytes`, rejecting any length above `max` before allocating.
pub async fn read_bytes<R: AsyncRead + Unpin>(r: &mut R, max: u64) -> Result<Vec<u8>, FramingError> {
    let len = read_u64(r).await?;
    read_body(r, len, max).await
}

async fn read_body<R: AsyncRead + Unpin>(
    r: &mut R,
    len: u64,
    max: u64,
) -> Result<Vec<u8>, FramingError> {
    if len > max {
        return Err(FramingError::TooLong { len, max });
    }
    let size = usize::try_from(len).map_err(|_| FramingError::TooLong { len, max })?;
    let mut out = vec![0u8; size];
    r.read_exact(&mut out).await?;
    Ok(out)
}

/// Write `u64 length || bytes`.
pub async fn write_bytes<W: AsyncWrite + Unpin>(w: &mut W, v: &[u8]) -> Result<(), FramingError> {
    write_u64(w, v.len() as u64).await?;
    w.write_all(v).await?;
    Ok(())
}

/// Length-prefixed UTF-8 string (client paths).
pub async fn read_string<R: AsyncRead + Unpin>(r: &mut R, max: u64) -> Result<String, FramingError> {
    let bytes = read_bytes(r, max).await?;
    String::from_utf8(bytes).map_err(|_| FramingError::InvalidUtf8)
}

/// Read a fixed-size field, or `None` if the stream ends cleanly before its
/// first byte. A stream that ends partway through is still an error.
pub async fn read_array_or_eof<R: AsyncRead + Unpin, const N: usize>(
    r: &mut R,
) -> Result<Option<[u8; N]>, FramingError> {
    let mut buf = [0u8; N];
    let mut filled = 0;
    while filled < N {
        let n = r.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        filled += n;
    }
    Ok(Some(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn integers_are_little_endian() {
        let mut buf = Vec::new();
        write_u64(&mut buf, 0x0102_0304_0506_0708).await.unwrap();
        assert_eq!(buf, [8, 7, 6, 5, 4, 3, 2, 1]);
        let mut r = &buf[..];
        assert_eq!(read_u64(&mut r).await.unwrap(), 0x0102_0304_0506_0708);
    }

    #[tokio::test]
    async fn bool_is_nonzero_byte() {
        let mut r: &[u8] = &[0, 1, 7];
        assert!(!read_bool(&mut r).await.unwrap());
        assert!(read_bool(&mut r).await.unwrap());
        assert!(read_bool(&mut r).await.unwrap());
    }

    #[tokio::test]
    async fn length_prefixed_string() {
        let mut buf = Vec::new();
        write_bytes(&mut buf, "mods/a.jar".as_bytes()).await.unwrap();
        assert_eq!(&buf[..8], &10u64.to_le_bytes());
        let mut r = &buf[..];
        assert_eq!(read_string(&mut r, 4096).await.unwrap(), "mods/a.jar");
        assert!(r.is_empty());
    }

    #[tokio::test]
    async fn over_limit_length_rejected_before_read() {
        let mut buf = Vec::new();
        write_u64(&mut buf, u64::MAX).await.unwrap();
        let mut r = &buf[..];
        let err = read_bytes(&mut r, 4096).await.unwrap_err();
        assert!(matches!(err, FramingError::TooLong { len: u64::MAX, max: 4096 }));
    }

    #[tokio::test]
    async fn short_body_is_framing_error() {
        let mut buf = Vec::new();
        write_u64(&mut buf, 10).await.unwrap();
        buf.extend_from_slice(b"abc");
        let mut r = &buf[..];
        let err = read_bytes(&mut r, 4096).await.unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn invalid_utf8_path() {
        let mut buf = Vec::new();
        write_bytes(&mut buf, &[0xff, 0xfe]).await.unwrap();
        let mut r = &buf[..];
        assert!(matches!(
            read_string(&mut r, 16).await,
            Err(FramingError::InvalidUtf8)
        ));
    }

    #[tokio::test]
    async fn clean_eof_only_at_field_boundary() {
        let mut r: &[u8] = &[1, 2, 3, 4];
        assert_eq!(read_array_or_eof::<_, 4>(&mut r).await.unwrap(), Some([1, 2, 3, 4]));
        assert_eq!(read_array_or_eof::<_, 4>(&mut r).await.unwrap(), None);

        let mut r: &[u8] = &[5, 0, 0];
        let err = read_array_or_eof::<_, 8>(&mut r).await.unwrap_err();
        assert!(err.is_eof());
    }
}
