//! Frame wire format: `[BE32 ciphertext_len+16][ciphertext][16-byte tag]`.

use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};

use super::TunnelError;

pub const MAX_CHUNK_LEN: usize = 64 * 1024;
const TAG_LEN: usize = 16;
const MAX_FRAME_LEN: usize = MAX_CHUNK_LEN + TAG_LEN;

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, sealed: &[u8]) -> Result<(), TunnelError> {
    let len = u32::try_from(sealed.len()).map_err(|_| TunnelError::CryptoFailure)?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(sealed).await?;
    Ok(())
}

/// Reads one frame's length-prefixed ciphertext+tag. Rejects lengths outside
/// `16..=MAX_FRAME_LEN` before allocating or reading the payload.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, TunnelError> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;
    let len = u32::from_be_bytes(header) as usize;

    if !(TAG_LEN..=MAX_FRAME_LEN).contains(&len) {
        return Err(TunnelError::CryptoFailure);
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn frame_round_trips(sealed in proptest::collection::vec(any::<u8>(), TAG_LEN..MAX_FRAME_LEN)) {
            tokio_test::block_on(async {
                let mut buf = Vec::new();
                write_frame(&mut buf, &sealed).await.expect("write_frame");

                let mut cursor = std::io::Cursor::new(buf);
                let read_back = read_frame(&mut cursor).await.expect("read_frame");
                prop_assert_eq!(read_back, sealed);
                Ok(())
            })?;
        }
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected_before_allocating() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes());

        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor).await.expect_err("oversized frame rejected");
        assert!(matches!(err, TunnelError::CryptoFailure));
    }

    #[tokio::test]
    async fn undersized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(TAG_LEN as u32 - 1).to_be_bytes());

        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor).await.expect_err("undersized frame rejected");
        assert!(matches!(err, TunnelError::CryptoFailure));
    }
}
