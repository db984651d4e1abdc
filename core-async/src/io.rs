//! Async I/O traits used by streaming fetches.
//!
//! Bridge implementations hand back boxed [`AsyncRead`] streams for ranged
//! downloads; consumers pull from them with [`AsyncReadExt`].

pub use tokio::io::{
    copy, duplex, empty, sink, AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt,
    AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, ReadBuf,
};

/// Reads from `reader` until `buf` is full or the stream ends.
///
/// Returns the number of bytes placed in `buf`. Unlike `read_exact`, hitting
/// end of stream early is not an error; a short count signals it.
pub async fn read_up_to<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Reads and discards up to `count` bytes from `reader`.
///
/// Returns how many bytes were actually skipped, which is less than `count`
/// when the stream ends first.
pub async fn skip<R>(reader: &mut R, count: u64) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut limited = (&mut *reader).take(count);
    copy(&mut limited, &mut sink()).await
}
