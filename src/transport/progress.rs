//! Chunked copy with progress reporting, shared by upload and download.

use std::io::{self, Read, Write};

/// Progress callback: `(cumulative_bytes, total_bytes)`.
pub type ProgressFn<'a> = &'a mut dyn FnMut(u64, u64);

/// Bytes moved per write.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Copy `reader` into `writer`, reporting after every chunk written.
///
/// The cumulative value never decreases and the last report always has
/// `cumulative == total`. Pass `0` when the size is unknown. A zero-byte copy
/// still reports once.
pub fn copy_with_progress<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
    total: u64,
    mut on_progress: Option<ProgressFn<'_>>,
) -> io::Result<u64> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut transferred = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        transferred += n as u64;
        if let Some(cb) = on_progress.as_deref_mut() {
            cb(transferred, total);
        }
    }
    writer.flush()?;

    // Final report ends at the total; an unknown or wrong `total` is replaced by the bytes moved.
    if (transferred == 0 || transferred != total)
        && let Some(cb) = on_progress.as_deref_mut()
    {
        cb(transferred, transferred);
    }
    Ok(transferred)
}
