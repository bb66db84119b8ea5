use std::io::Result;

/// Trait abstracting positional read access to cdb files.
///
/// Implementations must support reads at arbitrary offsets without mutating
/// shared state, which lets one opened file serve any number of concurrent
/// lookups. The trait is blanket-implemented for platform-specific `FileExt`
/// handles.
pub trait CdbReader {
    /// Reads `length` bytes starting at `offset` and forwards them to `f`.
    ///
    /// Implementations must return an `UnexpectedEof` error whenever the
    /// requested range cannot be satisfied in full.
    fn read_chunk_at<F, R>(&self, offset: u64, length: u64, f: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> Result<R>;
}

#[cfg(unix)]
impl<T: std::os::unix::fs::FileExt> CdbReader for T {
    fn read_chunk_at<F, R>(&self, offset: u64, length: u64, f: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> Result<R>,
    {
        let mut buffer = vec![0u8; length as usize];
        std::os::unix::fs::FileExt::read_exact_at(self, &mut buffer, offset)?;
        f(&buffer)
    }
}

#[cfg(windows)]
impl<T: std::os::windows::fs::FileExt> CdbReader for T {
    fn read_chunk_at<F, R>(&self, offset: u64, length: u64, f: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> Result<R>,
    {
        let mut buffer = vec![0u8; length as usize];
        let mut filled = 0;
        while filled < buffer.len() {
            let bytes = self.seek_read(&mut buffer[filled..], offset + filled as u64)?;
            if bytes == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "Failed to read enough bytes",
                ));
            }
            filled += bytes;
        }
        f(&buffer)
    }
}
