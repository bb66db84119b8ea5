use std::io::Result;

/// Trait representing positional writers suitable for cdb serialization.
///
/// Records and tables are streamed forward, then the header is written back
/// at offset 0; this is satisfied by `FileExt` handles on both Unix and
/// Windows.
pub trait CdbWriter {
    /// Writes all of `data` at the given absolute `offset`.
    fn write_chunk_at(&self, data: &[u8], offset: u64) -> Result<()>;
}

#[cfg(unix)]
impl<T: std::os::unix::fs::FileExt> CdbWriter for T {
    fn write_chunk_at(&self, data: &[u8], offset: u64) -> Result<()> {
        std::os::unix::fs::FileExt::write_all_at(self, data, offset)
    }
}

#[cfg(windows)]
impl<T: std::os::windows::fs::FileExt> CdbWriter for T {
    fn write_chunk_at(&self, mut data: &[u8], mut offset: u64) -> Result<()> {
        while !data.is_empty() {
            let bytes = self.seek_write(data, offset)?;
            if bytes == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ));
            }
            data = &data[bytes..];
            offset += bytes as u64;
        }
        Ok(())
    }
}
