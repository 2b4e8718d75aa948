//! Append-only writer bound to one Buffered name. Bytes go straight to the local file underlying
//! the output handle; a CRC32 is accumulated over every byte written.

use std::io::Write;

use crate::error::Result;
use crate::fs_cache::CacheOutput;

/// Bound to one Buffered name. Closing (dropping) finalizes the on-disk file; the directory's
/// Buffered-set entry is unaffected by close — only `sync`/`syncMetaData`/`rename` change a
/// name's state.
pub struct S3IndexOutput {
    name: String,
    inner: CacheOutput,
    checksum: u32,
}

impl S3IndexOutput {
    pub(crate) fn new(name: String, inner: CacheOutput) -> Self {
        Self {
            name,
            inner,
            checksum: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.inner.write_all(buf)?;
        self.checksum = crc32c::crc32c_append(self.checksum, buf);
        Ok(())
    }

    pub fn write_byte(&mut self, b: u8) -> Result<()> {
        self.write_bytes(&[b])
    }

    /// Monotonic byte counter, exposed as the file pointer.
    pub fn file_pointer(&self) -> u64 {
        self.inner.bytes_written()
    }

    /// Rolling CRC32C accumulated over every byte written so far.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }
}

impl std::io::Write for S3IndexOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.checksum = crc32c::crc32c_append(self.checksum, &buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_cache::FSCache;

    #[test]
    fn checksum_accumulates_over_writes() {
        let dir = camino_tempfile::tempdir().unwrap();
        let cache = FSCache::new(dir.path().to_path_buf()).unwrap();

        let mut out =
            S3IndexOutput::new("seg.fdt".to_string(), cache.create_output("seg.fdt").unwrap());
        out.write_bytes(&[0x00; 4]).unwrap();
        out.write_bytes(&[0xFF; 4]).unwrap();
        assert_eq!(out.file_pointer(), 8);

        let reference = crc32c::crc32c_append(crc32c::crc32c_append(0, &[0x00; 4]), &[0xFF; 4]);
        assert_eq!(out.checksum(), reference);
    }
}
