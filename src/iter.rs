use std::fs::File;
use std::path::Path;

use crate::{CdbError, CdbReader, HEADER_SIZE, RECORD_HEADER_SIZE, RecordHeader, Result, meta};

/// A single record of a cdb file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CdbEntry {
    pub key: Vec<u8>,
    pub data: Vec<u8>,
}

/// Opens the cdb file at `path` and scans its records in file order.
pub fn entries(path: impl AsRef<Path>) -> Result<CdbIter<File>> {
    CdbIter::new(File::open(path.as_ref())?)
}

/// Forward-only scan over every record of a cdb file, in the order the
/// records were added.
///
/// The scan ignores the hash tables entirely: it walks the record region
/// from the end of the header up to the end-of-data offset stored in the
/// first table descriptor. A short read is reported as
/// [`CdbError::CorruptFormat`] and ends the scan.
pub struct CdbIter<R: CdbReader> {
    reader: R,
    position: u64,
    end_of_data: u64,
    failed: bool,
}

impl<R: CdbReader> CdbIter<R> {
    pub fn new(reader: R) -> Result<Self> {
        let end_of_data = reader
            .read_chunk_at(0, 4, |data| Ok(meta::read_u32(data)))
            .map_err(|e| CdbError::from_read(e, "header"))?;
        Ok(Self {
            reader,
            position: HEADER_SIZE as u64,
            end_of_data: end_of_data as u64,
            failed: false,
        })
    }

    /// Offset of the next record to be read.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Offset of the first byte after the record region.
    pub fn end_of_data(&self) -> u64 {
        self.end_of_data
    }

    fn read_entry(&mut self) -> Result<CdbEntry> {
        let record = self
            .reader
            .read_chunk_at(self.position, RECORD_HEADER_SIZE as u64, |data| {
                Ok(RecordHeader::deserialize(data))
            })
            .map_err(|e| CdbError::from_read(e, "record header"))?;

        let key_length = record.key_length as usize;
        let length = record.key_length as u64 + record.data_length as u64;
        if self.position + RECORD_HEADER_SIZE as u64 + length > self.end_of_data {
            return Err(CdbError::CorruptFormat(format!(
                "record at {} runs past end of data",
                self.position
            )));
        }
        let entry = self
            .reader
            .read_chunk_at(self.position + RECORD_HEADER_SIZE as u64, length, |data| {
                Ok(CdbEntry {
                    key: data[..key_length].to_vec(),
                    data: data[key_length..].to_vec(),
                })
            })
            .map_err(|e| CdbError::from_read(e, "record"))?;

        self.position += RECORD_HEADER_SIZE as u64 + length;
        Ok(entry)
    }
}

impl<R: CdbReader> Iterator for CdbIter<R> {
    type Item = Result<CdbEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.position >= self.end_of_data {
            return None;
        }
        let result = self.read_entry();
        self.failed = result.is_err();
        Some(result)
    }
}
