//! Line-oriented text interchange format.
//!
//! Every record is written as
//!
//! ```text
//! +<key length>,<data length>:<key bytes>-><data bytes>\n
//! ```
//!
//! and the stream ends with one blank line. Lengths are decimal byte counts,
//! so keys and data may contain any byte, newlines included.

use std::io::{self, BufRead, Read, Write};

use crate::{CdbEntry, CdbError, Result};

/// Largest length prefix accepted before another digit is appended.
///
/// Keeps the decoded value comfortably inside `u32`.
pub const LENGTH_LIMIT: u32 = 429_496_720;

/// Writes one record.
pub fn write_record<W: Write + ?Sized>(writer: &mut W, key: &[u8], data: &[u8]) -> io::Result<()> {
    write!(writer, "+{},{}:", key.len(), data.len())?;
    writer.write_all(key)?;
    writer.write_all(b"->")?;
    writer.write_all(data)?;
    writer.write_all(b"\n")
}

/// Writes the blank line that ends a stream of records.
pub fn write_terminator<W: Write + ?Sized>(writer: &mut W) -> io::Result<()> {
    writer.write_all(b"\n")
}

/// Writes all `entries` followed by the terminator, returning the number of
/// records written.
///
/// The first failing entry aborts the export; the terminator is only
/// written after a complete pass.
pub fn dump<W: Write + ?Sized>(
    entries: impl IntoIterator<Item = Result<CdbEntry>>,
    writer: &mut W,
) -> Result<u64> {
    let mut count = 0;
    for entry in entries {
        let entry = entry?;
        write_record(writer, &entry.key, &entry.data)?;
        count += 1;
    }
    write_terminator(writer)?;
    Ok(count)
}

/// Strict streaming parser for the text format.
///
/// Yields one [`CdbEntry`] per record. A blank line, or the end of input
/// between records, ends the stream. Any other deviation is reported as
/// [`CdbError::MalformedInput`] and stops decoding; no partial record is
/// ever yielded.
pub struct TextDecoder<R: BufRead> {
    inner: R,
    done: bool,
}

impl<R: BufRead> TextDecoder<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, done: false }
    }

    fn next_byte(&mut self) -> Result<Option<u8>> {
        let buf = self.inner.fill_buf()?;
        let Some(&byte) = buf.first() else {
            return Ok(None);
        };
        self.inner.consume(1);
        Ok(Some(byte))
    }

    fn expect_byte(&mut self) -> Result<u8> {
        self.next_byte()?
            .ok_or_else(|| CdbError::MalformedInput("input is truncated".into()))
    }

    fn read_length(&mut self, terminator: u8, what: &str) -> Result<u32> {
        let mut value: u32 = 0;
        loop {
            let byte = self.expect_byte()?;
            if byte == terminator {
                return Ok(value);
            }
            if !byte.is_ascii_digit() {
                return Err(CdbError::MalformedInput(format!(
                    "expected digit or '{}' in {what} length",
                    terminator as char
                )));
            }
            if value > LENGTH_LIMIT {
                return Err(CdbError::MalformedInput(format!("{what} length is too big")));
            }
            value = value * 10 + (byte - b'0') as u32;
        }
    }

    fn read_bytes(&mut self, length: u32) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        (&mut self.inner).take(length as u64).read_to_end(&mut buf)?;
        if buf.len() != length as usize {
            return Err(CdbError::MalformedInput("input is truncated".into()));
        }
        Ok(buf)
    }

    fn next_record(&mut self) -> Result<Option<CdbEntry>> {
        match self.next_byte()? {
            None | Some(b'\n') => return Ok(None),
            Some(b'+') => {}
            Some(_) => {
                return Err(CdbError::MalformedInput(
                    "expected '+' at start of record".into(),
                ));
            }
        }

        let key_length = self.read_length(b',', "key")?;
        let data_length = self.read_length(b':', "data")?;
        let key = self.read_bytes(key_length)?;
        if self.expect_byte()? != b'-' || self.expect_byte()? != b'>' {
            return Err(CdbError::MalformedInput(
                "missing '->' between key and data".into(),
            ));
        }
        let data = self.read_bytes(data_length)?;
        if self.expect_byte()? != b'\n' {
            return Err(CdbError::MalformedInput(
                "missing newline after record".into(),
            ));
        }
        Ok(Some(CdbEntry { key, data }))
    }
}

impl<R: BufRead> Iterator for TextDecoder<R> {
    type Item = Result<CdbEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
