use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::text::TextDecoder;
use crate::{
    BUCKET_COUNT, Cdb, CdbBucket, CdbError, CdbHeader, CdbInfo, CdbReader, CdbSlot, CdbWriter,
    HEADER_SIZE, RecordHeader, Result, SLOT_SIZE, hash,
};

/// Configuration for emitting cdb files.
///
/// The builder itself holds no data; [`create`](Self::create) and
/// [`begin`](Self::begin) start a [`CdbMaker`] session that records are
/// added to, while [`build`](Self::build) and
/// [`make_from_text`](Self::make_from_text) run a whole session in one call.
#[derive(Debug, Clone)]
pub struct CdbBuilder {
    writer_buffer_size: usize,
    sync: bool,
}

impl Default for CdbBuilder {
    fn default() -> Self {
        Self {
            writer_buffer_size: 16 << 20, // 16 MiB
            sync: true,
        }
    }
}

impl CdbBuilder {
    /// Adjusts the capacity of the buffered writer used while streaming
    /// records and hash tables.
    pub fn with_writer_buffer_size(mut self, size: usize) -> Self {
        self.writer_buffer_size = size;
        self
    }

    /// Controls whether [`make_from_text`](Self::make_from_text) syncs the
    /// temporary file to disk before renaming it into place.
    pub fn with_sync(mut self, value: bool) -> Self {
        self.sync = value;
        self
    }

    /// Creates a new cdb file at `path` and starts a build session on it.
    ///
    /// # Errors
    ///
    /// Fails if a file already exists at `path`.
    pub fn create(&self, path: impl AsRef<Path>) -> Result<CdbMaker<File>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "creating cdb file");
        self.begin(file)
    }

    /// Starts a build session writing to `writer`.
    ///
    /// The header region is zeroed right away, so a session that is never
    /// finished leaves a file that reads as an empty database.
    pub fn begin<W: CdbWriter>(&self, writer: W) -> Result<CdbMaker<W>> {
        writer.write_chunk_at(&[0u8; CdbHeader::SIZE], 0)?;
        let buf_writer = BufWriter::with_capacity(
            self.writer_buffer_size,
            CdbWriterWrapper {
                inner: writer,
                offset: HEADER_SIZE as u64,
            },
        );
        Ok(CdbMaker {
            state: Some(MakerState {
                buf_writer,
                pointers: Vec::new(),
                counts: [0; BUCKET_COUNT],
                position: HEADER_SIZE,
            }),
        })
    }

    /// Writes every `(key, data)` pair of `entries` to `writer` and finalizes
    /// the file.
    ///
    /// Duplicate keys are kept; lookups return their values in the order
    /// they appear in `entries`.
    ///
    /// # Examples
    ///
    /// ```
    /// use cdb::{Cdb, CdbBuilder};
    ///
    /// # fn main() -> cdb::Result<()> {
    /// let dir = tempfile::tempdir()?;
    /// let path = dir.path().join("example.cdb");
    /// let file = std::fs::File::create(&path)?;
    /// let info = CdbBuilder::default().build(file, [("it", "1"), ("works", "2")])?;
    /// assert_eq!(info.entry_count, 2);
    ///
    /// let cdb = Cdb::open(&path)?;
    /// assert_eq!(cdb.find(b"works"), Some(b"2".to_vec()));
    /// # Ok(())
    /// # }
    /// ```
    pub fn build<W, K, V>(
        &self,
        writer: W,
        entries: impl IntoIterator<Item = (K, V)>,
    ) -> Result<CdbInfo>
    where
        W: CdbWriter,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut maker = self.begin(writer)?;
        for (key, data) in entries {
            maker.add(key.as_ref(), data.as_ref())?;
        }
        maker.finish()
    }

    /// Builds a cdb file at `target` from records in the text interchange
    /// format (`+klen,dlen:key->data\n`, ended by a blank line).
    ///
    /// The file is first written to `temp`, which must not exist yet, and is
    /// renamed onto `target` only once it is complete. On failure `target` is
    /// left untouched and `temp` is removed.
    pub fn make_from_text(
        &self,
        input: impl Read,
        target: impl AsRef<Path>,
        temp: impl AsRef<Path>,
    ) -> Result<CdbInfo> {
        self.make_text(input, target.as_ref(), temp.as_ref(), |_| false)
    }

    /// Same as [`make_from_text`](Self::make_from_text), but skips every
    /// record whose *data* is present as a key in `exclude`.
    pub fn make_from_text_excluding<R: CdbReader>(
        &self,
        input: impl Read,
        target: impl AsRef<Path>,
        temp: impl AsRef<Path>,
        exclude: &Cdb<R>,
    ) -> Result<CdbInfo> {
        self.make_text(input, target.as_ref(), temp.as_ref(), |data| {
            exclude.find(data).is_some()
        })
    }

    fn make_text<F>(
        &self,
        input: impl Read,
        target: &Path,
        temp: &Path,
        excluded: F,
    ) -> Result<CdbInfo>
    where
        F: Fn(&[u8]) -> bool,
    {
        let maker = self.create(temp)?;
        let result = self.fill_from_text(maker, input, excluded).and_then(|(info, file)| {
            if self.sync {
                file.sync_all()?;
            }
            drop(file);
            std::fs::rename(temp, target)?;
            Ok(info)
        });
        match result {
            Ok(info) => {
                debug!(
                    path = %target.display(),
                    entries = info.entry_count,
                    bytes = info.file_length,
                    "cdb file made from text"
                );
                Ok(info)
            }
            Err(err) => {
                if let Err(remove_err) = std::fs::remove_file(temp) {
                    warn!(
                        path = %temp.display(),
                        error = %remove_err,
                        "failed to remove temporary cdb file"
                    );
                }
                Err(err)
            }
        }
    }

    fn fill_from_text<F>(
        &self,
        mut maker: CdbMaker<File>,
        input: impl Read,
        excluded: F,
    ) -> Result<(CdbInfo, File)>
    where
        F: Fn(&[u8]) -> bool,
    {
        for entry in TextDecoder::new(BufReader::new(input)) {
            let entry = entry?;
            if excluded(&entry.data) {
                debug!(key_length = entry.key.len(), "record excluded");
                continue;
            }
            maker.add(&entry.key, &entry.data)?;
        }
        maker.finish_into_inner()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct HashPointer {
    hash: u32,
    position: u32,
}

struct MakerState<W: CdbWriter> {
    buf_writer: BufWriter<CdbWriterWrapper<W>>,
    pointers: Vec<HashPointer>,
    counts: [u32; BUCKET_COUNT],
    position: u32,
}

/// One build session producing a single cdb file.
///
/// Records are appended with [`add`](Self::add) in a single forward pass;
/// [`finish`](Self::finish) then lays out the 256 hash tables and writes the
/// header. Dropping a session without finishing it discards the index and
/// leaves a file that reads as empty. An IO failure aborts the session and
/// every later call reports an error.
pub struct CdbMaker<W: CdbWriter> {
    state: Option<MakerState<W>>,
}

fn advance(position: u32, count: u32) -> Result<u32> {
    position.checked_add(count).ok_or(CdbError::FileTooLarge)
}

fn aborted() -> CdbError {
    CdbError::Io(io::Error::other("cdb build session aborted"))
}

impl<W: CdbWriter> CdbMaker<W> {
    /// Number of records added so far.
    pub fn len(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.pointers.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a record.
    ///
    /// # Errors
    ///
    /// Returns [`CdbError::FileTooLarge`] without writing anything if the
    /// record would push the file past 4 GiB; the session stays usable.
    /// IO failures abort the session.
    pub fn add(&mut self, key: &[u8], data: &[u8]) -> Result<()> {
        let state = self.state.as_mut().ok_or_else(aborted)?;

        let record = RecordHeader {
            key_length: u32::try_from(key.len()).map_err(|_| CdbError::FileTooLarge)?,
            data_length: u32::try_from(data.len()).map_err(|_| CdbError::FileTooLarge)?,
        };
        let size = record.record_size().ok_or(CdbError::FileTooLarge)?;
        let next = advance(state.position, size)?;

        let written = (|| {
            state.buf_writer.write_all(&record.serialize())?;
            state.buf_writer.write_all(key)?;
            state.buf_writer.write_all(data)
        })();
        if let Err(err) = written {
            self.state = None;
            return Err(err.into());
        }

        let hash = hash(key);
        state.pointers.push(HashPointer {
            hash,
            position: state.position,
        });
        state.counts[(hash & 0xff) as usize] += 1;
        state.position = next;
        Ok(())
    }

    /// Writes the hash tables and the header, completing the file.
    ///
    /// Consuming the session makes adding after finishing, or finishing
    /// twice, impossible. The writer is released on every path.
    pub fn finish(self) -> Result<CdbInfo> {
        self.finish_into_inner().map(|(info, _)| info)
    }

    /// Same as [`finish`](Self::finish), but hands the writer back.
    pub fn finish_into_inner(mut self) -> Result<(CdbInfo, W)> {
        let state = self.state.take().ok_or_else(aborted)?;
        state.finish()
    }
}

impl<W: CdbWriter> MakerState<W> {
    fn finish(mut self) -> Result<(CdbInfo, W)> {
        let end_of_data = self.position;

        // Stable partition of the pointers by bucket: fill each bucket's
        // range back to front while walking the pointers newest first.
        let mut table_start = [0usize; BUCKET_COUNT];
        let mut total = 0usize;
        for (start, &count) in table_start.iter_mut().zip(self.counts.iter()) {
            total += count as usize;
            *start = total;
        }
        let mut ordered = vec![HashPointer::default(); self.pointers.len()];
        for pointer in self.pointers.iter().rev() {
            let start = &mut table_start[(pointer.hash & 0xff) as usize];
            *start -= 1;
            ordered[*start] = *pointer;
        }
        drop(self.pointers);

        let mut header = CdbHeader::default();
        let mut table: Vec<CdbSlot> = Vec::new();
        let mut consumed = 0usize;
        for (bucket, &count) in header.buckets.iter_mut().zip(self.counts.iter()) {
            let slot_count = count.checked_mul(2).ok_or(CdbError::FileTooLarge)?;
            let table_bytes = slot_count
                .checked_mul(SLOT_SIZE)
                .ok_or(CdbError::FileTooLarge)?;
            *bucket = CdbBucket {
                position: self.position,
                slot_count,
            };
            self.position = advance(self.position, table_bytes)?;

            table.clear();
            table.resize(slot_count as usize, CdbSlot::default());
            for pointer in &ordered[consumed..consumed + count as usize] {
                debug_assert!(pointer.position >= HEADER_SIZE);
                let mut index = bucket.initial_slot(pointer.hash) as usize;
                while !table[index].is_empty() {
                    index += 1;
                    if index == table.len() {
                        index = 0;
                    }
                }
                table[index] = CdbSlot {
                    hash: pointer.hash,
                    position: pointer.position,
                };
            }
            consumed += count as usize;

            for slot in &table {
                self.buf_writer.write_all(&slot.serialize())?;
            }
        }

        let wrapper = self.buf_writer.into_inner().map_err(|e| e.into_error())?;
        wrapper.inner.write_chunk_at(&header.serialize(), 0)?;

        let info = CdbInfo {
            file_length: self.position as u64,
            entry_count: ordered.len() as u64,
            end_of_data,
            empty_buckets: header.buckets.iter().filter(|b| b.is_empty()).count(),
            max_slot_count: header.buckets.iter().map(|b| b.slot_count).max().unwrap_or(0),
        };
        debug!(
            entries = info.entry_count,
            end_of_data = info.end_of_data,
            file_length = info.file_length,
            empty_buckets = info.empty_buckets,
            "cdb index written"
        );
        Ok((info, wrapper.inner))
    }
}

impl<W: CdbWriter> Drop for CdbMaker<W> {
    fn drop(&mut self) {
        if let Some(state) = &self.state {
            warn!(
                entries = state.pointers.len(),
                "cdb build session dropped without finish; index not written"
            );
        }
    }
}

/// Thin adapter implementing [`std::io::Write`] in terms of [`CdbWriter`].
///
/// Each write lands at the next consecutive offset.
struct CdbWriterWrapper<W: CdbWriter> {
    inner: W,
    offset: u64,
}

impl<W: CdbWriter> Write for CdbWriterWrapper<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write_chunk_at(buf, self.offset)?;
        self.offset += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
