use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use tracing::warn;

use crate::{
    CdbBucket, CdbError, CdbHeader, CdbReader, CdbSlot, HEADER_SIZE, RECORD_HEADER_SIZE,
    RecordHeader, Result, SLOT_SIZE, hash,
};

/// Read-only handle on a finished cdb file.
///
/// Only the 2048-byte header is cached; every lookup probes the file through
/// positional reads, so a `Cdb` can be shared between threads and any number
/// of searches may run against it at once.
///
/// Lookups come in two flavors. [`find`](Self::find),
/// [`find_next`](Self::find_next) and [`find_all`](Self::find_all) treat any
/// IO failure or corruption met while probing as "no value", which keeps
/// lookups available on damaged files. [`try_find`](Self::try_find) and
/// [`try_find_next`](Self::try_find_next) report those failures instead.
#[derive(Debug)]
pub struct Cdb<R: CdbReader> {
    header: Option<CdbHeader>,
    reader: R,
}

impl Cdb<File> {
    /// Opens the cdb file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::load(file)
    }
}

impl<R: CdbReader> Cdb<R> {
    /// Constructs a cdb handle from a [`CdbReader`] implementation.
    ///
    /// A source shorter than the header is not an error: the handle is
    /// created without a header and every lookup reports no value.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the header fails for any other reason.
    pub fn load(reader: R) -> Result<Self> {
        let header = match reader.read_chunk_at(0, HEADER_SIZE as u64, |data| {
            Ok(CdbHeader::deserialize(data))
        }) {
            Ok(header) => Some(header),
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                warn!("cdb file shorter than its header; treating it as empty");
                None
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Self { header, reader })
    }

    /// Returns the cached table descriptors, if the header could be read.
    pub fn header(&self) -> Option<&CdbHeader> {
        self.header.as_ref()
    }

    /// Returns true if no lookup can ever succeed.
    pub fn is_empty(&self) -> bool {
        self.header
            .as_ref()
            .is_none_or(|header| header.buckets.iter().all(CdbBucket::is_empty))
    }

    /// Returns the first value stored under `key`.
    ///
    /// Every call restarts the search, so repeated calls return the same
    /// value. Use [`find_all`](Self::find_all) or a [`SearchCursor`] to reach
    /// later duplicates.
    pub fn find(&self, key: &[u8]) -> Option<Vec<u8>> {
        let mut cursor = self.find_start(key);
        self.find_next(&mut cursor)
    }

    /// Strict form of [`find`](Self::find).
    pub fn try_find(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut cursor = self.find_start(key);
        self.try_find_next(&mut cursor)
    }

    /// Begins a search for every value stored under `key`.
    ///
    /// No IO happens until the first [`find_next`](Self::find_next).
    pub fn find_start<'k>(&self, key: &'k [u8]) -> SearchCursor<'k> {
        SearchCursor {
            key,
            state: CursorState::Pending,
        }
    }

    /// Returns the next value for the cursor's key, in insertion order, or
    /// `None` once all of them have been returned.
    ///
    /// An error ends the search: the cursor is left exhausted, so later
    /// calls keep returning `None`.
    pub fn find_next(&self, cursor: &mut SearchCursor<'_>) -> Option<Vec<u8>> {
        match self.try_find_next(cursor) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "cdb lookup failed; reporting no value");
                cursor.state = CursorState::Exhausted;
                None
            }
        }
    }

    /// Strict form of [`find_next`](Self::find_next).
    ///
    /// After an error the cursor keeps its position; calling again resumes
    /// with the following slot.
    pub fn try_find_next(&self, cursor: &mut SearchCursor<'_>) -> Result<Option<Vec<u8>>> {
        if let CursorState::Pending = cursor.state {
            cursor.state = self.locate(cursor.key);
        }
        let CursorState::Probing {
            hash,
            bucket,
            slot,
            searched,
        } = &mut cursor.state
        else {
            return Ok(None);
        };

        while *searched < bucket.slot_count {
            let entry = self
                .reader
                .read_chunk_at(bucket.slot_offset(*slot), SLOT_SIZE as u64, |data| {
                    Ok(CdbSlot::deserialize(data))
                })
                .map_err(|e| CdbError::from_read(e, "hash slot"))?;
            if entry.is_empty() {
                cursor.state = CursorState::Exhausted;
                return Ok(None);
            }

            *searched += 1;
            *slot += 1;
            if *slot == bucket.slot_count {
                *slot = 0;
            }

            if entry.hash != *hash {
                continue;
            }
            if let Some(data) = self.read_value(entry.position, cursor.key)? {
                return Ok(Some(data));
            }
        }

        cursor.state = CursorState::Exhausted;
        Ok(None)
    }

    /// Iterates over every value stored under `key`, in insertion order.
    ///
    /// # Examples
    ///
    /// ```
    /// use cdb::{Cdb, CdbBuilder};
    ///
    /// # fn main() -> cdb::Result<()> {
    /// let dir = tempfile::tempdir()?;
    /// let path = dir.path().join("dup.cdb");
    /// let file = std::fs::File::create(&path)?;
    /// CdbBuilder::default().build(file, [("k", "a"), ("x", "y"), ("k", "b")])?;
    ///
    /// let cdb = Cdb::open(&path)?;
    /// let values: Vec<_> = cdb.find_all(b"k").collect();
    /// assert_eq!(values, vec![b"a".to_vec(), b"b".to_vec()]);
    /// # Ok(())
    /// # }
    /// ```
    pub fn find_all<'a, 'k>(&'a self, key: &'k [u8]) -> CdbValues<'a, 'k, R> {
        CdbValues {
            cdb: self,
            cursor: self.find_start(key),
        }
    }

    /// Releases the handle and returns the underlying reader.
    pub fn close(self) -> R {
        self.reader
    }

    fn locate(&self, key: &[u8]) -> CursorState {
        let Some(header) = &self.header else {
            return CursorState::Exhausted;
        };
        let hash = hash(key);
        let bucket = *header.bucket(hash);
        if bucket.is_empty() {
            return CursorState::Exhausted;
        }
        CursorState::Probing {
            hash,
            bucket,
            slot: bucket.initial_slot(hash),
            searched: 0,
        }
    }

    /// Reads the data of the record at `position` if its key equals `key`.
    ///
    /// Records must lie inside the record region; lengths pointing past it
    /// are rejected before any buffer is sized from them.
    fn read_value(&self, position: u32, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let end_of_data = self.header.as_ref().map_or(0, CdbHeader::end_of_data) as u64;
        let position = position as u64;
        if position + RECORD_HEADER_SIZE as u64 > end_of_data {
            return Err(CdbError::CorruptFormat(format!(
                "record position {position} is outside the record region"
            )));
        }
        let record = self
            .reader
            .read_chunk_at(position, RECORD_HEADER_SIZE as u64, |data| {
                Ok(RecordHeader::deserialize(data))
            })
            .map_err(|e| CdbError::from_read(e, "record header"))?;
        if record.key_length as usize != key.len() {
            return Ok(None);
        }
        let record_end = position
            + RECORD_HEADER_SIZE as u64
            + record.key_length as u64
            + record.data_length as u64;
        if record_end > end_of_data {
            return Err(CdbError::CorruptFormat(format!(
                "record at {position} runs past end of data"
            )));
        }

        let key_offset = position + RECORD_HEADER_SIZE as u64;
        let matched = self
            .reader
            .read_chunk_at(key_offset, record.key_length as u64, |data| Ok(data == key))
            .map_err(|e| CdbError::from_read(e, "record key"))?;
        if !matched {
            return Ok(None);
        }

        self.reader
            .read_chunk_at(
                key_offset + record.key_length as u64,
                record.data_length as u64,
                |data| Ok(data.to_vec()),
            )
            .map(Some)
            .map_err(|e| CdbError::from_read(e, "record data"))
    }
}

/// Progress of one search through a key's hash table.
///
/// Obtained from [`Cdb::find_start`] and advanced with [`Cdb::find_next`].
/// Each cursor is independent, so several searches may interleave on the
/// same handle.
#[derive(Debug, Clone)]
pub struct SearchCursor<'k> {
    key: &'k [u8],
    state: CursorState,
}

impl<'k> SearchCursor<'k> {
    /// The key being searched for.
    pub fn key(&self) -> &'k [u8] {
        self.key
    }

    /// Returns true once the search can yield no more values.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, CursorState::Exhausted)
    }
}

#[derive(Debug, Clone, Copy)]
enum CursorState {
    Pending,
    Probing {
        hash: u32,
        bucket: CdbBucket,
        slot: u32,
        searched: u32,
    },
    Exhausted,
}

/// Iterator over the values of one key, created by [`Cdb::find_all`].
pub struct CdbValues<'a, 'k, R: CdbReader> {
    cdb: &'a Cdb<R>,
    cursor: SearchCursor<'k>,
}

impl<R: CdbReader> Iterator for CdbValues<'_, '_, R> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cdb.find_next(&mut self.cursor)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::Rng;

    use crate::*;

    const DEMO: [(&str, &str); 7] = [
        ("key1", "value1"),
        ("key2", "value2.1"),
        ("key3", "value3"),
        ("key2", "value2.2"),
        ("key4", "value4"),
        ("key2", "value2.3"),
        ("key5", "value5"),
    ];

    fn build_file(
        dir: &tempfile::TempDir,
        name: &str,
        entries: &[(Vec<u8>, Vec<u8>)],
    ) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let file = std::fs::File::create(&path).unwrap();
        CdbBuilder::default()
            .build(file, entries.iter().map(|(k, v)| (k, v)))
            .unwrap();
        path
    }

    fn demo_entries() -> Vec<(Vec<u8>, Vec<u8>)> {
        DEMO.iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_duplicate_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_file(&dir, "demo.cdb", &demo_entries());
        let cdb = Cdb::open(&path).unwrap();

        for _ in 0..3 {
            assert_eq!(cdb.find(b"key2"), Some(b"value2.1".to_vec()));
        }

        let mut cursor = cdb.find_start(b"key2");
        assert_eq!(cdb.find_next(&mut cursor), Some(b"value2.1".to_vec()));
        assert_eq!(cdb.find_next(&mut cursor), Some(b"value2.2".to_vec()));
        assert_eq!(cdb.find_next(&mut cursor), Some(b"value2.3".to_vec()));
        assert_eq!(cdb.find_next(&mut cursor), None);
        assert!(cursor.is_exhausted());
        assert_eq!(cdb.find_next(&mut cursor), None);

        assert_eq!(cdb.find(b"key1"), Some(b"value1".to_vec()));
        assert_eq!(cdb.find(b"key5"), Some(b"value5".to_vec()));
        assert_eq!(cdb.find(b"key6"), None);
        assert_eq!(cdb.find(b""), None);
    }

    #[test]
    fn test_interleaved_cursors() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_file(&dir, "demo.cdb", &demo_entries());
        let cdb = Cdb::open(&path).unwrap();

        let mut first = cdb.find_start(b"key2");
        let mut second = cdb.find_start(b"key2");
        assert_eq!(cdb.find_next(&mut first), Some(b"value2.1".to_vec()));
        assert_eq!(cdb.find_next(&mut first), Some(b"value2.2".to_vec()));
        assert_eq!(cdb.find_next(&mut second), Some(b"value2.1".to_vec()));
        assert_eq!(cdb.find_next(&mut first), Some(b"value2.3".to_vec()));
        assert_eq!(second.key(), b"key2");
    }

    #[test]
    fn test_empty_keys_and_values() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            (b"".to_vec(), b"".to_vec()),
            (b"".to_vec(), b"second".to_vec()),
            (b"k".to_vec(), b"".to_vec()),
        ];
        let path = build_file(&dir, "empty.cdb", &entries);
        let cdb = Cdb::open(&path).unwrap();

        let values: Vec<_> = cdb.find_all(b"").collect();
        assert_eq!(values, vec![b"".to_vec(), b"second".to_vec()]);
        assert_eq!(cdb.find(b"k"), Some(Vec::new()));
    }

    #[test]
    fn test_round_trip_random() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = rand::thread_rng();
        let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..3000)
            .map(|_| {
                let key_len = rng.gen_range(0..4);
                let key: Vec<u8> = (0..key_len).map(|_| rng.gen_range(0..6u8)).collect();
                let data_len = rng.gen_range(0..32);
                let data: Vec<u8> = (0..data_len).map(|_| rng.r#gen()).collect();
                (key, data)
            })
            .collect();
        let path = build_file(&dir, "random.cdb", &entries);
        let cdb = Cdb::open(&path).unwrap();

        let mut expected: std::collections::BTreeMap<&[u8], Vec<Vec<u8>>> = Default::default();
        for (key, data) in &entries {
            expected.entry(key.as_slice()).or_default().push(data.clone());
        }
        for (key, values) in expected {
            assert_eq!(cdb.find_all(key).collect::<Vec<_>>(), values);
            assert_eq!(cdb.try_find(key).unwrap().as_ref(), values.first());
        }
        assert_eq!(cdb.find(&[9, 9, 9, 9, 9]), None);
    }

    #[test]
    fn test_no_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_file(&dir, "none.cdb", &[]);
        let cdb = Cdb::open(&path).unwrap();
        assert!(cdb.is_empty());
        assert_eq!(cdb.find(b"anything"), None);
        assert_eq!(cdb.try_find(b"").unwrap(), None);
    }

    #[test]
    fn test_short_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.cdb");
        std::fs::write(&path, b"not a cdb").unwrap();

        let cdb = Cdb::open(&path).unwrap();
        assert!(cdb.header().is_none());
        assert!(cdb.is_empty());
        assert_eq!(cdb.find(b"key"), None);
        assert_eq!(cdb.try_find(b"key").unwrap(), None);
        let _file: std::fs::File = cdb.close();

        let path = dir.path().join("missing.cdb");
        assert!(matches!(Cdb::open(&path), Err(CdbError::Io(_))));
    }

    #[test]
    fn test_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_file(&dir, "demo.cdb", &demo_entries());
        let cdb = Cdb::open(&path).unwrap();
        let end_of_data = cdb.header().unwrap().end_of_data();

        // Keep the header and the records, drop every hash table.
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(end_of_data as u64).unwrap();

        assert_eq!(cdb.find(b"key1"), None);
        assert!(matches!(
            cdb.try_find(b"key1"),
            Err(CdbError::CorruptFormat(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_file(&dir, "demo.cdb", &demo_entries());
        let cdb = Cdb::open(&path).unwrap();

        // Point the first record's data length far past the end of the file.
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        std::os::unix::fs::FileExt::write_all_at(&file, &u32::MAX.to_le_bytes(), 2052).unwrap();

        assert_eq!(cdb.find(b"key1"), None);
        assert!(matches!(
            cdb.try_find(b"key1"),
            Err(CdbError::CorruptFormat(msg)) if msg.contains("past end of data")
        ));
        assert_eq!(cdb.find(b"key3"), Some(b"value3".to_vec()));

        // A swallowed error ends the search for good.
        let mut cursor = cdb.find_start(b"key1");
        assert_eq!(cdb.find_next(&mut cursor), None);
        assert!(cursor.is_exhausted());
        assert_eq!(cdb.find_next(&mut cursor), None);
        assert_eq!(cdb.find_all(b"key1").count(), 0);

        // The strict form leaves the cursor where it was.
        let mut cursor = cdb.find_start(b"key1");
        assert!(cdb.try_find_next(&mut cursor).is_err());
        assert!(!cursor.is_exhausted());
    }

    #[cfg(unix)]
    #[test]
    fn test_full_table_without_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_file(&dir, "full.cdb", &[(b"a".to_vec(), b"1".to_vec())]);
        let cdb = Cdb::open(&path).unwrap();
        let bucket = *cdb.header().unwrap().bucket(hash(b"a"));
        assert_eq!(bucket.slot_count, 2);

        // Fill every slot of the table with a foreign hash, leaving no empty slot.
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        let foreign = CdbSlot {
            hash: hash(b"a").wrapping_add(1),
            position: HEADER_SIZE,
        };
        for index in 0..bucket.slot_count {
            std::os::unix::fs::FileExt::write_all_at(
                &file,
                &foreign.serialize(),
                bucket.slot_offset(index),
            )
            .unwrap();
        }

        assert_eq!(cdb.find(b"a"), None);
        assert_eq!(cdb.try_find(b"a").unwrap(), None);
        let mut cursor = cdb.find_start(b"a");
        assert_eq!(cdb.try_find_next(&mut cursor).unwrap(), None);
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn test_concurrent_lookups() {
        let dir = tempfile::tempdir().unwrap();
        const N: u32 = 10_000;
        const P: u32 = 8;
        let entries: Vec<_> = (0..N)
            .map(|i| (i.to_string().into_bytes(), (i * 2).to_string().into_bytes()))
            .collect();
        let path = build_file(&dir, "threads.cdb", &entries);
        let cdb = Arc::new(Cdb::open(&path).unwrap());

        let threads: Vec<_> = (0..P)
            .map(|t| {
                let cdb = cdb.clone();
                std::thread::spawn(move || {
                    for i in (t..N).step_by(P as usize) {
                        let value = cdb.find(i.to_string().as_bytes()).unwrap();
                        assert_eq!(value, (i * 2).to_string().into_bytes());
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
    }
}
