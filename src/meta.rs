use serde::Serialize;

/// Number of hash tables in every cdb file; a key belongs to table `hash & 0xff`.
pub const BUCKET_COUNT: usize = 256;

/// Size in bytes of one encoded [`CdbSlot`] or [`CdbBucket`].
pub const SLOT_SIZE: u32 = 8;

/// Size in bytes of the `key_length, data_length` prefix of every record.
pub const RECORD_HEADER_SIZE: u32 = 8;

/// Size in bytes of the fixed header at offset 0.
pub const HEADER_SIZE: u32 = BUCKET_COUNT as u32 * SLOT_SIZE;

/// Decodes a little-endian `u32` from the first four bytes of `data`.
pub(crate) fn read_u32(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

/// Encodes two little-endian `u32`s into an 8-byte cell.
pub(crate) fn encode_pair(first: u32, second: u32) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf[..4].copy_from_slice(&first.to_le_bytes());
    buf[4..].copy_from_slice(&second.to_le_bytes());
    buf
}

/// Descriptor of one hash table, as stored in the header.
///
/// Even an empty table records the write position at the time it would have
/// been written, so `buckets[0].position` always marks the end of the record
/// region.
#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CdbBucket {
    /// Absolute offset of the first slot of the table.
    pub position: u32,
    /// Number of slots in the table, twice the number of keys routed to it.
    pub slot_count: u32,
}

impl CdbBucket {
    /// Returns true if no key hashes into this table.
    pub fn is_empty(&self) -> bool {
        self.slot_count == 0
    }

    /// Slot index at which probing for `hash` starts.
    ///
    /// Must not be called on an empty table.
    pub fn initial_slot(&self, hash: u32) -> u32 {
        (hash >> 8) % self.slot_count
    }

    /// Absolute offset of slot `index`.
    pub fn slot_offset(&self, index: u32) -> u64 {
        self.position as u64 + index as u64 * SLOT_SIZE as u64
    }
}

/// The 256 table descriptors occupying the first [`HEADER_SIZE`] bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdbHeader {
    pub buckets: [CdbBucket; BUCKET_COUNT],
}

impl Default for CdbHeader {
    fn default() -> Self {
        Self {
            buckets: [CdbBucket::default(); BUCKET_COUNT],
        }
    }
}

impl CdbHeader {
    pub const SIZE: usize = HEADER_SIZE as usize;

    /// Returns the table responsible for `hash`.
    pub fn bucket(&self, hash: u32) -> &CdbBucket {
        &self.buckets[(hash & 0xff) as usize]
    }

    /// Offset of the first byte after the last record.
    ///
    /// The first table is always written right after the records, whether or
    /// not it holds any slot.
    pub fn end_of_data(&self) -> u32 {
        self.buckets[0].position
    }

    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        for (cell, bucket) in buf
            .chunks_exact_mut(SLOT_SIZE as usize)
            .zip(self.buckets.iter())
        {
            cell.copy_from_slice(&encode_pair(bucket.position, bucket.slot_count));
        }
        buf
    }

    /// Decodes a header from exactly [`CdbHeader::SIZE`] bytes.
    pub fn deserialize(data: &[u8]) -> Self {
        let mut header = Self::default();
        for (bucket, cell) in header
            .buckets
            .iter_mut()
            .zip(data.chunks_exact(SLOT_SIZE as usize))
        {
            bucket.position = read_u32(&cell[..4]);
            bucket.slot_count = read_u32(&cell[4..]);
        }
        header
    }
}

/// One open-addressed cell of a hash table.
///
/// A zero `position` marks an empty slot. No record can start at offset 0
/// because the header lives there, so the sentinel never aliases data.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CdbSlot {
    pub hash: u32,
    pub position: u32,
}

impl CdbSlot {
    pub fn is_empty(&self) -> bool {
        self.position == 0
    }

    pub fn serialize(&self) -> [u8; 8] {
        encode_pair(self.hash, self.position)
    }

    pub fn deserialize(data: &[u8]) -> Self {
        Self {
            hash: read_u32(&data[..4]),
            position: read_u32(&data[4..8]),
        }
    }
}

/// Length prefix written before the key and data bytes of every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub key_length: u32,
    pub data_length: u32,
}

impl RecordHeader {
    pub fn serialize(&self) -> [u8; 8] {
        encode_pair(self.key_length, self.data_length)
    }

    pub fn deserialize(data: &[u8]) -> Self {
        Self {
            key_length: read_u32(&data[..4]),
            data_length: read_u32(&data[4..8]),
        }
    }

    /// Total encoded size of the record, or `None` if it does not fit in 32 bits.
    pub fn record_size(&self) -> Option<u32> {
        RECORD_HEADER_SIZE
            .checked_add(self.key_length)?
            .checked_add(self.data_length)
    }
}

/// Summary returned by [`CdbMaker::finish`](crate::CdbMaker::finish).
#[derive(Debug, Serialize, Default, Clone, PartialEq, Eq)]
pub struct CdbInfo {
    /// Final size of the generated file in bytes.
    pub file_length: u64,
    /// Number of records written, duplicates included.
    pub entry_count: u64,
    /// Offset of the first byte after the record region.
    pub end_of_data: u32,
    /// Number of hash tables without any slot.
    pub empty_buckets: usize,
    /// Size of the largest hash table, in slots.
    pub max_slot_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        assert_eq!(CdbHeader::SIZE, 2048);

        let mut header = CdbHeader::default();
        header.buckets[0] = CdbBucket {
            position: 0x0102_0304,
            slot_count: 2,
        };
        header.buckets[255] = CdbBucket {
            position: 4096,
            slot_count: 6,
        };
        let bytes = header.serialize();
        assert_eq!(&bytes[..8], &[4, 3, 2, 1, 2, 0, 0, 0]);
        assert_eq!(&bytes[2040..], &[0, 16, 0, 0, 6, 0, 0, 0]);
        assert_eq!(CdbHeader::deserialize(&bytes), header);
        assert_eq!(header.end_of_data(), 0x0102_0304);
        assert_eq!(header.bucket(0x1234_56ff).slot_count, 6);
    }

    #[test]
    fn test_bucket_probe_start() {
        let bucket = CdbBucket {
            position: 3000,
            slot_count: 4,
        };
        assert_eq!(bucket.initial_slot(0x0000_0500), 1);
        assert_eq!(bucket.initial_slot(0xffff_ffff), 0xff_ffff % 4);
        assert_eq!(bucket.slot_offset(3), 3024);
        assert!(!bucket.is_empty());
        assert!(CdbBucket::default().is_empty());
    }

    #[test]
    fn test_record_size() {
        let header = RecordHeader {
            key_length: 3,
            data_length: 5,
        };
        assert_eq!(header.record_size(), Some(16));
        assert_eq!(RecordHeader::deserialize(&header.serialize()), header);

        let header = RecordHeader {
            key_length: u32::MAX - 8,
            data_length: 1,
        };
        assert_eq!(header.record_size(), None);
    }

    #[test]
    fn test_empty_slot() {
        assert!(CdbSlot::default().is_empty());
        let slot = CdbSlot {
            hash: 7,
            position: HEADER_SIZE,
        };
        assert!(!slot.is_empty());
        assert_eq!(CdbSlot::deserialize(&slot.serialize()), slot);
    }
}
