//! Constant databases: immutable, hash-indexed key-value files.
//!
//! A cdb file is written once by a [`CdbMaker`] session and then only read.
//! Lookups through [`Cdb`] touch the cached 2048-byte header plus a handful
//! of slots and one record, without loading the file into memory. Keys may
//! repeat; every value stored under a key is returned, in the order it was
//! added.
//!
//! The on-disk layout is the classic one, with all integers little-endian
//! `u32`:
//!
//! ```text
//! [0, 2048)            256 x (table position, slot count)
//! [2048, end of data)  records: key length, data length, key, data
//! [end of data, EOF)   256 open-addressed tables of (hash, record position)
//! ```
//!
//! Files are limited to 4 GiB by the 32-bit offsets.
//!
//! ```
//! use cdb::{Cdb, CdbBuilder};
//!
//! # fn main() -> cdb::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let path = dir.path().join("fruits.cdb");
//!
//! let mut maker = CdbBuilder::default().create(&path)?;
//! maker.add(b"apple", b"red")?;
//! maker.add(b"banana", b"yellow")?;
//! maker.add(b"apple", b"green")?;
//! maker.finish()?;
//!
//! let cdb = Cdb::open(&path)?;
//! assert_eq!(cdb.find(b"banana"), Some(b"yellow".to_vec()));
//!
//! let mut cursor = cdb.find_start(b"apple");
//! assert_eq!(cdb.find_next(&mut cursor), Some(b"red".to_vec()));
//! assert_eq!(cdb.find_next(&mut cursor), Some(b"green".to_vec()));
//! assert_eq!(cdb.find_next(&mut cursor), None);
//! # Ok(())
//! # }
//! ```

mod error;
pub use error::{CdbError, Result};

mod hasher;
pub use hasher::{CdbHasher, HASH_SEED, hash};

mod meta;
pub use meta::{
    BUCKET_COUNT, CdbBucket, CdbHeader, CdbInfo, CdbSlot, HEADER_SIZE, RECORD_HEADER_SIZE,
    RecordHeader, SLOT_SIZE,
};

mod reader;
pub use reader::CdbReader;

mod writer;
pub use writer::CdbWriter;

mod cdb;
pub use cdb::{Cdb, CdbValues, SearchCursor};

mod iter;
pub use iter::{CdbEntry, CdbIter, entries};

pub mod text;

mod builder;
pub use builder::{CdbBuilder, CdbMaker};
