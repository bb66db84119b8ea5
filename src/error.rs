use std::io;

/// Errors produced while building, scanning, or strictly reading a cdb file.
#[derive(Debug, thiserror::Error)]
pub enum CdbError {
    /// The 32-bit position counter would overflow; cdb files are limited to 4 GiB.
    #[error("cdb file is too big")]
    FileTooLarge,

    /// A record or slot could not be read in full.
    #[error("invalid cdb format: {0}")]
    CorruptFormat(String),

    /// Text input violates the `+klen,dlen:key->data` grammar.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl CdbError {
    /// Maps a read failure inside the record or index region.
    ///
    /// A short read means the file ends before the structure it promises,
    /// which is corruption rather than an IO fault.
    pub(crate) fn from_read(err: io::Error, what: &str) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            CdbError::CorruptFormat(format!("truncated {what}"))
        } else {
            CdbError::Io(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, CdbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_read() {
        let err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(
            CdbError::from_read(err, "record"),
            CdbError::CorruptFormat(msg) if msg == "truncated record"
        ));

        let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(CdbError::from_read(err, "record"), CdbError::Io(_)));
    }

    #[test]
    fn test_display() {
        assert_eq!(CdbError::FileTooLarge.to_string(), "cdb file is too big");
        assert_eq!(
            CdbError::MalformedInput("missing '->'".into()).to_string(),
            "malformed input: missing '->'"
        );
    }
}
