//! Error kinds shared across the Keepsake crates

use std::io;
use std::path::PathBuf;

/// Result type used throughout keepsake
pub type Result<T> = std::result::Result<T, Error>;

/// All errors a backup, restore or test run can report
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Filesystem or stream fault
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    /// Envelope type, magic or framing did not match what the codec expects
    #[error("format mismatch: {0}")]
    FormatMismatch(String),

    /// Authentication failed: wrong passphrase, tampering, or unrecoverable damage
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// The message is not symmetric, or not encrypted at all
    #[error("unsupported message: {0}")]
    UnsupportedMessage(String),

    /// The seen store could not be decrypted, opened or initialised
    #[error("seen store unavailable: {0}")]
    StoreUnavailable(String),

    /// Some entries could not be restored; the rest of the job completed
    #[error("{0} entries failed to restore")]
    AggregateRestoreErrors(usize),

    /// A filter pattern failed to compile
    #[error("invalid pattern {pattern:?}: {reason}")]
    Pattern { pattern: String, reason: String },

    /// An edition string or timestamp could not be interpreted
    #[error("invalid edition {0:?}")]
    InvalidEdition(String),

    /// A replacement list did not consist of pairs
    #[error("bad replacement list: {0:?}")]
    BadReplacementList(String),

    /// A ledger update was attempted without a current edition
    #[error("no current edition: the seen store was opened read-only")]
    NoEdition,

    /// The ledger database failed after it was opened
    #[error("ledger error: {0}")]
    Ledger(String),

    /// An archive for this edition is already on disk
    #[error("archive already exists: {}", .0.display())]
    ArchiveExists(PathBuf),

    /// A job record is unusable
    #[error("invalid job: {0}")]
    InvalidJob(String),
}

impl Error {
    /// Wrap this error for transport through `Read`/`Write` implementations.
    ///
    /// `Error::from(io::Error)` reverses this, so codec failures keep their
    /// kind when they surface from inside a stream.
    pub fn into_io(self) -> io::Error {
        let kind = match self {
            Error::Io(err) => return err,
            Error::FormatMismatch(_) | Error::DecryptionFailed(_) => io::ErrorKind::InvalidData,
            Error::UnsupportedMessage(_) => io::ErrorKind::Unsupported,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }

    /// True for the codec-level kinds that mean the data cannot be trusted
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Error::FormatMismatch(_) | Error::DecryptionFailed(_) | Error::UnsupportedMessage(_)
        )
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            let kind = err.kind();
            return match err.into_inner().map(|inner| inner.downcast::<Error>()) {
                Some(Ok(inner)) => *inner,
                _ => Error::Io(io::Error::from(kind)),
            };
        }
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_survives_io_transport() {
        let io_err = Error::DecryptionFailed("bad tag".into()).into_io();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);

        match Error::from(io_err) {
            Error::DecryptionFailed(msg) => assert_eq!(msg, "bad tag"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_plain_io_error_stays_io() {
        let err = Error::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::NotFound));
        assert!(!err.is_integrity());
    }

    #[test]
    fn test_io_variant_unwraps_on_transport() {
        let original = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        let io_err = Error::Io(original).into_io();
        assert_eq!(io_err.kind(), io::ErrorKind::PermissionDenied);
    }
}
