/// Outcome of a single decode attempt that did not produce a complete, fresh message.
///
/// None of these are fatal: the frame in question is dropped (or delivered partially for
/// [`Error::TruncatedRecord`]) and the next read event is processed as usual.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The frame length is not `4 + N * 10 + 3` with `N <= 30`.
    #[error("Invalid frame length {0}")]
    MalformedLength(usize),
    /// Header or footer sentinel does not match.
    #[error("Invalid frame sentinel")]
    BadSentinel,
    #[error("Invalid checksum - calculated={calculated:04X} received={received:04X}")]
    ChecksumMismatch { calculated: u16, received: u16 },
    /// The announced entry count runs past the end of the payload.
    #[error("Truncated record at payload offset {offset} (payload length {length})")]
    TruncatedRecord { offset: usize, length: usize },
    /// Same sequence counter as the last accepted frame; not a validation failure.
    #[error("Duplicate sequence {0}")]
    DuplicateSequence(u8),
    #[error("Value out of range")]
    RangeError,
}

impl Error {
    /// `true` for the variants that cause the whole frame to be dropped by validation.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::MalformedLength(_) | Error::BadSentinel | Error::ChecksumMismatch { .. }
        )
    }
}
