use thiserror::Error;

/// Errors reported by construction and deserialization.
///
/// Contract violations (indexes out of range, querying ranks past the number
/// of ones) are not represented here: they panic at the call site.
#[derive(Error, Debug)]
pub enum Error {
    /// The requested bucket count does not fit a signed 32-bit index.
    #[error("number of buckets {0} exceeds the 32-bit limit")]
    TooLarge(usize),

    /// Two inputs produced the same 192-bit signature. After reseeding this
    /// almost certainly means the input contains duplicate keys.
    #[error("duplicate 192-bit signature detected in the input")]
    DuplicateKey,

    /// Every retry level (solver sub-seed, bucket seed, master seed) has been
    /// exhausted without finding a solvable system.
    #[error("construction failed after {0} attempts with fresh seeds")]
    TooManyCollisions(u32),

    /// A serialized structure carries an unknown serial-version tag.
    #[error("incompatible serialization format: version {found}, expected {expected}")]
    IncompatibleFormat { expected: u8, found: u8 },

    /// Failure of the underlying storage; scratch-file errors carry the
    /// offending path in the message.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The build observed the caller's cancellation flag.
    #[error("construction cancelled")]
    Cancelled,
}

impl Error {
    /// Attaches `path` context to an I/O error.
    pub(crate) fn io_at(path: &std::path::Path, e: std::io::Error) -> Self {
        Self::Io(std::io::Error::new(e.kind(), format!("{}: {e}", path.display())))
    }

    /// Whether a global retry with a fresh master seed can help.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(self, Self::DuplicateKey | Self::TooManyCollisions(_))
    }
}
