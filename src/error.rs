//! Error Taxonomy
//!
//! Closed set of error kinds shared by every layer of the framework.
//!
//! Control-plane calls return these to the caller, which decides recovery.
//! Input-path failures that leave a pipe usable drop the record and continue;
//! failures that corrupt state raise [`Event::Fatal`](crate::uprobe::Event)
//! on the probe chain instead of returning.

/// Framework-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds recognised across the framework.
///
/// External failures (OS errno, drivers, codec libraries) are normalised to
/// [`Error::External`] at the boundary where they occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Command not recognised by this manager.
    #[error("command not handled by this pipe")]
    Unhandled,

    /// Allocation failed.
    #[error("allocation failed")]
    Alloc,

    /// Event-loop resource exhaustion.
    #[error("event loop resource exhausted")]
    Upump,

    /// An external system (OS, driver, library) failed.
    #[error("external system failure")]
    External,

    /// Argument does not meet the contract.
    #[error("invalid argument")]
    Invalid,

    /// Resource temporarily unavailable.
    #[error("resource busy")]
    Busy,

    /// Buffer too small.
    #[error("buffer too small")]
    NoSpace,
}
