//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

use crate::offset::BlobKind;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent wrapper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent wrapper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// Transparent wrapper for [`serde_json::Error`]
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    /// file is an invalid pres container
    #[error("file is an invalid pres container")]
    InvalidContainer,

    /// data ends before {0}
    #[error("data ends before {0}")]
    Truncated(String),

    /// unknown storage marker {marker:#x} in offset {raw:#010x}
    #[error("unknown storage marker {marker:#x} in offset {raw:#010x}")]
    UnknownLocator { marker: u8, raw: u32 },

    /// offset {0:#x} is not aligned to a blob sector
    #[error("offset {0:#x} is not aligned to a blob sector")]
    UnalignedOffset(u64),

    /// offset {0:#x} does not fit in a 28 bit offset field
    #[error("offset {0:#x} does not fit in a 28 bit offset field")]
    OffsetOverflow(u64),

    /// {0} is not available
    #[error("{0} is not available")]
    MissingExternalResource(BlobKind),

    /// no free range of {size} bytes left in {blob}
    #[error("no free range of {size} bytes left in {blob}")]
    AllocationExhausted { blob: BlobKind, size: u64 },

    /// replacement of {size} bytes does not fit the {reserved} byte inline slot at {offset:#x}
    #[error("replacement of {size} bytes does not fit the {reserved} byte inline slot at {offset:#x}")]
    InlineOverflow {
        offset: u64,
        size: u64,
        reserved: u64,
    },

    /// name {0:?} is longer than the string it replaces
    #[error("name {0:?} is longer than the string it replaces")]
    NameOverflow(String),

    /// compressed block of {0} bytes does not fit a 16 bit block length
    #[error("compressed block of {0} bytes does not fit a 16 bit block length")]
    BlockOverflow(usize),

    /// unable to find requested entry
    #[error("unable to find requested entry")]
    EntryNotFound(#[from] EntryNotFoundError),

    /// operation was cancelled
    #[error("operation was cancelled")]
    Cancelled,

    /// {0}
    #[error("{0}")]
    CustomError(String),
}

impl Error {
    /// Whether the failure only concerns a single entry.
    ///
    /// Entry scoped failures are logged and recorded by extraction and repacking, which then
    /// carry on with the next entry. Everything else aborts the container or session.
    pub fn is_entry_scoped(&self) -> bool {
        matches!(
            self,
            Error::Truncated(_)
                | Error::UnknownLocator { .. }
                | Error::UnalignedOffset(_)
                | Error::OffsetOverflow(_)
                | Error::MissingExternalResource(_)
                | Error::AllocationExhausted { .. }
                | Error::InlineOverflow { .. }
                | Error::NameOverflow(_)
                | Error::BlockOverflow(_)
        )
    }
}

/// Error type to provide further information when an entry has not been found
#[derive(Error, Diagnostic, Debug)]
#[error("unable to find requested entry")]
pub enum EntryNotFoundError {
    /// at index {0}
    #[error("at index {0}")]
    Index(usize),

    /// at toc offset {0:#x}
    #[error("at toc offset {0:#x}")]
    TocOffset(u64),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
