//! This library handles reading, extracting and repacking **PRES** containers (`.res` files)
//! together with the external **RDP** blobs they point into.
//!
//! # PRES Container Format Documentation
//!
//! A PRES container bundles many assets behind a table of contents. Each entry's payload is
//! stored inline in the container, in one of three shared sector addressed blob files, or as
//! a separate file referenced by name. Payloads may be wrapped in the BLZ2 or BLZ4 block
//! compression formats.
//!
//! ## File Structure
//!
//! A container consists of a header, a group table, TOC blocks, name tables and inline
//! payloads. All integers are little-endian.
//!
//! | Offset (bytes) | Field              | Description                                         |
//! |----------------|--------------------|-----------------------------------------------------|
//! | 0x0000         | Magic number       | 4 bytes: "Pres"                                     |
//! | 0x0004         | Group Offset       | 4 bytes: Offset of the group descriptor table       |
//! | 0x0008         | Group Count        | 1 byte: Number of group descriptors                 |
//! | 0x0009         | Group Version      | 1 byte: Revision of the group table                 |
//! | 0x000A         | Checksum           | 2 bytes: Carried through, never verified            |
//! | 0x000C         | Version            | 4 bytes: Container version                          |
//! | 0x0010         | Chunk Datas Offset | 4 bytes: Offset of the first inline payload         |
//! | 0x0014         | Sideload Offset    | 4 bytes: Offset of the sideloaded resource block    |
//! | 0x0018         | Sideload Size      | 4 bytes: Size of the sideloaded resource block      |
//!
//! ### Group Table
//!
//! `Group Count` descriptors of 8 bytes each, an `u32` offset of the group's first TOC record
//! followed by an `u32` record count. A group with no records or a zero offset is empty.
//!
//! ### TOC Records
//!
//! Every group's records are 32 bytes each and stored back to back.
//!
//! | Offset (bytes) | Field              | Description                                         |
//! |----------------|--------------------|-----------------------------------------------------|
//! | 0x0000         | Offset             | 4 bytes: Marker nibble and 28 bit magnitude         |
//! | 0x0004         | Compressed Size    | 4 bytes: Size of the payload as stored              |
//! | 0x0008         | Name Offset        | 4 bytes: Offset of the name pointer table           |
//! | 0x000C         | Name Field Count   | 4 bytes: Number of meaningful name pointers         |
//! | 0x0010         | Reserved           | 12 bytes: Preserved verbatim                        |
//! | 0x001C         | Decompressed Size  | 4 bytes: Size of the payload once decompressed      |
//!
//! The top nibble of the offset field selects where the payload lives:
//!
//! - `0x0`: outside any container or blob
//! - `0x3`: a separate file, referenced by the entry's names
//! - `0x4`, `0x5`, `0x6`: `package.rdp`, `data.rdp` or `patch.rdp`, the magnitude counts
//!   `0x800` byte sectors
//! - `0xC`, `0xD`: inside the container, the magnitude is a byte offset
//!
//! A record whose fields are all zero is empty. One with only a decompressed size is a
//! placeholder without payload.
//!
//! ### Name Tables
//!
//! Up to five `u32` pointers to null terminated UTF-8 strings: name, type, path, sub path and
//! extra path. Which of them are present depends on the name field count:
//!
//! - `1`: name
//! - `3`: name, type and either path or sub path, see [`names::NameBinding`]
//! - `4`: name, type and sub path
//! - `5`: name, type, sub path and extra path
//!
//! ### Block Compression
//!
//! BLZ2 streams start with `"blz2"` followed by `u16` length prefixed raw deflate blocks.
//! BLZ4 streams start with `"blz4"`, a declared size, 8 reserved bytes and an MD5 digest,
//! followed by `u16` length prefixed zlib blocks, or a zero length and the raw payload.
//! Payloads are split into `0x10000` byte chunks, with the first block on the wire decoding
//! to the end of the payload. See [`compression`].
//!
//! ## Additional Information
//!
//! - **File Extensions**: `.res`, `.rtbl` for headerless tables of the same records
//! - **Blobs**: `package.rdp`, `data.rdp`, `patch.rdp`, their first 32 bytes are never used
//!   for payloads
//!

pub mod alloc;
pub mod blob;
pub mod builder;
pub mod cancel;
pub mod compression;
pub mod error;
pub mod extract;
pub mod manifest;
pub mod names;
pub mod offset;
pub mod read;
mod rtbl;
pub mod repack;
pub mod types;
pub mod write;

pub use blob::BlobSet;
pub use compression::CompressionMethod;
pub use extract::{ExtractOptions, Extractor};
pub use manifest::ExtractionManifest;
pub use offset::{BlobKind, Locator};
pub use read::{ContainerKind, PresArchive};
pub use repack::{repack_tree, RepackOptions, RepackSession};
pub use write::ContainerWriter;
