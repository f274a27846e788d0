//! Block compression and decompression handling.
//!
//! Payloads are either stored as they are or wrapped in one of two block streams. Both split
//! the payload into chunks of [`BLOCK_SIZE`] bytes, where the leftover tail forms the *first*
//! chunk, and then store the chunk list rotated right by one: the last full chunk is written
//! first. Decoding moves the first decoded block back to the end.
//!
//! | Stream | Layout                                                                        |
//! |--------|-------------------------------------------------------------------------------|
//! | BLZ2   | `"blz2"`, then `(u16 len, len bytes of raw deflate)*`                         |
//! | BLZ4   | `"blz4"`, `u32 size`, `u64 0`, `u8[16] md5`, then `(u16 len, len bytes zlib)*` |
//!
//! A BLZ4 chunk length of zero means the rest of the stream is the whole payload, stored raw.

use std::borrow::Cow;
use std::fmt;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::{
    read::{DeflateDecoder, ZlibDecoder},
    write::{DeflateEncoder, ZlibEncoder},
    Compression,
};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::error::{Error, Result};

/// Magic of a BLZ2 stream
pub const BLZ2_MAGIC: [u8; 4] = *b"blz2";

/// Magic of a BLZ4 stream
pub const BLZ4_MAGIC: [u8; 4] = *b"blz4";

/// Size of the uncompressed chunks a payload is split into
pub const BLOCK_SIZE: usize = 0x10000;

const BLZ4_HEADER_SIZE: usize = 32;

/// Identifies the storage format of a payload
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    /// Stores the data as it is
    #[default]
    None,

    /// Raw deflate blocks behind a `blz2` magic
    Blz2,

    /// Zlib blocks behind a `blz4` header
    Blz4,
}

impl CompressionMethod {
    /// Identify a block stream by its magic
    pub fn detect(data: &[u8]) -> Self {
        match data.get(..4) {
            Some(magic) if magic == BLZ2_MAGIC => CompressionMethod::Blz2,
            Some(magic) if magic == BLZ4_MAGIC => CompressionMethod::Blz4,
            _ => CompressionMethod::None,
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompressionMethod::None => "none",
            CompressionMethod::Blz2 => "blz2",
            CompressionMethod::Blz4 => "blz4",
        })
    }
}

enum BlockReader<'a> {
    Raw(&'a [u8]),
    Deflate(Box<DeflateDecoder<&'a [u8]>>),
    Zlib(Box<ZlibDecoder<&'a [u8]>>),
}

impl<'a> BlockReader<'a> {
    fn new(block: &'a [u8], compression: CompressionMethod) -> Self {
        match compression {
            CompressionMethod::None => BlockReader::Raw(block),
            CompressionMethod::Blz2 => BlockReader::Deflate(Box::new(DeflateDecoder::new(block))),
            CompressionMethod::Blz4 => BlockReader::Zlib(Box::new(ZlibDecoder::new(block))),
        }
    }
}

impl Read for BlockReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BlockReader::Raw(r) => r.read(buf),
            BlockReader::Deflate(r) => r.read(buf),
            BlockReader::Zlib(r) => r.read(buf),
        }
    }

    fn read_to_end(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        match self {
            BlockReader::Raw(r) => r.read_to_end(buf),
            BlockReader::Deflate(r) => r.read_to_end(buf),
            BlockReader::Zlib(r) => r.read_to_end(buf),
        }
    }
}

enum BlockWriter {
    Raw(Vec<u8>),
    Deflate(Box<DeflateEncoder<Vec<u8>>>),
    Zlib(Box<ZlibEncoder<Vec<u8>>>),
}

impl BlockWriter {
    fn new(compression: CompressionMethod) -> Self {
        match compression {
            CompressionMethod::None => BlockWriter::Raw(Vec::new()),
            CompressionMethod::Blz2 => BlockWriter::Deflate(Box::new(DeflateEncoder::new(
                Vec::new(),
                Compression::best(),
            ))),
            CompressionMethod::Blz4 => BlockWriter::Zlib(Box::new(ZlibEncoder::new(
                Vec::new(),
                Compression::best(),
            ))),
        }
    }

    fn finalize(self) -> io::Result<Vec<u8>> {
        match self {
            BlockWriter::Raw(w) => Ok(w),
            BlockWriter::Deflate(w) => w.finish(),
            BlockWriter::Zlib(w) => w.finish(),
        }
    }
}

impl Write for BlockWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            BlockWriter::Raw(w) => w.write(buf),
            BlockWriter::Deflate(w) => w.write(buf),
            BlockWriter::Zlib(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            BlockWriter::Raw(w) => w.flush(),
            BlockWriter::Deflate(w) => w.flush(),
            BlockWriter::Zlib(w) => w.flush(),
        }
    }
}

fn inflate(block: &[u8], compression: CompressionMethod) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    BlockReader::new(block, compression)
        .read_to_end(&mut out)
        .ok()?;
    Some(out)
}

fn deflate(chunk: &[u8], compression: CompressionMethod) -> io::Result<Vec<u8>> {
    let mut writer = BlockWriter::new(compression);
    writer.write_all(chunk)?;
    writer.finalize()
}

/// Split a payload into its chunks in decompressed order: tail first, then full chunks
fn split_chunks(data: &[u8]) -> Vec<&[u8]> {
    if data.len() <= BLOCK_SIZE {
        return vec![data];
    }
    let tail = data.len() % BLOCK_SIZE;
    let mut chunks = Vec::with_capacity(data.len() / BLOCK_SIZE + 1);
    if tail > 0 {
        chunks.push(&data[..tail]);
    }
    chunks.extend(data[tail..].chunks(BLOCK_SIZE));
    chunks.rotate_right(1);
    chunks
}

fn take_block(rest: &mut &[u8]) -> Option<usize> {
    let (len, tail) = rest.split_first_chunk::<2>()?;
    *rest = tail;
    Some(u16::from_le_bytes(*len) as usize)
}

fn reassemble(mut blocks: Vec<Vec<u8>>) -> Vec<u8> {
    blocks.rotate_left(1);
    blocks.concat()
}

/// Decompress a block stream of either kind.
///
/// Returns `None` when `data` is not a block stream or is malformed, in which case callers
/// should keep using the bytes as they are.
pub fn decompress(data: &[u8]) -> Option<Vec<u8>> {
    match CompressionMethod::detect(data) {
        CompressionMethod::None => None,
        CompressionMethod::Blz2 => decompress_blz2(data),
        CompressionMethod::Blz4 => decompress_blz4(data),
    }
}

/// Decompress a BLZ2 stream
pub fn decompress_blz2(data: &[u8]) -> Option<Vec<u8>> {
    let mut rest = data.strip_prefix(&BLZ2_MAGIC)?;
    let mut blocks = Vec::new();
    while !rest.is_empty() {
        let len = take_block(&mut rest)?;
        if len == 0 || len > rest.len() {
            return None;
        }
        let (block, tail) = rest.split_at(len);
        blocks.push(inflate(block, CompressionMethod::Blz2)?);
        rest = tail;
    }
    if blocks.is_empty() {
        return None;
    }
    Some(reassemble(blocks))
}

/// Decompress a BLZ4 stream. The declared size and digest are not verified.
pub fn decompress_blz4(data: &[u8]) -> Option<Vec<u8>> {
    if !data.starts_with(&BLZ4_MAGIC) || data.len() < BLZ4_HEADER_SIZE {
        return None;
    }
    let mut rest = &data[BLZ4_HEADER_SIZE..];
    let mut blocks = Vec::new();
    while !rest.is_empty() {
        let len = take_block(&mut rest)?;
        if len == 0 {
            // a stored payload can only stand alone
            return blocks.is_empty().then(|| rest.to_vec());
        }
        if len > rest.len() {
            return None;
        }
        let (block, tail) = rest.split_at(len);
        blocks.push(inflate(block, CompressionMethod::Blz4)?);
        rest = tail;
    }
    if blocks.is_empty() {
        return None;
    }
    Some(reassemble(blocks))
}

/// Decode a stored payload, falling back to the raw bytes when it is not a valid block stream.
///
/// Returns the payload together with the method it was stored with.
pub fn unpack(data: &[u8]) -> (Cow<'_, [u8]>, CompressionMethod) {
    let method = CompressionMethod::detect(data);
    if method == CompressionMethod::None {
        return (Cow::Borrowed(data), method);
    }
    match decompress(data) {
        Some(decoded) => (Cow::Owned(decoded), method),
        None => {
            warn!("{method} stream of {} bytes is malformed, keeping it raw", data.len());
            (Cow::Borrowed(data), CompressionMethod::None)
        }
    }
}

/// Encode `data` with `method`
pub fn compress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Blz2 => compress_blz2(data),
        CompressionMethod::Blz4 => compress_blz4(data),
    }
}

/// Encode `data` as a BLZ2 stream
#[instrument(skip_all, err, fields(size = data.len()))]
pub fn compress_blz2(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = BLZ2_MAGIC.to_vec();
    for chunk in split_chunks(data) {
        let block = deflate(chunk, CompressionMethod::Blz2)?;
        let len = u16::try_from(block.len()).map_err(|_| Error::BlockOverflow(block.len()))?;
        out.write_u16::<LittleEndian>(len)?;
        out.extend_from_slice(&block);
    }
    Ok(out)
}

/// Encode `data` as a BLZ4 stream, storing it raw when a chunk does not compress into a block
#[instrument(skip_all, err, fields(size = data.len()))]
pub fn compress_blz4(data: &[u8]) -> Result<Vec<u8>> {
    let declared = u32::try_from(data.len())
        .map_err(|_| Error::CustomError(format!("payload of {} bytes is too large", data.len())))?;

    let mut out = Vec::with_capacity(BLZ4_HEADER_SIZE + data.len() / 2);
    out.extend_from_slice(&BLZ4_MAGIC);
    out.write_u32::<LittleEndian>(declared)?;
    out.write_u64::<LittleEndian>(0)?;
    out.extend_from_slice(&Md5::digest(data));

    if !data.is_empty() {
        let mut stored = true;
        for chunk in split_chunks(data) {
            let block = deflate(chunk, CompressionMethod::Blz4)?;
            let Ok(len) = u16::try_from(block.len()) else {
                stored = false;
                break;
            };
            out.write_u16::<LittleEndian>(len)?;
            out.extend_from_slice(&block);
        }
        if stored {
            return Ok(out);
        }
        out.truncate(BLZ4_HEADER_SIZE);
    }

    out.write_u16::<LittleEndian>(0)?;
    out.extend_from_slice(data);
    Ok(out)
}
