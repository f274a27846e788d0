//! Placement of rewritten payloads inside external blobs.
//!
//! The allocator works on byte ranges only and never touches a stream, see
//! [`crate::blob::BlobSet`] for the part that performs the writes. Ranges are never
//! released during a session: an entry that moves keeps its old range claimed, since other
//! containers may still point at the same bytes.

use std::collections::HashMap;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::offset::{align_up, BlobKind, MAX_BLOB_OFFSET, SECTOR_SIZE};

/// Bytes at the start of every blob that are never handed out
pub const BLOB_HEADER_SIZE: u64 = 32;

/// Smallest step a blob grows by
pub const GROWTH_STEP: u64 = 1 << 20;

/// Identity of a TOC entry across every container of a session
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId {
    /// Session local number of the container
    pub container: u32,
    /// Offset of the entry's TOC record inside that container
    pub toc_offset: u64,
}

impl EntryId {
    /// Owner of the reserved blob header
    pub const HEADER: EntryId = EntryId {
        container: u32::MAX,
        toc_offset: u64::MAX,
    };
}

/// A claimed `[start, end)` byte range
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UsedRange {
    pub start: u64,
    pub end: u64,
    pub owner: EntryId,
}

/// Claimed ranges of one blob, ordered by start
#[derive(Debug, Default, Clone)]
pub struct UsedRangeSet {
    ranges: Vec<UsedRange>,
}

impl UsedRangeSet {
    /// Claim `[start, end)` for `owner`. Empty ranges are ignored.
    pub fn insert(&mut self, owner: EntryId, start: u64, end: u64) {
        if end <= start {
            return;
        }
        let at = self.ranges.partition_point(|r| r.start <= start);
        self.ranges.insert(at, UsedRange { start, end, owner });
    }

    /// Ranges sharing at least one byte with `[start, end)`
    pub fn overlapping(&self, start: u64, end: u64) -> impl Iterator<Item = &UsedRange> {
        let upper = self.ranges.partition_point(|r| r.start < end);
        self.ranges[..upper].iter().filter(move |r| r.end > start)
    }

    /// Whether no owner other than `owner` claims a byte of `[start, end)`
    pub fn is_free_for(&self, owner: EntryId, start: u64, end: u64) -> bool {
        self.overlapping(start, end).all(|r| r.owner == owner)
    }

    /// Lowest `align`ed offset at or after `from` where `size` bytes are unclaimed
    pub fn first_fit(&self, from: u64, size: u64, align: u64) -> u64 {
        let mut candidate = align_up(from, align);
        for range in &self.ranges {
            if range.end <= candidate {
                continue;
            }
            if candidate + size <= range.start {
                break;
            }
            candidate = align_up(range.end, align);
        }
        candidate
    }

    /// One past the highest claimed byte
    pub fn end(&self) -> u64 {
        self.ranges.iter().map(|r| r.end).max().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UsedRange> {
        self.ranges.iter()
    }
}

/// Where relocated payloads are searched for
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementPolicy {
    /// Reuse the lowest free gap after the blob header
    #[default]
    FirstFit,
    /// Only place past every claimed byte and the current end of the blob.
    ///
    /// Use this when not every container sharing the blob is part of the session, since
    /// unclaimed gaps may then still hold live data.
    Append,
}

/// Content identity used to deduplicate writes
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ContentKey {
    digest: [u8; 16],
    len: u64,
}

impl ContentKey {
    pub fn of(data: &[u8]) -> Self {
        ContentKey {
            digest: Md5::digest(data).into(),
            len: data.len() as u64,
        }
    }
}

/// How a placement was decided
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PlacementKind {
    /// Identical bytes were already written this session
    Deduplicated,
    /// The payload stays at its original offset
    Original,
    /// The payload moved to a free range
    Relocated,
}

/// The outcome of planning one write
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Placement {
    pub offset: u64,
    pub kind: PlacementKind,
    /// New blob length when the write needs the blob to grow
    pub grow_to: Option<u64>,
}

/// Where an entry's payload was before the session
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OriginalSlot {
    pub offset: u64,
    /// Sector aligned footprint of the original payload
    pub reserved: u64,
}

impl OriginalSlot {
    pub fn new(offset: u64, compressed_size: u64) -> Self {
        OriginalSlot {
            offset,
            reserved: align_up(compressed_size, SECTOR_SIZE),
        }
    }
}

/// Tracks claimed ranges and written content of one blob
#[derive(Debug, Clone)]
pub struct BlobAllocator {
    blob: BlobKind,
    used: UsedRangeSet,
    written: HashMap<ContentKey, u64>,
    ceiling: u64,
}

impl BlobAllocator {
    /// A fresh allocator with only the blob header claimed
    pub fn new(blob: BlobKind) -> Self {
        let mut used = UsedRangeSet::default();
        used.insert(EntryId::HEADER, 0, BLOB_HEADER_SIZE);
        BlobAllocator {
            blob,
            used,
            written: HashMap::new(),
            ceiling: MAX_BLOB_OFFSET,
        }
    }

    /// Lower the highest byte position that may be handed out
    pub fn with_ceiling(mut self, ceiling: u64) -> Self {
        self.ceiling = ceiling.min(MAX_BLOB_OFFSET);
        self
    }

    pub fn used(&self) -> &UsedRangeSet {
        &self.used
    }

    /// Record an existing placement of `owner`
    pub fn claim(&mut self, owner: EntryId, start: u64, size: u64) {
        self.used.insert(owner, start, start + size);
    }

    /// Decide where `size` bytes of content `key` written for `owner` go
    pub fn plan(
        &self,
        owner: EntryId,
        key: &ContentKey,
        size: u64,
        original: Option<OriginalSlot>,
        blob_len: u64,
        policy: PlacementPolicy,
    ) -> Result<Placement> {
        if let Some(&offset) = self.written.get(key) {
            return Ok(Placement {
                offset,
                kind: PlacementKind::Deduplicated,
                grow_to: None,
            });
        }

        let grow = |end: u64| (end > blob_len).then(|| self.grown_length(blob_len, end));

        if let Some(slot) = original {
            if size <= slot.reserved
                && slot.offset % SECTOR_SIZE == 0
                && slot.offset >= BLOB_HEADER_SIZE
                && self.used.is_free_for(owner, slot.offset, slot.offset + size)
            {
                return Ok(Placement {
                    offset: slot.offset,
                    kind: PlacementKind::Original,
                    grow_to: grow(slot.offset + size),
                });
            }
        }

        let from = match policy {
            PlacementPolicy::FirstFit => BLOB_HEADER_SIZE,
            PlacementPolicy::Append => self.used.end().max(blob_len),
        };
        let offset = self.used.first_fit(from, size, SECTOR_SIZE);
        let end = offset.saturating_add(size);
        if end > self.ceiling {
            return Err(Error::AllocationExhausted {
                blob: self.blob,
                size,
            });
        }
        debug!(blob = %self.blob, offset, size, "relocating payload");

        Ok(Placement {
            offset,
            kind: PlacementKind::Relocated,
            grow_to: grow(end),
        })
    }

    /// Record a planned placement as written
    pub fn commit(&mut self, owner: EntryId, key: ContentKey, placement: &Placement, size: u64) {
        self.claim(owner, placement.offset, size);
        self.written.entry(key).or_insert(placement.offset);
    }

    fn grown_length(&self, blob_len: u64, end: u64) -> u64 {
        let steps = (end - blob_len).div_ceil(GROWTH_STEP);
        (blob_len + steps * GROWTH_STEP).min(self.ceiling).max(end)
    }
}
