//! Access to the external `package.rdp`, `data.rdp` and `patch.rdp` blobs.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::alloc::{
    BlobAllocator, ContentKey, EntryId, OriginalSlot, Placement, PlacementKind, PlacementPolicy,
};
use crate::error::{Error, Result};
use crate::offset::BlobKind;

struct BlobSlot<S> {
    stream: S,
    len: u64,
    allocator: BlobAllocator,
}

/// The set of blobs available to a session
///
/// Each blob sits behind its own lock, so planning a placement and writing it happen as one
/// step per blob.
pub struct BlobSet<S> {
    slots: [Option<Mutex<BlobSlot<S>>>; 3],
}

impl<S> Default for BlobSet<S> {
    fn default() -> Self {
        BlobSet {
            slots: [None, None, None],
        }
    }
}

impl<S> BlobSet<S> {
    /// An empty set, every blob is missing
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `blob` is available
    pub fn contains(&self, blob: BlobKind) -> bool {
        self.slots[blob.index()].is_some()
    }

    /// Current length of `blob`
    pub fn blob_len(&self, blob: BlobKind) -> Option<u64> {
        self.slots[blob.index()].as_ref().map(|s| s.lock().len)
    }

    /// Record that `owner` already occupies `size` bytes at `start` of `blob`.
    ///
    /// Returns `false` if the blob is not part of the set.
    pub fn claim(&self, blob: BlobKind, owner: EntryId, start: u64, size: u64) -> bool {
        match &self.slots[blob.index()] {
            Some(slot) => {
                slot.lock().allocator.claim(owner, start, size);
                true
            }
            None => false,
        }
    }

    /// Give back the underlying streams
    pub fn into_streams(self) -> impl Iterator<Item = (BlobKind, S)> {
        BlobKind::ALL
            .into_iter()
            .zip(self.slots)
            .filter_map(|(kind, slot)| slot.map(|s| (kind, s.into_inner().stream)))
    }

    fn slot(&self, blob: BlobKind) -> Result<&Mutex<BlobSlot<S>>> {
        self.slots[blob.index()]
            .as_ref()
            .ok_or(Error::MissingExternalResource(blob))
    }
}

impl<S: Seek> BlobSet<S> {
    /// Add `stream` as `blob`, replacing a previous one
    pub fn insert(&mut self, blob: BlobKind, mut stream: S) -> Result<()> {
        let len = stream.seek(SeekFrom::End(0))?;
        self.slots[blob.index()] = Some(Mutex::new(BlobSlot {
            stream,
            len,
            allocator: BlobAllocator::new(blob),
        }));
        Ok(())
    }

    /// Builder style [`BlobSet::insert`]
    pub fn with_blob(mut self, blob: BlobKind, stream: S) -> Result<Self> {
        self.insert(blob, stream)?;
        Ok(self)
    }
}

impl<S: Read + Seek> BlobSet<S> {
    /// Read `size` bytes at `offset` of `blob`
    #[instrument(skip(self), err)]
    pub fn read_at(&self, blob: BlobKind, offset: u64, size: u64) -> Result<Vec<u8>> {
        let mut slot = self.slot(blob)?.lock();
        if offset.saturating_add(size) > slot.len {
            return Err(Error::Truncated(format!(
                "{size} bytes at {offset:#x} of {blob} ({:#x} bytes long)",
                slot.len
            )));
        }
        slot.stream.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0; size as usize];
        slot.stream.read_exact(&mut data)?;
        Ok(data)
    }
}

impl<S: Read + Write + Seek> BlobSet<S> {
    /// Place `data` for `owner` inside `blob` and write it.
    ///
    /// Content already written this session is not written again, the earlier offset is
    /// returned instead.
    #[instrument(skip(self, data), err, fields(size = data.len()))]
    pub fn store(
        &self,
        blob: BlobKind,
        owner: EntryId,
        data: &[u8],
        original: Option<OriginalSlot>,
        policy: PlacementPolicy,
    ) -> Result<Placement> {
        let mut guard = self.slot(blob)?.lock();
        let slot = &mut *guard;
        let size = data.len() as u64;
        let key = ContentKey::of(data);

        let placement = slot
            .allocator
            .plan(owner, &key, size, original, slot.len, policy)?;

        if placement.kind != PlacementKind::Deduplicated {
            if let Some(grow_to) = placement.grow_to {
                debug!(%blob, from = slot.len, to = grow_to, "growing blob");
                slot.stream.seek(SeekFrom::Start(grow_to - 1))?;
                slot.stream.write_all(&[0])?;
                slot.len = grow_to;
            }
            slot.stream.seek(SeekFrom::Start(placement.offset))?;
            slot.stream.write_all(data)?;
        }

        slot.allocator.commit(owner, key, &placement, size);
        Ok(placement)
    }

    /// Flush every blob
    pub fn flush(&self) -> Result<()> {
        for slot in self.slots.iter().flatten() {
            slot.lock().stream.flush()?;
        }
        Ok(())
    }
}

impl BlobSet<File> {
    /// Open every blob present in `directory`, for writing too when `writable` is set
    #[instrument(err)]
    pub fn open_dir(directory: &Path, writable: bool) -> Result<Self> {
        let mut set = BlobSet::new();
        for blob in BlobKind::ALL {
            let path = directory.join(blob.file_name());
            if !path.is_file() {
                debug!("{} not found", path.display());
                continue;
            }
            let file = OpenOptions::new().read(true).write(writable).open(&path)?;
            set.insert(blob, file)?;
        }
        Ok(set)
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use crate::alloc::{EntryId, OriginalSlot, PlacementKind, PlacementPolicy, GROWTH_STEP};
    use crate::blob::BlobSet;
    use crate::error::{Error, Result};
    use crate::offset::BlobKind;

    fn owner(toc_offset: u64) -> EntryId {
        EntryId {
            container: 1,
            toc_offset,
        }
    }

    fn data_blob() -> Result<BlobSet<Cursor<Vec<u8>>>> {
        let mut bytes = vec![0xEE; 0x1000];
        bytes[0x800..0x805].copy_from_slice(b"hello");
        BlobSet::new().with_blob(BlobKind::Data, Cursor::new(bytes))
    }

    #[test]
    fn read_payload() -> Result<()> {
        let blobs = data_blob()?;
        assert_eq!(blobs.read_at(BlobKind::Data, 0x800, 5)?, b"hello");
        assert!(matches!(
            blobs.read_at(BlobKind::Data, 0xFFE, 5),
            Err(Error::Truncated(_))
        ));
        assert!(matches!(
            blobs.read_at(BlobKind::Patch, 0, 1),
            Err(Error::MissingExternalResource(BlobKind::Patch))
        ));
        Ok(())
    }

    #[traced_test]
    #[test]
    fn store_in_place() -> Result<()> {
        let blobs = data_blob()?;
        blobs.claim(BlobKind::Data, owner(0x40), 0x800, 5);

        let placement = blobs.store(
            BlobKind::Data,
            owner(0x40),
            b"world!",
            Some(OriginalSlot::new(0x800, 5)),
            PlacementPolicy::FirstFit,
        )?;
        assert_eq!(placement.offset, 0x800);
        assert_eq!(placement.kind, PlacementKind::Original);

        let (_, stream) = blobs.into_streams().next().unwrap();
        let bytes = stream.into_inner();
        assert_eq!(bytes.len(), 0x1000);
        assert_eq!(&bytes[0x800..0x806], b"world!");
        assert_eq!(&bytes[..0x10], &[0xEE; 0x10]);
        Ok(())
    }

    #[traced_test]
    #[test]
    fn store_relocates_and_grows() -> Result<()> {
        let blobs = data_blob()?;
        blobs.claim(BlobKind::Data, owner(0x40), 0x800, 0x10);
        blobs.claim(BlobKind::Data, owner(0x60), 0x800, 0x10);

        let placement = blobs.store(
            BlobKind::Data,
            owner(0x40),
            b"moved",
            Some(OriginalSlot::new(0x800, 0x10)),
            PlacementPolicy::FirstFit,
        )?;
        assert_eq!(placement.kind, PlacementKind::Relocated);
        assert_eq!(placement.offset, 0x1000);
        assert_eq!(blobs.blob_len(BlobKind::Data), Some(0x1000 + GROWTH_STEP));

        let bytes = blobs.into_streams().next().unwrap().1.into_inner();
        assert_eq!(bytes.len() as u64, 0x1000 + GROWTH_STEP);
        assert_eq!(&bytes[0x800..0x805], b"hello");
        assert_eq!(&bytes[0x1000..0x1005], b"moved");
        Ok(())
    }

    #[test]
    fn store_deduplicates() -> Result<()> {
        let blobs = data_blob()?;
        let first = blobs.store(
            BlobKind::Data,
            owner(0x40),
            b"shared",
            None,
            PlacementPolicy::FirstFit,
        )?;
        let len = blobs.blob_len(BlobKind::Data);
        let second = blobs.store(
            BlobKind::Data,
            owner(0x60),
            b"shared",
            None,
            PlacementPolicy::FirstFit,
        )?;

        assert_eq!(second.kind, PlacementKind::Deduplicated);
        assert_eq!(second.offset, first.offset);
        assert_eq!(blobs.blob_len(BlobKind::Data), len);
        Ok(())
    }

    #[test]
    fn store_into_missing_blob() {
        let blobs = BlobSet::<Cursor<Vec<u8>>>::new();
        assert!(!blobs.contains(BlobKind::Package));
        assert!(matches!(
            blobs.store(
                BlobKind::Package,
                owner(0),
                b"x",
                None,
                PlacementPolicy::FirstFit
            ),
            Err(Error::MissingExternalResource(BlobKind::Package))
        ));
    }
}
