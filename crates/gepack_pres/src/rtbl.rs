//! Scanner for headerless `.rtbl` tables.
//!
//! An RTBL file is a flat run of TOC records, each followed by its own name area. There is
//! no header or group table, so records are found by walking the file in 16 byte steps.

use std::io::{self, Read, Seek, SeekFrom};

use binrw::BinRead;
use tracing::{debug, instrument, trace, warn};

use crate::error::Result;
use crate::names::NameRecord;
use crate::offset::align_up;
use crate::read::PresEntry;
use crate::types::{EntryKind, TocRecord, TOC_RECORD_SIZE};

/// Scan step and alignment of records
const STEP: u64 = 16;

/// Name offset every RTBL record carries, relative to the record itself
pub const RTBL_NAME_OFFSET: u32 = 0x20;

/// Bytes between the start of the name area and the name string
const NAME_AREA_SKIP: u64 = 12;

/// Walk the `len` bytes of `reader` collecting every valid record
#[instrument(skip(reader), err)]
pub(crate) fn scan<R: Read + Seek>(reader: &mut R, len: u64) -> Result<Vec<PresEntry>> {
    let mut entries = Vec::new();
    let mut position = 0;

    while position < len {
        reader.seek(SeekFrom::Start(position))?;
        let mut block = [0u8; STEP as usize];
        let available = (len - position).min(STEP) as usize;
        reader.read_exact(&mut block[..available])?;
        if block.iter().all(|&b| b == 0) {
            position += STEP;
            continue;
        }
        if position + TOC_RECORD_SIZE > len {
            warn!("incomplete record at {position:#x}");
            break;
        }

        reader.seek(SeekFrom::Start(position))?;
        let record = TocRecord::read(reader)?;
        if record.name_offset != RTBL_NAME_OFFSET || record.kind() != EntryKind::Live {
            trace!("no record at {position:#x}");
            position += STEP;
            continue;
        }

        let names_start = position + RTBL_NAME_OFFSET as u64 + NAME_AREA_SKIP;
        let (name, after_name) = read_string(reader, names_start, len)?;
        let (file_type, after_type) = match name {
            Some(_) => read_string(reader, after_name, len)?,
            None => (None, after_name),
        };

        let names = NameRecord {
            name,
            file_type,
            ..Default::default()
        };
        debug!(?names, "record at {position:#x}");
        entries.push(PresEntry {
            group: 0,
            index: entries.len(),
            toc_offset: position,
            record,
            locator: record.locator(),
            names: Some(names),
        });

        position = align_up(after_type, STEP).max(position + STEP);
    }

    Ok(entries)
}

/// Read a null terminated string at `offset`, returning it and the offset after its terminator
fn read_string<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    len: u64,
) -> Result<(Option<String>, u64)> {
    if offset >= len {
        return Ok((None, offset));
    }
    reader.seek(SeekFrom::Start(offset))?;

    let mut raw = Vec::new();
    let mut byte = [0u8; 1];
    let mut end = offset;
    while end < len {
        match reader.read_exact(&mut byte) {
            Ok(()) => end += 1,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        if byte[0] == 0 {
            break;
        }
        raw.push(byte[0]);
    }

    let value = (!raw.is_empty()).then(|| String::from_utf8_lossy(&raw).into_owned());
    Ok((value, end))
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use crate::error::Result;
    use crate::offset::{BlobKind, Locator};
    use crate::rtbl::scan;

    #[rustfmt::skip]
    fn table() -> Vec<u8> {
        vec![
            // padding block
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            // record at 0x10, data blob sector 2
            0x02, 0x00, 0x00, 0x50,
            0x10, 0x00, 0x00, 0x00,
            0x20, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x10, 0x00, 0x00, 0x00,
            // name area at 0x30
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            b'l', b'o', b'g', b'o',
            0x00, b'd', b'd', b's',
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            // junk block that is not a record
            0xFF, 0xFF, 0xFF, 0xFF,
            0x01, 0x00, 0x00, 0x00,
            0x99, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            // record at 0x70, package blob sector 1, name "bgm" without type
            0x01, 0x00, 0x00, 0x40,
            0x04, 0x00, 0x00, 0x00,
            0x20, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x04, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            b'b', b'g', b'm', 0x00,
        ]
    }

    #[test]
    fn scan_records() -> Result<()> {
        let data = table();
        let len = data.len() as u64;
        let entries = scan(&mut Cursor::new(data), len)?;

        assert_eq!(entries.len(), 2);

        let logo = &entries[0];
        assert_eq!(logo.toc_offset, 0x10);
        assert_eq!(
            logo.locator,
            Locator::Blob {
                blob: BlobKind::Data,
                sector: 2
            }
        );
        assert_eq!(logo.record.compressed_size, 0x10);
        let names = logo.names.clone().unwrap_or_default();
        assert_eq!(names.name.as_deref(), Some("logo"));
        assert_eq!(names.file_type.as_deref(), Some("dds"));

        let bgm = &entries[1];
        assert_eq!(bgm.toc_offset, 0x70);
        assert_eq!(bgm.index, 1);
        let names = bgm.names.clone().unwrap_or_default();
        assert_eq!(names.name.as_deref(), Some("bgm"));
        assert_eq!(names.file_type, None);
        Ok(())
    }

    #[traced_test]
    #[test]
    fn incomplete_trailing_record() -> Result<()> {
        let mut data = table();
        data.extend_from_slice(&[0xAA; 16]);
        let len = data.len() as u64;
        let entries = scan(&mut Cursor::new(data), len)?;

        assert_eq!(entries.len(), 2);
        assert!(logs_contain("incomplete record"));
        Ok(())
    }

    #[test]
    fn empty_table() -> Result<()> {
        assert!(scan(&mut Cursor::new(vec![0u8; 64]), 64)?.is_empty());
        Ok(())
    }
}
