mod common;

use std::fs;
use std::io::Cursor;
use std::path::PathBuf;

use gepack_pres::alloc::PlacementPolicy;
use gepack_pres::blob::BlobSet;
use gepack_pres::cancel::CancellationToken;
use gepack_pres::error::{Error, Result};
use gepack_pres::extract::{extract, ExtractOptions};
use gepack_pres::read::{Payload, PresArchive};
use gepack_pres::repack::{repack_tree, RepackOptions};
use gepack_pres::write::inline_slot;
use gepack_pres::{BlobKind, Locator};
use pretty_assertions::assert_eq;
use tracing_test::traced_test;

use common::Fixture;

/// Extract the fixture and return where a repacked root should go
fn extracted(fixture: &Fixture) -> Result<PathBuf> {
    let blobs = BlobSet::open_dir(fixture.dir.path(), false)?;
    extract(
        &fixture.root(),
        &blobs,
        ExtractOptions::builder().output(fixture.output()).build(),
    )?;
    Ok(fixture.dir.path().join("system.new.res"))
}

fn payload_of(
    archive: &mut PresArchive<Cursor<Vec<u8>>>,
    index: usize,
    blobs: &BlobSet<fs::File>,
) -> Result<Vec<u8>> {
    match archive.read_payload(index, blobs)? {
        Payload::Data { data, .. } => Ok(data),
        Payload::Absent => panic!("entry {index} has no payload"),
    }
}

#[traced_test]
#[test]
fn unchanged_tree_repacks_identically() -> Result<()> {
    let fixture = Fixture::new()?;
    let output = extracted(&fixture)?;

    let blobs = BlobSet::open_dir(fixture.dir.path(), true)?;
    let report = repack_tree(&fixture.manifest(), &output, &blobs, RepackOptions::default())?;

    assert_eq!(report.rewritten, 0);
    assert_eq!(report.unchanged, 7);
    assert!(report.failed.is_empty());
    assert!(fs::read(&output)? == fs::read(fixture.root())?);
    assert!(fs::read(fixture.dir.path().join("data.rdp"))? == common::data_blob());
    assert!(logs_contain("0 rewritten, 7 unchanged, 0 failed"));
    Ok(())
}

#[test]
fn edited_inline_file_is_repacked() -> Result<()> {
    let fixture = Fixture::new()?;
    let output = extracted(&fixture)?;
    fs::write(fixture.output().join("misc/hello.txt"), b"Hi there")?;

    let blobs = BlobSet::open_dir(fixture.dir.path(), true)?;
    let report = repack_tree(&fixture.manifest(), &output, &blobs, RepackOptions::default())?;
    assert_eq!(report.rewritten, 1);

    let original = fs::read(fixture.root())?;
    let repacked = fs::read(&output)?;
    assert_eq!(repacked.len(), original.len());

    let hello = PresArchive::new(Cursor::new(original.clone()))?
        .by_index(0)?
        .clone();
    let Locator::Inline { offset, .. } = hello.locator else {
        panic!("hello.txt is not stored inline");
    };
    let record = hello.toc_offset as usize..hello.toc_offset as usize + 32;
    let reserved = inline_slot(common::HELLO.len() as u64) as usize;
    let slot = offset as usize..offset as usize + reserved;
    let outside = |bytes: &[u8]| -> Vec<u8> {
        bytes
            .iter()
            .enumerate()
            .filter(|(i, _)| !record.contains(i) && !slot.contains(i))
            .map(|(_, b)| *b)
            .collect()
    };
    assert!(outside(&repacked) == outside(&original));
    assert!(repacked[record.clone()] != original[record.clone()]);

    let mut archive = PresArchive::new(Cursor::new(repacked))?;
    assert_eq!(payload_of(&mut archive, 0, &blobs)?, b"Hi there");
    assert_eq!(archive.by_index(0)?.record.compressed_size, 8);
    assert!(payload_of(&mut archive, 1, &blobs)? == common::big_payload());

    let dummy = archive.by_index(4)?;
    assert_eq!(dummy.record.decompressed_size, 64);
    assert_eq!(dummy.record.compressed_size, 0);
    Ok(())
}

#[test]
fn grown_blob_payload_moves_past_foreign_data() -> Result<()> {
    let fixture = Fixture::new()?;
    let output = extracted(&fixture)?;
    let texels: Vec<u8> = (0..0x900u32).map(|i| (i % 199) as u8).collect();
    fs::write(fixture.output().join("tex.dds"), &texels)?;

    let blobs = BlobSet::open_dir(fixture.dir.path(), true)?;
    let report = repack_tree(
        &fixture.manifest(),
        &output,
        &blobs,
        RepackOptions::builder()
            .policy(PlacementPolicy::Append)
            .build(),
    )?;
    assert_eq!(report.rewritten, 1);
    assert_eq!(report.relocated, 1);
    drop(blobs);

    let data = fs::read(fixture.dir.path().join("data.rdp"))?;
    let foreign = common::FOREIGN_OFFSET..common::FOREIGN_OFFSET + common::FOREIGN.len();
    assert_eq!(&data[foreign], common::FOREIGN);
    let texel = common::TEXEL_OFFSET..common::TEXEL_OFFSET + common::TEXEL.len();
    assert_eq!(&data[texel], common::TEXEL);

    let blobs = BlobSet::open_dir(fixture.dir.path(), false)?;
    let mut archive = PresArchive::new(Cursor::new(fs::read(&output)?))?;
    assert_eq!(
        archive.by_index(3)?.locator,
        Locator::Blob {
            blob: BlobKind::Data,
            sector: 4,
        }
    );
    assert!(payload_of(&mut archive, 3, &blobs)? == texels);
    Ok(())
}

#[test]
fn nested_edit_reaches_the_root() -> Result<()> {
    let fixture = Fixture::new()?;
    let output = extracted(&fixture)?;
    fs::write(fixture.output().join("stage/inner.txt"), b"edited nested payload")?;

    let blobs = BlobSet::open_dir(fixture.dir.path(), true)?;
    let report = repack_tree(&fixture.manifest(), &output, &blobs, RepackOptions::default())?;
    assert_eq!(report.rewritten, 2);

    let mut archive = PresArchive::new(Cursor::new(fs::read(&output)?))?;
    let stage = payload_of(&mut archive, 2, &blobs)?;
    let mut nested = PresArchive::new(Cursor::new(stage))?;
    assert_eq!(payload_of(&mut nested, 0, &blobs)?, b"edited nested payload");
    Ok(())
}

#[test]
fn forced_repack_keeps_every_payload() -> Result<()> {
    let fixture = Fixture::new()?;
    let output = extracted(&fixture)?;

    let blobs = BlobSet::open_dir(fixture.dir.path(), true)?;
    let report = repack_tree(
        &fixture.manifest(),
        &output,
        &blobs,
        RepackOptions::builder().force(true).build(),
    )?;
    assert!(report.failed.is_empty());
    assert_eq!(report.relocated, 0);

    let mut archive = PresArchive::new(Cursor::new(fs::read(&output)?))?;
    assert_eq!(payload_of(&mut archive, 0, &blobs)?, common::HELLO);
    assert!(payload_of(&mut archive, 1, &blobs)? == common::big_payload());
    assert_eq!(payload_of(&mut archive, 3, &blobs)?, common::TEXEL);
    Ok(())
}

#[test]
fn cancelled_repack_writes_nothing() -> Result<()> {
    let fixture = Fixture::new()?;
    let output = extracted(&fixture)?;
    let token = CancellationToken::new();
    token.cancel();

    let blobs = BlobSet::open_dir(fixture.dir.path(), true)?;
    let result = repack_tree(
        &fixture.manifest(),
        &output,
        &blobs,
        RepackOptions::builder().cancel(token).build(),
    );
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(!output.exists());
    Ok(())
}
