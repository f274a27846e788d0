#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use gepack_pres::builder::{BuilderEntry, PresBuilder};
use gepack_pres::compression::CompressionMethod;
use gepack_pres::error::Result;
use gepack_pres::names::NameRecord;
use gepack_pres::offset::{BlobKind, Locator};
use tempfile::TempDir;

pub const HELLO: &[u8] = b"Hello World";
pub const INNER: &[u8] = b"payload of the nested container";
pub const TEXEL: &[u8] = b"texel data living in the data blob";
pub const FOREIGN: &[u8] = b"bytes owned by some other container";
pub const REFERENCE: &[u8] = b"stored next to the container";

/// Offset of the texture payload inside `data.rdp`
pub const TEXEL_OFFSET: usize = 0x800;
/// Offset of data no fixture entry claims
pub const FOREIGN_OFFSET: usize = 0x1000;

pub fn big_payload() -> Vec<u8> {
    (0..100_000u32).map(|i| (i % 251) as u8).collect()
}

pub fn nested_container() -> Result<Vec<u8>> {
    let mut builder = PresBuilder::new();
    let group = builder.add_group();
    builder.push(
        group,
        BuilderEntry::inline(NameRecord::new("inner").with_type("txt"), INNER),
    );
    builder.build()
}

pub fn root_container() -> Result<Vec<u8>> {
    let mut builder = PresBuilder::new();
    let files = builder.add_group();
    let external = builder.add_group();
    builder
        .push(
            files,
            BuilderEntry::inline(
                NameRecord::new("hello").with_type("txt").with_path("misc/"),
                HELLO,
            ),
        )
        .push(
            files,
            BuilderEntry::compressed(
                NameRecord::new("big").with_type("bin"),
                big_payload(),
                CompressionMethod::Blz2,
            ),
        )
        .push(
            files,
            BuilderEntry::inline(
                NameRecord::new("stage").with_type("res"),
                nested_container()?,
            ),
        )
        .push(
            external,
            BuilderEntry::external(
                NameRecord::new("tex").with_type("dds"),
                Locator::blob(BlobKind::Data, TEXEL_OFFSET as u64)?,
                TEXEL.len() as u32,
                TEXEL.len() as u32,
            ),
        )
        .push(external, BuilderEntry::Dummy { decompressed_size: 64 })
        .push(
            external,
            BuilderEntry::external(
                NameRecord::new("PATH=extra/ref.bin"),
                Locator::NoSet { magnitude: 0 },
                0,
                0,
            ),
        )
        .push(external, BuilderEntry::Empty);
    builder.build()
}

pub fn data_blob() -> Vec<u8> {
    let mut blob = vec![0u8; 0x2000];
    blob[..4].copy_from_slice(b"RDP\0");
    blob[TEXEL_OFFSET..TEXEL_OFFSET + TEXEL.len()].copy_from_slice(TEXEL);
    blob[FOREIGN_OFFSET..FOREIGN_OFFSET + FOREIGN.len()].copy_from_slice(FOREIGN);
    blob
}

/// A directory holding `system.res`, `data.rdp` and `extra/ref.bin`
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("system.res"), root_container()?)?;
        fs::write(dir.path().join("data.rdp"), data_blob())?;
        fs::create_dir_all(dir.path().join("extra"))?;
        fs::write(dir.path().join("extra/ref.bin"), REFERENCE)?;
        Ok(Fixture { dir })
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("system.res")
    }

    pub fn output(&self) -> PathBuf {
        self.dir.path().join("out/system")
    }

    pub fn manifest(&self) -> PathBuf {
        self.dir.path().join("out/system.json")
    }
}
