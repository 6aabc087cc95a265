//! Getting the guest kernel and its device tree into RAM.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use goblin::elf::{
    Elf,
    header::{self, ELFCLASS32, ELFDATA2LSB, EM_RISCV, ET_DYN, ET_EXEC},
    program_header::PT_LOAD,
};
use thiserror::Error;

use crate::dtb;
use crate::mem::{MemError, Memory};

/// Bytes left free above the device tree.
pub const RESERVED_TAIL: u32 = 192;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("\"{}\" not found", .0.display())]
    NotFound(PathBuf),

    #[error("could not fit RAM image ({size} bytes) into {ram}")]
    TooLarge { size: u64, ram: usize },

    #[error("could not load image: {0}")]
    Io(#[from] io::Error),

    #[error("bad ELF image: {0}")]
    Elf(#[from] goblin::error::Error),

    #[error("bad ELF image: {0}")]
    Segment(String),

    #[error("could not open dtb \"{}\": {source}", .path.display())]
    Dtb { path: PathBuf, source: io::Error },

    #[error("dtb ({size} bytes) does not fit into {ram} bytes of RAM")]
    DtbTooLarge { size: usize, ram: usize },
}

impl LoadError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            LoadError::NotFound(_) => 5,
            LoadError::TooLarge { .. } => 6,
            LoadError::Io(_) | LoadError::Elf(_) | LoadError::Segment(_) => 7,
            LoadError::Dtb { .. } | LoadError::DtbTooLarge { .. } => 9,
        }
    }
}

/// Where the device tree comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DtbSource {
    /// Generate one sized to the configured RAM.
    #[default]
    Builtin,
    /// Boot without a device tree.
    Disabled,
    File(PathBuf),
}

impl From<&str> for DtbSource {
    fn from(arg: &str) -> Self {
        match arg {
            "disable" => DtbSource::Disabled,
            path => DtbSource::File(PathBuf::from(path)),
        }
    }
}

/// Read `path` and place it in RAM. Returns the entry point.
pub fn load_image(path: &Path, mem: &mut Memory) -> Result<u32, LoadError> {
    let bytes = fs::read(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => LoadError::NotFound(path.to_path_buf()),
        _ => LoadError::Io(err),
    })?;
    load_image_bytes(&bytes, mem)
}

/// ELF images are loaded by segment; anything else is a flat binary copied
/// to the start of RAM.
pub fn load_image_bytes(bytes: &[u8], mem: &mut Memory) -> Result<u32, LoadError> {
    if bytes.starts_with(&header::ELFMAG[..]) {
        return load_elf(bytes, mem);
    }
    if bytes.len() > mem.size() {
        return Err(LoadError::TooLarge {
            size: bytes.len() as u64,
            ram: mem.size(),
        });
    }
    mem.write_bytes(mem.base, bytes)
        .map_err(|e: MemError| LoadError::Segment(format!("image write failed: {e}")))?;
    log::info!("loaded {} byte flat image at 0x{:08x}", bytes.len(), mem.base);
    Ok(mem.base)
}

fn load_elf(bytes: &[u8], mem: &mut Memory) -> Result<u32, LoadError> {
    let elf = Elf::parse(bytes)?;

    // Basic sanity checks so we fail fast on bad inputs
    if elf.header.e_ident[header::EI_CLASS] != ELFCLASS32 {
        return Err(LoadError::Segment("expected 32-bit ELF".into()));
    }
    if elf.header.e_ident[header::EI_DATA] != ELFDATA2LSB {
        return Err(LoadError::Segment("expected little-endian ELF".into()));
    }
    if elf.header.e_machine != EM_RISCV {
        return Err(LoadError::Segment("expected RISC-V ELF".into()));
    }
    if elf.header.e_type != ET_EXEC && elf.header.e_type != ET_DYN {
        return Err(LoadError::Segment(
            "unsupported ELF type (want ET_EXEC or ET_DYN)".into(),
        ));
    }

    let ram_end = mem.end_addr();

    for ph in elf.program_headers.iter().filter(|ph| ph.p_type == PT_LOAD) {
        let file_off = ph.p_offset as usize;
        let file_sz = ph.p_filesz as usize;
        let vaddr = ph.p_vaddr;

        let end = file_off
            .checked_add(file_sz)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| {
                LoadError::Segment(format!(
                    "segment outside file: off=0x{file_off:x} size=0x{file_sz:x}"
                ))
            })?;
        if ph.p_memsz < ph.p_filesz {
            return Err(LoadError::Segment(format!(
                "p_memsz smaller than p_filesz for segment at off=0x{file_off:x}"
            )));
        }

        let seg_end = vaddr.saturating_add(ph.p_memsz);
        if vaddr < mem.base as u64 || seg_end > ram_end {
            return Err(LoadError::TooLarge {
                size: seg_end.saturating_sub(mem.base as u64),
                ram: mem.size(),
            });
        }

        let vaddr = vaddr as u32;
        mem.write_bytes(vaddr, &bytes[file_off..end])
            .map_err(|e| LoadError::Segment(format!("mem write failed: {e}")))?;

        // Zero-fill bss (p_memsz may be larger than p_filesz)
        let bss = (ph.p_memsz - ph.p_filesz) as usize;
        if bss > 0 {
            mem.write_bytes(vaddr + file_sz as u32, &vec![0u8; bss])
                .map_err(|e| LoadError::Segment(format!("bss write failed: {e}")))?;
        }
        log::debug!("segment 0x{vaddr:08x}..0x{seg_end:08x}");
    }

    let entry = u32::try_from(elf.entry)
        .map_err(|_| LoadError::Segment(format!("entry 0x{:x} out of range", elf.entry)))?;
    log::info!("loaded ELF image, entry 0x{entry:08x}");
    Ok(entry)
}

/// Guest address for a `len` byte device tree: just below the reserved tail
/// at the top of RAM, 8-byte aligned.
pub fn dtb_address(mem: &Memory, len: usize) -> Option<u32> {
    let room = mem.size().checked_sub(len + RESERVED_TAIL as usize)?;
    Some(mem.base + (room as u32 & !7))
}

/// Put the device tree at the top of RAM. Returns its guest address, or
/// `None` when disabled.
pub fn place_dtb(
    mem: &mut Memory,
    source: &DtbSource,
    bootargs: Option<&str>,
) -> Result<Option<u32>, LoadError> {
    let blob = match source {
        DtbSource::Disabled => return Ok(None),
        DtbSource::File(path) => fs::read(path).map_err(|source| LoadError::Dtb {
            path: path.clone(),
            source,
        })?,
        DtbSource::Builtin => {
            // The advertised RAM ends where the tree starts, and the tree's
            // size does not depend on that value.
            let len = dtb::build_default_dtb(0, bootargs).len();
            let addr = dtb_address(mem, len).ok_or(LoadError::DtbTooLarge {
                size: len,
                ram: mem.size(),
            })?;
            dtb::build_default_dtb(addr - mem.base, bootargs)
        }
    };

    let addr = dtb_address(mem, blob.len()).ok_or(LoadError::DtbTooLarge {
        size: blob.len(),
        ram: mem.size(),
    })?;
    mem.write_bytes(addr, &blob)
        .map_err(|e| LoadError::Segment(format!("dtb write failed: {e}")))?;
    log::info!("device tree at 0x{addr:08x} ({} bytes)", blob.len());
    Ok(Some(addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::RAM_BASE;

    #[test]
    fn flat_image_lands_at_ram_base() {
        let mut mem = Memory::new(64);
        let entry = load_image_bytes(&[0x13, 0, 0, 0, 0x6f, 0, 0, 0], &mut mem).unwrap();
        assert_eq!(entry, RAM_BASE);
        assert_eq!(mem.read_u32(RAM_BASE + 4).unwrap(), 0x6f);
    }

    #[test]
    fn oversized_image_is_rejected() {
        let mut mem = Memory::new(4);
        let err = load_image_bytes(&[0; 5], &mut mem).unwrap_err();
        assert!(matches!(err, LoadError::TooLarge { size: 5, ram: 4 }));
        assert_eq!(err.exit_code(), 6);
    }

    #[test]
    fn missing_file_maps_to_not_found() {
        let mut mem = Memory::new(4);
        let err = load_image(Path::new("/nonexistent/rv32-image"), &mut mem).unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn truncated_elf_is_an_error() {
        let mut mem = Memory::new(64);
        let err = load_image_bytes(b"\x7fELF\x01\x01", &mut mem).unwrap_err();
        assert_eq!(err.exit_code(), 7);
    }

    #[test]
    fn dtb_sits_below_reserved_tail() {
        let mem = Memory::new(0x1000);
        let addr = dtb_address(&mem, 100).unwrap();
        assert_eq!(addr % 8, 0);
        assert!(addr as u64 + 100 + RESERVED_TAIL as u64 <= mem.end_addr());
        assert!(dtb_address(&mem, 0x1000).is_none());
    }

    #[test]
    fn builtin_dtb_is_written_and_disable_skips_it() {
        let mut mem = Memory::new(0x10_0000);
        assert_eq!(place_dtb(&mut mem, &DtbSource::Disabled, None).unwrap(), None);

        let addr = place_dtb(&mut mem, &DtbSource::Builtin, Some("quiet"))
            .unwrap()
            .unwrap();
        assert_eq!(mem.read_u32(addr).unwrap(), 0xedfe0dd0); // big-endian magic
    }

    #[test]
    fn dtb_argument_parsing() {
        assert_eq!(DtbSource::from("disable"), DtbSource::Disabled);
        assert_eq!(
            DtbSource::from("board.dtb"),
            DtbSource::File(PathBuf::from("board.dtb"))
        );
    }
}
