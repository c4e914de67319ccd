/*
 *  flavor/elf.rs
 *
 *  rtflavor - realtime flavor loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Minimal read-only ELF reader: find one named section in a shared object
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::fmt;
use std::fs::File;
use std::path::Path;

use log::trace;
use memmap2::Mmap;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;

const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;

const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;

const ET_DYN: u16 = 3;

const SHT_NOBITS: u32 = 8;
const SHN_XINDEX: u16 = 0xffff;

#[cfg(target_pointer_width = "64")]
const NATIVE_CLASS: u8 = ELFCLASS64;
#[cfg(target_pointer_width = "32")]
const NATIVE_CLASS: u8 = ELFCLASS32;

#[cfg(target_endian = "little")]
const NATIVE_DATA: u8 = ELFDATA2LSB;
#[cfg(target_endian = "big")]
const NATIVE_DATA: u8 = ELFDATA2MSB;

/// Why a file was not accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElfError {
    NotElf,
    WrongClass(u8),
    WrongByteOrder(u8),
    NotSharedObject(u16),
    Malformed(&'static str),
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElfError::NotElf => write!(f, "not an ELF object"),
            ElfError::WrongClass(c) => write!(f, "ELF class {} does not match this process", c),
            ElfError::WrongByteOrder(d) => write!(f, "ELF data encoding {} does not match this process", d),
            ElfError::NotSharedObject(t) => write!(f, "ELF type {} is not ET_DYN", t),
            ElfError::Malformed(what) => write!(f, "malformed ELF: {}", what),
        }
    }
}

impl std::error::Error for ElfError {}

#[derive(Debug, Clone, Copy)]
struct SectionHeader {
    sh_name: u32,
    sh_type: u32,
    sh_offset: u64,
    sh_size: u64,
    sh_link: u32,
}

/// Field reader bound to one object's class and byte order
struct Reader<'a> {
    data: &'a [u8],
    is64: bool,
    big_endian: bool,
}

impl<'a> Reader<'a> {
    fn bytes<const N: usize>(&self, offset: usize) -> Result<[u8; N], ElfError> {
        let end = offset.checked_add(N).ok_or(ElfError::Malformed("offset overflow"))?;
        let slice = self.data.get(offset..end).ok_or(ElfError::Malformed("read past end of file"))?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u16(&self, offset: usize) -> Result<u16, ElfError> {
        let b = self.bytes::<2>(offset)?;
        Ok(if self.big_endian { u16::from_be_bytes(b) } else { u16::from_le_bytes(b) })
    }

    fn u32(&self, offset: usize) -> Result<u32, ElfError> {
        let b = self.bytes::<4>(offset)?;
        Ok(if self.big_endian { u32::from_be_bytes(b) } else { u32::from_le_bytes(b) })
    }

    fn u64(&self, offset: usize) -> Result<u64, ElfError> {
        let b = self.bytes::<8>(offset)?;
        Ok(if self.big_endian { u64::from_be_bytes(b) } else { u64::from_le_bytes(b) })
    }

    /// Address-sized field
    fn word(&self, offset: usize) -> Result<u64, ElfError> {
        if self.is64 { self.u64(offset) } else { self.u32(offset).map(u64::from) }
    }

    fn section_header(&self, shoff: u64, shentsize: u16, index: usize) -> Result<SectionHeader, ElfError> {
        let base = usize::try_from(shoff)
            .ok()
            .and_then(|off| off.checked_add(index.checked_mul(shentsize as usize)?))
            .ok_or(ElfError::Malformed("section header offset"))?;

        if self.is64 {
            Ok(SectionHeader {
                sh_name: self.u32(base)?,
                sh_type: self.u32(base + 4)?,
                sh_offset: self.u64(base + 24)?,
                sh_size: self.u64(base + 32)?,
                sh_link: self.u32(base + 40)?,
            })
        } else {
            Ok(SectionHeader {
                sh_name: self.u32(base)?,
                sh_type: self.u32(base + 4)?,
                sh_offset: self.u32(base + 16)?.into(),
                sh_size: self.u32(base + 20)?.into(),
                sh_link: self.u32(base + 24)?,
            })
        }
    }

    fn range(&self, offset: u64, size: u64) -> Result<&'a [u8], ElfError> {
        let start = usize::try_from(offset).map_err(|_| ElfError::Malformed("section offset"))?;
        let len = usize::try_from(size).map_err(|_| ElfError::Malformed("section size"))?;
        let end = start.checked_add(len).ok_or(ElfError::Malformed("section range"))?;
        self.data.get(start..end).ok_or(ElfError::Malformed("section past end of file"))
    }
}

/// Find `section` in an in-memory ELF image
///
/// Returns `Ok(None)` for a valid shared object of the right class that
/// simply lacks the section.
pub fn find_section<'a>(data: &'a [u8], section: &str) -> Result<Option<&'a [u8]>, ElfError> {
    if data.len() < 16 || data[..4] != ELF_MAGIC {
        return Err(ElfError::NotElf);
    }
    let is64 = match data[EI_CLASS] {
        ELFCLASS64 => true,
        ELFCLASS32 => false,
        other => return Err(ElfError::WrongClass(other)),
    };
    let big_endian = match data[EI_DATA] {
        ELFDATA2MSB => true,
        ELFDATA2LSB => false,
        other => return Err(ElfError::WrongByteOrder(other)),
    };
    if data[EI_CLASS] != NATIVE_CLASS {
        return Err(ElfError::WrongClass(data[EI_CLASS]));
    }
    if data[EI_DATA] != NATIVE_DATA {
        return Err(ElfError::WrongByteOrder(data[EI_DATA]));
    }

    let r = Reader { data, is64, big_endian };

    // ET_DYN covers PIE executables too; telling them apart needs the
    // program headers and is not worth it for a discovery pass.
    let e_type = r.u16(16)?;
    if e_type != ET_DYN {
        return Err(ElfError::NotSharedObject(e_type));
    }

    let (shoff, shentsize, mut shnum, mut shstrndx) = if r.is64 {
        (r.word(40)?, r.u16(58)?, r.u16(60)? as usize, r.u16(62)?)
    } else {
        (r.word(32)?, r.u16(46)?, r.u16(48)? as usize, r.u16(50)?)
    };

    if shoff == 0 {
        return Ok(None);
    }
    let min_entsize = if r.is64 { 64 } else { 40 };
    if (shentsize as usize) < min_entsize {
        return Err(ElfError::Malformed("section header entry size"));
    }

    // Extended numbering lives in section 0
    if shnum == 0 || shstrndx == SHN_XINDEX {
        let first = r.section_header(shoff, shentsize, 0)?;
        if shnum == 0 {
            shnum = usize::try_from(first.sh_size).map_err(|_| ElfError::Malformed("section count"))?;
        }
        if shstrndx == SHN_XINDEX {
            shstrndx = u16::try_from(first.sh_link).map_err(|_| ElfError::Malformed("string table index"))?;
        }
    }

    let table_len = usize::try_from(shoff)
        .ok()
        .and_then(|off| data.len().checked_sub(off))
        .ok_or(ElfError::Malformed("section table past end of file"))?;
    if shnum > table_len / shentsize as usize {
        return Err(ElfError::Malformed("section count exceeds file"));
    }

    if shstrndx as usize >= shnum {
        return Err(ElfError::Malformed("string table index out of range"));
    }

    let strtab_header = r.section_header(shoff, shentsize, shstrndx as usize)?;
    let strtab = r.range(strtab_header.sh_offset, strtab_header.sh_size)?;

    for index in 1..shnum {
        let header = r.section_header(shoff, shentsize, index)?;

        let Some(name) = strtab.get(header.sh_name as usize..) else { continue };
        let len = name.iter().position(|&c| c == 0).unwrap_or(name.len());
        if &name[..len] != section.as_bytes() {
            continue;
        }

        if header.sh_type == SHT_NOBITS {
            return Err(ElfError::Malformed("stamp section has no file contents"));
        }
        return r.range(header.sh_offset, header.sh_size).map(Some);
    }

    Ok(None)
}

/// Map the file at `path` and copy out the bytes of `section`
///
/// Any failure (unreadable, not ELF, wrong class, missing section) yields
/// `None`; the mapping and descriptor are released before returning.
pub fn section_bytes(path: &Path, section: &str) -> Option<Vec<u8>> {
    let file = File::open(path).ok()?;
    let len = file.metadata().ok()?.len();
    if len < 16 {
        return None;
    }

    // SAFETY: the mapping is read-only and dropped before return; a
    // concurrent truncation can only make us read garbage, which the
    // bounds-checked parser rejects.
    let map = unsafe { Mmap::map(&file) }.ok()?;

    match find_section(&map, section) {
        Ok(found) => found.map(<[u8]>::to_vec),
        Err(e) => {
            trace!("{}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a native-class shared object image holding one extra section
    #[cfg(target_pointer_width = "64")]
    pub(crate) fn shared_object(section: &str, payload: &[u8]) -> Vec<u8> {
        build(ET_DYN, section, payload)
    }

    #[cfg(target_pointer_width = "64")]
    fn build(e_type: u16, section: &str, payload: &[u8]) -> Vec<u8> {
        let mut strtab = vec![0u8];
        let name_off = strtab.len() as u32;
        strtab.extend_from_slice(section.as_bytes());
        strtab.push(0);
        let strtab_name_off = strtab.len() as u32;
        strtab.extend_from_slice(b".shstrtab\0");

        let payload_off = 64usize;
        let strtab_off = payload_off + payload.len();
        let mut shoff = strtab_off + strtab.len();
        shoff = (shoff + 7) & !7;

        let mut out = vec![0u8; shoff];
        out[..4].copy_from_slice(&ELF_MAGIC);
        out[EI_CLASS] = NATIVE_CLASS;
        out[EI_DATA] = NATIVE_DATA;
        out[6] = 1;
        out[16..18].copy_from_slice(&e_type.to_ne_bytes());
        out[20..24].copy_from_slice(&1u32.to_ne_bytes());
        out[40..48].copy_from_slice(&(shoff as u64).to_ne_bytes());
        out[52..54].copy_from_slice(&64u16.to_ne_bytes());
        out[58..60].copy_from_slice(&64u16.to_ne_bytes());
        out[60..62].copy_from_slice(&3u16.to_ne_bytes());
        out[62..64].copy_from_slice(&2u16.to_ne_bytes());
        out[payload_off..strtab_off].copy_from_slice(payload);
        out[strtab_off..strtab_off + strtab.len()].copy_from_slice(&strtab);

        let mut header = |name: u32, kind: u32, offset: usize, size: usize| {
            let mut sh = [0u8; 64];
            sh[0..4].copy_from_slice(&name.to_ne_bytes());
            sh[4..8].copy_from_slice(&kind.to_ne_bytes());
            sh[24..32].copy_from_slice(&(offset as u64).to_ne_bytes());
            sh[32..40].copy_from_slice(&(size as u64).to_ne_bytes());
            out.extend_from_slice(&sh);
        };
        header(0, 0, 0, 0);
        header(name_off, 1, payload_off, payload.len());
        header(strtab_name_off, 3, strtab_off, strtab.len());
        out
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_finds_named_section() {
        let image = shared_object("rtapi-flavor", b"hello\0");
        assert_eq!(find_section(&image, "rtapi-flavor").unwrap(), Some(&b"hello\0"[..]));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_missing_section_is_none() {
        let image = shared_object(".data.other", b"x");
        assert_eq!(find_section(&image, "rtapi-flavor").unwrap(), None);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_rejects_executable() {
        let image = build(2, "rtapi-flavor", b"x");
        assert_eq!(find_section(&image, "rtapi-flavor"), Err(ElfError::NotSharedObject(2)));
    }

    #[test]
    fn test_rejects_wrong_class() {
        let mut image = vec![0u8; 64];
        image[..4].copy_from_slice(&ELF_MAGIC);
        image[EI_CLASS] = if NATIVE_CLASS == ELFCLASS64 { ELFCLASS32 } else { ELFCLASS64 };
        image[EI_DATA] = NATIVE_DATA;
        assert!(matches!(find_section(&image, "rtapi-flavor"), Err(ElfError::WrongClass(_))));
    }

    #[test]
    fn test_rejects_non_elf() {
        assert_eq!(find_section(b"#!/bin/sh\necho hi\n", "rtapi-flavor"), Err(ElfError::NotElf));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_truncated_section_table_is_malformed() {
        let mut image = shared_object("rtapi-flavor", b"hello\0");
        // Cuts into the string table header's offset and size
        image.truncate(image.len() - 40);
        assert!(matches!(find_section(&image, "rtapi-flavor"), Err(ElfError::Malformed(_))));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_oversized_section_count_is_malformed() {
        let mut image = shared_object(".rodata", b"x");
        let shoff = u64::from_ne_bytes(image[40..48].try_into().unwrap()) as usize;

        // Extended numbering: the count comes from section 0's sh_size
        image[60..62].copy_from_slice(&0u16.to_ne_bytes());
        image[shoff + 32..shoff + 40].copy_from_slice(&u64::MAX.to_ne_bytes());

        assert_eq!(
            find_section(&image, "rtapi-flavor"),
            Err(ElfError::Malformed("section count exceeds file"))
        );
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_section_count_past_table_is_malformed() {
        let mut image = shared_object(".rodata", b"x");
        image[60..62].copy_from_slice(&4u16.to_ne_bytes());
        assert!(matches!(find_section(&image, "rtapi-flavor"), Err(ElfError::Malformed(_))));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_section_bytes_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libflavor.so");
        std::fs::write(&path, shared_object("rtapi-flavor", b"abc\0")).unwrap();
        assert_eq!(section_bytes(&path, "rtapi-flavor"), Some(b"abc\0".to_vec()));
        assert_eq!(section_bytes(&dir.path().join("missing.so"), "rtapi-flavor"), None);
    }
}
