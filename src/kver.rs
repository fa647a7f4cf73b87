// SPDX-License-Identifier: (GPL-2.0 OR GPL-3.0)
// Copyright (C) 2026 SUSE LLC
//! Kernel release extraction from kernel images, used to tell a user who
//! passed a kernel instead of an initramfs what they are looking at.
use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::str;

use elf::endian::AnyEndian;
use elf::ElfStream;
use tracing::debug;

const BANNER: &[u8] = b"Linux version ";
// x86 boot protocol: "HdrS" signature and kernel_version pointer
const BZIMAGE_MAGIC_OFF: usize = 0x202;
const BZIMAGE_KVER_PTR_OFF: usize = 0x20E;
const BZIMAGE_HDR_LEN: usize = 0x210;
const BZIMAGE_KVER_MAX: u64 = 127;
const RAW_SCAN_MAX: u64 = 16 << 20;

// first token of a nul or space terminated version string
fn kver_token(buf: &[u8]) -> Option<String> {
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    let s = str::from_utf8(&buf[..end]).ok()?;
    match s.split_whitespace().next() {
        Some(rel) if rel.starts_with(|c: char| c.is_ascii_digit()) => Some(rel.to_string()),
        _ => None,
    }
}

// "Linux version 6.17.0-2-default (geeko@buildhost) ..." -> "6.17.0-2-default"
fn linux_banner_parse(banner: &[u8]) -> Option<String> {
    kver_token(banner.strip_prefix(BANNER)?)
}

// locate the first parseable banner within @data
fn linux_banner_find(data: &[u8]) -> Option<String> {
    let mut off = 0;
    while let Some(pos) = data[off..]
        .windows(BANNER.len())
        .position(|w| w == BANNER)
    {
        let start = off + pos;
        if let Some(kver) = linux_banner_parse(&data[start..]) {
            return Some(kver);
        }
        off = start + BANNER.len();
    }
    None
}

fn kver_bzimage(f: &mut fs::File) -> io::Result<Option<String>> {
    let mut hdr = [0u8; BZIMAGE_HDR_LEN];
    f.seek(SeekFrom::Start(0))?;
    if let Err(e) = f.read_exact(&mut hdr) {
        return match e.kind() {
            io::ErrorKind::UnexpectedEof => Ok(None),
            _ => Err(e),
        };
    }
    if &hdr[BZIMAGE_MAGIC_OFF..BZIMAGE_MAGIC_OFF + 4] != b"HdrS" {
        return Ok(None);
    }
    let ptr = u16::from_le_bytes([hdr[BZIMAGE_KVER_PTR_OFF], hdr[BZIMAGE_KVER_PTR_OFF + 1]]);
    f.seek(SeekFrom::Start(u64::from(ptr) + 0x200))?;
    let mut buf = vec![];
    f.take(BZIMAGE_KVER_MAX).read_to_end(&mut buf)?;
    Ok(kver_token(&buf))
}

fn kver_elf(f: &mut fs::File) -> io::Result<Option<String>> {
    f.seek(SeekFrom::Start(0))?;
    let mut file = match ElfStream::<AnyEndian, _>::open_stream(&*f) {
        Ok(file) => file,
        // BadMagic and friends for anything non-elf
        Err(_) => return Ok(None),
    };
    let shdr = match file.section_header_by_name(".rodata") {
        Ok(Some(shdr)) => *shdr,
        Ok(None) | Err(_) => return Ok(None),
    };
    match file.section_data(&shdr) {
        Ok((data, _)) => Ok(linux_banner_find(data)),
        Err(e) => {
            debug!("failed to read .rodata: {}", e);
            Ok(None)
        }
    }
}

fn kver_raw(f: &mut fs::File) -> io::Result<Option<String>> {
    f.seek(SeekFrom::Start(0))?;
    let mut data = vec![];
    f.take(RAW_SCAN_MAX).read_to_end(&mut data)?;
    Ok(linux_banner_find(&data))
}

/// Return the kernel release of @path if it looks like a kernel image:
/// an x86 bzImage, an uncompressed ELF vmlinux, or anything carrying a
/// plain `Linux version` banner near its start.
pub fn kernel_version(path: &Path) -> io::Result<Option<String>> {
    let mut f = fs::File::open(path)?;
    if let Some(kver) = kver_bzimage(&mut f)? {
        debug!("{}: bzImage kernel {}", path.display(), kver);
        return Ok(Some(kver));
    }
    if let Some(kver) = kver_elf(&mut f)? {
        debug!("{}: ELF kernel {}", path.display(), kver);
        return Ok(Some(kver));
    }
    kver_raw(&mut f)
}

#[cfg(test)]
pub(crate) fn bzimage_fake(kver_line: &[u8]) -> Vec<u8> {
    let mut img = vec![0u8; 0x400];
    img[BZIMAGE_MAGIC_OFF..BZIMAGE_MAGIC_OFF + 4].copy_from_slice(b"HdrS");
    // version string at 0x300
    img[BZIMAGE_KVER_PTR_OFF..BZIMAGE_KVER_PTR_OFF + 2]
        .copy_from_slice(&0x100u16.to_le_bytes());
    img[0x300..0x300 + kver_line.len()].copy_from_slice(kver_line);
    img
}
