// SPDX-License-Identifier: (GPL-2.0 OR GPL-3.0)
// Copyright (C) 2025-2026 SUSE LLC
//! Inspection of initramfs images: list, extract and analyze the
//! (possibly compressed) newc cpio archives the kernel unpacks at boot.
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

pub mod analyze;
pub mod buildconf;
pub mod decomp;
pub mod detect;
pub mod error;
pub mod extract;
pub mod kver;
pub mod report;
pub mod size;

pub use error::{Error, Result};

use detect::{Detection, ImageHandle};

/// Open @path and return a buffered stream of its decompressed main
/// archive.
pub fn image_payload(path: &Path) -> Result<(ImageHandle, Detection, impl BufRead)> {
    let image = ImageHandle::open(path)?;
    let det = detect::detect_image(&image)?;
    let rdr = decomp::decompress(&image, &det).map_err(|e| Error::extraction(path, e))?;
    Ok((image, det, io::BufReader::new(rdr)))
}

pub fn image_list<W: Write + ?Sized>(path: &Path, verbose: bool, out: &mut W) -> Result<()> {
    let (_, _, rdr) = image_payload(path)?;
    extract::list(rdr, verbose, out).map_err(|e| match e.kind() {
        // output closed early, e.g. piped to head
        io::ErrorKind::BrokenPipe => Error::Io(e),
        _ => Error::extraction(path, e),
    })
}

/// Unpack the image at @path into @dest, creating it if needed.
pub fn image_extract(path: &Path, dest: &Path) -> Result<u64> {
    let (_, _, rdr) = image_payload(path)?;
    fs::create_dir_all(dest)?;
    extract::unpack(rdr, dest).map_err(|e| Error::extraction(path, e))
}

/// Write the build config captured by the image builder to @out.
pub fn buildconfig_dump<W: Write + ?Sized>(path: &Path, out: &mut W) -> Result<()> {
    let (_, _, rdr) = image_payload(path)?;
    match extract::extract_member(rdr, buildconf::BUILDCONFIG_NAME, out) {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::BuildConfigNotFound),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Err(Error::Io(e)),
        Err(e) => Err(Error::extraction(path, e)),
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::path::Path;

    use cpio::{ArchiveMd, ArchiveState, S_IFDIR, S_IFLNK, S_IFREG};

    pub enum Ent<'a> {
        Dir,
        File(&'a [u8]),
        Symlink(&'a str),
        // device node or fifo of the given type
        Node(u32),
        // regular file with ino and nlink
        Hardlink(u32, u32, &'a [u8]),
    }

    // newc archive with trailer and no block padding
    pub fn newc_build(ents: &[(&str, Ent)]) -> Vec<u8> {
        let mut buf = vec![];
        let mut state = ArchiveState::new(1);
        for (name, ent) in ents {
            let path = Path::new(name);
            match ent {
                Ent::Dir => {
                    let md = ArchiveMd::with_mode(S_IFDIR, 0o755);
                    cpio::archive_path(&mut state, path, &md, &mut buf).unwrap();
                }
                Ent::File(data) => {
                    let md = ArchiveMd {
                        len: data.len() as u32,
                        ..ArchiveMd::with_mode(S_IFREG, 0o755)
                    };
                    cpio::archive_file(&mut state, path, &md, *data, &mut buf).unwrap();
                }
                Ent::Symlink(tgt) => {
                    let md = ArchiveMd::with_mode(S_IFLNK, 0o777);
                    cpio::archive_symlink(&mut state, path, &md, Path::new(tgt), &mut buf)
                        .unwrap();
                }
                Ent::Hardlink(ino, nlink, data) => {
                    let md = ArchiveMd {
                        nlink: *nlink,
                        len: data.len() as u32,
                        ..ArchiveMd::with_mode(S_IFREG, 0o755)
                    };
                    cpio::archive_hardlink(&mut state, path, &md, *ino, *data, &mut buf).unwrap();
                }
                Ent::Node(ftype) => {
                    let md = ArchiveMd::with_mode(*ftype, 0o600);
                    cpio::archive_path(&mut state, path, &md, &mut buf).unwrap();
                }
            }
        }
        cpio::archive_trailer(&mut state, &mut buf).unwrap();
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testutil::{newc_build, Ent};

    #[test]
    fn test_buildconfig_dump() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("initramfs.img");
        fs::write(
            &p,
            newc_build(&[
                ("init", Ent::File(b"#!/bin/sh\n")),
                ("buildconfig", Ent::File(b"HOOKS=(base udev)\n")),
            ]),
        )
        .unwrap();
        let mut out = vec![];
        buildconfig_dump(&p, &mut out).unwrap();
        assert_eq!(out, b"HOOKS=(base udev)\n");

        fs::write(&p, newc_build(&[("init", Ent::File(b"#!/bin/sh\n"))])).unwrap();
        assert!(matches!(
            buildconfig_dump(&p, &mut out),
            Err(Error::BuildConfigNotFound)
        ));
    }

    #[test]
    fn test_image_extract() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("initramfs.img");
        fs::write(
            &p,
            newc_build(&[
                ("usr/bin", Ent::Dir),
                ("usr/bin/busybox", Ent::File(b"ELF")),
                ("bin", Ent::Symlink("usr/bin")),
            ]),
        )
        .unwrap();
        let dest = td.path().join("out/nested");
        assert_eq!(image_extract(&p, &dest).unwrap(), 3);
        assert_eq!(fs::read(dest.join("bin/busybox")).unwrap(), b"ELF");
    }

    #[test]
    fn test_image_list() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("initramfs.img");
        fs::write(&p, b"garbage").unwrap();
        let mut out = vec![];
        assert!(matches!(
            image_list(&p, false, &mut out),
            Err(Error::Detect(_))
        ));

        fs::write(&p, newc_build(&[("a", Ent::Dir), ("a/b", Ent::File(b""))])).unwrap();
        image_list(&p, false, &mut out).unwrap();
        assert_eq!(out, b"a\na/b\n");
    }
}
