// SPDX-License-Identifier: (GPL-2.0 OR GPL-3.0)
// Copyright (C) 2026 SUSE LLC
//! Unpack, list and member extraction for decompressed newc streams.
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::io::{self, BufRead, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use cpio::{ArchiveEnt, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFMT, S_IFREG, S_IFSOCK};
use tracing::{debug, warn};

// relative path for an archive name. None for the root or escaping names.
fn name_sanitize(name: &[u8]) -> Option<PathBuf> {
    let mut rel = PathBuf::new();
    for c in Path::new(OsStr::from_bytes(name)).components() {
        match c {
            Component::Normal(n) => rel.push(n),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    match rel.as_os_str().is_empty() {
        true => None,
        false => Some(rel),
    }
}

// Check that the existing part of @path resolves below @root, so that
// symlinks unpacked earlier can't redirect writes elsewhere.
fn path_contained(root: &Path, path: &Path) -> io::Result<bool> {
    let mut anc = path;
    while fs::symlink_metadata(anc).is_err() {
        anc = match anc.parent() {
            Some(p) => p,
            None => return Ok(false),
        };
    }
    Ok(fs::canonicalize(anc)?.starts_with(root))
}

// replace anything other than a directory at @path
fn path_clear(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(md) if !md.is_dir() => fs::remove_file(path),
        _ => Ok(()),
    }
}

// Earlier names of hardlinked files, by ino. newc writers put the data on
// the last name only and leave the others empty.
#[derive(Default)]
struct PendingLinks {
    names: HashMap<u32, Vec<PathBuf>>,
}

impl PendingLinks {
    fn push(&mut self, ino: u32, dest: &Path) {
        self.names.entry(ino).or_default().push(dest.to_path_buf());
    }

    // point the empty earlier names of @ino at @dest
    fn resolve(&mut self, ino: u32, dest: &Path, root: &Path) -> io::Result<()> {
        for name in self.names.remove(&ino).unwrap_or_default() {
            if !path_contained(root, name.parent().unwrap_or(root))? {
                warn!("skipping link outside of destination: {}", name.display());
                continue;
            }
            path_clear(&name)?;
            if let Err(e) = fs::hard_link(dest, &name) {
                warn!("failed to link {}: {}", name.display(), e);
            }
        }
        Ok(())
    }
}

fn ent_unpack<R: BufRead>(
    walker: &mut cpio::ArchiveWalker<R>,
    ent: &ArchiveEnt,
    root: &Path,
    links: &mut PendingLinks,
) -> io::Result<()> {
    let name = ent.name();
    let rel = match name_sanitize(name) {
        Some(r) => r,
        None if name == b"." || name == b"/" || name == b"./" => return Ok(()),
        None => {
            warn!("skipping unsafe entry {}", String::from_utf8_lossy(name));
            return Ok(());
        }
    };
    let dest = root.join(&rel);
    if !path_contained(root, dest.parent().unwrap_or(root))? {
        warn!("skipping entry outside of destination: {}", rel.display());
        return Ok(());
    }
    if let Some(p) = dest.parent() {
        fs::create_dir_all(p)?;
    }
    let perm = ent.md.mode & 0o777;

    match ent.md.mode & S_IFMT {
        S_IFDIR => {
            path_clear(&dest)?;
            fs::create_dir_all(&dest)?;
            // keep it writable for later entries and cleanup
            fs::set_permissions(&dest, fs::Permissions::from_mode(perm | 0o700))?;
        }
        S_IFREG => {
            path_clear(&dest)?;
            let mut f = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&dest)?;
            walker.copy_data(&mut f)?;
            f.set_permissions(fs::Permissions::from_mode(perm))?;
            if ent.md.nlink > 1 {
                match ent.md.len {
                    0 => links.push(ent.ino, &dest),
                    _ => links.resolve(ent.ino, &dest, root)?,
                }
            }
        }
        S_IFLNK => {
            path_clear(&dest)?;
            let tgt = walker.read_data()?;
            std::os::unix::fs::symlink(OsStr::from_bytes(&tgt), &dest)?;
        }
        // nodes need privileges and carry nothing worth inspecting
        _ => debug!("skipping special file {}", rel.display()),
    }
    Ok(())
}

/// Unpack every entry of @rdr below @root, returning the entry count.
/// Names are confined to @root: leading `/` and `./` are stripped and
/// entries with `..` components are skipped. Device nodes, FIFOs and
/// sockets aren't created. Hardlinked files are linked to the name which
/// carries their data.
pub fn unpack<R: BufRead>(rdr: R, root: &Path) -> io::Result<u64> {
    let root = fs::canonicalize(root)?;
    let mut walker = cpio::archive_walk(rdr)?;
    let mut links = PendingLinks::default();
    let mut count = 0;
    while let Some(ent) = walker.next() {
        let ent = ent?;
        ent_unpack(&mut walker, &ent, &root, &mut links)?;
        count += 1;
    }
    if count == 0 && !walker.trailer_seen() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "empty archive"));
    }
    debug!("unpacked {} entries to {}", count, root.display());
    Ok(count)
}

// ls -l style type and permission bits
fn mode_string(mode: u32) -> String {
    let ftype = match mode & S_IFMT {
        S_IFDIR => 'd',
        S_IFLNK => 'l',
        S_IFCHR => 'c',
        S_IFBLK => 'b',
        S_IFIFO => 'p',
        S_IFSOCK => 's',
        S_IFREG => '-',
        _ => '?',
    };
    let mut s = String::with_capacity(10);
    s.push(ftype);
    for (i, c) in "rwxrwxrwx".chars().enumerate() {
        s.push(if mode & (0o400 >> i) != 0 { c } else { '-' });
    }
    s
}

/// Write entry names of @rdr to @out, one per line. @verbose adds mode,
/// ownership, size and symlink targets.
pub fn list<R: BufRead, W: Write + ?Sized>(rdr: R, verbose: bool, out: &mut W) -> io::Result<()> {
    let mut walker = cpio::archive_walk(rdr)?;
    while let Some(ent) = walker.next() {
        let ent = ent?;
        let name = String::from_utf8_lossy(ent.name());
        if !verbose {
            writeln!(out, "{}", name)?;
            continue;
        }
        write!(
            out,
            "{} {:>5} {:>5} {:>9} {}",
            mode_string(ent.md.mode),
            ent.md.uid,
            ent.md.gid,
            ent.md.len,
            name
        )?;
        if ent.md.mode & S_IFMT == S_IFLNK {
            let tgt = walker.read_data()?;
            write!(out, " -> {}", String::from_utf8_lossy(&tgt))?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Copy the data of member @name to @out. Returns false if @rdr carries no
/// such regular file.
pub fn extract_member<R: BufRead, W: Write + ?Sized>(
    rdr: R,
    name: &str,
    out: &mut W,
) -> io::Result<bool> {
    let want = name_sanitize(name.as_bytes());
    let mut walker = cpio::archive_walk(rdr)?;
    while let Some(ent) = walker.next() {
        let ent = ent?;
        if ent.md.mode & S_IFMT != S_IFREG || name_sanitize(ent.name()) != want {
            continue;
        }
        walker.copy_data(out)?;
        return Ok(true);
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{newc_build, Ent};
    use std::os::unix::fs::MetadataExt;

    #[test]
    fn test_name_sanitize() {
        assert_eq!(name_sanitize(b"usr/bin/sh"), Some(PathBuf::from("usr/bin/sh")));
        assert_eq!(name_sanitize(b"/usr/bin"), Some(PathBuf::from("usr/bin")));
        assert_eq!(name_sanitize(b"./init"), Some(PathBuf::from("init")));
        assert_eq!(name_sanitize(b"a//b/./c"), Some(PathBuf::from("a/b/c")));
        assert_eq!(name_sanitize(b"."), None);
        assert_eq!(name_sanitize(b"../etc/passwd"), None);
        assert_eq!(name_sanitize(b"usr/../../x"), None);
    }

    #[test]
    fn test_mode_string() {
        assert_eq!(mode_string(S_IFDIR | 0o755), "drwxr-xr-x");
        assert_eq!(mode_string(S_IFREG | 0o644), "-rw-r--r--");
        assert_eq!(mode_string(S_IFLNK | 0o777), "lrwxrwxrwx");
        assert_eq!(mode_string(S_IFCHR | 0o600), "crw-------");
    }

    fn sample() -> Vec<u8> {
        newc_build(&[
            (".", Ent::Dir),
            ("usr", Ent::Dir),
            ("usr/bin", Ent::Dir),
            ("usr/bin/busybox", Ent::File(b"ELF")),
            ("usr/bin/sh", Ent::Symlink("busybox")),
            ("dev/console", Ent::Node(S_IFCHR)),
            ("/init", Ent::File(b"#!/bin/sh\nexec sh\n")),
            ("etc/empty", Ent::File(b"")),
        ])
    }

    #[test]
    fn test_unpack() {
        let td = tempfile::tempdir().unwrap();
        let n = unpack(io::Cursor::new(sample()), td.path()).unwrap();
        assert_eq!(n, 8);

        let root = td.path();
        assert_eq!(fs::read(root.join("usr/bin/busybox")).unwrap(), b"ELF");
        assert_eq!(fs::read_link(root.join("usr/bin/sh")).unwrap(), PathBuf::from("busybox"));
        assert_eq!(fs::read(root.join("init")).unwrap(), b"#!/bin/sh\nexec sh\n");
        assert_eq!(fs::read(root.join("etc/empty")).unwrap(), b"");
        let md = fs::metadata(root.join("init")).unwrap();
        assert_eq!(md.permissions().mode() & 0o777, 0o755);
        // parent created, node skipped
        assert!(root.join("dev").is_dir());
        assert!(fs::symlink_metadata(root.join("dev/console")).is_err());
    }

    #[test]
    fn test_unpack_escape() {
        let td = tempfile::tempdir().unwrap();
        let root = td.path().join("root");
        let outside = td.path().join("outside");
        fs::create_dir(&root).unwrap();
        fs::create_dir(&outside).unwrap();

        let img = newc_build(&[
            ("../evil", Ent::File(b"x")),
            ("lnk", Ent::Symlink(outside.to_str().unwrap())),
            ("lnk/evil", Ent::File(b"x")),
            ("ok", Ent::File(b"y")),
        ]);
        assert_eq!(unpack(io::Cursor::new(img), &root).unwrap(), 4);
        assert!(fs::symlink_metadata(td.path().join("evil")).is_err());
        assert!(fs::symlink_metadata(outside.join("evil")).is_err());
        assert_eq!(fs::read(root.join("ok")).unwrap(), b"y");
    }

    #[test]
    fn test_unpack_replace_symlink() {
        // a later file entry replaces the link rather than writing through it
        let td = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let victim = outside.path().join("victim");
        fs::write(&victim, b"orig").unwrap();

        let img = newc_build(&[
            ("f", Ent::Symlink(victim.to_str().unwrap())),
            ("f", Ent::File(b"new")),
        ]);
        unpack(io::Cursor::new(img), td.path()).unwrap();
        assert_eq!(fs::read(&victim).unwrap(), b"orig");
        assert_eq!(fs::read(td.path().join("f")).unwrap(), b"new");
    }

    #[test]
    fn test_unpack_hardlinks() {
        let td = tempfile::tempdir().unwrap();
        let img = newc_build(&[
            ("usr/bin/a", Ent::Hardlink(5, 3, b"")),
            ("usr/sbin/c", Ent::Hardlink(5, 3, b"")),
            ("usr/bin/other", Ent::File(b"x")),
            ("usr/bin/b", Ent::Hardlink(5, 3, b"payload")),
            // data never arrives
            ("usr/bin/lone", Ent::Hardlink(9, 2, b"")),
        ]);
        unpack(io::Cursor::new(img), td.path()).unwrap();

        let root = td.path();
        for name in ["usr/bin/a", "usr/sbin/c", "usr/bin/b"] {
            assert_eq!(fs::read(root.join(name)).unwrap(), b"payload", "{name}");
        }
        let ino = |n: &str| fs::metadata(root.join(n)).unwrap().ino();
        assert_eq!(ino("usr/bin/a"), ino("usr/bin/b"));
        assert_eq!(ino("usr/sbin/c"), ino("usr/bin/b"));
        assert_ne!(ino("usr/bin/other"), ino("usr/bin/b"));
        assert_eq!(fs::read(root.join("usr/bin/lone")).unwrap(), b"");
    }

    #[test]
    fn test_unpack_bad() {
        let td = tempfile::tempdir().unwrap();
        let e = unpack(io::Cursor::new(vec![]), td.path()).unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::InvalidData);
        let e = unpack(io::Cursor::new(vec![b'x'; 200]), td.path()).unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::InvalidInput);

        let mut img = sample();
        img.truncate(300);
        assert!(unpack(io::Cursor::new(img), td.path()).is_err());
    }

    #[test]
    fn test_list() {
        let mut out = vec![];
        list(io::Cursor::new(sample()), false, &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        let names: Vec<&str> = out.lines().collect();
        assert_eq!(
            names,
            [".", "usr", "usr/bin", "usr/bin/busybox", "usr/bin/sh", "dev/console", "init", "etc/empty"]
        );

        let mut out = vec![];
        list(io::Cursor::new(sample()), true, &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("lrwxrwxrwx     0     0         7 usr/bin/sh -> busybox\n"));
        assert!(out.contains("-rwxr-xr-x     0     0        18 init\n"));
    }

    #[test]
    fn test_extract_member() {
        let mut out = vec![];
        assert!(extract_member(io::Cursor::new(sample()), "init", &mut out).unwrap());
        assert_eq!(out, b"#!/bin/sh\nexec sh\n");

        let mut out = vec![];
        assert!(extract_member(io::Cursor::new(sample()), "./usr/bin/busybox", &mut out).unwrap());
        assert_eq!(out, b"ELF");

        // symlinks and dirs aren't members
        let mut out = vec![];
        assert!(!extract_member(io::Cursor::new(sample()), "usr/bin/sh", &mut out).unwrap());
        assert!(!extract_member(io::Cursor::new(sample()), "usr", &mut out).unwrap());
        assert!(!extract_member(io::Cursor::new(sample()), "buildconfig", &mut out).unwrap());
        assert!(out.is_empty());
    }
}
