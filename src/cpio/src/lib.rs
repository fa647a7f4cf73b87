// SPDX-License-Identifier: (GPL-2.0 OR GPL-3.0)
// Copyright (C) 2021-2026 SUSE S.A.

use std::convert::TryFrom;
use std::convert::TryInto;
use std::io;
use std::io::prelude::*;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

macro_rules! NEWC_HDR_FMT {
    () => {
        concat!(
            "{magic}{ino:08X}{mode:08X}{uid:08X}{gid:08X}{nlink:08X}",
            "{mtime:08X}{filesize:08X}{major:08X}{minor:08X}{rmajor:08X}",
            "{rminor:08X}{namesize:08X}{chksum:08X}"
        )
    };
}

pub const NEWC_HDR_LEN: u64 = 110;
pub const NEWC_MAGIC: &[u8; 6] = b"070701";
pub const PATH_MAX: u64 = 4096;
pub const TRAILER_NAME: &[u8] = b"TRAILER!!!";

// format: octal posix mode bits
pub const S_IFIFO: u32 = 0o010000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFMT: u32 = 0o170000;

pub struct ArchiveState {
    // offset from the start of this archive
    off: u64,
    // next mapped inode number. Inode numbers all share the same dev
    // (major=0 minor=0) namespace.
    ino: u32,
}

impl ArchiveState {
    pub fn new(initial_ino: u32) -> ArchiveState {
        ArchiveState {
            off: 0,
            ino: initial_ino,
        }
    }

    pub fn offset(&self) -> u64 {
        self.off
    }

    fn next_ino(&mut self) -> u32 {
        let i = self.ino;
        self.ino += 1;
        i
    }
}

// nlink, mode, ownership, mtime and rdev as carried in a newc header
#[derive(PartialEq, Debug, Clone)]
pub struct ArchiveMd {
    pub nlink: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: u32,
    pub rmajor: u32,
    pub rminor: u32,
    pub len: u32,
}

impl ArchiveMd {
    // root owned entry of type @ftype with permission bits @perm
    pub fn with_mode(ftype: u32, perm: u32) -> ArchiveMd {
        ArchiveMd {
            nlink: if ftype == S_IFDIR { 2 } else { 1 },
            mode: ftype | (perm & !S_IFMT),
            uid: 0,
            gid: 0,
            mtime: 0,
            rmajor: 0,
            rminor: 0,
            len: 0,
        }
    }

    pub fn file_type(&self) -> u32 {
        self.mode & S_IFMT
    }
}

fn path_trim_prefixes(path: &Path) -> io::Result<&[u8]> {
    let outpath = match path.strip_prefix("/") {
        Ok(p) => {
            if p.as_os_str().as_bytes().len() == 0 {
                path // retain '/'
            } else {
                p
            }
        }
        Err(_) => path,
    };

    let fname = match outpath.strip_prefix("./") {
        Ok(p) => {
            let out = p.as_os_str().as_bytes();
            if out.len() == 0 {
                outpath.as_os_str().as_bytes() // retain './' and '.' paths
            } else {
                out
            }
        }
        Err(_) => outpath.as_os_str().as_bytes(),
    };

    if fname.len() + 1 >= PATH_MAX.try_into().unwrap() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "path too long"));
    }

    Ok(fname)
}

// write header, name, nul-term and name padding. Data is left to the caller.
fn archive_hdr<W: Write>(
    state: &mut ArchiveState,
    fname: &[u8],
    md: &ArchiveMd,
    ino: u32,
    filesize: u32,
    mut writer: W,
) -> io::Result<()> {
    write!(
        writer,
        NEWC_HDR_FMT!(),
        magic = "070701",
        ino = ino,
        mode = md.mode,
        uid = md.uid,
        gid = md.gid,
        nlink = md.nlink,
        mtime = md.mtime,
        filesize = filesize,
        major = 0,
        minor = 0,
        rmajor = md.rmajor,
        rminor = md.rminor,
        namesize = fname.len() + 1,
        chksum = 0
    )?;
    state.off += NEWC_HDR_LEN;

    writer.write_all(fname)?;
    state.off += fname.len() as u64;

    // +1 as padding starts after fname nulterm
    let seek_len = 1 + archive_padlen(state.off + 1, 4);
    writer.write_all(&[0u8; 4][..seek_len as usize])?;
    state.off += seek_len;

    Ok(())
}

fn archive_data_pad<W: Write>(state: &mut ArchiveState, mut writer: W) -> io::Result<()> {
    let dpad_len: usize = archive_padlen(state.off, 4).try_into().unwrap();
    write!(writer, "{pad:.padlen$}", padlen = dpad_len, pad = "\0\0\0")?;
    state.off += dpad_len as u64;
    Ok(())
}

// archive a dataless entry: directory, device node, fifo or empty file
pub fn archive_path<W: Write>(
    state: &mut ArchiveState,
    path: &Path,
    md: &ArchiveMd,
    mut writer: W,
) -> io::Result<()> {
    let fname = path_trim_prefixes(path)?;

    if (md.file_type() == S_IFREG && md.len > 0) || md.file_type() == S_IFLNK {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "archive_path does not support data files or symlinks",
        ));
    }

    let ino = state.next_ino();
    archive_hdr(state, fname, md, ino, 0, &mut writer)
}

pub fn archive_symlink<W: Write>(
    state: &mut ArchiveState,
    path: &Path,
    md: &ArchiveMd,
    symlink_tgt: &Path,
    mut writer: W,
) -> io::Result<()> {
    let fname = path_trim_prefixes(path)?;
    let tgt_bytes = symlink_tgt.as_os_str().as_bytes();
    // no zero terminator for symlink target path
    let datalen = match u32::try_from(tgt_bytes.len()) {
        Ok(d) if u64::from(d) < PATH_MAX => d,
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "symlink path too long",
            ))
        }
    };

    if md.file_type() != S_IFLNK {
        return Err(io::Error::from(io::ErrorKind::InvalidInput));
    }

    let ino = state.next_ino();
    archive_hdr(state, fname, md, ino, datalen, &mut writer)?;

    writer.write_all(tgt_bytes)?;
    state.off += u64::from(datalen);
    archive_data_pad(state, &mut writer)
}

pub fn archive_file<R: Read, W: Write>(
    state: &mut ArchiveState,
    path: &Path,
    md: &ArchiveMd,
    reader: R,
    writer: W,
) -> io::Result<()> {
    let ino = state.next_ino();
    archive_file_ino(state, path, md, ino, reader, writer)
}

// Archive one name of a hardlinked file. All names share @ino and carry
// md.nlink; readers expect the data on the last name only, with len 0 on
// the others.
pub fn archive_hardlink<R: Read, W: Write>(
    state: &mut ArchiveState,
    path: &Path,
    md: &ArchiveMd,
    ino: u32,
    reader: R,
    writer: W,
) -> io::Result<()> {
    if md.nlink < 2 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "nlink < 2"));
    }
    archive_file_ino(state, path, md, ino, reader, writer)
}

fn archive_file_ino<R: Read, W: Write>(
    state: &mut ArchiveState,
    path: &Path,
    md: &ArchiveMd,
    ino: u32,
    mut reader: R,
    mut writer: W,
) -> io::Result<()> {
    let fname = path_trim_prefixes(path)?;

    if md.file_type() != S_IFREG {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a file"));
    }

    archive_hdr(state, fname, md, ino, md.len, &mut writer)?;

    if md.len > 0 {
        let copied = io::copy(&mut reader.by_ref().take(u64::from(md.len)), &mut writer)?;
        if copied != u64::from(md.len) {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "copy returned unexpected length",
            ));
        }
        state.off += copied;
        archive_data_pad(state, &mut writer)?;
    }

    Ok(())
}

pub fn archive_padlen(off: u64, alignment: u64) -> u64 {
    (alignment - (off & (alignment - 1))) % alignment
}

pub fn archive_trailer<W: Write>(state: &mut ArchiveState, mut writer: W) -> io::Result<u64> {
    let md = ArchiveMd {
        nlink: 1,
        mode: 0,
        uid: 0,
        gid: 0,
        mtime: 0,
        rmajor: 0,
        rminor: 0,
        len: 0,
    };
    archive_hdr(state, TRAILER_NAME, &md, 0, 0, &mut writer)?;

    Ok(state.off)
}

#[derive(PartialEq, Debug)]
pub struct ArchiveEnt {
    // hardlinked names share an ino
    pub ino: u32,
    pub md: ArchiveMd,
    // namesize includes the nul-term
    pub namesize: u32,
    pub name: [u8; (PATH_MAX + 1) as usize],
}

impl ArchiveEnt {
    // name without the nul-term. 0 < namesize < PATH_MAX+1 checked on read.
    pub fn name(&self) -> &[u8] {
        &self.name[0..(self.namesize as usize) - 1]
    }
}

// Walks newc entries of a sequential stream. No Seek is needed, so the
// reader may be a decompressor pipe. Data segments not consumed via
// copy_data() are discarded on the following next().
pub struct ArchiveWalker<R: BufRead> {
    reader: R,
    // bytes consumed from the start of the archive
    off: u64,
    // unread data segment and padding of the last returned entry
    data_left: u64,
    data_pad: u64,
    trailer_seen: bool,
    done: bool,
}

pub fn archive_walk<R: BufRead>(reader: R) -> io::Result<ArchiveWalker<R>> {
    // kernel extraction skips zeros until header. we don't.
    Ok(ArchiveWalker {
        reader,
        off: 0,
        data_left: 0,
        data_pad: 0,
        trailer_seen: false,
        done: false,
    })
}

// returns md, ino and namesize
fn archive_read_newc_md(hdr_md: &[u8]) -> io::Result<(ArchiveMd, u32, u32)> {
    // 8 hex chars per field.
    let mut md_iter = hdr_md.chunks_exact(8).map(|f| {
        if let Ok(s) = str::from_utf8(f) {
            if let Ok(u) = u32::from_str_radix(s, 16) {
                return Ok(u);
            }
        }
        Err(io::Error::new(io::ErrorKind::InvalidData, "invalid hdr field"))
    });

    // unwrap here because successfully read NEWC_HDR_LEN bytes
    let ino = md_iter.next().unwrap()?;
    let md = ArchiveMd {
        mode: md_iter.next().unwrap()?,
        uid: md_iter.next().unwrap()?,
        gid: md_iter.next().unwrap()?,
        nlink: md_iter.next().unwrap()?,
        mtime: md_iter.next().unwrap()?,
        len: md_iter.next().unwrap()?,
        // skip major/minor
        rmajor: md_iter.nth(2).unwrap()?,
        rminor: md_iter.next().unwrap()?,
    };
    let namesize = md_iter.next().unwrap()?;
    if namesize == 0 || namesize > (PATH_MAX + 1) as u32 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidFilename,
            "invalid namesize",
        ));
    }

    Ok((md, ino, namesize))
}

impl<R: BufRead> ArchiveWalker<R> {
    // bytes consumed so far. After the trailer this is the archive length,
    // excluding any block padding which follows.
    pub fn offset(&self) -> u64 {
        self.off
    }

    pub fn trailer_seen(&self) -> bool {
        self.trailer_seen
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    fn skip(&mut self, len: u64) -> io::Result<()> {
        let skipped = io::copy(&mut self.reader.by_ref().take(len), &mut io::sink())?;
        self.off += skipped;
        if skipped != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive truncated",
            ));
        }
        Ok(())
    }

    // copy the data segment of the entry last returned by next()
    pub fn copy_data<W: Write + ?Sized>(&mut self, writer: &mut W) -> io::Result<u64> {
        let len = self.data_left;
        let copied = io::copy(&mut self.reader.by_ref().take(len), writer)?;
        self.off += copied;
        self.data_left = 0;
        if copied != len {
            self.done = true;
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "data segment truncated",
            ));
        }
        Ok(copied)
    }

    pub fn read_data(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.data_left as usize);
        self.copy_data(&mut buf)?;
        Ok(buf)
    }

    fn next_ent(&mut self) -> io::Result<Option<ArchiveEnt>> {
        self.skip(self.data_left + self.data_pad)?;
        self.data_left = 0;
        self.data_pad = 0;

        let mut hdr_buf = [0u8; NEWC_HDR_LEN as usize];
        // EOF at a hdr boundary ends the walk, mid-hdr is truncation
        let mut got = 0;
        while got < hdr_buf.len() {
            match self.reader.read(&mut hdr_buf[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        match got {
            0 => return Ok(None),
            n if n < hdr_buf.len() => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "hdr truncated",
                ))
            }
            _ => {}
        }
        self.off += NEWC_HDR_LEN;

        // we only support newc
        let (magic, hdr_md) = hdr_buf.split_at(NEWC_MAGIC.len());
        if magic != NEWC_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid newc hdr",
            ));
        }
        let (md, ino, namesize) = archive_read_newc_md(hdr_md)?;
        let mut buf = [0u8; (PATH_MAX + 1) as usize];
        self.reader.read_exact(&mut buf[0..namesize as usize])?;
        self.off += u64::from(namesize);
        self.skip(archive_padlen(self.off, 4))?;

        if &buf[0..(namesize as usize) - 1] == TRAILER_NAME {
            // cpio trailer treated the same as EOF
            self.trailer_seen = true;
            return Ok(None);
        }

        self.data_left = u64::from(md.len);
        self.data_pad = archive_padlen(u64::from(md.len), 4);
        Ok(Some(ArchiveEnt {
            ino,
            md,
            namesize,
            name: buf,
        }))
    }
}

impl<R: BufRead> Iterator for ArchiveWalker<R> {
    type Item = io::Result<ArchiveEnt>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_ent() {
            Ok(Some(ent)) => Some(Ok(ent)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
