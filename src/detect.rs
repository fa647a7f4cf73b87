// SPDX-License-Identifier: (GPL-2.0 OR GPL-3.0)
// Copyright (C) 2026 SUSE LLC
//! Image identification by leading magic bytes.
use std::fmt;
use std::fs;
use std::io::{self, BufRead, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::kver;

// longest magic we match on
const SNIFF_LEN: usize = 6;
// file which marks a prepended uncompressed archive
const EARLY_CPIO_MARKER: &[u8] = b"early_cpio";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionCodec {
    None,
    Xz,
    Lzop,
    Gzip,
    Lz4,
    Lz4Legacy,
    Bzip2,
    Zstd,
    Lzma,
}

impl CompressionCodec {
    pub fn name(&self) -> &'static str {
        match self {
            CompressionCodec::None => "none",
            CompressionCodec::Xz => "xz",
            CompressionCodec::Lzop => "lzop",
            CompressionCodec::Gzip => "gzip",
            CompressionCodec::Lz4 => "lz4",
            CompressionCodec::Lz4Legacy => "lz4 -l",
            CompressionCodec::Bzip2 => "bzip2",
            CompressionCodec::Zstd => "zstd",
            CompressionCodec::Lzma => "lzma",
        }
    }

    pub fn is_compressed(&self) -> bool {
        *self != CompressionCodec::None
    }
}

impl fmt::Display for CompressionCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("'{}' is a kernel image (version {version}), not an initramfs", path.display())]
    KernelImage { path: PathBuf, version: String },
    #[error("'{}': unknown image format", path.display())]
    Unrecognized { path: PathBuf },
    #[error("failed to read '{}': {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
}

/// A validated image path. Not modified once opened.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageHandle {
    pub path: PathBuf,
    // set when @path is a symlink
    pub target: Option<PathBuf>,
    pub size: u64,
}

impl ImageHandle {
    pub fn open(path: &Path) -> Result<ImageHandle> {
        let image_err = |source| Error::Image {
            path: path.to_path_buf(),
            source,
        };
        let lmd = fs::symlink_metadata(path).map_err(image_err)?;
        let target = match lmd.file_type().is_symlink() {
            true => Some(fs::canonicalize(path).map_err(image_err)?),
            false => None,
        };
        let md = fs::metadata(path).map_err(image_err)?;
        if !md.is_file() {
            return Err(image_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }

        Ok(ImageHandle {
            path: path.to_path_buf(),
            target,
            size: md.len(),
        })
    }

    // reader positioned at @off
    pub(crate) fn open_at(&self, off: u64) -> io::Result<fs::File> {
        let mut f = fs::File::open(&self.path)?;
        f.seek(SeekFrom::Start(off))?;
        Ok(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub codec: CompressionCodec,
    // start of the main archive, past any early cpio
    pub payload_off: u64,
}

impl Detection {
    pub fn early_cpio(&self) -> bool {
        self.payload_off > 0
    }
}

// lzma "alone" streams carry no magic. 0x5D is the properties byte for the
// default lc=3,lp=0,pb=2 encoder settings, so this may misfire on junk.
fn lzma_heuristic(prefix: &[u8]) -> bool {
    prefix.first() == Some(&0x5D)
}

/// Match leading bytes against known signatures. First match wins.
pub fn sniff(prefix: &[u8]) -> Option<CompressionCodec> {
    match prefix {
        [b'0', b'7', b'0', b'7', b'0', b'1', ..] => Some(CompressionCodec::None),
        [0xFD, b'7', b'z', b'X', b'Z', ..] => Some(CompressionCodec::Xz),
        [0x89, b'L', b'Z', b'O', ..] => Some(CompressionCodec::Lzop),
        [0x1F, 0x8B, ..] => Some(CompressionCodec::Gzip),
        // magic numbers 0x184D2204 and 0x184C2102 are stored little-endian,
        // the big-endian spelling is matched too.
        [0x04, 0x22, 0x4D, 0x18, ..] | [0x18, 0x4D, 0x22, 0x04, ..] => Some(CompressionCodec::Lz4),
        [0x02, 0x21, 0x4C, 0x18, ..] | [0x18, 0x4C, 0x21, 0x02, ..] => {
            Some(CompressionCodec::Lz4Legacy)
        }
        [b'B', b'Z', b'h', ..] => Some(CompressionCodec::Bzip2),
        [0x28, 0xB5, 0x2F, 0xFD, ..] => Some(CompressionCodec::Zstd),
        p if lzma_heuristic(p) => Some(CompressionCodec::Lzma),
        _ => None,
    }
}

fn prefix_read<R: Read>(rdr: &mut R) -> io::Result<Vec<u8>> {
    let mut prefix = Vec::with_capacity(SNIFF_LEN);
    rdr.take(SNIFF_LEN as u64).read_to_end(&mut prefix)?;
    Ok(prefix)
}

// Offset of the data following an uncompressed early cpio and its zero
// padding, if @f starts with one.
fn early_cpio_end(f: fs::File) -> io::Result<Option<u64>> {
    let mut walker = cpio::archive_walk(io::BufReader::new(f))?;
    let mut marker = false;
    for ent in walker.by_ref() {
        match ent {
            Ok(ent) if ent.name() == EARLY_CPIO_MARKER => marker = true,
            Ok(_) => {}
            Err(e) => {
                // left for the extractor to report
                debug!("early cpio walk failed: {}", e);
                return Ok(None);
            }
        }
    }
    if !marker || !walker.trailer_seen() {
        return Ok(None);
    }

    let mut off = walker.offset();
    let mut rdr = walker.into_inner();
    loop {
        let buf = rdr.fill_buf()?;
        if buf.is_empty() {
            return Ok(None);
        }
        match buf.iter().position(|b| *b != 0) {
            Some(pos) => return Ok(Some(off + pos as u64)),
            None => {
                let len = buf.len();
                off += len as u64;
                rdr.consume(len);
            }
        }
    }
}

/// Identify the archive format of @image, looking past an early cpio.
pub fn detect_image(image: &ImageHandle) -> std::result::Result<Detection, DetectError> {
    let read_err = |source| DetectError::Read {
        path: image.path.clone(),
        source,
    };
    let mut f = image.open_at(0).map_err(read_err)?;
    let prefix = prefix_read(&mut f).map_err(read_err)?;

    let det = match sniff(&prefix) {
        Some(CompressionCodec::None) => {
            let f = image.open_at(0).map_err(read_err)?;
            match early_cpio_end(f).map_err(read_err)? {
                Some(off) => {
                    let mut f = image.open_at(off).map_err(read_err)?;
                    let prefix = prefix_read(&mut f).map_err(read_err)?;
                    match sniff(&prefix) {
                        Some(codec) => {
                            debug!("early cpio ends at {}, main archive {}", off, codec);
                            Detection { codec, payload_off: off }
                        }
                        None => {
                            warn!("{}: unknown data after early cpio at {}", image.path.display(), off);
                            Detection { codec: CompressionCodec::None, payload_off: 0 }
                        }
                    }
                }
                None => Detection { codec: CompressionCodec::None, payload_off: 0 },
            }
        }
        Some(codec) => Detection { codec, payload_off: 0 },
        None => {
            return match kver::kernel_version(&image.path).map_err(read_err)? {
                Some(version) => Err(DetectError::KernelImage {
                    path: image.path.clone(),
                    version,
                }),
                None => Err(DetectError::Unrecognized {
                    path: image.path.clone(),
                }),
            };
        }
    };

    if det.codec == CompressionCodec::Lz4 {
        warn!(
            "{}: lz4 frame format detected, this image may not be bootable (the kernel expects legacy lz4)",
            image.path.display()
        );
    }
    Ok(det)
}
