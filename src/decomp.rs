// SPDX-License-Identifier: (GPL-2.0 OR GPL-3.0)
// Copyright (C) 2026 SUSE LLC
use std::fs;
use std::io::{self, BufRead, Read};
use std::process::{Child, ChildStdout, Command, Stdio};

use flate2::bufread::GzDecoder;
use tracing::debug;

use crate::detect::{CompressionCodec, Detection, ImageHandle};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Recipe {
    // payload is already a cpio stream
    Passthrough,
    // decoded in-process
    Inflate,
    // external program reading the payload on stdin
    Command(&'static str, &'static [&'static str]),
}

pub fn recipe(codec: CompressionCodec) -> Recipe {
    match codec {
        CompressionCodec::None => Recipe::Passthrough,
        CompressionCodec::Gzip => Recipe::Inflate,
        CompressionCodec::Xz => Recipe::Command("xz", &["-dc"]),
        CompressionCodec::Lzop => Recipe::Command("lzop", &["-dc"]),
        // the lz4 tool accepts frame and legacy streams alike
        CompressionCodec::Lz4 | CompressionCodec::Lz4Legacy => Recipe::Command("lz4", &["-dc"]),
        CompressionCodec::Bzip2 => Recipe::Command("bzip2", &["-dc"]),
        CompressionCodec::Zstd => Recipe::Command("zstd", &["-dcq"]),
        CompressionCodec::Lzma => Recipe::Command("xz", &["--format=lzma", "-dc"]),
    }
}

/// Decompressor child output. The exit status is checked once stdout hits
/// EOF, so a failing decompressor surfaces as a read error.
pub struct ChildStream {
    prog: &'static str,
    child: Child,
    stdout: ChildStdout,
    reaped: bool,
}

impl ChildStream {
    fn spawn(prog: &'static str, args: &[&str], input: fs::File) -> io::Result<ChildStream> {
        debug!("spawning {} {:?}", prog, args);
        let mut child = Command::new(prog)
            .args(args)
            .stdin(Stdio::from(input))
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    io::Error::new(io::ErrorKind::NotFound, format!("{} not found", prog))
                }
                _ => e,
            })?;
        let stdout = match child.stdout.take() {
            Some(s) => s,
            None => return Err(io::Error::other("missing decompressor stdout")),
        };
        Ok(ChildStream {
            prog,
            child,
            stdout,
            reaped: false,
        })
    }
}

impl Read for ChildStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.stdout.read(buf)?;
        if n == 0 && !buf.is_empty() && !self.reaped {
            self.reaped = true;
            let status = self.child.wait()?;
            if !status.success() {
                return Err(io::Error::other(format!("{} failed: {}", self.prog, status)));
            }
        }
        Ok(n)
    }
}

impl Drop for ChildStream {
    fn drop(&mut self) {
        if !self.reaped {
            // reader gave up early
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Concatenated gzip members. Zero padding between or after members is
/// skipped, as the kernel does when unpacking.
pub struct GzMembers<R: BufRead> {
    dec: Option<GzDecoder<R>>,
}

impl<R: BufRead> GzMembers<R> {
    pub fn new(rdr: R) -> GzMembers<R> {
        GzMembers {
            dec: Some(GzDecoder::new(rdr)),
        }
    }
}

// consume zeros. false if EOF follows them.
fn zeros_skip<R: BufRead>(rdr: &mut R) -> io::Result<bool> {
    loop {
        let buf = rdr.fill_buf()?;
        if buf.is_empty() {
            return Ok(false);
        }
        let zeros = buf.iter().take_while(|&&b| b == 0).count();
        let more = zeros < buf.len();
        rdr.consume(zeros);
        if more {
            return Ok(true);
        }
    }
}

impl<R: BufRead> Read for GzMembers<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if let Some(dec) = self.dec.as_mut() {
                let n = dec.read(buf)?;
                if n > 0 || buf.is_empty() {
                    return Ok(n);
                }
            }
            // member finished
            let mut rdr = match self.dec.take() {
                Some(dec) => dec.into_inner(),
                None => return Ok(0),
            };
            if !zeros_skip(&mut rdr)? {
                return Ok(0);
            }
            self.dec = Some(GzDecoder::new(rdr));
        }
    }
}

/// Open a stream of the decompressed main archive of @image.
pub fn decompress(image: &ImageHandle, det: &Detection) -> io::Result<Box<dyn Read>> {
    // the file offset is shared with a child's stdin
    let f = image.open_at(det.payload_off)?;
    let rdr: Box<dyn Read> = match recipe(det.codec) {
        Recipe::Passthrough => Box::new(f),
        Recipe::Inflate => Box::new(GzMembers::new(io::BufReader::new(f))),
        Recipe::Command(prog, args) => Box::new(ChildStream::spawn(prog, args, f)?),
    };
    Ok(rdr)
}
