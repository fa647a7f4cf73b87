// SPDX-License-Identifier: (GPL-2.0 OR GPL-3.0)
// Copyright (C) 2026 SUSE LLC
//! Full image analysis: detect, unpack to a scratch directory, scan.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::buildconf::{self, BuildConfig, HookGroups, BINARIES_DIR, HOOKS_DIR, MODULES_DIR};
use crate::decomp;
use crate::detect::{self, CompressionCodec, ImageHandle};
use crate::error::{Error, Result};
use crate::extract;

const SCRATCH_PREFIX: &str = "lsinitcpio.";

/// Scratch directories which must go away if the process is interrupted.
/// Clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct CleanupRegistry {
    dirs: Arc<Mutex<Vec<PathBuf>>>,
}

impl CleanupRegistry {
    pub fn new() -> CleanupRegistry {
        CleanupRegistry::default()
    }

    fn dirs(&self) -> std::sync::MutexGuard<'_, Vec<PathBuf>> {
        // a panicking holder can't leave the list inconsistent
        self.dirs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn unregister(&self, dir: &Path) {
        self.dirs().retain(|d| d != dir);
    }

    pub fn is_empty(&self) -> bool {
        self.dirs().is_empty()
    }

    /// Remove all registered directories. Intended for signal handlers,
    /// which exit without unwinding.
    pub fn cleanup_all(&self) {
        let mut dirs = self.dirs();
        for d in dirs.drain(..) {
            if let Err(e) = fs::remove_dir_all(&d) {
                if e.kind() != io::ErrorKind::NotFound {
                    eprintln!("failed to remove {}: {}", d.display(), e);
                }
            }
        }
    }
}

/// Temporary directory, removed on drop and tracked by a registry
/// meanwhile.
#[derive(Debug)]
pub struct ScratchDir {
    dir: Option<TempDir>,
    registry: CleanupRegistry,
}

impl ScratchDir {
    pub fn new(parent: Option<&Path>, registry: &CleanupRegistry) -> io::Result<ScratchDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SCRATCH_PREFIX);
        // created under the lock, so cleanup_all() can't miss it
        let mut dirs = registry.dirs();
        let dir = match parent {
            Some(p) => builder.tempdir_in(p)?,
            None => builder.tempdir()?,
        };
        dirs.push(dir.path().to_path_buf());
        drop(dirs);
        debug!("created scratch dir {}", dir.path().display());
        Ok(ScratchDir {
            dir: Some(dir),
            registry: registry.clone(),
        })
    }

    pub fn path(&self) -> &Path {
        match &self.dir {
            Some(d) => d.path(),
            None => Path::new(""),
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let dir = match self.dir.take() {
            Some(d) => d,
            None => return,
        };
        let path = dir.path().to_path_buf();
        self.registry.unregister(&path);
        match dir.close() {
            Ok(()) => debug!("removed scratch dir {}", path.display()),
            // already handled by cleanup_all()
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove {}: {}", path.display(), e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionStats {
    pub uncompressed_size: u64,
    // stored payload size over uncompressed size
    pub ratio: f64,
}

#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub image: ImageHandle,
    pub codec: CompressionCodec,
    pub early_cpio: bool,
    // None for uncompressed images
    pub compression: Option<CompressionStats>,
    pub extraction_time: Duration,
    pub build: BuildConfig,
}

fn dir_missing(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory)
}

// sorted names of non-directory entries in @dir
fn dir_names(dir: &Path) -> io::Result<Vec<String>> {
    let rd = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if dir_missing(&e) => return Ok(vec![]),
        Err(e) => return Err(e),
    };
    let mut names = vec![];
    for ent in rd {
        let ent = ent?;
        if !ent.file_type()?.is_dir() {
            names.push(ent.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

// module names of all *.ko* files below @dir, sorted and deduplicated
fn modules_scan(dir: &Path) -> io::Result<Vec<String>> {
    let mut mods = vec![];
    let mut dirs = vec![dir.to_path_buf()];
    while let Some(d) = dirs.pop() {
        let rd = match fs::read_dir(&d) {
            Ok(rd) => rd,
            Err(e) if d == dir && dir_missing(&e) => break,
            Err(e) => return Err(e),
        };
        for ent in rd {
            let ent = ent?;
            let ft = ent.file_type()?;
            if ft.is_dir() {
                dirs.push(ent.path());
                continue;
            }
            if !ft.is_file() {
                continue;
            }
            let fname = ent.file_name();
            if let Some(m) = fname.to_str().and_then(buildconf::kmod_basename) {
                mods.push(m.to_string());
            }
        }
    }
    mods.sort();
    mods.dedup();
    Ok(mods)
}

/// Collect build metadata from an unpacked image at @root. A missing or
/// unparseable config leaves hooks and explicit modules empty.
pub fn image_scan(root: &Path) -> Result<BuildConfig> {
    let (explicit_modules, hooks) = match buildconf::config_read(root) {
        Ok(conf) => (conf.explicit_modules, conf.hooks),
        Err(Error::ConfigNotFound) => {
            debug!("no config in image");
            (Default::default(), HookGroups::default())
        }
        Err(Error::Config(e)) => {
            warn!("ignoring image config: {}", e);
            (Default::default(), HookGroups::default())
        }
        Err(e) => return Err(e),
    };

    let modules = match buildconf::image_path(root, MODULES_DIR)? {
        Some(d) => modules_scan(&d)?,
        None => vec![],
    };
    let binaries = match buildconf::image_path(root, BINARIES_DIR)? {
        Some(d) => dir_names(&d)?,
        None => vec![],
    };
    let hook_files = match buildconf::image_path(root, HOOKS_DIR)? {
        Some(d) => dir_names(&d)?,
        None => vec![],
    };

    Ok(BuildConfig {
        version: buildconf::version_read(root)?,
        kernel_version: buildconf::kernel_version_find(root)?,
        modules,
        explicit_modules,
        binaries,
        hooks,
        hook_files,
    })
}

pub struct Analyzer {
    registry: CleanupRegistry,
    scratch_parent: Option<PathBuf>,
}

impl Analyzer {
    pub fn new(registry: CleanupRegistry) -> Analyzer {
        Analyzer {
            registry,
            scratch_parent: None,
        }
    }

    // create scratch dirs below @dir instead of the system temp dir
    pub fn scratch_parent(mut self, dir: &Path) -> Analyzer {
        self.scratch_parent = Some(dir.to_path_buf());
        self
    }

    /// Unpack @path to a scratch directory and report on its contents. The
    /// scratch directory is gone by the time this returns.
    pub fn analyze(&self, path: &Path) -> Result<AnalysisReport> {
        let image = ImageHandle::open(path)?;
        let det = detect::detect_image(&image)?;
        debug!("{}: {:?}", path.display(), det);

        let scratch = ScratchDir::new(self.scratch_parent.as_deref(), &self.registry)?;
        let started = Instant::now();
        let rdr = decomp::decompress(&image, &det).map_err(|e| Error::extraction(path, e))?;
        extract::unpack(io::BufReader::new(rdr), scratch.path())
            .map_err(|e| Error::extraction(path, e))?;
        let extraction_time = started.elapsed();

        let compression = match det.codec.is_compressed() {
            true => {
                let mut rdr =
                    decomp::decompress(&image, &det).map_err(|e| Error::extraction(path, e))?;
                let uncompressed_size = io::copy(&mut rdr, &mut io::sink())
                    .map_err(|e| Error::extraction(path, e))?;
                if uncompressed_size == 0 {
                    return Err(Error::extraction(
                        path,
                        io::Error::new(io::ErrorKind::InvalidData, "empty payload"),
                    ));
                }
                let payload = image.size - det.payload_off;
                Some(CompressionStats {
                    uncompressed_size,
                    ratio: payload as f64 / uncompressed_size as f64,
                })
            }
            false => None,
        };

        debug!("scanning {}", scratch.path().display());
        let build = image_scan(scratch.path())?;

        Ok(AnalysisReport {
            codec: det.codec,
            early_cpio: det.early_cpio(),
            image,
            compression,
            extraction_time,
            build,
        })
    }
}
