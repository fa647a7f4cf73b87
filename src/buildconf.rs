// SPDX-License-Identifier: (GPL-2.0 OR GPL-3.0)
// Copyright (C) 2026 SUSE LLC
//! Build metadata which mkinitcpio leaves inside an unpacked image.
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use kv_conf::{KvConf, KvVal};
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const CONFIG_PATH: &str = "config";
pub const VERSION_PATH: &str = "VERSION";
pub const BUILDCONFIG_NAME: &str = "buildconfig";
pub const HOOKS_DIR: &str = "hooks";
pub const BINARIES_DIR: &str = "usr/bin";
pub const MODULES_DIR: &str = "usr/lib/modules";

const KEY_MODULES: &str = "MODULES";
const KEY_EARLYHOOKS: &str = "EARLYHOOKS";
const KEY_HOOKS: &str = "HOOKS";
const KEY_LATEHOOKS: &str = "LATEHOOKS";
const KEY_CLEANUPHOOKS: &str = "CLEANUPHOOKS";

/// Runtime hooks per phase, in run order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookGroups {
    pub early: Vec<String>,
    pub main: Vec<String>,
    pub late: Vec<String>,
    pub cleanup: Vec<String>,
}

impl HookGroups {
    pub fn is_empty(&self) -> bool {
        self.early.is_empty() && self.main.is_empty() && self.late.is_empty() && self.cleanup.is_empty()
    }
}

/// Declarations read from the image config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageConfig {
    // normalized via kmod_name_normalize()
    pub explicit_modules: BTreeSet<String>,
    pub hooks: HookGroups,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildConfig {
    // builder version from VERSION
    pub version: Option<String>,
    pub kernel_version: Option<String>,
    pub modules: Vec<String>,
    pub explicit_modules: BTreeSet<String>,
    pub binaries: Vec<String>,
    pub hooks: HookGroups,
    // hook scripts found on disk
    pub hook_files: Vec<String>,
}

impl BuildConfig {
    pub fn is_explicit(&self, module: &str) -> bool {
        self.explicit_modules.contains(&kmod_name_normalize(module))
    }
}

// Module names may use dashes and underscores interchangeably.
pub fn kmod_name_normalize(name: &str) -> String {
    name.replace('-', "_")
}

// "ext4.ko.zst" -> "ext4"
pub fn kmod_basename(file_name: &str) -> Option<&str> {
    if let Some(b) = file_name.strip_suffix(".ko") {
        return Some(b);
    }
    Path::new(file_name)
        .file_stem()?
        .to_str()?
        .strip_suffix(".ko")
}

/// Resolve @rel below the unpacked image at @root. Image entries may be
/// symlinks, so None is returned for anything resolving outside of @root
/// as well as for missing or dangling paths.
pub fn image_path(root: &Path, rel: &str) -> io::Result<Option<PathBuf>> {
    let root = fs::canonicalize(root)?;
    match fs::canonicalize(root.join(rel)) {
        Ok(p) if p.starts_with(&root) => Ok(Some(p)),
        Ok(p) => {
            warn!("ignoring {}: resolves outside of the image to {}", rel, p.display());
            Ok(None)
        }
        Err(e) => {
            debug!("{}: {}", rel, e);
            Ok(None)
        }
    }
}

fn words(val: Option<&KvVal>) -> Vec<String> {
    match val {
        Some(v) => v.words().into_iter().map(str::to_string).collect(),
        None => vec![],
    }
}

/// Parse the config file at the root of an unpacked image. Only the
/// module and hook declarations are read; the file is never executed.
pub fn config_read(root: &Path) -> Result<ImageConfig> {
    let path = match image_path(root, CONFIG_PATH)? {
        Some(p) => p,
        None => return Err(Error::ConfigNotFound),
    };
    let f = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::ConfigNotFound),
        Err(e) => return Err(Error::Io(e)),
    };
    let mut conf = KvConf::with_keys([
        KEY_MODULES,
        KEY_EARLYHOOKS,
        KEY_HOOKS,
        KEY_LATEHOOKS,
        KEY_CLEANUPHOOKS,
    ]);
    conf.process(io::BufReader::new(f))?;

    let explicit_modules = words(conf.get(KEY_MODULES))
        .iter()
        // '?' suffix marks optional modules
        .map(|m| kmod_name_normalize(m.strip_suffix('?').unwrap_or(m)))
        .filter(|m| !m.is_empty())
        .collect();

    Ok(ImageConfig {
        explicit_modules,
        hooks: HookGroups {
            early: words(conf.get(KEY_EARLYHOOKS)),
            main: words(conf.get(KEY_HOOKS)),
            late: words(conf.get(KEY_LATEHOOKS)),
            cleanup: words(conf.get(KEY_CLEANUPHOOKS)),
        },
    })
}

/// Builder version recorded in the image, if any.
pub fn version_read(root: &Path) -> io::Result<Option<String>> {
    let path = match image_path(root, VERSION_PATH)? {
        Some(p) => p,
        None => return Ok(None),
    };
    match fs::read_to_string(path) {
        Ok(v) => Ok(Some(v.trim().to_string()).filter(|v| !v.is_empty())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Kernel release, taken from the directory below usr/lib/modules. None if
/// there isn't exactly one.
pub fn kernel_version_find(root: &Path) -> io::Result<Option<String>> {
    let dir = match image_path(root, MODULES_DIR)? {
        Some(d) => d,
        None => return Ok(None),
    };
    let rd = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
            return Ok(None)
        }
        Err(e) => return Err(e),
    };
    let mut kvers = vec![];
    for ent in rd {
        let ent = ent?;
        if ent.file_type()?.is_dir() {
            kvers.push(ent.file_name().to_string_lossy().to_string());
        }
    }
    if kvers.len() > 1 {
        debug!("multiple kernel versions in image: {:?}", kvers);
        return Ok(None);
    }
    Ok(kvers.pop())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kmod_basename() {
        assert_eq!(kmod_basename("ext4.ko"), Some("ext4"));
        assert_eq!(kmod_basename("ext4.ko.zst"), Some("ext4"));
        assert_eq!(kmod_basename("nvme-core.ko.xz"), Some("nvme-core"));
        assert_eq!(kmod_basename("modules.dep"), None);
        assert_eq!(kmod_basename("modules.dep.bin"), None);
        assert_eq!(kmod_basename("ko"), None);
    }

    #[test]
    fn test_explicit() {
        let bc = BuildConfig {
            explicit_modules: BTreeSet::from(["nvme_core".to_string()]),
            ..Default::default()
        };
        assert!(bc.is_explicit("nvme-core"));
        assert!(bc.is_explicit("nvme_core"));
        assert!(!bc.is_explicit("nvme"));
    }

    #[test]
    fn test_config_read() {
        let td = tempfile::tempdir().unwrap();
        fs::write(
            td.path().join(CONFIG_PATH),
            "#!/bin/bash\n\
             MODULES=(ext4 'nvme-core' crc32c?)\n\
             BINARIES=()\n\
             FILES=\"/etc/x\"\n\
             EARLYHOOKS=\"\"\n\
             HOOKS=(base udev autodetect\n  modconf block filesystems fsck)\n\
             LATEHOOKS=\"shutdown\"\n\
             CLEANUPHOOKS=(udev)\n\
             COMPRESSION=\"$(echo zstd)\"\n",
        )
        .unwrap();

        let conf = config_read(td.path()).unwrap();
        assert_eq!(
            conf.explicit_modules,
            BTreeSet::from(["crc32c".to_string(), "ext4".to_string(), "nvme_core".to_string()])
        );
        assert!(conf.hooks.early.is_empty());
        assert_eq!(
            conf.hooks.main,
            ["base", "udev", "autodetect", "modconf", "block", "filesystems", "fsck"]
        );
        assert_eq!(conf.hooks.late, ["shutdown"]);
        assert_eq!(conf.hooks.cleanup, ["udev"]);
    }

    #[test]
    fn test_config_missing() {
        let td = tempfile::tempdir().unwrap();
        assert!(matches!(config_read(td.path()), Err(Error::ConfigNotFound)));
    }

    #[test]
    fn test_config_bad() {
        let td = tempfile::tempdir().unwrap();
        fs::write(td.path().join(CONFIG_PATH), "HOOKS=(base\n").unwrap();
        assert!(matches!(config_read(td.path()), Err(Error::Config(_))));
    }

    #[test]
    fn test_image_path() {
        let td = tempfile::tempdir().unwrap();
        let root = td.path().join("root");
        let host = td.path().join("host");
        fs::create_dir_all(root.join("usr/lib")).unwrap();
        fs::create_dir(&host).unwrap();
        fs::write(host.join("secret"), "host-secret\n").unwrap();
        fs::write(root.join("usr/lib/v"), "38\n").unwrap();

        std::os::unix::fs::symlink("usr/lib/v", root.join(VERSION_PATH)).unwrap();
        std::os::unix::fs::symlink(host.join("secret"), root.join(CONFIG_PATH)).unwrap();
        std::os::unix::fs::symlink("../../host", root.join("usr/bin")).unwrap();
        std::os::unix::fs::symlink("loop", root.join("loop")).unwrap();

        // links within the image are followed
        assert_eq!(version_read(&root).unwrap().as_deref(), Some("38"));
        assert!(image_path(&root, "usr/lib/v").unwrap().is_some());

        assert_eq!(image_path(&root, CONFIG_PATH).unwrap(), None);
        assert!(matches!(config_read(&root), Err(Error::ConfigNotFound)));
        assert_eq!(image_path(&root, BINARIES_DIR).unwrap(), None);
        assert_eq!(image_path(&root, "usr/bin/secret").unwrap(), None);
        assert_eq!(image_path(&root, "loop").unwrap(), None);
        assert_eq!(image_path(&root, "missing").unwrap(), None);
    }

    #[test]
    fn test_version_kver() {
        let td = tempfile::tempdir().unwrap();
        assert_eq!(version_read(td.path()).unwrap(), None);
        assert_eq!(kernel_version_find(td.path()).unwrap(), None);

        fs::write(td.path().join(VERSION_PATH), "38\n").unwrap();
        assert_eq!(version_read(td.path()).unwrap().unwrap(), "38");
        fs::create_dir_all(td.path().join(MODULES_DIR).join("6.6.1-arch1-1/kernel")).unwrap();
        fs::write(td.path().join(MODULES_DIR).join("modules.stray"), "").unwrap();
        assert_eq!(kernel_version_find(td.path()).unwrap().unwrap(), "6.6.1-arch1-1");
        // ambiguous
        fs::create_dir(td.path().join(MODULES_DIR).join("6.7.0")).unwrap();
        assert_eq!(kernel_version_find(td.path()).unwrap(), None);
    }
}
