// SPDX-License-Identifier: (GPL-2.0 OR GPL-3.0)
// Copyright (C) 2026 SUSE LLC
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::detect::DetectError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("'{}': {source}", path.display())]
    Image { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Detect(#[from] DetectError),

    // decompressor and unpack failures carry little useful detail
    #[error("failed to extract '{}': {source}", path.display())]
    Extraction { path: PathBuf, source: io::Error },

    #[error("no config found in image")]
    ConfigNotFound,

    #[error("failed to extract config from image (mkinitcpio too old?)")]
    BuildConfigNotFound,

    #[error("failed to parse image config: {0}")]
    Config(#[from] kv_conf::KvError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn extraction(path: &std::path::Path, source: io::Error) -> Error {
        Error::Extraction {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
