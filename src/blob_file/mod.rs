// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use regex::Regex;
use tracing::{debug, info};

use crate::{
    cfg::config::{ServiceConfig, config_keys},
    core::{
        blob::BlobFileWriter,
        errors::{Error, Result},
    },
};

/// Directory where blob files are created.
///
/// Files are named `blob_<id>`. A startup scan finds the highest existing id
/// so that new allocations never collide with files from earlier runs.
#[derive(Debug)]
pub struct BlobFileDirectory {
    path: PathBuf,
    next_file_id: Mutex<u64>,
}

impl BlobFileDirectory {
    /// Opens (creating if needed) the directory named by
    /// `blob_cache/directory` and scans it for existing blob files.
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let dir = config
            .get_optional_string(config_keys::BLOB_CACHE_DIRECTORY)?
            .ok_or_else(|| {
                Error::Config(format!(
                    "missing config \"{}\"",
                    config_keys::BLOB_CACHE_DIRECTORY
                ))
            })?;
        Self::open(PathBuf::from(dir))
    }

    pub fn open(path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&path)?;
        let next = scan_directory(&path)?;
        info!("using blob directory {} (next id {})", path.display(), next);
        Ok(Self {
            path,
            next_file_id: Mutex::new(next),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of a newly to-be-created blob file.
    pub fn allocate_file(&self) -> PathBuf {
        let mut next = self
            .next_file_id
            .lock()
            .expect("blob directory mutex poisoned");
        let path = self.path.join(format!("blob_{}", *next));
        *next += 1;
        path
    }

    /// Allocates a file name and opens a writer of the given size over it.
    pub fn make_writer(&self, size: usize) -> Result<BlobFileWriter> {
        let path = self.allocate_file();
        debug!("allocating blob file {}", path.display());
        BlobFileWriter::create(path, size)
    }
}

// Finds the highest id of an existing "blob_<id>" file, plus one.
fn scan_directory(path: &Path) -> Result<u64> {
    let blob_re = Regex::new(r"^blob_(\d+)$").expect("static regex");
    let mut next = 0u64;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(caps) = blob_re.captures(name)
            && let Ok(id) = caps[1].parse::<u64>()
        {
            next = next.max(id + 1);
        }
    }
    Ok(next)
}
