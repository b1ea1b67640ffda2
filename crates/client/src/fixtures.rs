use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use fehler::throws;
use fs_extra::file::{move_file, CopyOptions};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

use crate::constants::{ACCOUNT_EXTENSION, PROGRAM_EXTENSION};

/// What a declared clone entry turns into on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum FixtureKind {
    Account,
    Token,
    Program,
}

impl FixtureKind {
    pub fn extension(self) -> &'static str {
        match self {
            FixtureKind::Account | FixtureKind::Token => ACCOUNT_EXTENSION,
            FixtureKind::Program => PROGRAM_EXTENSION,
        }
    }

    pub fn file_name(self, address: &str) -> String {
        format!("{address}.{}", self.extension())
    }

    /// Accounts and tokens are json snapshots that can be diffed; programs
    /// are opaque binaries.
    pub fn is_account_data(self) -> bool {
        !matches!(self, FixtureKind::Program)
    }
}

/// The fixtures present in a single directory, keyed by address.
///
/// This is only a snapshot of the directory; rescan to observe changes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FixtureStore {
    dir: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FixtureStore {
    /// Lists the files of `dir` (not recursively), optionally only the ones
    /// with the given extension. A missing directory is an empty store.
    #[throws(io::Error)]
    pub fn scan(dir: &Path, extension: Option<&str>) -> Self {
        let mut entries = BTreeMap::new();
        if !dir.is_dir() {
            debug!("Fixture directory '{}' does not exist yet", dir.display());
            return Self {
                dir: dir.to_path_buf(),
                entries,
            };
        }

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if let Some(extension) = extension {
                if path.extension().and_then(|e| e.to_str()) != Some(extension) {
                    continue;
                }
            }
            let (Some(stem), Some(file_name)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.file_name().and_then(|s| s.to_str()),
            ) else {
                continue;
            };
            entries.insert(stem.to_owned(), file_name.to_owned());
        }

        Self {
            dir: dir.to_path_buf(),
            entries,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn contains(&self, address: &str) -> bool {
        self.entries.contains_key(address)
    }

    pub fn file_name(&self, address: &str) -> Option<&str> {
        self.entries.get(address).map(String::as_str)
    }

    pub fn path_of(&self, address: &str) -> Option<PathBuf> {
        self.file_name(address).map(|file| self.dir.join(file))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(address, file)| (address.as_str(), file.as_str()))
    }
}

/// An account snapshot as written by `solana account --output json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFixture {
    pub pubkey: String,
    pub account: AccountInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub lamports: u64,
    /// `[<base64 data>, "base64"]`
    pub data: (String, String),
    pub owner: String,
    pub executable: bool,
    pub rent_epoch: u64,
    #[serde(default)]
    pub space: u64,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0:?}")]
    IoError(#[from] io::Error),
    #[error("invalid fixture json: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("{0:?}")]
    FsExtraError(#[from] fs_extra::error::Error),
}

impl AccountFixture {
    #[throws]
    pub fn load(path: &Path) -> Self {
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents)?
    }
}

/// Owner program recorded in an account fixture, `None` when the file is
/// missing or is not a readable account snapshot.
pub fn read_owner(path: &Path) -> Option<String> {
    match AccountFixture::load(path) {
        Ok(fixture) => Some(fixture.account.owner),
        Err(err) => {
            warn!("Unable to read the owner from '{}': {err}", path.display());
            None
        }
    }
}

/// Structural comparison of two json fixtures. `None` when either side
/// cannot be read or parsed.
pub fn fixtures_equal(left: &Path, right: &Path) -> Option<bool> {
    let load = |path: &Path| -> Option<serde_json::Value> {
        let contents = fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    };
    Some(load(left)? == load(right)?)
}

/// Moves every file of `source` into `destination`, replacing existing
/// files only when `overwrite` is set. Returns how many files were moved.
#[throws]
pub fn move_fixtures(source: &Path, destination: &Path, overwrite: bool) -> usize {
    if !source.is_dir() {
        warn!("Source directory does not exist: {}", source.display());
        return 0;
    }
    fs::create_dir_all(destination)?;

    let options = CopyOptions {
        overwrite,
        ..CopyOptions::new()
    };
    let mut moved = 0;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let target = destination.join(entry.file_name());
        if target.exists() && !overwrite {
            debug!("Keeping existing fixture {}", target.display());
            continue;
        }
        move_file(entry.path(), &target, &options)?;
        moved += 1;
    }
    moved
}
