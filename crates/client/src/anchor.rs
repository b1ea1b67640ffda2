use std::{
    fs, io,
    path::{Path, PathBuf},
};

use fehler::{throw, throws};
use indexmap::IndexMap;
use log::debug;
use serde::Deserialize;
use thiserror::Error;

use crate::{
    config::{canonicalize_programs, find_case_insensitive, CloneEntry, Config, ProgramsByCluster},
    constants::ANCHOR_TOML,
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0:?}")]
    IoError(#[from] io::Error),
    #[error("unable to parse '{}': {}", .path.display(), .source)]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("no Anchor.toml config file found in '{}'", .0.display())]
    NotFound(PathBuf),
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct AnchorCloneEntry {
    pub address: String,
    /// Only meaningful to Anchor itself, carried for completeness.
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AnchorValidator {
    /// Rpc url every clone in this file is fetched from.
    pub url: Option<String>,
    /// Programs to clone.
    pub clone: Vec<AnchorCloneEntry>,
    /// Accounts to clone.
    pub account: Vec<AnchorCloneEntry>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AnchorTest {
    pub validator: Option<AnchorValidator>,
}

#[derive(Debug, Default, Deserialize)]
struct _AnchorToml {
    #[serde(default)]
    programs: ProgramsByCluster,
    #[serde(default)]
    test: Option<AnchorTest>,
}

/// The subset of `Anchor.toml` that feeds into the project config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorToml {
    config_path: PathBuf,
    pub programs: ProgramsByCluster,
    pub test: Option<AnchorTest>,
}

impl AnchorToml {
    /// Looks for `Anchor.toml` next to `near`, which may be the primary
    /// config file or the directory holding it.
    ///
    /// A missing file is `Ok(None)` unless `required` is set.
    #[throws]
    pub fn load(near: &Path, required: bool) -> Option<Self> {
        let dir = if near.is_dir() {
            near.to_path_buf()
        } else {
            near.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."))
        };

        let located = if dir.is_dir() {
            find_case_insensitive(&dir, ANCHOR_TOML)?
        } else {
            None
        };
        match located {
            Some(path) => {
                let contents = fs::read_to_string(&path)?;
                Some(Self::parse(&contents, &path)?)
            }
            None if required => throw!(Error::NotFound(dir)),
            None => {
                debug!("No {ANCHOR_TOML} found in '{}'", dir.display());
                None
            }
        }
    }

    #[throws]
    pub fn parse(contents: &str, config_path: &Path) -> Self {
        let raw: _AnchorToml = toml::from_str(contents).map_err(|source| Error::ParseError {
            path: config_path.to_path_buf(),
            source,
        })?;
        Self {
            config_path: config_path.to_path_buf(),
            programs: canonicalize_programs(raw.programs),
            test: raw.test,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn validator(&self) -> Option<&AnchorValidator> {
        self.test.as_ref().and_then(|test| test.validator.as_ref())
    }
}

/// Folds the clone declarations of `Anchor.toml` into a copy of `config`.
///
/// Programs are merged before accounts. An Anchor entry is only taken when
/// no entry with the same address exists in the target map, so declarations
/// from `Solana.toml` always win. Program labels missing from `config` are
/// filled in from `[programs.*]` the same way.
pub fn merge(anchor: &AnchorToml, config: &Config) -> Config {
    let mut merged = config.clone();

    if let Some(validator) = anchor.validator() {
        let cluster = validator.url.clone();

        for clone in &validator.clone {
            if merged.clone.has_program(&clone.address) {
                continue;
            }
            merged.clone.program.insert(
                clone.address.clone(),
                CloneEntry::new(&clone.address).with_cluster(cluster.clone()),
            );
        }

        for account in &validator.account {
            if merged.clone.has_account(&account.address) {
                continue;
            }
            merged.clone.account.insert(
                account.address.clone(),
                CloneEntry::new(&account.address).with_cluster(cluster.clone()),
            );
        }
    }

    for (cluster, labels) in &anchor.programs {
        let known = merged.programs.entry(cluster.clone()).or_insert_with(IndexMap::new);
        for (label, address) in labels {
            known.entry(label.clone()).or_insert_with(|| address.clone());
        }
    }

    merged
}
