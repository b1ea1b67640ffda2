use std::{
    fs, io,
    path::{Path, PathBuf},
};

use cargo_metadata::{Metadata, MetadataCommand, Package};
use fehler::{throw, throws};
use indexmap::IndexMap;
use log::{debug, warn};
use thiserror::Error;

use crate::constants::CARGO_TOML;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0:?}")]
    IoError(#[from] io::Error),
    #[error("{0:?}")]
    MetadataError(#[from] cargo_metadata::Error),
    #[error("unable to locate Cargo.toml at '{}'", .0.display())]
    NotFound(PathBuf),
}

/// A `Cargo.toml` together with what `cargo metadata` knows about its workspace.
#[derive(Debug, Clone)]
pub struct CargoManifest {
    path: PathBuf,
    metadata: Metadata,
}

impl CargoManifest {
    /// `path` may be the manifest itself or the directory holding it.
    #[throws]
    pub fn load(path: &Path) -> Self {
        let path = if path.is_dir() {
            path.join(CARGO_TOML)
        } else {
            path.to_path_buf()
        };
        if !path.is_file() {
            throw!(Error::NotFound(path));
        }
        let path = fs::canonicalize(path)?;
        let metadata = MetadataCommand::new().manifest_path(&path).no_deps().exec()?;
        Self { path, metadata }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn workspace_root(&self) -> &Path {
        self.metadata.workspace_root.as_std_path()
    }

    /// Where `cargo build-sbf` puts the program binaries and keypairs.
    pub fn deploy_dir(&self) -> PathBuf {
        self.metadata.target_directory.as_std_path().join("deploy")
    }

    /// The package this manifest declares; `None` for a virtual manifest.
    pub fn package(&self) -> Option<&Package> {
        self.metadata
            .packages
            .iter()
            .find(|package| package.manifest_path.as_std_path() == self.path)
    }

    pub fn is_workspace(&self) -> bool {
        self.package().is_none() || self.metadata.workspace_members.len() > 1
    }

    /// Compiles to a loadable program (`cdylib`).
    pub fn is_program(&self) -> bool {
        self.package().map_or(false, is_program)
    }
}

fn is_program(package: &Package) -> bool {
    package
        .targets
        .iter()
        .any(|target| target.crate_types.iter().any(|ty| ty == "cdylib"))
}

/// Maps every program crate among the workspace members of `manifest` to
/// its directory, sorted by name.
#[throws]
pub fn locate_workspace_programs(manifest: &CargoManifest) -> IndexMap<String, PathBuf> {
    let metadata = &manifest.metadata;
    let mut programs = IndexMap::new();

    for package in metadata
        .packages
        .iter()
        .filter(|package| metadata.workspace_members.contains(&package.id))
    {
        if !is_program(package) {
            debug!("Workspace member '{}' is not a program", package.name);
            continue;
        }
        if programs.contains_key(&package.name) {
            warn!("Located multiple programs named '{}'", package.name);
            continue;
        }
        let dir = match package.manifest_path.parent() {
            Some(dir) => dir.as_std_path().to_path_buf(),
            None => continue,
        };
        programs.insert(package.name.clone(), dir);
    }
    programs.sort_keys();
    programs
}
