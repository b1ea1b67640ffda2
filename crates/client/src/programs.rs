use std::{
    io,
    path::{Path, PathBuf},
};

use fehler::throws;
use indexmap::IndexMap;
use log::{debug, warn};

use crate::{
    cluster::{label_cluster_key, ClusterId},
    config::ProgramsByCluster,
    constants::PROGRAM_EXTENSION,
    fixtures::FixtureStore,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedProgram {
    pub address: String,
    pub file_path: PathBuf,
}

/// Compiled programs of a build directory matched against the labels
/// declared for one cluster.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProgramListing {
    pub located: IndexMap<String, LocatedProgram>,
    /// Binaries with no declared label.
    pub orphans: Vec<String>,
    /// Labels with no binary.
    pub missing: Vec<String>,
    pub all_found: bool,
}

/// Matches the `.so` files of `build_dir` by file stem against the labels
/// of `cluster`. `cargo build-sbf` names binaries after the crate's lib
/// name, so `my-program` also matches `my_program.so`.
///
/// Orphans and missing binaries are only warned about.
#[throws(io::Error)]
pub fn locate(build_dir: &Path, programs: &ProgramsByCluster, cluster: ClusterId) -> ProgramListing {
    let mut listing = ProgramListing::default();
    let binaries = if build_dir.is_dir() {
        FixtureStore::scan(build_dir, Some(PROGRAM_EXTENSION))?
    } else {
        warn!("Unable to locate the build output directory: {}", build_dir.display());
        FixtureStore::default()
    };
    let key = match label_cluster_key(cluster, programs) {
        Some(key) => key,
        None => {
            debug!("No [programs.{}] declared", cluster.canonical());
            listing.orphans = binaries.addresses().map(str::to_owned).collect();
            return listing;
        }
    };
    let labels = &programs[key];

    for (label, address) in labels {
        let binary = binaries.path_of(label).or_else(|| binaries.path_of(&binary_stem(label)));
        match binary {
            Some(file_path) => {
                listing.located.insert(
                    label.clone(),
                    LocatedProgram {
                        address: address.clone(),
                        file_path,
                    },
                );
            }
            None => {
                warn!("Unable to locate compiled program '{label}' from config");
                listing.missing.push(label.clone());
            }
        }
    }

    for name in binaries.addresses() {
        let declared = labels.keys().any(|label| label == name || binary_stem(label) == name);
        if !declared {
            warn!("Compiled program '{name}' was found with no config info");
            listing.orphans.push(name.to_owned());
        }
    }

    listing.all_found = listing.missing.is_empty();
    listing
}

fn binary_stem(label: &str) -> String {
    label.replace('-', "_")
}
