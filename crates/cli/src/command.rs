use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Error, Result};
use console::style;
use fehler::throws;
use log::debug;
use solkit_client::{
    anchor::{self, AnchorToml},
    cargo::{self, CargoManifest},
    cluster::{self, ClusterTarget, ResolveOptions},
    config,
    constants::CARGO_TOML,
    read_keypair_file, CliOverrides, Config, Pubkey, Signer,
};

mod build;
mod clone;
mod deploy;
mod test_validator;

pub use build::{build, BuildArgs};
pub use clone::{clone, CloneArgs};
pub use deploy::{deploy, DeployArgs};
pub use test_validator::{test_validator, TestValidatorArgs};

/// Monikers the way the solana CLI spells them, urls as given.
pub(crate) const SOLANA_CLI: ResolveOptions = ResolveOptions {
    allow_url: true,
    include_beta_label: true,
};

pub(crate) fn title(message: &str) {
    println!("\n{}\n", style(message).bold().cyan());
}

pub(crate) fn warning(message: &str) {
    println!("{} {message}", style("warning:").yellow().bold());
}

/// Loads `Solana.toml` and folds `Anchor.toml` from the same directory into it.
#[throws]
pub(crate) fn load_config(path: Option<&Path>, overrides: &CliOverrides, required: bool) -> Config {
    let config = Config::load(path, overrides, required)?;
    match AnchorToml::load(config.config_path(), false)? {
        Some(anchor_toml) => {
            debug!("Merging {}", anchor_toml.config_path().display());
            anchor::merge(&anchor_toml, &config)
        }
        None => config,
    }
}

pub(crate) fn keypair_pubkey(path: &Path) -> Result<Pubkey> {
    read_keypair_file(path)
        .map(|keypair| keypair.pubkey())
        .map_err(|err| anyhow!("Unable to read the keypair {}: {err}", path.display()))
}

/// A malformed url typed on the command line ends the command.
#[throws]
pub(crate) fn resolve_cli_cluster(input: &str) -> ClusterTarget {
    cluster::resolve(input, SOLANA_CLI)?
}

/// The explicit manifest, or the nearest `Cargo.toml` above the working directory.
#[throws]
pub(crate) fn locate_manifest(manifest_path: Option<&Path>) -> CargoManifest {
    let path = match manifest_path {
        Some(path) => path.to_path_buf(),
        None => match config::discover(&env::current_dir()?, CARGO_TOML)? {
            Some(path) => path,
            None => bail!("Unable to locate a {CARGO_TOML} file in any parent directory"),
        },
    };
    CargoManifest::load(&path)?
}

/// Every program the manifest builds: itself, or its workspace members.
#[throws]
pub(crate) fn program_dirs(manifest: &CargoManifest) -> Vec<(String, PathBuf)> {
    if manifest.is_program() {
        if let Some(package) = manifest.package() {
            return vec![(package.name.clone(), manifest.dir().to_path_buf())];
        }
    }
    cargo::locate_workspace_programs(manifest)?.into_iter().collect()
}

/// Picks `name` (ignoring case and `-`/`_`) among `programs`, or the only
/// program when no name was given.
pub(crate) fn select_program<'a>(
    programs: &'a [(String, PathBuf)],
    name: Option<&str>,
) -> Result<&'a (String, PathBuf)> {
    let normalize = |name: &str| name.to_ascii_lowercase().replace('-', "_");
    let selected = match name {
        Some(name) => programs.iter().find(|(program, _)| normalize(program) == normalize(name)),
        None if programs.len() == 1 => programs.first(),
        None => None,
    };
    if let Some(selected) = selected {
        return Ok(selected);
    }

    match name {
        Some(name) => warning(&format!("Unable to locate program '{name}' in this workspace")),
        None if programs.is_empty() => bail!("Unable to locate any program in this workspace"),
        None => warning("Multiple programs found, select one with --program-name"),
    }
    println!("The following programs were located:");
    for (program, dir) in programs {
        println!(" - {program} ({})", dir.display());
    }
    bail!("No program selected")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn programs() -> Vec<(String, PathBuf)> {
        vec![
            ("counter".to_owned(), PathBuf::from("programs/counter")),
            ("my-escrow".to_owned(), PathBuf::from("programs/escrow")),
        ]
    }

    #[test]
    fn programs_are_selected_by_normalized_name() {
        let programs = programs();
        assert_eq!(select_program(&programs, Some("My_Escrow")).unwrap().0, "my-escrow");
        assert!(select_program(&programs, Some("vault")).is_err());
        assert!(select_program(&programs, None).is_err());
    }

    #[test]
    fn a_single_program_is_selected_implicitly() {
        let programs = &programs()[..1];
        assert_eq!(select_program(programs, None).unwrap().0, "counter");
        assert!(select_program(&[], None).is_err());
    }
}
