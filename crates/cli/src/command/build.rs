use std::path::PathBuf;

use anyhow::{bail, Error};
use clap::Args;
use console::style;
use fehler::throws;
use solkit_client::{
    commander::{build_sbf_args, ensure_available},
    constants::CARGO_TOML,
    programs, CliOverrides, Commander,
};

use super::{load_config, locate_manifest, program_dirs, resolve_cli_cluster, select_program, title, warning};

#[derive(Args, Debug, Default, Clone)]
pub struct BuildArgs {
    /// Build only this program of the workspace
    #[clap(short, long)]
    pub program_name: Option<String>,
    /// Path to Cargo.toml, by default the nearest one above the working directory
    #[clap(long)]
    pub manifest_path: Option<PathBuf>,
    /// Path to Solana.toml, or the directory holding it
    #[clap(short, long)]
    pub config: Option<PathBuf>,
    /// Cluster whose declared programs are matched against the build output
    #[clap(short = 'u', long)]
    pub url: Option<String>,
    /// Solana platform tools version passed to `cargo build-sbf`
    #[clap(long)]
    pub tools_version: Option<String>,
    /// Only print the build command
    #[clap(long)]
    pub output_only: bool,
}

#[throws]
pub async fn build(args: BuildArgs) {
    let commander = Commander::new();
    let manifest = locate_manifest(args.manifest_path.as_deref())?;

    let command = match &args.program_name {
        Some(name) => {
            let programs = program_dirs(&manifest)?;
            let (program, dir) = select_program(&programs, Some(name))?;
            title(&format!("Building program '{program}'"));
            build_sbf_args(Some(&dir.join(CARGO_TOML)), false, args.tools_version.as_deref())
        }
        None => {
            title("Building all programs");
            build_sbf_args(
                Some(manifest.path()),
                manifest.is_workspace(),
                args.tools_version.as_deref(),
            )
        }
    };

    if args.output_only {
        println!("cargo {}", command.join(" "));
        return;
    }

    ensure_available(&commander, "cargo", &["build-sbf", "--help"]).await?;
    let status = commander.run_attached("cargo", &command).await?;
    if !status.success() {
        bail!("cargo build-sbf failed with {status}");
    }

    let overrides = CliOverrides {
        cluster: args.url.clone(),
        ..CliOverrides::default()
    };
    let config = load_config(args.config.as_deref(), &overrides, false)?;
    let cluster = match resolve_cli_cluster(&config.settings.cluster)?.infer_cluster() {
        Some(cluster) => cluster,
        None => {
            warning(&format!(
                "Unable to tell which cluster '{}' is, skipping the program report",
                config.settings.cluster
            ));
            return;
        }
    };

    let build_dir = manifest.deploy_dir();
    let listing = programs::locate(&build_dir, &config.programs, cluster)?;
    println!();
    for (label, program) in &listing.located {
        println!(
            "  {} {label} ({}) {}",
            style("built").green().bold(),
            program.address,
            program.file_path.display()
        );
    }
    for label in &listing.missing {
        println!("  {} {label}", style("missing").red().bold());
    }
    for stem in &listing.orphans {
        println!("  {} {stem} has no address in [programs.{}]", style("unlabelled").yellow(), cluster.canonical());
    }
}
