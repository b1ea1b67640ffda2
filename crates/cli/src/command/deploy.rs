use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Error, Result};
use clap::Args;
use fehler::throws;
use solkit_client::{
    cluster::label_cluster_key,
    commander::{self, deploy_args, ensure_available},
    programs::{self, LocatedProgram, ProgramListing},
    CliOverrides, Commander, Prompter, TerminalPrompter,
};

use super::{
    keypair_pubkey, load_config, locate_manifest, program_dirs, resolve_cli_cluster, select_program, title,
    warning,
};

#[derive(Args, Debug, Default, Clone)]
pub struct DeployArgs {
    /// Program of the workspace to deploy
    #[clap(short, long)]
    pub program_name: Option<String>,
    /// Path to Cargo.toml, by default the nearest one above the working directory
    #[clap(long)]
    pub manifest_path: Option<PathBuf>,
    /// Cluster moniker or rpc url to deploy to
    #[clap(short = 'u', long)]
    pub url: String,
    /// Fee payer and upgrade authority, by default the one from Solana.toml
    #[clap(short, long)]
    pub keypair: Option<PathBuf>,
    /// Path to Solana.toml, or the directory holding it
    #[clap(short, long)]
    pub config: Option<PathBuf>,
    /// Only print the deploy command
    #[clap(long)]
    pub output_only: bool,
    /// Extra arguments passed to `solana program deploy`
    #[clap(last = true)]
    pub args: Vec<String>,
}

#[throws]
pub async fn deploy(args: DeployArgs) {
    let commander = Commander::new();
    ensure_available(&commander, "solana", &["--version"]).await?;

    let target = resolve_cli_cluster(&args.url)?;
    let overrides = CliOverrides {
        keypair: args.keypair.clone(),
        ..CliOverrides::default()
    };
    let config = load_config(args.config.as_deref(), &overrides, true)?;

    let cluster = match target.infer_cluster() {
        Some(cluster) => cluster,
        None => bail!("Unable to tell which cluster {target} is, use a cluster moniker instead"),
    };
    if label_cluster_key(cluster, &config.programs).is_none() {
        let declared: Vec<&str> = config.programs.keys().map(String::as_str).collect();
        bail!(
            "No [programs.{}] declared in {}, declared clusters: {}",
            cluster.canonical(),
            config.config_path().display(),
            if declared.is_empty() { "none".to_owned() } else { declared.join(", ") }
        );
    }

    let manifest = locate_manifest(args.manifest_path.as_deref())?;
    let workspace_programs = program_dirs(&manifest)?;
    let chosen = match &args.program_name {
        Some(name) => Some(name.clone()),
        None if workspace_programs.len() > 1 => {
            let names: Vec<String> = workspace_programs.iter().map(|(name, _)| name.clone()).collect();
            TerminalPrompter
                .select("Which program should be deployed?", &names)
                .map(|index| names[index].clone())
        }
        None => None,
    };
    let (name, _) = select_program(&workspace_programs, chosen.as_deref())?;
    title(&format!("Deploying program '{name}' to {target}"));

    let build_dir = manifest.deploy_dir();
    if !build_dir.is_dir() {
        bail!("Unable to locate {}, run `solkit build` first", build_dir.display());
    }
    let listing = programs::locate(&build_dir, &config.programs, cluster)?;
    let program = located_program(&listing, name)?;

    let url = target.url_arg(&config.settings.networks);
    let keypair = &config.settings.keypair;
    let (program_id, upgrade_authority) = match commander.program_info(&program.address, &url).await? {
        None => {
            let program_keypair = program_keypair_path(&program.file_path);
            check_program_keypair(&program_keypair, &program.address)?;
            (program_keypair.display().to_string(), None)
        }
        Some(info) => {
            let signer = keypair_pubkey(keypair)?;
            match info.upgrade_authority() {
                None => bail!("Program {} is immutable and can not be upgraded", program.address),
                Some(authority) if authority != signer.to_string() => bail!(
                    "{} is not the upgrade authority of {}, {authority} is",
                    signer,
                    program.address
                ),
                Some(_) => {}
            }
            (program.address.clone(), Some(keypair.as_path()))
        }
    };

    let command = deploy_args(
        &commander::DeployArgs {
            program_path: &program.file_path,
            program_id: &program_id,
            url: &url,
            keypair: Some(keypair),
            upgrade_authority,
        },
        &args.args,
    );

    if args.output_only {
        println!("solana {}", command.join(" "));
        return;
    }

    let status = commander.run_attached("solana", &command).await?;
    if !status.success() {
        bail!("solana program deploy failed with {status}");
    }
}

/// The located binary of `name`, also matching `-` against `_`.
fn located_program<'a>(listing: &'a ProgramListing, name: &str) -> Result<&'a LocatedProgram> {
    let normalize = |name: &str| name.to_ascii_lowercase().replace('-', "_");
    listing
        .located
        .iter()
        .find(|(label, _)| normalize(label) == normalize(name))
        .map(|(_, program)| program)
        .ok_or_else(|| anyhow!("Program '{name}' has no address declared for this cluster or was not built"))
}

/// `cargo build-sbf` writes `<name>-keypair.json` next to `<name>.so`.
fn program_keypair_path(program_path: &Path) -> PathBuf {
    let stem = program_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    program_path.with_file_name(format!("{stem}-keypair.json"))
}

/// A first deploy claims the address of the program keypair; it should be
/// the declared one.
fn check_program_keypair(path: &Path, address: &str) -> Result<()> {
    if !path.is_file() {
        bail!("Unable to locate the program keypair {}", path.display());
    }
    let pubkey = keypair_pubkey(path)?;
    if pubkey.to_string() != address {
        warning(&format!(
            "The program keypair {} is for {pubkey}, but {address} is declared",
            path.display()
        ));
    }
    Ok(())
}
