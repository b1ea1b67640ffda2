use std::path::PathBuf;

use anyhow::{bail, Error};
use clap::Args;
use console::style;
use fehler::throws;
use log::debug;
use solkit_client::{
    commander::ensure_available,
    constants::DEFAULT_BUILD_DIR,
    programs,
    validator::TEST_VALIDATOR,
    CliOverrides, ClusterId, Commander, FixtureStore, Prompter, TerminalPrompter, TestValidator,
};

use super::{clone::run_clone, keypair_pubkey, load_config, title, warning, CloneArgs};

const LOCAL_RPC_URL: &str = "http://localhost:8899";

#[derive(Args, Debug, Default, Clone)]
pub struct TestValidatorArgs {
    /// Start from a fresh ledger
    #[clap(long)]
    pub reset: bool,
    /// Only print the validator command
    #[clap(long)]
    pub output_only: bool,
    /// Directory the fixtures are loaded from
    #[clap(long)]
    pub account_dir: Option<PathBuf>,
    /// Path to Solana.toml, or the directory holding it
    #[clap(short, long)]
    pub config: Option<PathBuf>,
    /// Upgrade authority of the loaded programs
    #[clap(short, long)]
    pub keypair: Option<PathBuf>,
}

#[throws]
pub async fn test_validator(args: TestValidatorArgs) {
    let overrides = CliOverrides {
        cluster: None,
        account_dir: args.account_dir.clone(),
        keypair: args.keypair.clone(),
    };
    let config = load_config(args.config.as_deref(), &overrides, false)?;
    let project_dir = config.config_dir();
    let commander = Commander::new();

    if !args.output_only {
        title("Starting the test validator");
        ensure_available(&commander, TEST_VALIDATOR, &["--version"]).await?;

        let fixtures = FixtureStore::scan(&config.settings.account_dir, None)?;
        if !config.clone.is_empty() && fixtures.is_empty() {
            let prompter = TerminalPrompter;
            if prompter.confirm("No fixtures have been cloned yet, clone them now?", true) {
                run_clone(&commander, &prompter, &config, &CloneArgs::default()).await?;
            }
        }
    }

    let authority = match keypair_pubkey(&config.settings.keypair) {
        Ok(pubkey) => Some(pubkey),
        Err(err) => {
            debug!("Loading programs without an upgrade authority: {err}");
            None
        }
    };

    let local = programs::locate(&project_dir.join(DEFAULT_BUILD_DIR), &config.programs, ClusterId::Localnet)?;
    let plan = TestValidator::new(&project_dir)
        .reset(args.reset)
        .account_dir(config.settings.account_dir.clone())
        .upgrade_authority(authority)
        .local_programs(local.located.into_values())
        .plan()?;

    if args.output_only {
        println!("{}", plan.command_line());
        return;
    }

    println!(
        "Loading {} account(s) and {} program(s)",
        style(plan.accounts).bold(),
        style(plan.programs).bold()
    );
    println!(
        "Explorer: {}",
        style(format!(
            "https://explorer.solana.com/?cluster=custom&customUrl={LOCAL_RPC_URL}"
        ))
        .underlined()
    );
    if plan.accounts == 0 && !config.clone.is_empty() {
        warning("Starting without any cloned fixture");
    }
    println!("Press Ctrl+C to stop\n");

    match commander.run_until_interrupted(TEST_VALIDATOR, &plan.args).await? {
        None => println!("\n{}", style("Test validator stopped").green()),
        Some(status) if status.success() => {}
        Some(status) => bail!("{TEST_VALIDATOR} exited with {status}"),
    }
}
