use std::path::{Path, PathBuf};

use anyhow::{Error, Result};
use clap::Args;
use console::style;
use fehler::throws;
use solkit_client::{
    cloner::{finalize, validate_clone_counts},
    commander::ensure_available,
    constants::{DEFAULT_CACHE_DIR, DEFAULT_STAGING_DIR, DEFAULT_TEST_LEDGER_DIR},
    git, AutoAnswer, CliOverrides, CloneReconciler, CloneSettings, Commander, Config, FixtureStore,
    Prompter, TerminalPrompter,
};

use super::{load_config, resolve_cli_cluster, title, warning};

#[derive(Args, Debug, Default, Clone)]
pub struct CloneArgs {
    /// Clone every fixture again, replacing the local copies without comparing
    #[clap(long)]
    pub force: bool,
    /// Clone cached fixtures again and report the ones that changed
    #[clap(long)]
    pub refresh: bool,
    /// Never ask; changed fixtures keep their local copy
    #[clap(long)]
    pub no_prompt: bool,
    /// Directory the fixtures are stored in
    #[clap(long)]
    pub account_dir: Option<PathBuf>,
    /// Path to Solana.toml, or the directory holding it
    #[clap(short, long)]
    pub config: Option<PathBuf>,
    /// Cluster moniker or rpc url to clone from, unless an entry names its own
    #[clap(short = 'u', long)]
    pub url: Option<String>,
}

#[throws]
pub async fn clone(args: CloneArgs) {
    title("Clone fixtures (accounts, tokens and programs)");

    if let Some(url) = &args.url {
        resolve_cli_cluster(url)?;
    }
    let overrides = CliOverrides {
        cluster: args.url.clone(),
        account_dir: args.account_dir.clone(),
        keypair: None,
    };
    let config = load_config(args.config.as_deref(), &overrides, true)?;

    let commander = Commander::new();
    ensure_available(&commander, "solana", &["account", "--help"]).await?;

    let prompter: Box<dyn Prompter> = if args.no_prompt {
        Box::new(AutoAnswer(false))
    } else {
        Box::new(TerminalPrompter)
    };
    track_with_git(&commander, prompter.as_ref(), &config.config_dir()).await?;

    run_clone(&commander, prompter.as_ref(), &config, &args).await?;
}

/// Clones the fixtures of `config`, moves them into place and reports the outcome.
#[throws]
pub(crate) async fn run_clone(commander: &Commander, prompter: &dyn Prompter, config: &Config, args: &CloneArgs) {
    if config.clone.is_empty() {
        warning("No accounts, tokens or programs to clone are declared");
        return;
    }

    let account_dir = &config.settings.account_dir;
    let settings = CloneSettings {
        force: args.force,
        refresh: args.refresh,
        prompt: !args.no_prompt,
        ..CloneSettings::new(config.config_dir().join(DEFAULT_STAGING_DIR))
    };
    let staging_dir = settings.staging_dir.clone();

    let existing = FixtureStore::scan(account_dir, None)?;
    let reconciliation = CloneReconciler::new(commander, prompter, settings)
        .reconcile(config, &existing)
        .await?;
    finalize(&staging_dir, account_dir)?;

    println!();
    for (outcome, count) in reconciliation.summary() {
        println!("  {:>10} {count}", style(outcome).bold());
    }
    for (address, changed) in &reconciliation.changed {
        let action = if changed.overwritten { "updated" } else { "kept the local copy" };
        warning(&format!("{} {} ({address}) changed on the cluster, {action}", changed.kind, changed.label));
    }
    for failed in reconciliation.failed() {
        warning(&format!("Failed to clone {} {} ({})", failed.kind, failed.label, failed.address));
    }

    let counts = validate_clone_counts(account_dir, config, &reconciliation)?;
    if counts.is_complete() {
        println!(
            "\n{} {} fixture(s) in {}",
            style("Done:").green().bold(),
            counts.actual,
            account_dir.display()
        );
    } else {
        warning(&format!(
            "Expected {} fixture(s) but found {} in {}",
            counts.expected,
            counts.actual,
            account_dir.display()
        ));
    }
}

/// Fixtures should be tracked; offer `git init` and keep the caches ignored.
async fn track_with_git(commander: &Commander, prompter: &dyn Prompter, dir: &Path) -> Result<()> {
    if !git::is_git_repo(commander, dir).await {
        warning("Cloning fixtures without tracking changes via git is not recommended");
        if !prompter.confirm("Initialize a git repository here?", true) {
            return Ok(());
        }
        git::init_repo(commander, dir).await?;
    }
    let added = git::update_gitignore(dir, &[DEFAULT_CACHE_DIR, DEFAULT_TEST_LEDGER_DIR])?;
    if !added.is_empty() {
        println!("Added {} to .gitignore", added.join(", "));
    }
    Ok(())
}
