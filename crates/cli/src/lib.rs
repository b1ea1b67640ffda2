use anyhow::Error;
use clap::{Parser, Subcommand};
use fehler::throws;

// subcommand functions to call
mod command;

#[derive(Parser)]
#[clap(version, propagate_version = true)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Clone the accounts, tokens and programs declared in Solana.toml into local fixtures
    Clone(command::CloneArgs),
    /// Build your Solana programs with `cargo build-sbf`
    Build(command::BuildArgs),
    /// Deploy or upgrade a Solana program
    Deploy(command::DeployArgs),
    /// Run `solana-test-validator` preloaded with your fixtures and local programs
    TestValidator(command::TestValidatorArgs),
}

#[throws]
pub async fn start() {
    let cli = Cli::parse();

    match cli.command {
        Command::Clone(args) => command::clone(args).await?,
        Command::Build(args) => command::build(args).await?,
        Command::Deploy(args) => command::deploy(args).await?,
        Command::TestValidator(args) => command::test_validator(args).await?,
    }
}
