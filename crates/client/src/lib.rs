//! solkit is a set of tools for working with [Solana](https://solana.com/) programs locally:
//! building and deploying them, cloning accounts, tokens and programs from a live cluster
//! into local fixtures, and running a test validator preloaded with those fixtures.
//!
//! The CLI lives in `solkit-cli`; this crate holds everything it drives.

pub use solana_sdk::{
    self,
    pubkey::Pubkey,
    signature::{read_keypair_file, Keypair},
    signer::Signer,
};

pub mod config;
pub use config::{CliOverrides, CloneConfig, CloneEntry, Config, Frequency, Settings, TokenEntry};

pub mod anchor;
pub use anchor::AnchorToml;

pub mod cluster;
pub use cluster::{ClusterId, ClusterTarget, ResolveOptions};

pub mod fixtures;
pub use fixtures::{AccountFixture, FixtureKind, FixtureStore};

pub mod cloner;
pub use cloner::{CloneOutcome, CloneReconciler, CloneSettings, Reconciliation};

pub mod programs;
pub use programs::{LocatedProgram, ProgramListing};

pub mod commander;
pub use commander::{CommandOutput, Commander, Shell};

pub mod prompt;
pub use prompt::{AutoAnswer, Prompter, TerminalPrompter};

pub mod validator;
pub use validator::TestValidator;

pub mod cargo;
pub mod git;

pub mod constants {
    pub const SOLANA_TOML: &str = "Solana.toml";
    pub const ANCHOR_TOML: &str = "Anchor.toml";
    pub const CARGO_TOML: &str = "Cargo.toml";

    pub const GIT_DIR: &str = ".git";
    pub const GIT_IGNORE: &str = ".gitignore";

    pub const DEFAULT_CLUSTER: &str = "mainnet";
    pub const DEFAULT_ACCOUNTS_DIR: &str = "accounts";
    pub const DEFAULT_KEYPAIR_PATH: &str = "~/.config/solana/id.json";

    pub const DEFAULT_CACHE_DIR: &str = ".cache";
    pub const DEFAULT_TEST_LEDGER_DIR: &str = "test-ledger";
    pub const DEFAULT_STAGING_DIR: &str = ".cache/staging/accounts";
    pub const DEFAULT_LOADED_DIR: &str = ".cache/loaded/accounts";
    pub const DEFAULT_BUILD_DIR: &str = "target/deploy";

    pub const ACCOUNT_EXTENSION: &str = "json";
    pub const PROGRAM_EXTENSION: &str = "so";

    /// How many directories `Solana.toml` discovery climbs, the start included.
    pub const DISCOVER_DEPTH: usize = 5;
    pub const DISCOVER_SKIP_DIRS: &[&str] = &["node_modules", "target", ".cache", "test-ledger"];

    pub const FETCH_TIMEOUT_SECS: u64 = 120;

    pub const SYSTEM_PROGRAM_ID: &str = "11111111111111111111111111111111";
    pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
    pub const TOKEN_2022_PROGRAM_ID: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";

    lazy_static::lazy_static! {
        /// Owners that every cluster (and the test validator) already ships with.
        pub static ref BUILTIN_PROGRAMS: std::collections::HashSet<&'static str> =
            std::collections::HashSet::from([SYSTEM_PROGRAM_ID, TOKEN_PROGRAM_ID, TOKEN_2022_PROGRAM_ID]);
    }
}
