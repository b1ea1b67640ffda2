use std::{
    fs, io,
    path::{Path, PathBuf},
};

use fehler::throws;
use log::{debug, warn};
use solana_sdk::pubkey::Pubkey;

use crate::{
    constants::{ACCOUNT_EXTENSION, DEFAULT_LOADED_DIR, DEFAULT_TEST_LEDGER_DIR, PROGRAM_EXTENSION},
    fixtures::FixtureStore,
    programs::LocatedProgram,
};

pub const TEST_VALIDATOR: &str = "solana-test-validator";

/// Arguments for `solana-test-validator` and what they load.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub args: Vec<String>,
    pub accounts: usize,
    pub programs: usize,
}

impl LaunchPlan {
    pub fn command_line(&self) -> String {
        let mut line = TEST_VALIDATOR.to_owned();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Assembles a `solana-test-validator` run preloaded with cloned fixtures
/// and locally built programs.
///
/// The fixture directory itself is never handed to the validator; its
/// account snapshots are copied into a separate loaded directory first.
#[derive(Debug, Clone)]
pub struct TestValidator {
    reset: bool,
    account_dir: Option<PathBuf>,
    loaded_dir: PathBuf,
    ledger_dir: PathBuf,
    authority: Option<Pubkey>,
    local_programs: Vec<LocatedProgram>,
}

impl TestValidator {
    /// Loaded and ledger directories live under `project_dir`.
    pub fn new(project_dir: &Path) -> Self {
        Self {
            reset: false,
            account_dir: None,
            loaded_dir: project_dir.join(DEFAULT_LOADED_DIR),
            ledger_dir: project_dir.join(DEFAULT_TEST_LEDGER_DIR),
            authority: None,
            local_programs: Vec::new(),
        }
    }

    pub fn reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    pub fn account_dir(mut self, account_dir: impl Into<PathBuf>) -> Self {
        self.account_dir = Some(account_dir.into());
        self
    }

    /// Cloned programs become upgradeable by `authority`.
    pub fn upgrade_authority(mut self, authority: Option<Pubkey>) -> Self {
        self.authority = authority;
        self
    }

    pub fn local_programs(mut self, programs: impl IntoIterator<Item = LocatedProgram>) -> Self {
        self.local_programs.extend(programs);
        self
    }

    pub fn ledger_dir(&self) -> &Path {
        &self.ledger_dir
    }

    pub fn loaded_dir(&self) -> &Path {
        &self.loaded_dir
    }

    /// Prepares the loaded and ledger directories and returns the arguments.
    #[throws(io::Error)]
    pub fn plan(&self) -> LaunchPlan {
        let mut plan = LaunchPlan::default();

        if self.reset {
            if self.loaded_dir.exists() {
                fs::remove_dir_all(&self.loaded_dir)?;
            }
            plan.args.push("--reset".to_owned());
        }

        let mut cloned_programs = Vec::new();
        match &self.account_dir {
            Some(account_dir) if account_dir.is_dir() => {
                plan.accounts = load_accounts(account_dir, &self.loaded_dir)?;
                plan.args.push("--account-dir".to_owned());
                plan.args.push(self.loaded_dir.display().to_string());

                let programs = FixtureStore::scan(account_dir, Some(PROGRAM_EXTENSION))?;
                for (address, file) in programs.iter() {
                    let path = account_dir.join(file).display().to_string();
                    match self.authority {
                        Some(authority) => plan.args.extend([
                            "--upgradeable-program".to_owned(),
                            address.to_owned(),
                            path,
                            authority.to_string(),
                        ]),
                        None => plan.args.extend(["--bpf-program".to_owned(), address.to_owned(), path]),
                    }
                    cloned_programs.push(address.to_owned());
                }
            }
            Some(account_dir) => {
                warn!("Account dir does not exist: {}", account_dir.display());
            }
            None => {}
        }

        plan.programs = cloned_programs.len();
        for program in &self.local_programs {
            if cloned_programs.contains(&program.address) {
                warn!(
                    "Program {} is both cloned and built locally, loading the cloned binary",
                    program.address
                );
                continue;
            }
            plan.args.extend([
                "--bpf-program".to_owned(),
                program.address.clone(),
                program.file_path.display().to_string(),
            ]);
            plan.programs += 1;
        }

        fs::create_dir_all(&self.ledger_dir)?;
        plan.args.push("--ledger".to_owned());
        plan.args.push(self.ledger_dir.display().to_string());

        plan
    }
}

/// Copies the account snapshots of `account_dir` into `loaded_dir`.
#[throws(io::Error)]
fn load_accounts(account_dir: &Path, loaded_dir: &Path) -> usize {
    fs::create_dir_all(loaded_dir)?;
    let accounts = FixtureStore::scan(account_dir, Some(ACCOUNT_EXTENSION))?;
    for (_, file) in accounts.iter() {
        fs::copy(account_dir.join(file), loaded_dir.join(file))?;
    }
    debug!("Loaded {} account(s) into '{}'", accounts.len(), loaded_dir.display());
    accounts.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CLONED: &str = "metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s";

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        let accounts = dir.path().join("accounts");
        fs::create_dir_all(&accounts).unwrap();
        fs::write(accounts.join("Acc1.json"), "{}").unwrap();
        fs::write(accounts.join("Acc2.json"), "{}").unwrap();
        fs::write(accounts.join(format!("{CLONED}.so")), [0u8; 4]).unwrap();
        dir
    }

    #[test]
    fn fixtures_are_copied_and_loaded() {
        let dir = project();
        let validator = TestValidator::new(dir.path()).account_dir(dir.path().join("accounts"));

        let plan = validator.plan().unwrap();

        let loaded = dir.path().join(DEFAULT_LOADED_DIR);
        assert_eq!(plan.accounts, 2);
        assert_eq!(plan.programs, 1);
        assert!(loaded.join("Acc1.json").is_file());
        assert!(!loaded.join(format!("{CLONED}.so")).exists());
        // the fixtures stay where they are
        assert!(dir.path().join("accounts/Acc1.json").is_file());

        let program = dir.path().join(format!("accounts/{CLONED}.so"));
        assert_eq!(
            plan.args,
            vec![
                "--account-dir".to_owned(),
                loaded.display().to_string(),
                "--bpf-program".to_owned(),
                CLONED.to_owned(),
                program.display().to_string(),
                "--ledger".to_owned(),
                dir.path().join(DEFAULT_TEST_LEDGER_DIR).display().to_string(),
            ]
        );
        assert!(validator.ledger_dir().is_dir());
    }

    #[test]
    fn authority_makes_cloned_programs_upgradeable() {
        let dir = project();
        let authority = Pubkey::new_unique();
        let plan = TestValidator::new(dir.path())
            .account_dir(dir.path().join("accounts"))
            .upgrade_authority(Some(authority))
            .plan()
            .unwrap();

        let index = plan.args.iter().position(|arg| arg == "--upgradeable-program").unwrap();
        assert_eq!(plan.args[index + 1], CLONED);
        assert_eq!(plan.args[index + 3], authority.to_string());
    }

    #[test]
    fn reset_clears_the_loaded_dir() {
        let dir = project();
        let stale = dir.path().join(DEFAULT_LOADED_DIR).join("Stale.json");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, "{}").unwrap();

        let plan = TestValidator::new(dir.path())
            .reset(true)
            .account_dir(dir.path().join("accounts"))
            .plan()
            .unwrap();

        assert_eq!(plan.args[0], "--reset");
        assert!(!stale.exists());
        assert!(plan.command_line().starts_with("solana-test-validator --reset --account-dir"));
    }

    #[test]
    fn local_programs_are_loaded_unless_cloned() {
        let dir = project();
        let plan = TestValidator::new(dir.path())
            .account_dir(dir.path().join("missing"))
            .local_programs([LocatedProgram {
                address: "Count3AcZucFDPSFBAeHkQ6AvttieKUkyJ8HiQGhQwe".to_owned(),
                file_path: PathBuf::from("/repo/target/deploy/counter.so"),
            }])
            .plan()
            .unwrap();

        assert_eq!(plan.accounts, 0);
        assert_eq!(plan.programs, 1);
        assert_eq!(
            &plan.args[..3],
            &[
                "--bpf-program".to_owned(),
                "Count3AcZucFDPSFBAeHkQ6AvttieKUkyJ8HiQGhQwe".to_owned(),
                "/repo/target/deploy/counter.so".to_owned()
            ]
        );

        let plan = TestValidator::new(dir.path())
            .account_dir(dir.path().join("accounts"))
            .local_programs([LocatedProgram {
                address: CLONED.to_owned(),
                file_path: PathBuf::from("/repo/target/deploy/metadata.so"),
            }])
            .plan()
            .unwrap();
        assert_eq!(plan.programs, 1);
        assert_eq!(plan.args.iter().filter(|arg| *arg == "--bpf-program").count(), 1);
    }
}
