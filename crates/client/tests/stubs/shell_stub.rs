use std::{
    collections::{HashMap, HashSet},
    fs,
    sync::RwLock,
    time::Duration,
};

use async_trait::async_trait;
use solkit_client::commander::{CommandOutput, Error, Shell};

use super::account_json;

/// Plays the part of the `solana` CLI against an in-memory cluster.
#[derive(Default, Debug)]
pub struct ShellStub {
    accounts: RwLock<HashMap<String, String>>,
    programs: RwLock<HashSet<String>>,
    hanging: RwLock<HashSet<String>>,
    broken: RwLock<HashSet<String>>,
    calls: RwLock<Vec<Vec<String>>>,
}

#[allow(unused)] // used in tests
impl ShellStub {
    pub fn with_account(self, address: &str, owner: &str, lamports: u64) -> Self {
        self.set_account(address, owner, lamports);
        self
    }

    pub fn with_program(self, address: &str) -> Self {
        self.programs.write().unwrap().insert(address.to_owned());
        self
    }

    /// Fetches of `address` never finish.
    pub fn with_hanging(self, address: &str) -> Self {
        self.hanging.write().unwrap().insert(address.to_owned());
        self
    }

    /// Fetches of `address` write a truncated file and then fail.
    pub fn with_broken(self, address: &str) -> Self {
        self.broken.write().unwrap().insert(address.to_owned());
        self
    }

    pub fn set_account(&self, address: &str, owner: &str, lamports: u64) {
        self.accounts
            .write()
            .unwrap()
            .insert(address.to_owned(), account_json(address, owner, lamports));
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.read().unwrap().clone()
    }

    pub fn fetch_count(&self, address: &str) -> usize {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter(|args| args.iter().any(|arg| arg == address))
            .count()
    }
}

#[async_trait]
impl Shell for ShellStub {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, Error> {
        assert_eq!(program, "solana");
        self.calls.write().unwrap().push(args.to_vec());

        let (address, output) = match args[0].as_str() {
            "account" => (&args[1], &args[5]),
            "program" => (&args[2], &args[3]),
            other => panic!("unexpected solana subcommand {other}"),
        };

        let hanging = self.hanging.read().unwrap().contains(address);
        if hanging {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }

        if self.broken.read().unwrap().contains(address) {
            fs::write(output, r#"{"pubkey": "trunc"#).unwrap();
            return Ok(CommandOutput {
                stderr: "Error: rpc error".to_owned(),
                status: Some(1),
                ..Default::default()
            });
        }

        let contents = match args[0].as_str() {
            "account" => self.accounts.read().unwrap().get(address).map(|json| json.clone().into_bytes()),
            _ => self
                .programs
                .read()
                .unwrap()
                .contains(address)
                .then(|| vec![0x7f, 0x45, 0x4c, 0x46]),
        };

        match contents {
            Some(contents) => {
                fs::write(output, contents).unwrap();
                Ok(CommandOutput {
                    status: Some(0),
                    ..Default::default()
                })
            }
            None => Ok(CommandOutput {
                stderr: format!("Error: AccountNotFound: pubkey={address}"),
                status: Some(1),
                ..Default::default()
            }),
        }
    }

    async fn command_exists(&self, _program: &str) -> bool {
        true
    }
}
