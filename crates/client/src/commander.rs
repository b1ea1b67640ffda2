use std::{
    io,
    path::Path,
    process::{ExitStatus, Stdio},
};

use async_trait::async_trait;
use fehler::{throw, throws};
use log::debug;
use serde::Deserialize;
use thiserror::Error;
use tokio::{process::Command, signal};

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0:?}")]
    IoError(#[from] io::Error),
    #[error("unable to detect the '{0}' command, do you have it installed?")]
    CommandNotFound(String),
    #[error("'{command}' failed with {status}")]
    CommandFailed { command: String, status: ExitStatus },
    #[error("unable to parse the program info: {0}")]
    ProgramInfoError(#[from] serde_json::Error),
}

/// Captured result of a finished command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub status: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// The toolchain as seen by the cloner and the commands: something that
/// can run a program to completion and report what it printed.
#[async_trait]
pub trait Shell: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, Error>;

    async fn command_exists(&self, program: &str) -> bool;
}

/// `Commander` runs the Solana toolchain as child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct Commander;

impl Commander {
    pub fn new() -> Self {
        Self
    }

    /// Runs `program` in the foreground with the user's terminal attached.
    #[throws]
    pub async fn run_attached(&self, program: &str, args: &[String]) -> ExitStatus {
        debug!("Running attached: {program} {}", args.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .spawn()
            .map_err(|err| spawn_error(program, err))?;
        child.wait().await?
    }

    /// Like [`Commander::run_attached`], but stops the child on ctrl+c.
    /// Returns `None` when interrupted.
    #[throws]
    pub async fn run_until_interrupted(&self, program: &str, args: &[String]) -> Option<ExitStatus> {
        debug!("Running until interrupted: {program} {}", args.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| spawn_error(program, err))?;

        let status = tokio::select! {
            status = child.wait() => Some(status?),
            _ = signal::ctrl_c() => {
                if let Err(err) = child.kill().await {
                    debug!("{program} already stopped: {err}");
                }
                None
            }
        };
        status
    }

    /// Fetches `solana program show` for `address`; `None` when the program
    /// is not deployed on that cluster.
    #[throws]
    pub async fn program_info(&self, address: &str, url: &str) -> Option<ProgramInfo> {
        let output = self.run("solana", &program_show_args(address, url)).await?;
        if !output.success() {
            debug!("solana program show {address}: {}", output.stderr.trim());
            return None;
        }
        Some(ProgramInfo::parse(&output.stdout)?)
    }
}

#[async_trait]
impl Shell for Commander {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, Error> {
        debug!("Running: {program} {}", args.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| spawn_error(program, err))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code(),
        })
    }

    async fn command_exists(&self, program: &str) -> bool {
        Command::new(program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

fn spawn_error(program: &str, err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound => Error::CommandNotFound(program.to_owned()),
        _ => Error::IoError(err),
    }
}

/// Fails with [`Error::CommandNotFound`] unless `program args..` runs successfully,
/// e.g. `ensure_available(shell, "cargo", &["build-sbf", "--help"])`.
#[throws]
pub async fn ensure_available(shell: &dyn Shell, program: &str, args: &[&str]) {
    let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
    let command = format!("{program} {}", args.join(" ")).trim().to_owned();
    match shell.run(program, &args).await {
        Ok(output) if output.success() => {}
        Ok(_) | Err(Error::CommandNotFound(_)) => throw!(Error::CommandNotFound(command)),
        Err(err) => throw!(err),
    }
}

/// `cargo build-sbf` arguments.
pub fn build_sbf_args(manifest_path: Option<&Path>, workspace: bool, tools_version: Option<&str>) -> Vec<String> {
    let mut args = vec!["build-sbf".to_owned()];
    if let Some(manifest_path) = manifest_path {
        args.push("--manifest-path".to_owned());
        args.push(manifest_path.display().to_string());
    }
    if workspace {
        args.push("--workspace".to_owned());
    }
    if let Some(version) = tools_version {
        args.push("--tools-version".to_owned());
        args.push(if version.starts_with('v') {
            version.to_owned()
        } else {
            format!("v{version}")
        });
    }
    args
}

#[derive(Debug, Clone)]
pub struct DeployArgs<'a> {
    pub program_path: &'a Path,
    /// Program address of an upgrade, or the program keypair path of a first deploy.
    pub program_id: &'a str,
    pub url: &'a str,
    pub keypair: Option<&'a Path>,
    pub upgrade_authority: Option<&'a Path>,
}

/// `solana program deploy` arguments; `passthrough` is appended verbatim.
pub fn deploy_args(deploy: &DeployArgs, passthrough: &[String]) -> Vec<String> {
    let mut args: Vec<String> = ["program", "deploy", "--url", deploy.url]
        .iter()
        .map(|arg| arg.to_string())
        .collect();
    if let Some(keypair) = deploy.keypair {
        args.push("--keypair".to_owned());
        args.push(keypair.display().to_string());
    }
    if let Some(authority) = deploy.upgrade_authority {
        args.push("--upgrade-authority".to_owned());
        args.push(authority.display().to_string());
    }
    args.push("--program-id".to_owned());
    args.push(deploy.program_id.to_owned());
    args.push(deploy.program_path.display().to_string());
    args.extend(passthrough.iter().cloned());
    args
}

pub fn program_show_args(address: &str, url: &str) -> Vec<String> {
    ["program", "show", address, "--output", "json", "--url", url]
        .iter()
        .map(|arg| arg.to_string())
        .collect()
}

/// `solana program show --output json`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramInfo {
    pub program_id: String,
    pub owner: String,
    #[serde(default)]
    pub programdata_address: Option<String>,
    /// `"none"` once the program is immutable.
    #[serde(default)]
    pub authority: Option<String>,
    #[serde(default)]
    pub last_deploy_slot: Option<u64>,
    #[serde(default)]
    pub data_len: Option<u64>,
    #[serde(default)]
    pub lamports: u64,
}

impl ProgramInfo {
    #[throws(serde_json::Error)]
    pub fn parse(json: &str) -> Self {
        serde_json::from_str(json.trim())?
    }

    pub fn upgrade_authority(&self) -> Option<&str> {
        self.authority.as_deref().filter(|authority| *authority != "none")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn build_args() {
        assert_eq!(build_sbf_args(None, false, None), vec!["build-sbf"]);
        assert_eq!(
            build_sbf_args(Some(Path::new("/repo/Cargo.toml")), true, Some("1.41")),
            vec![
                "build-sbf",
                "--manifest-path",
                "/repo/Cargo.toml",
                "--workspace",
                "--tools-version",
                "v1.41"
            ]
        );
        assert_eq!(build_sbf_args(None, false, Some("v1.39"))[2], "v1.39");
    }

    #[test]
    fn deploy_arguments_keep_the_program_path_before_passthrough() {
        let program_path = PathBuf::from("/repo/target/deploy/counter.so");
        let keypair = PathBuf::from("/keys/id.json");
        let args = deploy_args(
            &DeployArgs {
                program_path: &program_path,
                program_id: "Count3AcZucFDPSFBAeHkQ6AvttieKUkyJ8HiQGhQwe",
                url: "devnet",
                keypair: Some(&keypair),
                upgrade_authority: None,
            },
            &["--with-compute-unit-price".to_owned(), "1".to_owned()],
        );
        assert_eq!(
            args,
            vec![
                "program",
                "deploy",
                "--url",
                "devnet",
                "--keypair",
                "/keys/id.json",
                "--program-id",
                "Count3AcZucFDPSFBAeHkQ6AvttieKUkyJ8HiQGhQwe",
                "/repo/target/deploy/counter.so",
                "--with-compute-unit-price",
                "1"
            ]
        );
    }

    #[test]
    fn parses_program_info() {
        let info = ProgramInfo::parse(
            r#"{"programId":"Count3AcZucFDPSFBAeHkQ6AvttieKUkyJ8HiQGhQwe","owner":"BPFLoaderUpgradeab1e11111111111111111111111","programdataAddress":"Data111111111111111111111111111111111111111","authority":"Auth111111111111111111111111111111111111111","lastDeploySlot":1234,"dataLen":2048,"lamports":14000000}"#,
        )
        .unwrap();
        assert_eq!(info.upgrade_authority(), Some("Auth111111111111111111111111111111111111111"));
        assert_eq!(info.last_deploy_slot, Some(1234));

        let frozen = ProgramInfo {
            authority: Some("none".to_owned()),
            ..info
        };
        assert_eq!(frozen.upgrade_authority(), None);
    }

    #[tokio::test]
    async fn runs_commands_and_captures_output() {
        let output = Commander::new().run("echo", &["hello".to_owned()]).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");

        let missing = Commander::new().run("solkit-missing-binary", &[]).await;
        assert!(matches!(missing, Err(Error::CommandNotFound(_))));
        assert!(!Commander::new().command_exists("solkit-missing-binary").await);
    }

    #[tokio::test]
    async fn exited_children_report_their_status() {
        let commander = Commander::new();
        let status = commander.run_until_interrupted("sh", &["-c".to_owned(), "exit 3".to_owned()]).await.unwrap();
        assert_eq!(status.and_then(|status| status.code()), Some(3));

        let missing = commander.run_until_interrupted("solkit-missing-binary", &[]).await;
        assert!(matches!(missing, Err(Error::CommandNotFound(_))));
    }

    #[tokio::test]
    async fn ensure_available_reports_the_full_command() {
        let err = ensure_available(&Commander::new(), "solkit-missing-binary", &["build-sbf", "--help"])
            .await
            .unwrap_err();
        match err {
            Error::CommandNotFound(command) => assert_eq!(command, "solkit-missing-binary build-sbf --help"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
