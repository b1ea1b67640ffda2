use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use fehler::{throw, throws};
use log::debug;
use thiserror::Error;

use crate::{commander::{self, Shell}, constants::GIT_IGNORE};

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0:?}")]
    IoError(#[from] io::Error),
    #[error(transparent)]
    CommandError(#[from] commander::Error),
    #[error("git init failed: {0}")]
    InitFailed(String),
}

fn git_args(dir: &Path, args: &[&str]) -> Vec<String> {
    let mut git = vec!["-C".to_owned(), dir.display().to_string()];
    git.extend(args.iter().map(|arg| arg.to_string()));
    git
}

/// Whether `dir` is inside a git work tree.
pub async fn is_git_repo(shell: &dyn Shell, dir: &Path) -> bool {
    match shell.run("git", &git_args(dir, &["rev-parse", "--is-inside-work-tree"])).await {
        Ok(output) => output.success() && output.stdout.trim() == "true",
        Err(err) => {
            debug!("Unable to run git: {err}");
            false
        }
    }
}

#[throws]
pub async fn init_repo(shell: &dyn Shell, dir: &Path) {
    fs::create_dir_all(dir)?;
    let output = shell.run("git", &["init".to_owned(), dir.display().to_string()]).await?;
    if !output.success() {
        throw!(Error::InitFailed(output.stderr.trim().to_owned()));
    }
}

/// Appends the `entries` missing from `dir/.gitignore`, creating the file
/// when needed. Returns the entries that were added.
#[throws]
pub fn update_gitignore(dir: &Path, entries: &[&str]) -> Vec<String> {
    let path = dir.join(GIT_IGNORE);
    let existing = if path.is_file() {
        fs::read_to_string(&path)?
    } else {
        String::new()
    };

    let present: Vec<&str> = existing
        .lines()
        .map(|line| line.trim().trim_start_matches('/').trim_end_matches('/'))
        .collect();
    let missing: Vec<String> = entries
        .iter()
        .filter(|entry| !present.contains(&entry.trim_matches('/')))
        .map(|entry| entry.to_string())
        .collect();
    if missing.is_empty() {
        return missing;
    }

    let mut file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    for entry in &missing {
        writeln!(file, "{entry}")?;
    }
    debug!("Added {} to {}", missing.join(", "), path.display());
    missing
}
