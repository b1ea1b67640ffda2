use std::{
    collections::{BTreeMap, BTreeSet},
    fs, io,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use fehler::{throw, throws};
use indexmap::IndexMap;
use log::{debug, info, warn};
use solana_sdk::pubkey::Pubkey;
use strum::IntoStaticStr;
use thiserror::Error;
use tokio::time::timeout;

use crate::{
    cluster::{self, resolve, ResolveOptions},
    commander::{self, Shell},
    config::{CloneEntry, Config, Frequency, Settings},
    constants::{BUILTIN_PROGRAMS, FETCH_TIMEOUT_SECS},
    fixtures::{self, fixtures_equal, move_fixtures, read_owner, FixtureKind, FixtureStore},
    prompt::Prompter,
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0:?}")]
    IoError(#[from] io::Error),
    #[error("'{0}' is not a valid address")]
    InvalidAddress(String),
    #[error(transparent)]
    ClusterError(#[from] cluster::Error),
    #[error(transparent)]
    CommandError(#[from] commander::Error),
    #[error(transparent)]
    FixtureError(#[from] fixtures::Error),
    #[error("timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),
    #[error("solana exited with status {status:?}: {stderr}")]
    FetchFailed { status: Option<i32>, stderr: String },
    #[error("no fixture was written to '{}'", .0.display())]
    MissingFixture(PathBuf),
}

/// Entries are fetched with the solana CLI, which wants the `mainnet-beta`
/// and `localhost` spellings and accepts plain urls.
const FETCH_RESOLVE: ResolveOptions = ResolveOptions {
    allow_url: true,
    include_beta_label: true,
};

#[derive(Debug, Clone)]
pub struct CloneSettings {
    /// Fetch every entry without comparing against the cache.
    pub force: bool,
    /// Fetch cached entries too and compare them against the cache.
    pub refresh: bool,
    /// Ask before overwriting a fixture that changed on the cluster.
    pub prompt: bool,
    pub staging_dir: PathBuf,
    pub fetch_timeout: Duration,
}

impl CloneSettings {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            force: false,
            refresh: false,
            prompt: true,
            staging_dir: staging_dir.into(),
            fetch_timeout: Duration::from_secs(FETCH_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum CloneOutcome {
    /// A cached fixture exists and was left alone.
    Skipped,
    /// Fetched for the first time.
    New,
    /// Fetched again and replaces the cached fixture without comparing.
    Refreshed,
    /// Fetched again and identical to the cached fixture.
    Unchanged,
    /// Fetched again and different from the cached fixture.
    Changed { overwrite: bool },
    Failed(String),
}

impl CloneOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, CloneOutcome::Failed(_))
    }

    /// Whether a freshly fetched fixture is left in staging.
    pub fn is_staged(&self) -> bool {
        matches!(
            self,
            CloneOutcome::New | CloneOutcome::Refreshed | CloneOutcome::Changed { overwrite: true }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedEntry {
    pub kind: FixtureKind,
    pub label: String,
    pub address: String,
    pub outcome: CloneOutcome,
    /// Synthesized from the owner of a cloned account.
    pub derived: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFixture {
    pub kind: FixtureKind,
    pub label: String,
    pub cached: PathBuf,
    pub overwritten: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// owner program -> cluster it was seen on
    pub owners: IndexMap<String, String>,
    /// address -> fixture that differs from the cached copy
    pub changed: BTreeMap<String, ChangedFixture>,
    pub processed: Vec<ProcessedEntry>,
}

impl Reconciliation {
    pub fn failed(&self) -> impl Iterator<Item = &ProcessedEntry> {
        self.processed.iter().filter(|entry| entry.outcome.is_failure())
    }

    pub fn derived_programs(&self) -> impl Iterator<Item = &str> {
        self.processed
            .iter()
            .filter(|entry| entry.derived)
            .map(|entry| entry.address.as_str())
    }

    /// Number of processed entries per outcome name.
    pub fn summary(&self) -> BTreeMap<&'static str, usize> {
        let mut summary = BTreeMap::new();
        for entry in &self.processed {
            *summary.entry((&entry.outcome).into()).or_default() += 1;
        }
        summary
    }

    fn record_owner(&mut self, fixture: &Path, cluster: &str) {
        if let Some(owner) = read_owner(fixture) {
            debug!("{} is owned by {owner}", fixture.display());
            self.owners.insert(owner, cluster.to_owned());
        }
    }

    fn previous_outcome(&self, kind: FixtureKind, address: &str) -> Option<CloneOutcome> {
        self.processed
            .iter()
            .find(|entry| entry.kind.extension() == kind.extension() && entry.address == address)
            .map(|entry| entry.outcome.clone())
    }
}

#[derive(Clone, Copy)]
struct Job<'e> {
    kind: FixtureKind,
    label: &'e str,
    entry: &'e CloneEntry,
    derived: bool,
}

/// Decides, per declared account, token and program, whether to fetch it
/// from its cluster, and reconciles what was fetched with the fixtures
/// already on disk.
///
/// Fetched fixtures land in [`CloneSettings::staging_dir`]; nothing in the
/// fixture directory is touched until [`finalize`].
pub struct CloneReconciler<'a> {
    shell: &'a dyn Shell,
    prompter: &'a dyn Prompter,
    settings: CloneSettings,
}

impl<'a> CloneReconciler<'a> {
    pub fn new(shell: &'a dyn Shell, prompter: &'a dyn Prompter, settings: CloneSettings) -> Self {
        Self {
            shell,
            prompter,
            settings,
        }
    }

    pub fn settings(&self) -> &CloneSettings {
        &self.settings
    }

    /// Processes accounts, then tokens, then the owner programs of both,
    /// then the configured programs, one entry at a time.
    ///
    /// Only staging directory failures are errors; every per-entry problem
    /// ends up as [`CloneOutcome::Failed`].
    #[throws]
    pub async fn reconcile(&self, config: &Config, existing: &FixtureStore) -> Reconciliation {
        prepare_staging(&self.settings.staging_dir)?;
        let mut result = Reconciliation::default();

        let accounts = config
            .clone
            .accounts()
            .map(|(label, entry)| (FixtureKind::Account, label, entry))
            .chain(config.clone.tokens().map(|(label, entry)| (FixtureKind::Token, label, entry)));
        for (kind, label, entry) in accounts {
            let job = Job {
                kind,
                label,
                entry,
                derived: false,
            };
            self.handle(job, &config.settings, existing, &mut result).await;
        }

        let derived: Vec<CloneEntry> = result
            .owners
            .iter()
            .filter(|(owner, _)| !BUILTIN_PROGRAMS.contains(owner.as_str()))
            .filter(|(owner, _)| !config.clone.has_program(owner))
            .map(|(owner, cluster)| CloneEntry::new(owner.as_str()).with_cluster(Some(cluster.clone())))
            .collect();
        for entry in &derived {
            let job = Job {
                kind: FixtureKind::Program,
                label: &entry.address,
                entry,
                derived: true,
            };
            self.handle(job, &config.settings, existing, &mut result).await;
        }

        for (label, entry) in config.clone.programs() {
            let job = Job {
                kind: FixtureKind::Program,
                label,
                entry,
                derived: false,
            };
            self.handle(job, &config.settings, existing, &mut result).await;
        }

        result
    }

    async fn handle(&self, job: Job<'_>, settings: &Settings, existing: &FixtureStore, result: &mut Reconciliation) {
        let address = &job.entry.address;
        // labels sharing an address share one fixture file
        let outcome = match result.previous_outcome(job.kind, address) {
            Some(outcome) => {
                debug!("{} ({address}) was already handled in this run", job.label);
                outcome
            }
            None => self.process(&job, settings, existing, result).await,
        };
        result.processed.push(ProcessedEntry {
            kind: job.kind,
            label: job.label.to_owned(),
            address: address.clone(),
            outcome,
            derived: job.derived,
        });
    }

    async fn process(
        &self,
        job: &Job<'_>,
        settings: &Settings,
        existing: &FixtureStore,
        result: &mut Reconciliation,
    ) -> CloneOutcome {
        let Job { kind, label, entry, .. } = *job;
        let address = entry.address.as_str();
        let cluster = entry.effective_cluster(settings);
        let cached = existing.path_of(address);
        let always = self.settings.force || entry.frequency == Frequency::Always;

        if let Some(cached) = cached.as_deref().filter(|_| !always && !self.settings.refresh) {
            if kind.is_account_data() {
                result.record_owner(cached, cluster);
            }
            info!("Skipping {kind} {label} ({address}), already cloned");
            return CloneOutcome::Skipped;
        }

        info!("Cloning {kind} {label} ({address}) from {cluster}");
        let staged = match self.stage(kind, address, cluster, settings).await {
            Ok(staged) => staged,
            Err(err) => {
                warn!("Failed to clone {kind} {label} ({address}): {err}");
                // a partial write must never reach the fixture directory
                let partial = self.settings.staging_dir.join(kind.file_name(address));
                if partial.exists() {
                    discard(&partial);
                }
                return CloneOutcome::Failed(err.to_string());
            }
        };
        if kind.is_account_data() {
            result.record_owner(&staged, cluster);
        }

        match cached {
            None => CloneOutcome::New,
            Some(_) if always || !kind.is_account_data() => CloneOutcome::Refreshed,
            Some(cached) => self.compare(job, &cached, &staged, result),
        }
    }

    #[throws]
    async fn stage(&self, kind: FixtureKind, address: &str, cluster: &str, settings: &Settings) -> PathBuf {
        if Pubkey::from_str(address).is_err() {
            throw!(Error::InvalidAddress(address.to_owned()));
        }
        let url = resolve(cluster, FETCH_RESOLVE)?.url_arg(&settings.networks);
        self.fetch(kind, address, &url).await?
    }

    #[throws]
    async fn fetch(&self, kind: FixtureKind, address: &str, url: &str) -> PathBuf {
        let staged = self.settings.staging_dir.join(kind.file_name(address));
        let args = match kind {
            FixtureKind::Program => program_dump_args(address, &staged, url),
            FixtureKind::Account | FixtureKind::Token => account_fetch_args(address, &staged, url),
        };

        let output = timeout(self.settings.fetch_timeout, self.shell.run("solana", &args))
            .await
            .map_err(|_| Error::Timeout(self.settings.fetch_timeout))??;
        if !output.success() {
            throw!(Error::FetchFailed {
                status: output.status,
                stderr: output.stderr.trim().to_owned(),
            });
        }
        if !staged.is_file() {
            throw!(Error::MissingFixture(staged));
        }
        staged
    }

    fn compare(&self, job: &Job<'_>, cached: &Path, staged: &Path, result: &mut Reconciliation) -> CloneOutcome {
        let Job { kind, label, entry, .. } = *job;
        let address = entry.address.as_str();

        match fixtures_equal(cached, staged) {
            None => {
                warn!(
                    "Unable to compare with the cached fixture '{}', replacing it",
                    cached.display()
                );
                CloneOutcome::New
            }
            Some(true) => {
                debug!("{kind} {label} ({address}) is unchanged");
                discard(staged);
                CloneOutcome::Unchanged
            }
            Some(false) => {
                warn!("{kind} {label} ({address}) changed since it was cloned");
                let overwrite = self.settings.prompt
                    && self.prompter.confirm(
                        &format!("{kind} {label} ({address}) changed on the cluster. Overwrite the local fixture?"),
                        false,
                    );
                if !overwrite {
                    discard(staged);
                }
                result.changed.insert(
                    address.to_owned(),
                    ChangedFixture {
                        kind,
                        label: label.to_owned(),
                        cached: cached.to_path_buf(),
                        overwritten: overwrite,
                    },
                );
                CloneOutcome::Changed { overwrite }
            }
        }
    }
}

fn discard(staged: &Path) {
    if let Err(err) = fs::remove_file(staged) {
        warn!("Unable to discard '{}': {err}", staged.display());
    }
}

/// `solana account` arguments writing a json snapshot to `output`.
pub fn account_fetch_args(address: &str, output: &Path, url: &str) -> Vec<String> {
    vec![
        "account".to_owned(),
        address.to_owned(),
        "--output".to_owned(),
        "json".to_owned(),
        "--output-file".to_owned(),
        output.display().to_string(),
        "--url".to_owned(),
        url.to_owned(),
    ]
}

/// `solana program dump` arguments writing the program binary to `output`.
pub fn program_dump_args(address: &str, output: &Path, url: &str) -> Vec<String> {
    vec![
        "program".to_owned(),
        "dump".to_owned(),
        address.to_owned(),
        output.display().to_string(),
        "--url".to_owned(),
        url.to_owned(),
    ]
}

/// Empties the staging directory, creating it when needed.
#[throws(io::Error)]
pub fn prepare_staging(staging_dir: &Path) {
    if staging_dir.exists() {
        fs::remove_dir_all(staging_dir)?;
    }
    fs::create_dir_all(staging_dir)?;
}

/// Moves everything left in staging into the fixture directory, replacing
/// what is there, and removes the staging directory.
#[throws]
pub fn finalize(staging_dir: &Path, account_dir: &Path) -> usize {
    let moved = move_fixtures(staging_dir, account_dir, true)?;
    if staging_dir.exists() {
        fs::remove_dir_all(staging_dir)?;
    }
    info!("Moved {moved} fixture(s) into '{}'", account_dir.display());
    moved
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloneCounts {
    pub expected: usize,
    pub actual: usize,
}

impl CloneCounts {
    pub fn is_complete(&self) -> bool {
        self.actual == self.expected
    }
}

/// Counts which of the declared addresses, plus the owner programs derived
/// along the way, now have a fixture in `account_dir`. Other files in the
/// directory are not counted.
#[throws(io::Error)]
pub fn validate_clone_counts(account_dir: &Path, config: &Config, reconciliation: &Reconciliation) -> CloneCounts {
    let mut expected: BTreeSet<&str> = config.clone.addresses();
    expected.extend(reconciliation.derived_programs());
    let fixtures = FixtureStore::scan(account_dir, None)?;
    let actual = expected.iter().filter(|address| fixtures.contains(address)).count();

    let counts = CloneCounts {
        expected: expected.len(),
        actual,
    };
    if !counts.is_complete() {
        warn!(
            "Expected {} fixture(s) in '{}', found {actual}",
            counts.expected,
            account_dir.display()
        );
    }
    counts
}
