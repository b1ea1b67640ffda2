use std::{
    collections::BTreeSet,
    env, fs, io,
    path::{Path, PathBuf},
};

use fehler::{throw, throws};
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    cluster::canonical_cluster_key,
    constants::{
        DEFAULT_ACCOUNTS_DIR, DEFAULT_CLUSTER, DEFAULT_KEYPAIR_PATH, DISCOVER_DEPTH,
        DISCOVER_SKIP_DIRS, GIT_DIR, SOLANA_TOML,
    },
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0:?}")]
    IoError(#[from] io::Error),
    #[error("unable to parse '{}': {}", .path.display(), .source)]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("no Solana.toml config file found (searched from '{}')", .0.display())]
    NotFound(PathBuf),
}

/// cluster -> program label -> program address
pub type ProgramsByCluster = IndexMap<String, IndexMap<String, String>>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Only clone when no local fixture exists yet.
    #[default]
    Cached,
    /// Clone on every run.
    Always,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneEntry {
    pub address: String,
    /// Defaults to the entry's label.
    #[serde(default)]
    pub name: String,
    /// Overrides `settings.cluster` for this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(default)]
    pub frequency: Frequency,
}

impl CloneEntry {
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            name: address.clone(),
            address,
            cluster: None,
            frequency: Frequency::Cached,
        }
    }

    pub fn with_cluster(mut self, cluster: Option<String>) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn effective_cluster<'a>(&'a self, settings: &'a Settings) -> &'a str {
        self.cluster.as_deref().unwrap_or(&settings.cluster)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHolder {
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
}

/// A token mint to clone. The mint metadata is carried along untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenEntry {
    #[serde(flatten)]
    pub entry: CloneEntry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mint_authority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freeze_authority: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub holders: Vec<TokenHolder>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloneConfig {
    pub account: IndexMap<String, CloneEntry>,
    pub token: IndexMap<String, TokenEntry>,
    pub program: IndexMap<String, CloneEntry>,
}

impl CloneConfig {
    pub fn is_empty(&self) -> bool {
        self.account.is_empty() && self.token.is_empty() && self.program.is_empty()
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&String, &CloneEntry)> {
        self.account.iter()
    }

    pub fn tokens(&self) -> impl Iterator<Item = (&String, &CloneEntry)> {
        self.token.iter().map(|(label, token)| (label, &token.entry))
    }

    pub fn programs(&self) -> impl Iterator<Item = (&String, &CloneEntry)> {
        self.program.iter()
    }

    pub fn has_account(&self, address: &str) -> bool {
        self.account.values().any(|entry| entry.address == address)
    }

    pub fn has_program(&self, address: &str) -> bool {
        self.program.values().any(|entry| entry.address == address)
    }

    /// Every distinct address declared, across accounts, tokens and programs.
    pub fn addresses(&self) -> BTreeSet<&str> {
        self.accounts()
            .chain(self.tokens())
            .chain(self.programs())
            .map(|(_, entry)| entry.address.as_str())
            .collect()
    }

    fn fill_names(&mut self) {
        let entries = self
            .account
            .iter_mut()
            .chain(self.program.iter_mut())
            .chain(self.token.iter_mut().map(|(label, token)| (label, &mut token.entry)));
        for (label, entry) in entries {
            if entry.name.is_empty() {
                entry.name = label.clone();
            }
        }
    }
}

/// Custom rpc urls, overriding the public endpoints of each cluster.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Networks {
    #[serde(alias = "mainnet-beta")]
    pub mainnet: Option<String>,
    pub devnet: Option<String>,
    pub testnet: Option<String>,
    #[serde(alias = "localhost")]
    pub localnet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Default cluster for every operation, a moniker or an rpc url.
    pub cluster: String,
    pub account_dir: PathBuf,
    pub keypair: PathBuf,
    pub networks: Networks,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cluster: DEFAULT_CLUSTER.to_owned(),
            account_dir: DEFAULT_ACCOUNTS_DIR.into(),
            keypair: DEFAULT_KEYPAIR_PATH.into(),
            networks: Networks::default(),
        }
    }
}

impl Settings {
    fn resolve_paths(mut self, base: &Path) -> Self {
        self.account_dir = resolve_path(base, &self.account_dir);
        self.keypair = resolve_path(base, &self.keypair);
        self
    }
}

/// Settings passed on the command line.
///
/// An override only wins when it differs from the field's default, so a
/// flag left at its default never masks a value from `Solana.toml`.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub cluster: Option<String>,
    pub account_dir: Option<PathBuf>,
    pub keypair: Option<PathBuf>,
}

impl CliOverrides {
    pub fn apply(&self, settings: &mut Settings, cwd: &Path) {
        let defaults = Settings::default();
        if let Some(cluster) = self.cluster.as_ref().filter(|c| **c != defaults.cluster) {
            settings.cluster = cluster.clone();
        }
        if let Some(dir) = self.account_dir.as_ref().filter(|d| **d != defaults.account_dir) {
            settings.account_dir = resolve_path(cwd, dir);
        }
        if let Some(keypair) = self.keypair.as_ref().filter(|k| **k != defaults.keypair) {
            settings.keypair = resolve_path(cwd, keypair);
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct _Settings {
    cluster: Option<String>,
    #[serde(alias = "account_dir")]
    account_dir: Option<PathBuf>,
    keypair: Option<PathBuf>,
    networks: Option<Networks>,
}

#[derive(Debug, Default, Deserialize)]
struct _Config {
    #[serde(default)]
    settings: Option<_Settings>,
    #[serde(default)]
    programs: ProgramsByCluster,
    #[serde(default)]
    clone: CloneConfig,
}

impl From<_Settings> for Settings {
    fn from(raw: _Settings) -> Self {
        let defaults = Settings::default();
        Self {
            cluster: raw.cluster.unwrap_or(defaults.cluster),
            account_dir: raw.account_dir.unwrap_or(defaults.account_dir),
            keypair: raw.keypair.unwrap_or(defaults.keypair),
            networks: raw.networks.unwrap_or(defaults.networks),
        }
    }
}

/// The project configuration, read from `Solana.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    config_path: PathBuf,
    pub settings: Settings,
    pub programs: ProgramsByCluster,
    pub clone: CloneConfig,
}

impl Config {
    /// All-default configuration for a `Solana.toml` that does not exist (yet).
    pub fn defaults(config_path: PathBuf) -> Self {
        let base = parent_dir(&config_path);
        Self {
            settings: Settings::default().resolve_paths(&base),
            programs: ProgramsByCluster::default(),
            clone: CloneConfig::default(),
            config_path,
        }
    }

    /// Locates and loads `Solana.toml`.
    ///
    /// `path` may point at the file itself or at a directory containing it.
    /// Without a path the working directory and its parents are searched.
    #[throws]
    pub fn load(path: Option<&Path>, overrides: &CliOverrides, required: bool) -> Self {
        let cwd = env::current_dir()?;
        let (located, fallback) = match path {
            Some(path) => {
                let path = resolve_path(&cwd, path);
                if path.is_dir() {
                    (find_case_insensitive(&path, SOLANA_TOML)?, path.join(SOLANA_TOML))
                } else {
                    (path.is_file().then(|| path.clone()), path)
                }
            }
            None => (discover_config(&cwd)?, cwd.join(SOLANA_TOML)),
        };

        let mut config = match located {
            Some(file) => Self::from_file(&file)?,
            None if required => throw!(Error::NotFound(fallback)),
            None => {
                debug!("No {SOLANA_TOML} found, using the default settings");
                Self::defaults(fallback)
            }
        };
        overrides.apply(&mut config.settings, &cwd);
        config
    }

    #[throws]
    pub fn from_file(path: &Path) -> Self {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents, path)?
    }

    /// Parses `Solana.toml` contents as if they were read from `config_path`.
    #[throws]
    pub fn parse(contents: &str, config_path: &Path) -> Self {
        let raw: _Config = toml::from_str(contents).map_err(|source| Error::ParseError {
            path: config_path.to_path_buf(),
            source,
        })?;
        let base = parent_dir(config_path);
        let mut clone = raw.clone;
        clone.fill_names();
        Self {
            config_path: config_path.to_path_buf(),
            settings: Settings::from(raw.settings.unwrap_or_default()).resolve_paths(&base),
            programs: canonicalize_programs(raw.programs),
            clone,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn config_dir(&self) -> PathBuf {
        parent_dir(&self.config_path)
    }
}

/// Climbs from `start` through its parents looking for `Solana.toml`.
#[throws(io::Error)]
pub fn discover_config(start: &Path) -> Option<PathBuf> {
    discover(start, SOLANA_TOML)?
}

/// Climbs from `start` through its parents looking for the file `name`.
///
/// Gives up after [`DISCOVER_DEPTH`] directories or once the directory
/// holding the repository root (`.git`) has been searched.
#[throws(io::Error)]
pub fn discover(start: &Path, name: &str) -> Option<PathBuf> {
    let mut dir = Some(start);
    for _ in 0..DISCOVER_DEPTH {
        let cwd = match dir {
            Some(cwd) => cwd,
            None => break,
        };
        if !is_skipped_dir(cwd) {
            if let Some(found) = find_case_insensitive(cwd, name)? {
                return Some(found);
            }
        }
        if cwd.join(GIT_DIR).exists() {
            break;
        }
        dir = cwd.parent();
    }
    None
}

/// Finds `name` inside `dir`, ignoring ASCII case.
#[throws(io::Error)]
pub fn find_case_insensitive(dir: &Path, name: &str) -> Option<PathBuf> {
    let mut found = None;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|f| f.to_str())
            .map_or(false, |f| f.eq_ignore_ascii_case(name));
        if matches && path.is_file() {
            // an exact match wins over other spellings
            if path.file_name().and_then(|f| f.to_str()) == Some(name) {
                return Some(path);
            }
            found.get_or_insert(path);
        }
    }
    found
}

fn is_skipped_dir(dir: &Path) -> bool {
    dir.file_name()
        .and_then(|name| name.to_str())
        .map_or(false, |name| DISCOVER_SKIP_DIRS.contains(&name))
}

pub(crate) fn canonicalize_programs(programs: ProgramsByCluster) -> ProgramsByCluster {
    let mut canonical = ProgramsByCluster::new();
    for (cluster, labels) in programs {
        canonical
            .entry(canonical_cluster_key(&cluster))
            .or_default()
            .extend(labels);
    }
    canonical
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Expands `~` and makes `path` absolute relative to `base`.
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref());
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const FULL: &str = r#"
        [settings]
        cluster = "devnet"
        accountDir = "fixtures"
        keypair = "/keys/id.json"

        [settings.networks]
        devnet = "https://devnet.example.com"

        [programs.localhost]
        counter = "Count3AcZucFDPSFBAeHkQ6AvttieKUkyJ8HiQGhQwe"

        [programs.devnet]
        counter = "Count3AcZucFDPSFBAeHkQ6AvttieKUkyJ8HiQGhQwe"

        [clone.account.zeta]
        address = "Zeta111111111111111111111111111111111111111"

        [clone.account.alpha]
        address = "A1pha11111111111111111111111111111111111111"
        frequency = "always"
        cluster = "mainnet"

        [clone.token.usdc]
        address = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"
        name = "USD Coin"
        amount = 1000
        mintAuthority = "Auth111111111111111111111111111111111111111"

        [[clone.token.usdc.holders]]
        owner = "Ho1der1111111111111111111111111111111111111"
        amount = 5

        [clone.program.metadata]
        address = "metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s"
    "#;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn parses_every_section() {
        let config = Config::parse(FULL, Path::new("/repo/Solana.toml")).unwrap();

        assert_eq!(config.config_path(), Path::new("/repo/Solana.toml"));
        assert_eq!(config.settings.cluster, "devnet");
        assert_eq!(config.settings.account_dir, PathBuf::from("/repo/fixtures"));
        assert_eq!(config.settings.keypair, PathBuf::from("/keys/id.json"));
        assert_eq!(
            config.settings.networks.devnet.as_deref(),
            Some("https://devnet.example.com")
        );

        // `localhost` is stored under the canonical `localnet` key
        assert!(config.programs.contains_key("localnet"));
        assert!(config.programs.contains_key("devnet"));

        let usdc = &config.clone.token["usdc"];
        assert_eq!(usdc.entry.name, "USD Coin");
        assert_eq!(usdc.amount, Some(1000));
        assert_eq!(usdc.mint_authority.as_deref(), Some("Auth111111111111111111111111111111111111111"));
        assert_eq!(usdc.holders.len(), 1);
        assert_eq!(usdc.holders[0].amount, Some(5));

        let alpha = &config.clone.account["alpha"];
        assert_eq!(alpha.frequency, Frequency::Always);
        assert_eq!(alpha.effective_cluster(&config.settings), "mainnet");
        assert_eq!(
            config.clone.account["zeta"].effective_cluster(&config.settings),
            "devnet"
        );
    }

    #[test]
    fn labels_become_default_names_and_order_is_kept() {
        let config = Config::parse(FULL, Path::new("Solana.toml")).unwrap();
        let labels: Vec<_> = config.clone.account.keys().cloned().collect();
        assert_eq!(labels, vec!["zeta", "alpha"]);
        assert_eq!(config.clone.account["zeta"].name, "zeta");
        assert_eq!(config.clone.program["metadata"].name, "metadata");
        assert_eq!(config.clone.account["zeta"].frequency, Frequency::Cached);
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let config = Config::parse("", Path::new("/repo/Solana.toml")).unwrap();
        assert_eq!(config.settings.cluster, DEFAULT_CLUSTER);
        assert_eq!(config.settings.account_dir, PathBuf::from("/repo/accounts"));
        assert!(config.programs.is_empty());
        assert!(config.clone.is_empty());

        let config = Config::parse("[settings]\ncluster = \"t\"\n", Path::new("/repo/Solana.toml")).unwrap();
        assert_eq!(config.settings.cluster, "t");
        assert_eq!(config.settings.account_dir, PathBuf::from("/repo/accounts"));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = Config::parse("[settings\ncluster = ", Path::new("Solana.toml")).unwrap_err();
        assert!(matches!(err, Error::ParseError { .. }));

        let err = Config::parse("[clone.account.x]\nname = \"no address\"\n", Path::new("Solana.toml"))
            .unwrap_err();
        assert!(matches!(err, Error::ParseError { .. }));
    }

    #[test]
    fn cli_overrides_only_apply_when_not_default() {
        let mut config = Config::parse(FULL, Path::new("/repo/Solana.toml")).unwrap();
        let cwd = Path::new("/work");

        // flags left at their defaults keep the file values
        CliOverrides {
            cluster: Some(DEFAULT_CLUSTER.to_owned()),
            account_dir: Some(DEFAULT_ACCOUNTS_DIR.into()),
            keypair: Some(DEFAULT_KEYPAIR_PATH.into()),
        }
        .apply(&mut config.settings, cwd);
        assert_eq!(config.settings.cluster, "devnet");
        assert_eq!(config.settings.account_dir, PathBuf::from("/repo/fixtures"));
        assert_eq!(config.settings.keypair, PathBuf::from("/keys/id.json"));

        CliOverrides {
            cluster: Some("testnet".to_owned()),
            account_dir: Some("other".into()),
            keypair: None,
        }
        .apply(&mut config.settings, cwd);
        assert_eq!(config.settings.cluster, "testnet");
        assert_eq!(config.settings.account_dir, PathBuf::from("/work/other"));
        assert_eq!(config.settings.keypair, PathBuf::from("/keys/id.json"));
    }

    #[test]
    fn load_from_directory_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "solana.toml", "[settings]\ncluster = \"devnet\"\n");

        let config = Config::load(Some(dir.path()), &CliOverrides::default(), true).unwrap();
        assert_eq!(config.settings.cluster, "devnet");
        assert_eq!(config.config_path(), dir.path().join("solana.toml"));
    }

    #[test]
    fn missing_config_fails_only_when_required() {
        let dir = TempDir::new().unwrap();

        let err = Config::load(Some(dir.path()), &CliOverrides::default(), true).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let config = Config::load(Some(dir.path()), &CliOverrides::default(), false).unwrap();
        assert_eq!(config.config_path(), dir.path().join(SOLANA_TOML));
        assert_eq!(config.settings, Settings::default().resolve_paths(dir.path()));
        assert!(config.clone.is_empty());
    }

    #[test]
    fn discovery_climbs_to_the_nearest_config() {
        let root = TempDir::new().unwrap();
        let nested = root.path().join("programs/counter/src");
        fs::create_dir_all(&nested).unwrap();
        let expected = write(root.path(), SOLANA_TOML, "");
        write(&root.path().join("programs"), "Other.toml", "");

        assert_eq!(discover_config(&nested).unwrap(), Some(expected));
    }

    #[test]
    fn discovery_stops_at_the_repository_root() {
        let outer = TempDir::new().unwrap();
        write(outer.path(), SOLANA_TOML, "");
        let repo = outer.path().join("repo");
        fs::create_dir_all(repo.join(GIT_DIR)).unwrap();
        let nested = repo.join("app");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(discover_config(&nested).unwrap(), None);
    }

    #[test]
    fn discovery_finds_any_named_file() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join(GIT_DIR)).unwrap();
        let program = root.path().join("programs/counter");
        fs::create_dir_all(program.join("src")).unwrap();
        let workspace = write(root.path(), crate::constants::CARGO_TOML, "");
        let member = write(&program, crate::constants::CARGO_TOML, "");

        assert_eq!(discover(&program.join("src"), crate::constants::CARGO_TOML).unwrap(), Some(member));
        assert_eq!(discover(&root.path().join("programs"), crate::constants::CARGO_TOML).unwrap(), Some(workspace));
        assert_eq!(discover(&program, "Anchor.toml").unwrap(), None);
    }

    #[test]
    fn discovery_is_bounded_and_skips_noise_dirs() {
        let root = TempDir::new().unwrap();
        write(root.path(), SOLANA_TOML, "");
        let deep = root.path().join("a/b/c/d/e");
        fs::create_dir_all(&deep).unwrap();
        assert_eq!(discover_config(&deep).unwrap(), None);

        let noisy = root.path().join("node_modules");
        fs::create_dir_all(&noisy).unwrap();
        write(&noisy, SOLANA_TOML, "");
        assert_eq!(discover_config(&noisy).unwrap(), Some(root.path().join(SOLANA_TOML)));
    }

    #[test]
    #[serial]
    fn load_without_path_searches_from_the_working_directory() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(&root, SOLANA_TOML, "[settings]\ncluster = \"localnet\"\n");
        let nested = root.join("app");
        fs::create_dir_all(&nested).unwrap();

        let previous = env::current_dir().unwrap();
        env::set_current_dir(&nested).unwrap();
        let config = Config::load(None, &CliOverrides::default(), true);
        env::set_current_dir(previous).unwrap();

        let config = config.unwrap();
        assert_eq!(config.settings.cluster, "localnet");
        assert_eq!(config.settings.account_dir, root.join(DEFAULT_ACCOUNTS_DIR));
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = PathBuf::from(shellexpand::tilde("~").as_ref());
        let base = Path::new("/repo");

        assert_eq!(
            resolve_path(base, Path::new("~/.config/solana/id.json")),
            home.join(".config/solana/id.json")
        );
        assert_eq!(
            Config::defaults(base.join(SOLANA_TOML)).settings.keypair,
            home.join(".config/solana/id.json")
        );
        assert_eq!(resolve_path(base, Path::new("/abs")), PathBuf::from("/abs"));
        assert_eq!(resolve_path(base, Path::new("keys/id.json")), base.join("keys/id.json"));
    }
}
