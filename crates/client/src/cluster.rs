use std::{fmt, str::FromStr};

use fehler::throws;
use log::warn;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use thiserror::Error;
use url::Url;

use crate::config::{Networks, ProgramsByCluster};

#[derive(Error, Debug)]
pub enum Error {
    #[error("unable to parse cluster url '{input}': {source}")]
    InvalidUrl {
        input: String,
        source: url::ParseError,
    },
}

/// Named Solana clusters, including both spellings the toolchain accepts
/// for mainnet and the local validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ClusterId {
    Mainnet,
    MainnetBeta,
    Devnet,
    Testnet,
    Localnet,
    Localhost,
}

use ClusterId::*;

/// First-letter prefixes in priority order: `(prefix, cluster, cluster with the solana CLI label)`.
pub const MONIKER_PREFIXES: &[(char, ClusterId, ClusterId)] = &[
    ('l', Localnet, Localhost),
    ('t', Testnet, Testnet),
    ('d', Devnet, Devnet),
    ('m', Mainnet, MainnetBeta),
];

impl ClusterId {
    /// Collapses the alternative spellings, so `localhost` becomes `localnet`
    /// and `mainnet-beta` becomes `mainnet`.
    pub fn canonical(self) -> Self {
        match self {
            Localhost => Localnet,
            MainnetBeta => Mainnet,
            other => other,
        }
    }

    /// The moniker understood by `solana --url`.
    pub fn moniker(self) -> &'static str {
        match self {
            Mainnet | MainnetBeta => "mainnet-beta",
            Devnet => "devnet",
            Testnet => "testnet",
            Localnet | Localhost => "localhost",
        }
    }

    /// Custom RPC url declared for this cluster in `settings.networks`.
    pub fn custom_url(self, networks: &Networks) -> Option<&str> {
        match self.canonical() {
            Mainnet | MainnetBeta => networks.mainnet.as_deref(),
            Devnet => networks.devnet.as_deref(),
            Testnet => networks.testnet.as_deref(),
            Localnet | Localhost => networks.localnet.as_deref(),
        }
    }

    fn mainnet(include_beta_label: bool) -> Self {
        if include_beta_label {
            MainnetBeta
        } else {
            Mainnet
        }
    }
}

/// Where a command should point: a named cluster or an explicit RPC url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterTarget {
    Named(ClusterId),
    Url(Url),
}

impl ClusterTarget {
    pub fn cluster_id(&self) -> Option<ClusterId> {
        match self {
            ClusterTarget::Named(id) => Some(*id),
            ClusterTarget::Url(_) => None,
        }
    }

    /// The named cluster this target points at. Urls are recognised by
    /// their host: public endpoints by name, loopback as localnet.
    pub fn infer_cluster(&self) -> Option<ClusterId> {
        match self {
            ClusterTarget::Named(id) => Some(*id),
            ClusterTarget::Url(url) => {
                let host = url.host_str()?.to_ascii_lowercase();
                if host == "localhost" || host == "127.0.0.1" || host == "0.0.0.0" || host == "[::1]" {
                    Some(Localnet)
                } else if host.contains("devnet") {
                    Some(Devnet)
                } else if host.contains("testnet") {
                    Some(Testnet)
                } else if host.contains("mainnet") {
                    Some(Mainnet)
                } else {
                    None
                }
            }
        }
    }

    /// Value for the toolchain's `--url` argument. Custom network urls
    /// from the config take over the public moniker.
    pub fn url_arg(&self, networks: &Networks) -> String {
        match self {
            ClusterTarget::Named(id) => id
                .custom_url(networks)
                .unwrap_or_else(|| id.moniker())
                .to_owned(),
            ClusterTarget::Url(url) => url.to_string(),
        }
    }
}

impl fmt::Display for ClusterTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterTarget::Named(id) => write!(f, "{id}"),
            ClusterTarget::Url(url) => write!(f, "{url}"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ResolveOptions {
    /// Accept `http(s)://` urls as they are.
    pub allow_url: bool,
    /// Return the spellings the solana CLI expects (`mainnet-beta`, `localhost`).
    pub include_beta_label: bool,
}

/// Turns a user supplied moniker or url into a [`ClusterTarget`].
///
/// Monikers match on their first letter, case-insensitively. Anything
/// unrecognised falls back to mainnet with a warning; only a malformed
/// `http(s)://` url is an error.
#[throws]
pub fn resolve(input: &str, options: ResolveOptions) -> ClusterTarget {
    let trimmed = input.trim();
    if options.allow_url && is_http_url(trimmed) {
        let url = Url::parse(trimmed).map_err(|source| Error::InvalidUrl {
            input: trimmed.to_owned(),
            source,
        })?;
        return ClusterTarget::Url(url);
    }
    ClusterTarget::Named(resolve_moniker(trimmed, options.include_beta_label))
}

pub fn resolve_moniker(input: &str, include_beta_label: bool) -> ClusterId {
    let first = input.trim().chars().next().map(|c| c.to_ascii_lowercase());
    let matched = MONIKER_PREFIXES
        .iter()
        .find(|(prefix, _, _)| Some(*prefix) == first)
        .map(|(_, plain, labelled)| if include_beta_label { *labelled } else { *plain });

    match matched {
        Some(cluster) => cluster,
        None => {
            let fallback = ClusterId::mainnet(include_beta_label);
            warn!("Unable to parse cluster '{input}', falling back to {fallback}");
            fallback
        }
    }
}

fn is_http_url(input: &str) -> bool {
    let lower = input.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Canonical `[programs.<cluster>]` key the labels are stored under, or
/// `None` when that cluster has no labels declared.
pub fn label_cluster_key(cluster: ClusterId, programs: &ProgramsByCluster) -> Option<&'static str> {
    let key: &'static str = cluster.canonical().into();
    programs.contains_key(key).then_some(key)
}

/// Normalises a `[programs.<cluster>]` key as written by the user.
pub fn canonical_cluster_key(raw: &str) -> String {
    match ClusterId::from_str(&raw.trim().to_ascii_lowercase()) {
        Ok(id) => id.canonical().to_string(),
        Err(_) => raw.to_owned(),
    }
}
