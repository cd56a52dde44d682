//! Deployment manifest sources.
//!
//! A manifest is UTF-8 text, one `KEY=VALUE` assignment per line,
//! where VALUE is a 20-byte `0x…` address. Keys are matched against a
//! configured set of regex patterns whose first capture group yields
//! the network name. A `ManifestSource` hands the parsed
//! `(key, address, network)` triples to the deployment coordinator.

use alloy::primitives::Address;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, trace};

use crate::types::RebalancerError;

/// Key patterns recognized in the pools manifest.
pub const POOL_KEY_PATTERNS: &[&str] = &["LBF_CHILD_POOL_(.+)", "LBF_PARENT_POOL_(.+)"];

/// Key patterns recognized in the tokens manifest.
pub const TOKEN_KEY_PATTERNS: &[&str] = &["USDC_(.+)", "IOU_(.+)"];

/// One recognized manifest assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub key: String,
    pub address: Address,
    /// Network name extracted from the key (lowercased; network names
    /// are lowercase everywhere else in the system).
    pub network: String,
}

/// Source of parsed deployment manifest entries.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<ManifestEntry>, RebalancerError>;
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Compile key patterns into anchored regexes.
pub fn compile_patterns(patterns: &[&str]) -> Result<Vec<Regex>, RebalancerError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(&format!("^{p}$"))
                .map_err(|e| RebalancerError::ManifestParseFailed(format!("pattern {p}: {e}")))
        })
        .collect()
}

/// Parse manifest text into entries.
///
/// Empty lines and `#` comments are skipped. Lines whose key matches
/// no pattern are ignored (manifests carry unrelated entries). A
/// matching key with a malformed address fails the whole parse.
pub fn parse_manifest(
    text: &str,
    patterns: &[Regex],
) -> Result<Vec<ManifestEntry>, RebalancerError> {
    let mut entries = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            trace!(line_no, "Skipping line without assignment");
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        let Some(network) = match_network(key, patterns) else {
            trace!(line_no, key, "Key matches no pattern, skipping");
            continue;
        };

        let address = value.parse::<Address>().map_err(|e| {
            RebalancerError::ManifestParseFailed(format!(
                "line {}: {key}: bad address {value}: {e}",
                line_no + 1
            ))
        })?;

        entries.push(ManifestEntry {
            key: key.to_string(),
            address,
            network,
        });
    }

    Ok(entries)
}

fn match_network(key: &str, patterns: &[Regex]) -> Option<String> {
    for pattern in patterns {
        if let Some(caps) = pattern.captures(key) {
            if let Some(network) = caps.get(1) {
                return Some(network.as_str().to_lowercase());
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// HTTP source
// ---------------------------------------------------------------------------

/// Fetches a manifest over HTTP and parses it.
pub struct HttpManifestSource {
    http: Client,
    url: String,
    patterns: Vec<Regex>,
}

impl HttpManifestSource {
    pub fn new(url: &str, patterns: &[&str]) -> Result<Self, RebalancerError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RebalancerError::ManifestFetchFailed(e.to_string()))?;
        Ok(Self {
            http,
            url: url.to_string(),
            patterns: compile_patterns(patterns)?,
        })
    }
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    async fn fetch(&self) -> Result<Vec<ManifestEntry>, RebalancerError> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                RebalancerError::ManifestFetchFailed(format!("{}: {e}", self.url))
            })?;

        let text = response
            .text()
            .await
            .map_err(|e| RebalancerError::ManifestFetchFailed(format!("{}: {e}", self.url)))?;

        let entries = parse_manifest(&text, &self.patterns)?;
        debug!(url = %self.url, count = entries.len(), "Manifest fetched");
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
