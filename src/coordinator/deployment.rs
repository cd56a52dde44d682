//! Deployment coordinator.
//!
//! Produces a consistent `Deployments` snapshot from the pools and
//! tokens manifests, or from a static value in localhost mode. A
//! failed refresh never clobbers the previous snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::manifest::{ManifestEntry, ManifestSource};
use crate::types::{Deployments, ParentPool, RebalancerError};

pub struct DeploymentCoordinator {
    sources: Option<Sources>,
    static_deployments: Option<Deployments>,
    snapshot: Mutex<Option<Deployments>>,
}

struct Sources {
    pools: Arc<dyn ManifestSource>,
    tokens: Arc<dyn ManifestSource>,
}

impl DeploymentCoordinator {
    /// Manifest-backed coordinator for mainnet/testnet.
    pub fn from_sources(
        pools: Arc<dyn ManifestSource>,
        tokens: Arc<dyn ManifestSource>,
    ) -> Self {
        Self {
            sources: Some(Sources { pools, tokens }),
            static_deployments: None,
            snapshot: Mutex::new(None),
        }
    }

    /// Statically-wired coordinator for localhost mode.
    pub fn with_static(deployments: Deployments) -> Self {
        Self {
            sources: None,
            static_deployments: Some(deployments),
            snapshot: Mutex::new(None),
        }
    }

    /// Re-fetch both manifests and replace the snapshot.
    ///
    /// Both fetches run concurrently; if either fails, the refresh
    /// fails and the in-memory snapshot is left untouched.
    pub async fn refresh(&self) -> Result<(), RebalancerError> {
        if let Some(deployments) = &self.static_deployments {
            *self.snapshot.lock().unwrap() = Some(deployments.clone());
            debug!("Deployment snapshot refreshed from static wiring");
            return Ok(());
        }

        let sources = self
            .sources
            .as_ref()
            .ok_or_else(|| RebalancerError::ConfigInvalid("no manifest sources wired".into()))?;

        let (pool_entries, token_entries) =
            tokio::join!(sources.pools.fetch(), sources.tokens.fetch());
        let pool_entries = pool_entries?;
        let token_entries = token_entries?;

        let deployments = build_deployments(&pool_entries, &token_entries)?;
        info!(
            parent = %deployments.parent_pool.network,
            child_pools = deployments.pools.len(),
            usdc = deployments.usdc.len(),
            iou = deployments.iou.len(),
            "Deployment snapshot refreshed"
        );

        *self.snapshot.lock().unwrap() = Some(deployments);
        Ok(())
    }

    /// The current snapshot, by value. None until the first
    /// successful refresh.
    pub fn snapshot(&self) -> Option<Deployments> {
        self.snapshot.lock().unwrap().clone()
    }
}

/// Assemble a `Deployments` value from parsed manifest entries.
///
/// Key classification is by substring: `PARENT_POOL` and `CHILD_POOL`
/// for the pools manifest, `USDC_` and `IOU_` for the tokens manifest.
pub fn build_deployments(
    pool_entries: &[ManifestEntry],
    token_entries: &[ManifestEntry],
) -> Result<Deployments, RebalancerError> {
    let mut parent_pool: Option<ParentPool> = None;
    let mut pools = HashMap::new();

    for entry in pool_entries {
        if entry.key.contains("PARENT_POOL") {
            if let Some(existing) = &parent_pool {
                return Err(RebalancerError::DuplicateParentPool {
                    first: existing.network.clone(),
                    second: entry.network.clone(),
                });
            }
            parent_pool = Some(ParentPool {
                network: entry.network.clone(),
                address: entry.address,
            });
        } else if entry.key.contains("CHILD_POOL") {
            pools.insert(entry.network.clone(), entry.address);
        }
    }

    let mut usdc = HashMap::new();
    let mut iou = HashMap::new();
    for entry in token_entries {
        if entry.key.contains("USDC_") {
            usdc.insert(entry.network.clone(), entry.address);
        } else if entry.key.contains("IOU_") {
            iou.insert(entry.network.clone(), entry.address);
        }
    }

    let parent_pool = parent_pool.ok_or(RebalancerError::MissingParentPool)?;

    Ok(Deployments {
        pools,
        parent_pool,
        usdc,
        iou,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
