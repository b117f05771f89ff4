//! Local mirror of the watched slice of PeeringDB.
//!
//! A [`Mirror`] is an immutable snapshot. [`MirrorStore`] holds the current
//! one behind an `Arc` and swaps it wholesale after the replacement has been
//! written to disk, so readers only ever see a complete snapshot.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::AppError;
use crate::models::{Facility, Network, NetworkFacilityLink};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mirror {
    /// When the snapshot was built. `None` means never synced.
    pub synced_at: Option<DateTime<Utc>>,
    /// Watch-list the snapshot was built from.
    #[serde(default)]
    pub asns: Vec<i64>,
    #[serde(default)]
    pub networks: Vec<Network>,
    #[serde(default)]
    pub facilities: Vec<Facility>,
    #[serde(default)]
    pub links: Vec<NetworkFacilityLink>,
}

impl Mirror {
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.synced_at.map(|at| now - at)
    }

    /// True when never synced or older than `max_age`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now).is_none_or(|age| age > max_age)
    }

    /// True when stale or built from a watch-list other than `asns`.
    pub fn is_due(&self, now: DateTime<Utc>, max_age: Duration, asns: &[i64]) -> bool {
        self.is_stale(now, max_age) || self.asns != asns
    }

    pub fn facility(&self, id: i64) -> Option<&Facility> {
        self.facilities.iter().find(|f| f.id == id)
    }

    /// Distinct, sorted, non-empty city names across all facilities.
    pub fn cities(&self) -> Vec<String> {
        self.facilities
            .iter()
            .filter(|f| !f.city.is_empty())
            .map(|f| f.city.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Networks with a link into any facility in `fac_ids`, each once.
    pub fn networks_at(&self, fac_ids: &HashSet<i64>) -> Vec<&Network> {
        let net_ids: HashSet<i64> = self
            .links
            .iter()
            .filter(|l| fac_ids.contains(&l.fac_id))
            .map(|l| l.net_id)
            .collect();
        self.networks
            .iter()
            .filter(|n| net_ids.contains(&n.id))
            .collect()
    }
}

/// Shared holder for the current snapshot plus its on-disk copy.
#[derive(Debug)]
pub struct MirrorStore {
    path: PathBuf,
    current: RwLock<Arc<Mirror>>,
}

impl MirrorStore {
    /// Opens the store. A missing or unreadable file yields an empty mirror.
    pub async fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mirror = match load_mirror(&path).await {
            Ok(Some(mirror)) => {
                info!(
                    "Loaded mirror from {:?}: {} networks, {} facilities, {} links",
                    path,
                    mirror.networks.len(),
                    mirror.facilities.len(),
                    mirror.links.len()
                );
                mirror
            }
            Ok(None) => {
                info!("No mirror at {:?}; starting empty", path);
                Mirror::default()
            }
            Err(e) => {
                warn!("Ignoring unreadable mirror {:?}: {}", path, e);
                Mirror::default()
            }
        };

        Self {
            path,
            current: RwLock::new(Arc::new(mirror)),
        }
    }

    pub async fn snapshot(&self) -> Arc<Mirror> {
        self.current.read().await.clone()
    }

    /// Writes `mirror` to disk, then publishes it. On error the previous
    /// snapshot stays in place.
    pub async fn replace(&self, mirror: Mirror) -> Result<(), AppError> {
        let tmp = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&tmp, serde_json::to_vec(&mirror)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        *self.current.write().await = Arc::new(mirror);
        Ok(())
    }
}

async fn load_mirror(path: &Path) -> Result<Option<Mirror>, AppError> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(None);
    }
    let content = tokio::fs::read(path).await?;
    Ok(Some(serde_json::from_slice(&content)?))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn network(id: i64, asn: i64, name: &str, info_type: &str) -> Network {
        Network {
            id,
            asn,
            name: name.to_string(),
            info_type: Some(info_type.to_string()),
            policy_general: Some("Open".to_string()),
            website: None,
            traffic_range: Some("100-200Gbps".to_string()),
            irr_as_set: None,
        }
    }

    pub fn facility(id: i64, name: &str, city: &str) -> Facility {
        Facility {
            id,
            name: name.to_string(),
            city: city.to_string(),
            country: "US".to_string(),
            address1: String::new(),
        }
    }

    pub fn link(id: i64, net_id: i64, fac_id: i64) -> NetworkFacilityLink {
        NetworkFacilityLink {
            id,
            net_id,
            fac_id,
            local_asn: 0,
            name: String::new(),
        }
    }
}
