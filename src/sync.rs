//! Refreshes the local mirror from PeeringDB for the current watch-list.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use itertools::Itertools;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::cache::Clock;
use crate::error::AppError;
use crate::fetcher::Transport;
use crate::mirror::{Mirror, MirrorStore};
use crate::registry::PeeringDb;
use crate::settings::SettingsStore;

/// Why a sync was started. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Startup,
    Schedule,
    Manual,
    SettingsChanged,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncTrigger::Startup => "startup",
            SyncTrigger::Schedule => "schedule",
            SyncTrigger::Manual => "manual",
            SyncTrigger::SettingsChanged => "settings change",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SyncReport {
    pub networks: usize,
    pub facilities: usize,
    pub links: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed(SyncReport),
    AlreadyRunning,
    /// Mirror was fresh enough; nothing to do.
    Skipped,
}

/// Sole writer of the [`MirrorStore`].
pub struct Syncer<T> {
    registry: PeeringDb<T>,
    mirror: Arc<MirrorStore>,
    settings: Arc<SettingsStore>,
    clock: Arc<dyn Clock>,
    max_age: Duration,
    running: Mutex<()>,
}

impl<T: Transport> Syncer<T> {
    pub fn new(
        registry: PeeringDb<T>,
        mirror: Arc<MirrorStore>,
        settings: Arc<SettingsStore>,
        clock: Arc<dyn Clock>,
        max_age: Duration,
    ) -> Self {
        Self {
            registry,
            mirror,
            settings,
            clock,
            max_age,
            running: Mutex::new(()),
        }
    }

    /// Runs a sync unless one is already in flight.
    pub async fn run(&self, trigger: SyncTrigger) -> Result<SyncOutcome, AppError> {
        let Ok(_guard) = self.running.try_lock() else {
            info!("Sync ({}) requested while another is running; skipping", trigger);
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let asns = self.settings.get().asns;
        info!("Starting PeeringDB sync ({}) for ASNs {:?}", trigger, asns);
        if let Some(age) = self.mirror.snapshot().await.age(self.clock.now()) {
            info!("Mirror age before sync: {:.1} hours", age.num_minutes() as f64 / 60.0);
        }

        let started = Instant::now();
        let mut mirror = self.build(asns).await?;
        // Pick up a watch-list edited while building.
        let latest = self.settings.get().asns;
        if mirror.asns != latest {
            info!("Watch-list changed during sync to {:?}; rebuilding", latest);
            mirror = self.build(latest).await?;
        }
        let report = SyncReport {
            networks: mirror.networks.len(),
            facilities: mirror.facilities.len(),
            links: mirror.links.len(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        self.mirror.replace(mirror).await?;

        info!(
            "Sync completed in {} ms: {} networks, {} facilities, {} links",
            report.duration_ms, report.networks, report.facilities, report.links
        );
        Ok(SyncOutcome::Completed(report))
    }

    /// Syncs only when the current mirror is older than the freshness limit
    /// or was built from a different watch-list than the current settings.
    pub async fn run_if_stale(&self, trigger: SyncTrigger) -> Result<SyncOutcome, AppError> {
        let now = self.clock.now();
        let asns = self.settings.get().asns;
        if !self.mirror.snapshot().await.is_due(now, self.max_age, &asns) {
            info!("Mirror is fresh; skipping {} sync", trigger);
            return Ok(SyncOutcome::Skipped);
        }
        self.run(trigger).await
    }

    /// Like [`run`](Self::run) but logs failures instead of returning them.
    /// The previous mirror keeps serving either way.
    pub async fn run_logged(&self, trigger: SyncTrigger, only_if_stale: bool) -> Option<SyncOutcome> {
        let result = if only_if_stale {
            self.run_if_stale(trigger).await
        } else {
            self.run(trigger).await
        };
        match result {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Sync ({}) failed, keeping previous mirror: {}", trigger, e);
                None
            }
        }
    }

    async fn build(&self, asns: Vec<i64>) -> Result<Mirror, AppError> {
        let mut networks = self.registry.networks_by_asn(&asns).await?;
        if networks.is_empty() {
            warn!("No networks found for ASNs {:?}", asns);
        }

        let net_ids: Vec<i64> = networks.iter().map(|n| n.id).collect();
        let footprint_links = self.registry.links_by_network(&net_ids).await?;
        let fac_ids: Vec<i64> = footprint_links
            .iter()
            .map(|l| l.fac_id)
            .sorted_unstable()
            .dedup()
            .collect();
        let fac_set: HashSet<i64> = fac_ids.iter().copied().collect();

        let mut facilities = self.registry.facilities_by_id(&fac_ids).await?;
        facilities.retain(|f| fac_set.contains(&f.id));
        facilities.sort_by(|a, b| a.name.cmp(&b.name));

        // Everyone else present at the footprint facilities.
        let presence_links = self.registry.links_by_facility(&fac_ids).await?;
        let links: Vec<_> = footprint_links
            .into_iter()
            .chain(presence_links)
            .filter(|l| fac_set.contains(&l.fac_id))
            .unique_by(|l| l.id)
            .collect();

        let known: HashSet<i64> = net_ids.iter().copied().collect();
        let missing: Vec<i64> = links
            .iter()
            .map(|l| l.net_id)
            .filter(|id| !known.contains(id))
            .collect();
        networks.extend(self.registry.networks_by_id(&missing).await?);

        Ok(Mirror {
            synced_at: Some(self.clock.now()),
            asns,
            networks,
            facilities,
            links,
        })
    }
}
