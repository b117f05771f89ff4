//! PeeringDB list endpoints queried by membership filters.

use std::sync::Arc;

use itertools::Itertools;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::FetchError;
use crate::fetcher::{CachedFetcher, RequestOptions, Transport};
use crate::models::{Facility, Network, NetworkFacilityLink};

/// Maximum number of IDs sent in one `__in` filter.
pub const BATCH_SIZE: usize = 50;

/// Whether registry reads may be served from the request cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Cached,
    Live,
}

pub struct PeeringDb<T> {
    fetcher: Arc<CachedFetcher<T>>,
    base_url: String,
    mode: FetchMode,
}

impl<T: Transport> PeeringDb<T> {
    pub fn new(fetcher: Arc<CachedFetcher<T>>, base_url: &str, mode: FetchMode) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
            mode,
        }
    }

    pub async fn networks_by_asn(&self, asns: &[i64]) -> Result<Vec<Network>, FetchError> {
        let asns: Vec<i64> = asns.iter().copied().unique().collect();
        self.list("net", "asn__in", &asns).await
    }

    pub async fn networks_by_id(&self, ids: &[i64]) -> Result<Vec<Network>, FetchError> {
        self.list("net", "id__in", &distinct(ids)).await
    }

    pub async fn links_by_network(
        &self,
        net_ids: &[i64],
    ) -> Result<Vec<NetworkFacilityLink>, FetchError> {
        self.list("netfac", "net_id__in", &distinct(net_ids)).await
    }

    pub async fn links_by_facility(
        &self,
        fac_ids: &[i64],
    ) -> Result<Vec<NetworkFacilityLink>, FetchError> {
        self.list("netfac", "fac_id__in", &distinct(fac_ids)).await
    }

    pub async fn facilities_by_id(&self, ids: &[i64]) -> Result<Vec<Facility>, FetchError> {
        self.list("fac", "id__in", &distinct(ids)).await
    }

    async fn list<R: DeserializeOwned>(
        &self,
        endpoint: &str,
        filter: &str,
        ids: &[i64],
    ) -> Result<Vec<R>, FetchError> {
        let mut records = Vec::new();
        for chunk in ids.chunks(BATCH_SIZE) {
            let url = format!(
                "{}/{}?{}={}",
                self.base_url,
                endpoint,
                filter,
                chunk.iter().join(",")
            );
            let options = RequestOptions::default();
            let batch: Vec<R> = match self.mode {
                FetchMode::Cached => self.fetcher.fetch(&url, &options).await?,
                FetchMode::Live => self.fetcher.fetch_uncached(&url, &options).await?,
            };
            debug!("{} returned {} records", url, batch.len());
            records.extend(batch);
        }
        Ok(records)
    }
}

fn distinct(ids: &[i64]) -> Vec<i64> {
    ids.iter().copied().sorted_unstable().dedup().collect()
}
