//! Upstream provider tree for one location, rooted at the watched ASNs.

use std::collections::HashSet;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::discovery::{resolve_scope, DiscoveryQuery};
use crate::error::{AppError, FetchError};
use crate::fetcher::{CachedFetcher, RequestOptions, Transport};
use crate::mirror::Mirror;
use crate::models::{Category, Classification, LocationType};
use crate::settings::Settings;

/// Maximum AS-SET members attached under one provider.
const MAX_SET_MEMBERS: usize = 50;

#[derive(Debug, Deserialize)]
pub struct RoutingQuery {
    pub location: String,
    #[serde(default)]
    pub location_type: LocationType,
    #[serde(default)]
    pub expand_sets: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SetMember {
    pub asn: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProviderNode {
    pub asn: i64,
    pub name: String,
    pub info_type: String,
    pub irr_as_set: String,
    pub children: Vec<SetMember>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RoutingTree {
    pub name: String,
    pub asn: Option<i64>,
    pub location: String,
    pub children: Vec<ProviderNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetMembership {
    #[serde(default)]
    direct_members: Vec<String>,
}

/// Providers present at the location, excluding the watched ASNs themselves.
pub fn provider_tree(
    mirror: &Mirror,
    settings: &Settings,
    query: &RoutingQuery,
) -> Result<RoutingTree, AppError> {
    let scope = DiscoveryQuery {
        fac_id: None,
        location: Some(query.location.clone()),
        location_type: query.location_type,
        category: Category::Upstream,
    };
    let fac_ids = resolve_scope(mirror, settings, &scope);
    if fac_ids.is_empty() {
        return Err(AppError::NotFound(format!(
            "No facilities found for location {}",
            query.location
        )));
    }

    let watched: HashSet<i64> = settings.asns.iter().copied().collect();
    let children = mirror
        .networks_at(&fac_ids)
        .into_iter()
        .filter(|n| !watched.contains(&n.asn))
        .filter(|n| n.classification() == Classification::Provider)
        .map(|n| ProviderNode {
            asn: n.asn,
            name: n.name.clone(),
            info_type: n.info_type().to_string(),
            irr_as_set: n.irr_as_set.clone().unwrap_or_default(),
            children: Vec::new(),
        })
        .sorted_by(|a, b| a.name.cmp(&b.name))
        .collect();

    Ok(RoutingTree {
        name: format!(
            "Footprint ({})",
            settings.asns.iter().map(|asn| format!("AS{asn}")).join(", ")
        ),
        asn: settings.asns.first().copied(),
        location: query.location.clone(),
        children,
    })
}

/// Fills each provider's children from its first IRR AS-SET. Lookup failures
/// leave that provider without children.
pub async fn expand_sets<T: Transport>(
    fetcher: &CachedFetcher<T>,
    irr_base_url: &str,
    tree: &mut RoutingTree,
) {
    for provider in &mut tree.children {
        let Some(as_set) = provider.irr_as_set.split_whitespace().next() else {
            continue;
        };
        match set_members(fetcher, irr_base_url, as_set).await {
            Ok(members) => provider.children = members,
            Err(e) => warn!("Error expanding {}: {}", as_set, e),
        }
    }
}

async fn set_members<T: Transport>(
    fetcher: &CachedFetcher<T>,
    irr_base_url: &str,
    as_set: &str,
) -> Result<Vec<SetMember>, FetchError> {
    let url = format!(
        "{}/sets/member_of/{}",
        irr_base_url.trim_end_matches('/'),
        as_set.trim().to_uppercase()
    );
    let membership: SetMembership = fetcher.fetch(&url, &RequestOptions::default()).await?;
    Ok(membership
        .direct_members
        .iter()
        .take(MAX_SET_MEMBERS)
        .filter_map(|member| {
            let asn = member.strip_prefix("AS")?.parse().ok()?;
            Some(SetMember {
                asn,
                name: member.clone(),
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{RequestCache, SystemClock};
    use crate::fetcher::testing::FakeTransport;
    use crate::mirror::fixtures::{facility, link, network};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;

    fn mirror() -> Mirror {
        let mut cogent = network(40, 174, "Cogent", "NSP");
        cogent.irr_as_set = Some("as-cogent RADB::AS-COGENT".into());
        Mirror {
            synced_at: Some(Utc::now()),
            asns: vec![21859],
            networks: vec![
                network(10, 21859, "Zenlayer", "NSP"),
                network(30, 13335, "Cloudflare", "Content"),
                cogent,
                network(50, 3356, "Lumen", "Transit/Access"),
            ],
            facilities: vec![facility(100, "Equinix DC2", "Ashburn")],
            links: vec![link(1, 10, 100), link(2, 30, 100), link(3, 40, 100), link(4, 50, 100)],
        }
    }

    fn query(location: &str) -> RoutingQuery {
        RoutingQuery {
            location: location.to_string(),
            location_type: LocationType::City,
            expand_sets: false,
        }
    }

    fn settings() -> Settings {
        Settings {
            asns: vec![21859],
            metro_map: Default::default(),
        }
    }

    #[test]
    fn test_tree_excludes_watched_and_peers() {
        let tree = provider_tree(&mirror(), &settings(), &query("Ashburn")).unwrap();
        let asns: Vec<i64> = tree.children.iter().map(|c| c.asn).collect();
        assert_eq!(asns, vec![174, 3356]);
        assert_eq!(tree.name, "Footprint (AS21859)");
        assert_eq!(tree.asn, Some(21859));
    }

    #[test]
    fn test_unknown_location_is_not_found() {
        let err = provider_tree(&mirror(), &settings(), &query("Atlantis")).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_expand_sets_uses_first_set() {
        let cache = RequestCache::new(chrono::Duration::hours(24), Arc::new(SystemClock));
        let fetcher = CachedFetcher::new(FakeTransport::new(), cache);
        fetcher.transport().route(
            "https://irr.test/api/sets/member_of/AS-COGENT",
            json!({"directMembers": ["AS174", "AS-FOO", "AS3356"]}),
        );

        let mut tree = provider_tree(&mirror(), &settings(), &query("Ashburn")).unwrap();
        expand_sets(&fetcher, "https://irr.test/api", &mut tree).await;

        let cogent = tree.children.iter().find(|c| c.asn == 174).unwrap();
        let members: Vec<i64> = cogent.children.iter().map(|m| m.asn).collect();
        assert_eq!(members, vec![174, 3356]);
        // Lumen has no AS-SET, so only one lookup happened.
        assert_eq!(fetcher.transport().request_count(), 1);
    }
}
