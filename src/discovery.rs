//! Facility/city/metro scoped discovery over the local mirror.
//!
//! Metro labels are resolved from the settings passed in on every call, so a
//! change to the metro map is visible immediately without a sync.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::fetcher::Transport;
use crate::mirror::Mirror;
use crate::models::{Category, DiscoveryResult, Facility, LocationType, Network};
use crate::registry::PeeringDb;
use crate::settings::Settings;

/// Query parameters for `/discover`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryQuery {
    #[serde(default, deserialize_with = "crate::handlers::empty_string_as_none")]
    pub fac_id: Option<i64>,
    #[serde(default, deserialize_with = "crate::handlers::empty_string_as_none_str")]
    pub location: Option<String>,
    #[serde(default)]
    pub location_type: LocationType,
    #[serde(default)]
    pub category: Category,
}

/// Facility IDs selected by the query. `fac_id` wins over `location`.
pub fn resolve_scope(mirror: &Mirror, settings: &Settings, query: &DiscoveryQuery) -> HashSet<i64> {
    if let Some(fac_id) = query.fac_id {
        return mirror.facility(fac_id).map(|f| f.id).into_iter().collect();
    }
    let Some(location) = query.location.as_deref() else {
        return HashSet::new();
    };
    mirror
        .facilities
        .iter()
        .filter(|f| match query.location_type {
            LocationType::City => f.city == location,
            LocationType::Metro => settings.metro_for(&f.city) == Some(location),
        })
        .map(|f| f.id)
        .collect()
}

/// Projects networks through the category filter, sorted by name then ASN.
pub fn project<'a>(
    networks: impl IntoIterator<Item = &'a Network>,
    category: Category,
) -> Vec<DiscoveryResult> {
    let mut seen = HashSet::new();
    let mut results: Vec<DiscoveryResult> = networks
        .into_iter()
        .filter(|n| seen.insert(n.id))
        .filter(|n| category.matches(n.info_type()))
        .map(|n| DiscoveryResult::from_network(n, category))
        .collect();
    results.sort_by(|a, b| a.name.cmp(&b.name).then(a.asn.cmp(&b.asn)));
    results
}

/// Answers a discovery query from the mirror. Unknown scopes give no rows.
pub fn discover(mirror: &Mirror, settings: &Settings, query: &DiscoveryQuery) -> Vec<DiscoveryResult> {
    let fac_ids = resolve_scope(mirror, settings, query);
    if fac_ids.is_empty() {
        return Vec::new();
    }
    project(mirror.networks_at(&fac_ids), query.category)
}

/// Asks the registry directly for one facility. Used before the first sync.
pub async fn discover_live<T: Transport>(
    registry: &PeeringDb<T>,
    fac_id: i64,
    category: Category,
) -> Result<Vec<DiscoveryResult>, FetchError> {
    let links = registry.links_by_facility(&[fac_id]).await?;
    let net_ids: Vec<i64> = links.iter().map(|l| l.net_id).collect();
    let networks = registry.networks_by_id(&net_ids).await?;
    Ok(project(&networks, category))
}

/// A mirrored facility with its derived metro label.
#[derive(Debug, Clone, Serialize)]
pub struct FacilityView {
    #[serde(flatten)]
    pub facility: Facility,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metro: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Footprint {
    pub synced_at: Option<DateTime<Utc>>,
    pub facilities: Vec<FacilityView>,
    pub cities: Vec<String>,
    pub metros: Vec<String>,
}

pub fn footprint(mirror: &Mirror, settings: &Settings) -> Footprint {
    let facilities: Vec<FacilityView> = mirror
        .facilities
        .iter()
        .map(|f| FacilityView {
            facility: f.clone(),
            metro: settings.metro_for(&f.city).map(str::to_string),
        })
        .collect();
    let metros = facilities
        .iter()
        .filter_map(|f| f.metro.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    Footprint {
        synced_at: mirror.synced_at,
        facilities,
        cities: mirror.cities(),
        metros,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::fixtures::{facility, link, network};
    use crate::models::Classification;

    fn mirror() -> Mirror {
        Mirror {
            synced_at: Some(Utc::now()),
            asns: vec![21859],
            networks: vec![
                network(10, 21859, "Zenlayer", "NSP"),
                network(30, 13335, "Cloudflare", "Content"),
                network(40, 174, "Cogent", "Transit/Access"),
                network(50, 64512, "Acme Corp", "Enterprise"),
            ],
            facilities: vec![
                facility(100, "Equinix DC2", "Ashburn"),
                facility(101, "CoreSite VA1", "Reston"),
                facility(200, "Equinix SV1", "San Jose"),
            ],
            links: vec![
                link(1, 10, 100),
                link(2, 30, 100),
                link(3, 40, 101),
                link(4, 50, 200),
                link(5, 30, 101),
            ],
        }
    }

    fn settings() -> Settings {
        Settings {
            asns: vec![21859],
            metro_map: [("Ashburn".to_string(), "Washington DC (IAD)".to_string())]
                .into_iter()
                .collect(),
        }
    }

    fn query(location: &str, location_type: LocationType, category: Category) -> DiscoveryQuery {
        DiscoveryQuery {
            fac_id: None,
            location: Some(location.to_string()),
            location_type,
            category,
        }
    }

    #[test]
    fn test_unknown_facility_is_empty() {
        let q = DiscoveryQuery {
            fac_id: Some(999),
            category: Category::All,
            ..Default::default()
        };
        assert!(discover(&mirror(), &settings(), &q).is_empty());
    }

    #[test]
    fn test_unknown_location_is_empty() {
        let q = query("Atlantis", LocationType::City, Category::All);
        assert!(discover(&mirror(), &settings(), &q).is_empty());
    }

    #[test]
    fn test_facility_scope() {
        let q = DiscoveryQuery {
            fac_id: Some(100),
            category: Category::All,
            ..Default::default()
        };
        let asns: Vec<i64> = discover(&mirror(), &settings(), &q)
            .iter()
            .map(|r| r.asn)
            .collect();
        assert_eq!(asns, vec![13335, 21859]);
    }

    #[test]
    fn test_metro_follows_live_mapping() {
        let m = mirror();
        let mut s = settings();
        let q = query("Washington DC (IAD)", LocationType::Metro, Category::All);
        assert_eq!(discover(&m, &s, &q).len(), 2);

        s.metro_map
            .insert("Reston".to_string(), "Washington DC (IAD)".to_string());
        let names: Vec<String> = discover(&m, &s, &q).into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Cloudflare", "Cogent", "Zenlayer"]);
    }

    #[test]
    fn test_upstream_keeps_providers_only() {
        let mut s = settings();
        s.metro_map
            .insert("Reston".to_string(), "Washington DC (IAD)".to_string());
        let q = query("Washington DC (IAD)", LocationType::Metro, Category::Upstream);
        let results = discover(&mirror(), &s, &q);

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.kind == Classification::Provider));
        assert!(results.iter().all(|r| r.traffic_range.is_none()));
    }

    #[test]
    fn test_peers_category() {
        let q = query("San Jose", LocationType::City, Category::Peers);
        let results = discover(&mirror(), &settings(), &q);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].asn, 64512);
        assert_eq!(results[0].kind, Classification::Peer);
        assert_eq!(results[0].traffic_range.as_deref(), Some("100-200Gbps"));
    }

    #[test]
    fn test_network_listed_once_across_facilities() {
        let q = query("Reston", LocationType::City, Category::All);
        let mut s = settings();
        s.metro_map.insert("Reston".into(), "Washington DC (IAD)".into());
        let metro = query("Washington DC (IAD)", LocationType::Metro, Category::All);

        assert_eq!(discover(&mirror(), &s, &q).len(), 2);
        let cloudflare = discover(&mirror(), &s, &metro)
            .into_iter()
            .filter(|r| r.asn == 13335)
            .count();
        assert_eq!(cloudflare, 1);
    }

    #[test]
    fn test_end_to_end_metro_example() {
        let m = Mirror {
            synced_at: Some(Utc::now()),
            asns: vec![21859],
            networks: vec![network(10, 21859, "Zenlayer", "NSP")],
            facilities: vec![facility(100, "Equinix DC2", "Ashburn")],
            links: vec![link(1, 10, 100)],
        };
        let q = query("Washington DC (IAD)", LocationType::Metro, Category::All);
        let results = discover(&m, &settings(), &q);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].asn, 21859);
        assert_eq!(results[0].kind, Classification::Provider);
    }

    #[test]
    fn test_footprint_derives_metro() {
        let fp = footprint(&mirror(), &settings());
        let ashburn = fp.facilities.iter().find(|f| f.facility.id == 100).unwrap();
        let reston = fp.facilities.iter().find(|f| f.facility.id == 101).unwrap();
        assert_eq!(ashburn.metro.as_deref(), Some("Washington DC (IAD)"));
        assert_eq!(reston.metro, None);
        assert_eq!(fp.cities, vec!["Ashburn", "Reston", "San Jose"]);
        assert_eq!(fp.metros, vec!["Washington DC (IAD)"]);
    }
}
