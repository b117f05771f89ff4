//! Data models for registry records and discovery results.

use serde::{Deserialize, Serialize};

/// `info_type` substrings that mark a network as a peering candidate.
const PEER_TYPES: [&str; 4] = ["Content", "Eyeball", "Enterprise", "Educational/Research"];

/// Represents a single network from PeeringDB.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Network {
    pub id: i64,
    pub asn: i64,
    pub name: String,
    pub info_type: Option<String>,
    pub policy_general: Option<String>,
    pub website: Option<String>,
    #[serde(alias = "info_traffic")]
    pub traffic_range: Option<String>,
    pub irr_as_set: Option<String>,
}

impl Network {
    pub fn info_type(&self) -> &str {
        self.info_type.as_deref().unwrap_or_default()
    }

    pub fn classification(&self) -> Classification {
        Classification::of(self.info_type())
    }
}

/// A colocation facility. The metro label is derived, never stored here.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Facility {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub address1: String,
}

/// "This network is present at this facility."
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NetworkFacilityLink {
    pub id: i64,
    pub net_id: i64,
    pub fac_id: i64,
    #[serde(default)]
    pub local_asn: i64,
    #[serde(default)]
    pub name: String,
}

/// Upstream/peer classification derived from `info_type`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Provider,
    Peer,
}

impl Classification {
    pub fn of(info_type: &str) -> Self {
        if info_type == "NSP" || info_type.contains("Transit") {
            Classification::Provider
        } else {
            Classification::Peer
        }
    }
}

/// Category filter accepted by discovery.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    Upstream,
    Peers,
    All,
}

impl Category {
    pub fn matches(self, info_type: &str) -> bool {
        match self {
            Category::Upstream => Classification::of(info_type) == Classification::Provider,
            Category::Peers => PEER_TYPES.iter().any(|t| info_type.contains(t)),
            Category::All => true,
        }
    }

    /// Upstream views ignore the traffic dimension.
    pub fn includes_traffic(self) -> bool {
        !matches!(self, Category::Upstream)
    }
}

/// How a discovery `location` is interpreted.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LocationType {
    #[default]
    City,
    Metro,
}

/// One row of a discovery answer. Recomputed on every query.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    pub asn: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Classification,
    pub info_type: String,
    pub policy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic_range: Option<String>,
}

impl DiscoveryResult {
    pub fn from_network(network: &Network, category: Category) -> Self {
        let traffic_range = category.includes_traffic().then(|| {
            network
                .traffic_range
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Unknown".to_string())
        });
        Self {
            asn: network.asn,
            name: network.name.clone(),
            kind: network.classification(),
            info_type: network.info_type().to_string(),
            policy: network
                .policy_general
                .clone()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| "Not Specified".to_string()),
            traffic_range,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(info_type: &str) -> Network {
        Network {
            id: 1,
            asn: 64500,
            name: "Example".into(),
            info_type: Some(info_type.into()),
            policy_general: None,
            website: None,
            traffic_range: Some("1-5Tbps".into()),
            irr_as_set: None,
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(Classification::of("NSP"), Classification::Provider);
        assert_eq!(Classification::of("Content"), Classification::Peer);
        assert_eq!(Classification::of("Transit/Access"), Classification::Provider);
        assert_eq!(Classification::of(""), Classification::Peer);
    }

    #[test]
    fn test_category_predicates() {
        assert!(Category::Upstream.matches("NSP"));
        assert!(!Category::Upstream.matches("Content"));
        assert!(Category::Peers.matches("Eyeball Network"));
        assert!(Category::Peers.matches("Educational/Research"));
        assert!(!Category::Peers.matches("NSP"));
        assert!(Category::All.matches("Non-Profit"));
    }

    #[test]
    fn test_upstream_result_omits_traffic() {
        let net = network("NSP");
        let up = DiscoveryResult::from_network(&net, Category::Upstream);
        assert_eq!(up.traffic_range, None);
        assert_eq!(up.policy, "Not Specified");

        let all = DiscoveryResult::from_network(&net, Category::All);
        assert_eq!(all.traffic_range.as_deref(), Some("1-5Tbps"));
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let row = DiscoveryResult::from_network(&network("Content"), Category::Peers);
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["type"], "Peer");
        assert_eq!(json["infoType"], "Content");
        assert_eq!(json["trafficRange"], "1-5Tbps");
    }

    #[test]
    fn test_network_accepts_info_traffic_alias() {
        let net: Network = serde_json::from_str(
            r#"{"id": 10, "asn": 21859, "name": "Zenlayer", "info_type": "NSP", "info_traffic": "1-5Tbps"}"#,
        )
        .unwrap();
        assert_eq!(net.traffic_range.as_deref(), Some("1-5Tbps"));
        assert_eq!(net.policy_general, None);
    }
}
