//! Operator settings: the ASN watch-list and the city→metro map.
//!
//! Persisted as pretty-printed JSON using the upper-case keys the settings
//! editor works with (`ASNS`, `METRO_MAP`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "ASNS", default)]
    pub asns: Vec<i64>,
    #[serde(rename = "METRO_MAP", default)]
    pub metro_map: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        let metro_map = [
            ("Ashburn", "Washington DC (IAD)"),
            ("Reston", "Washington DC (IAD)"),
            ("Vienna", "Washington DC (IAD)"),
            ("San Jose", "Silicon Valley (SJC)"),
            ("Santa Clara", "Silicon Valley (SJC)"),
            ("Palo Alto", "Silicon Valley (SJC)"),
        ]
        .into_iter()
        .map(|(city, metro)| (city.to_string(), metro.to_string()))
        .collect();

        Self {
            asns: vec![21859, 4229],
            metro_map,
        }
    }
}

impl Settings {
    pub fn metro_for(&self, city: &str) -> Option<&str> {
        self.metro_map.get(city).map(String::as_str)
    }

    /// Builds settings from a submitted JSON document, keeping `current`'s
    /// value for any key that is missing or not of the right shape.
    pub fn from_submission(value: &Value, current: &Settings) -> Settings {
        let asns = match value.get("ASNS").and_then(Value::as_array) {
            Some(items) => items.iter().filter_map(parse_asn).collect(),
            None => current.asns.clone(),
        };

        let metro_map = match value.get("METRO_MAP").and_then(Value::as_object) {
            Some(map) => map
                .iter()
                .filter_map(|(city, metro)| {
                    let city = city.trim();
                    match metro.as_str() {
                        Some(metro) if !city.is_empty() => {
                            Some((city.to_string(), metro.to_string()))
                        }
                        _ => {
                            warn!("Skipping metro mapping for {:?}", city);
                            None
                        }
                    }
                })
                .collect(),
            None => current.metro_map.clone(),
        };

        Settings { asns, metro_map }
    }
}

fn parse_asn(value: &Value) -> Option<i64> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let s = s.trim();
            let digits = s
                .strip_prefix("AS")
                .or_else(|| s.strip_prefix("as"))
                .unwrap_or(s);
            digits.parse().ok()
        }
        _ => None,
    };
    if parsed.is_none() {
        warn!("Ignoring unparseable ASN {}", value);
    }
    parsed
}

/// File-backed settings holder.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    current: RwLock<Settings>,
}

impl SettingsStore {
    /// Loads settings from `path`, writing the defaults if the file is missing.
    /// The file is read as leniently as a submission; only unreadable JSON
    /// falls back to the defaults.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();
        let settings = if path.exists() {
            match std::fs::read_to_string(&path)
                .map_err(AppError::from)
                .and_then(|s| serde_json::from_str::<Value>(&s).map_err(AppError::from))
            {
                Ok(value) => Settings::from_submission(&value, &Settings::default()),
                Err(e) => {
                    warn!("Error loading settings from {:?}: {}", path, e);
                    Settings::default()
                }
            }
        } else {
            let settings = Settings::default();
            write_settings(&path, &settings)?;
            info!("Wrote default settings to {:?}", path);
            settings
        };

        Ok(Self {
            path,
            current: RwLock::new(settings),
        })
    }

    pub fn get(&self) -> Settings {
        self.current.read().clone()
    }

    /// Persists and publishes `settings`. Returns whether the ASN list changed.
    pub fn replace(&self, settings: Settings) -> Result<bool, AppError> {
        // Held across the write so the file and memory agree on the winner.
        let mut current = self.current.write();
        write_settings(&self.path, &settings)?;
        let asns_changed = current.asns != settings.asns;
        *current = settings;
        Ok(asns_changed)
    }
}

fn write_settings(path: &Path, settings: &Settings) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}
