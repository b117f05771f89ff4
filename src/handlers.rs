use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::discovery::{self, DiscoveryQuery};
use crate::error::AppError;
use crate::fetcher::Transport;
use crate::routing::{self, RoutingQuery};
use crate::settings::Settings;
use crate::stats;
use crate::sync::{SyncOutcome, SyncTrigger};

pub fn router<T: Transport + 'static>(state: Arc<crate::state::AppState<T>>) -> Router {
    Router::new()
        .route("/settings", get(get_settings::<T>).post(update_settings::<T>))
        .route("/discover", get(discover::<T>))
        .route("/footprint", get(footprint::<T>))
        .route("/routing-flow", get(routing_flow::<T>))
        .route("/stats", get(mirror_stats::<T>))
        .route("/sync", post(sync_now::<T>))
        .route("/cache/clear", post(clear_cache::<T>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

type SharedState<T> = State<Arc<crate::state::AppState<T>>>;

pub(crate) fn empty_string_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    match opt {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => s.parse::<T>().map(Some).map_err(serde::de::Error::custom),
    }
}

pub(crate) fn empty_string_as_none_str<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    match opt {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => Ok(Some(s)),
    }
}

/// Settings plus the cities found in the current mirror.
#[derive(Debug, Serialize)]
struct SettingsView {
    #[serde(flatten)]
    settings: Settings,
    discovered_cities: Vec<String>,
}

/// GET /settings
async fn get_settings<T: Transport>(State(state): SharedState<T>) -> impl IntoResponse {
    let discovered_cities = state.mirror.snapshot().await.cities();
    Json(SettingsView {
        settings: state.settings.get(),
        discovered_cities,
    })
}

/// POST /settings - full replacement, parsed tolerantly. Resyncs when the
/// ASN list changed; `sync` is null when no resync was needed and carries
/// `"status": "failed"` when it was attempted and did not complete.
async fn update_settings<T: Transport>(
    State(state): SharedState<T>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let next = Settings::from_submission(&body, &state.settings.get());
    let asns_changed = state.settings.replace(next)?;
    info!("Settings updated (ASNs changed: {})", asns_changed);

    let sync = if asns_changed {
        match state.syncer.run(SyncTrigger::SettingsChanged).await {
            Ok(outcome) => serde_json::to_value(outcome)?,
            Err(e) => {
                error!("Sync after settings change failed, keeping previous mirror: {}", e);
                json!({"status": "failed", "error": e.to_string()})
            }
        }
    } else {
        Value::Null
    };

    Ok(Json(json!({
        "status": "success",
        "message": "Settings updated.",
        "sync": sync,
    })))
}

/// GET /discover
async fn discover<T: Transport>(
    State(state): SharedState<T>,
    Query(query): Query<DiscoveryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let results = state.discover(&query).await.inspect_err(|e| {
        error!("Discovery failed for {:?}: {}", query, e);
    })?;
    info!("Discovery {:?} returned {} networks", query, results.len());
    Ok(Json(results))
}

/// GET /footprint - mirrored facilities with derived metros.
async fn footprint<T: Transport>(State(state): SharedState<T>) -> impl IntoResponse {
    let mirror = state.mirror.snapshot().await;
    Json(discovery::footprint(&mirror, &state.settings.get()))
}

/// GET /routing-flow
async fn routing_flow<T: Transport>(
    State(state): SharedState<T>,
    Query(query): Query<RoutingQuery>,
) -> Result<impl IntoResponse, AppError> {
    let mirror = state.mirror.snapshot().await;
    let mut tree = routing::provider_tree(&mirror, &state.settings.get(), &query)?;
    if query.expand_sets {
        routing::expand_sets(&state.fetcher, &state.config.irr_base_url, &mut tree).await;
    }
    Ok(Json(tree))
}

/// GET /stats - mirror analytics.
async fn mirror_stats<T: Transport>(State(state): SharedState<T>) -> Result<impl IntoResponse, AppError> {
    let mirror = state.mirror.snapshot().await;
    Ok(Json(stats::mirror_stats(&mirror)?))
}

/// POST /sync - manual sync; reports the outcome or the failure.
async fn sync_now<T: Transport>(State(state): SharedState<T>) -> Result<Json<SyncOutcome>, AppError> {
    let outcome = state.syncer.run(SyncTrigger::Manual).await.inspect_err(|e| {
        error!("Manual sync failed: {}", e);
    })?;
    Ok(Json(outcome))
}

/// POST /cache/clear
async fn clear_cache<T: Transport>(State(state): SharedState<T>) -> impl IntoResponse {
    let cleared = state.fetcher.cache().len();
    state.fetcher.cache().clear();
    info!("Request cache cleared ({} entries)", cleared);
    Json(json!({"status": "success", "message": "Cache cleared.", "cleared": cleared}))
}
