//! Mirror analytics using Polars.

use polars::prelude::*;
use serde::Serialize;

use crate::mirror::Mirror;

/// Labels and counts, shaped for a chart.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Breakdown {
    pub labels: Vec<String>,
    pub data: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MirrorStats {
    pub total_networks: usize,
    pub total_facilities: usize,
    pub total_links: usize,
    pub network_types: Breakdown,
    pub policy_types: Breakdown,
}

fn networks_frame(mirror: &Mirror) -> PolarsResult<DataFrame> {
    let asns: Vec<i64> = mirror.networks.iter().map(|n| n.asn).collect();
    let info_types: Vec<Option<&str>> = mirror
        .networks
        .iter()
        .map(|n| n.info_type.as_deref().filter(|t| !t.is_empty()))
        .collect();
    let policies: Vec<Option<&str>> = mirror
        .networks
        .iter()
        .map(|n| n.policy_general.as_deref().filter(|p| !p.is_empty()))
        .collect();

    df!(
        "asn" => asns,
        "info_type" => info_types,
        "policy_general" => policies
    )
}

/// Counts rows per non-null value of `column`, largest group first.
fn breakdown(df: &DataFrame, column: &str) -> PolarsResult<Breakdown> {
    let res = df
        .clone()
        .lazy()
        .filter(col(column).is_not_null())
        .group_by([col(column)])
        .agg([len().alias("count")])
        .sort_by_exprs(
            [col("count"), col(column)],
            SortMultipleOptions::default().with_order_descending_multi([true, false]),
        )
        .collect()?;

    let labels: Vec<String> = res
        .column(column)?
        .str()?
        .into_iter()
        .flatten()
        .map(|s| s.to_string())
        .collect();
    let data: Vec<usize> = res
        .column("count")?
        .cast(&DataType::UInt64)?
        .u64()?
        .into_iter()
        .flatten()
        .map(|v| v as usize)
        .collect();

    Ok(Breakdown { labels, data })
}

pub fn mirror_stats(mirror: &Mirror) -> PolarsResult<MirrorStats> {
    let df = networks_frame(mirror)?;
    Ok(MirrorStats {
        total_networks: mirror.networks.len(),
        total_facilities: mirror.facilities.len(),
        total_links: mirror.links.len(),
        network_types: breakdown(&df, "info_type")?,
        policy_types: breakdown(&df, "policy_general")?,
    })
}
