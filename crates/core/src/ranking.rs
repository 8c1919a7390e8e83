use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::geo::distance_miles;
use crate::types::{Coordinate, Item, Store};

const SECONDS_PER_HOUR: i64 = 3600;
const SECONDS_PER_DAY: i64 = SECONDS_PER_HOUR * 24;

/// Anything that can be placed on the map and dated for ranking.
pub trait Locatable {
    fn coordinate(&self) -> Coordinate;
    /// Timestamp used to break exact distance ties; more recent ranks first.
    fn observed_at(&self) -> DateTime<Utc>;
}

impl Locatable for Store {
    fn coordinate(&self) -> Coordinate {
        self.coordinate
    }

    fn observed_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Orders results by ascending distance from `origin`, then by recency.
///
/// Distances are compared exactly; only bit-identical distances fall through
/// to the recency tie-break. The sort is stable, so results equal on both
/// keys keep their input order. When `limit` is set the tail beyond it is
/// dropped.
pub fn rank<T: Locatable>(results: Vec<T>, origin: Coordinate, limit: Option<usize>) -> Vec<T> {
    let mut decorated: Vec<(f64, T)> = results
        .into_iter()
        .map(|result| (distance_miles(result.coordinate(), origin), result))
        .collect();

    decorated.sort_by(|(left_distance, left), (right_distance, right)| {
        match left_distance.total_cmp(right_distance) {
            Ordering::Equal => right.observed_at().cmp(&left.observed_at()),
            other => other,
        }
    });

    if let Some(limit) = limit {
        decorated.truncate(limit);
    }

    decorated.into_iter().map(|(_, result)| result).collect()
}

/// One stock report flattened for query responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemObservation {
    pub days_ago: i64,
    pub hours_ago: i64,
    pub store_name: String,
    #[serde(rename = "storeAddress")]
    pub store_addr: String,
    pub store_lat: f64,
    #[serde(rename = "storeLong")]
    pub store_lng: f64,
    pub in_stock: bool,
    pub seen_count: u32,
    #[serde(skip)]
    pub observed_at: DateTime<Utc>,
}

impl Locatable for ItemObservation {
    fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.store_lat, self.store_lng)
    }

    fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }
}

/// Flattens every report of `item` into observations aged against `now`.
pub fn observations(item: &Item, now: DateTime<Utc>) -> impl Iterator<Item = ItemObservation> + '_ {
    item.reports.iter().map(move |report| {
        let seconds_ago = (now - report.updated_at).num_seconds();
        ItemObservation {
            days_ago: seconds_ago / SECONDS_PER_DAY,
            hours_ago: seconds_ago / SECONDS_PER_HOUR,
            store_name: report.store.name.clone(),
            store_addr: report.store.address.clone(),
            store_lat: report.store.coordinate.latitude,
            store_lng: report.store.coordinate.longitude,
            in_stock: report.in_stock,
            seen_count: report.seen_count,
            observed_at: report.updated_at,
        }
    })
}
