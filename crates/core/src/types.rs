use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Coordinate used when a postal code cannot be resolved.
    pub const fn origin() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// A vetted physical store. Coordinates are resolved once at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub id: String,
    pub name: String,
    pub address: String,
    pub coordinate: Coordinate,
    pub created_at: DateTime<Utc>,
}

/// Registered user as seen by the report and ranking paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub zip_code: String,
    pub created_at: DateTime<Utc>,
}

/// A user who corroborated a stock report, with the time of their first contribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observer {
    pub user_id: String,
    pub observed_at: DateTime<Utc>,
}

/// Availability of one item at one store for one availability flag.
///
/// Reports only exist embedded inside an [`Item`]. `seen_count` tracks the
/// number of distinct observers and never moves on a repeated observation
/// from the same user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockReport {
    pub store: Store,
    pub observers: Vec<Observer>,
    pub updated_at: DateTime<Utc>,
    pub in_stock: bool,
    pub seen_count: u32,
}

impl StockReport {
    /// Returns `true` when the report concerns the given store and flag.
    pub fn matches(&self, store_id: &str, in_stock: bool) -> bool {
        self.store.id == store_id && self.in_stock == in_stock
    }

    pub fn has_observer(&self, user_id: &str) -> bool {
        self.observers.iter().any(|observer| observer.user_id == user_id)
    }
}

/// Product tracked across stores, keyed by its normalized name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    #[serde(default)]
    pub reports: Vec<StockReport>,
}

impl Item {
    /// Creates an item with no reports, as used on the first report for a name.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reports: Vec::new(),
        }
    }
}

/// Normalizes an item name to its storage key (trimmed, lower-cased).
///
/// Returns `None` when nothing remains after trimming.
pub fn normalize_item_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}
