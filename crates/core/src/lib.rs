//! Domain layer for crowd-sourced stock reports.
//!
//! Everything here is free of I/O except the reference data loaders. The
//! transactional side of report aggregation is abstracted behind
//! [`aggregation::ItemStore`], implemented by the storage crate.

pub mod aggregation;
pub mod catalog;
pub mod geo;
pub mod merge;
pub mod ranking;
pub mod types;

pub use aggregation::{apply_batch, apply_upload, BatchFailure, BatchOutcome, ItemStore};
pub use catalog::{CatalogEntry, ItemCatalog};
pub use geo::{distance_miles, CoordinateTable, ReferenceDataError, Resolved};
pub use ranking::{observations, rank, ItemObservation, Locatable};
pub use types::{normalize_item_name, Coordinate, Item, Observer, StockReport, Store, User};
