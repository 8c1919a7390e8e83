//! Client for the place-verification collaborator used when adding stores.

pub mod client;

pub use client::{PlaceCandidate, PlacesClient, PlacesError, VettedStore, RELEVANT_STORE_TYPES};
