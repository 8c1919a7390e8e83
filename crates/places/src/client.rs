use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use url::Url;

/// Place types accepted as a real grocery-style store.
pub const RELEVANT_STORE_TYPES: &[&str] = &[
    "convenience_store",
    "department_store",
    "drugstore",
    "grocery_or_supermarket",
    "liquor_store",
    "pharmacy",
    "supermarket",
];

const COUNTRY_SUFFIX: &str = ", United States";

/// Client for the Places "find place" and "details" endpoints.
#[derive(Clone)]
pub struct PlacesClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl PlacesClient {
    pub fn new(api_key: impl Into<String>, base_url: Url, http: Client) -> Self {
        Self {
            http,
            base_url,
            api_key: api_key.into(),
        }
    }

    /// Vets user supplied store details against the places service.
    ///
    /// Exactly one candidate must match `"<name> <address>"`, and it must
    /// carry at least one of [`RELEVANT_STORE_TYPES`]. The canonical name,
    /// address and coordinates of the candidate are returned.
    pub async fn vet_store(&self, name: &str, address: &str) -> Result<VettedStore, PlacesError> {
        let candidates = self.find_place(&format!("{name} {address}")).await?;
        let candidate = match <[PlaceCandidate; 1]>::try_from(candidates) {
            Ok([candidate]) => candidate,
            Err(candidates) => {
                return Err(PlacesError::Ambiguous {
                    candidates: candidates
                        .into_iter()
                        .map(|c| format!("{} {}", c.name, c.formatted_address))
                        .collect(),
                })
            }
        };

        let types = self.place_types(&candidate.place_id).await?;
        if !types
            .iter()
            .any(|place_type| RELEVANT_STORE_TYPES.contains(&place_type.as_str()))
        {
            return Err(PlacesError::NotAStore {
                name: candidate.name,
                address: candidate.formatted_address,
            });
        }

        let address = candidate
            .formatted_address
            .strip_suffix(COUNTRY_SUFFIX)
            .unwrap_or(&candidate.formatted_address)
            .to_string();

        Ok(VettedStore {
            name: candidate.name,
            address,
            latitude: candidate.geometry.location.lat,
            longitude: candidate.geometry.location.lng,
        })
    }

    /// Runs a text query and returns every matching candidate.
    pub async fn find_place(&self, input: &str) -> Result<Vec<PlaceCandidate>, PlacesError> {
        let mut url = self.base_url.join("place/findplacefromtext/json")?;
        url.query_pairs_mut()
            .append_pair("input", input)
            .append_pair("inputtype", "textquery")
            .append_pair("fields", "formatted_address,name,place_id,geometry")
            .append_pair("key", &self.api_key);

        let response = self.http.get(url).send().await?;
        let body: FindPlaceResponse = parse_json(response).await?;
        check_api_status(&body.status, body.error_message)?;
        Ok(body.candidates)
    }

    /// Fetches the place types for a place id.
    pub async fn place_types(&self, place_id: &str) -> Result<Vec<String>, PlacesError> {
        let mut url = self.base_url.join("place/details/json")?;
        url.query_pairs_mut()
            .append_pair("place_id", place_id)
            .append_pair("fields", "types")
            .append_pair("key", &self.api_key);

        let response = self.http.get(url).send().await?;
        let body: DetailsResponse = parse_json(response).await?;
        check_api_status(&body.status, body.error_message)?;
        Ok(body.result.map(|result| result.types).unwrap_or_default())
    }
}

/// Canonical store details returned by vetting.
#[derive(Debug, Clone, PartialEq)]
pub struct VettedStore {
    pub name: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Candidate place from a text query.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlaceCandidate {
    pub place_id: String,
    pub name: String,
    pub formatted_address: String,
    pub geometry: Geometry,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Geometry {
    pub location: LatLng,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Deserialize)]
struct FindPlaceResponse {
    #[serde(default)]
    candidates: Vec<PlaceCandidate>,
    status: String,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    #[serde(default)]
    result: Option<DetailsResult>,
    status: String,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailsResult {
    #[serde(default)]
    types: Vec<String>,
}

/// Errors produced while vetting a store.
#[derive(Debug, Error)]
pub enum PlacesError {
    #[error("found {} store(s) that matched the given store information, but only 1 store can match: {}", .candidates.len(), .candidates.join("; "))]
    Ambiguous { candidates: Vec<String> },
    #[error("could not verify store {name:?} {address:?} as a real grocery store")]
    NotAStore { name: String, address: String },
    #[error("places api returned status {status}: {message}")]
    Api { status: String, message: String },
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl PlacesError {
    /// `true` when the failure is about the submitted store rather than the service.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Ambiguous { .. } | Self::NotAStore { .. })
    }
}

fn check_api_status(status: &str, message: Option<String>) -> Result<(), PlacesError> {
    match status {
        "OK" | "ZERO_RESULTS" => Ok(()),
        other => Err(PlacesError::Api {
            status: other.to_string(),
            message: message.unwrap_or_default(),
        }),
    }
}

async fn parse_json<T>(response: Response) -> Result<T, PlacesError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(PlacesError::Status { status, body });
    }

    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> PlacesClient {
        let base = Url::parse(&server.url("/maps/api/")).expect("url");
        PlacesClient::new("test-key", base, Client::builder().build().expect("client"))
    }

    fn candidate_json(place_id: &str, name: &str, address: &str) -> serde_json::Value {
        json!({
            "place_id": place_id,
            "name": name,
            "formatted_address": address,
            "geometry": { "location": { "lat": 37.4219, "lng": -122.0841 } }
        })
    }

    #[tokio::test]
    async fn vet_store_returns_canonical_details() {
        let server = MockServer::start_async().await;
        let find = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/maps/api/place/findplacefromtext/json")
                    .query_param("input", "safeway 645 San Antonio Rd")
                    .query_param("inputtype", "textquery")
                    .query_param("key", "test-key");
                then.status(200).json_body(json!({
                    "candidates": [candidate_json(
                        "place-1",
                        "Safeway",
                        "645 San Antonio Rd, Mountain View, CA 94040, United States"
                    )],
                    "status": "OK"
                }));
            })
            .await;
        let details = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/maps/api/place/details/json")
                    .query_param("place_id", "place-1")
                    .query_param("fields", "types");
                then.status(200).json_body(json!({
                    "result": { "types": ["food", "grocery_or_supermarket", "store"] },
                    "status": "OK"
                }));
            })
            .await;

        let vetted = client(&server)
            .vet_store("safeway", "645 San Antonio Rd")
            .await
            .expect("vetted");
        find.assert_async().await;
        details.assert_async().await;

        assert_eq!(vetted.name, "Safeway");
        assert_eq!(vetted.address, "645 San Antonio Rd, Mountain View, CA 94040");
        assert_eq!(vetted.latitude, 37.4219);
        assert_eq!(vetted.longitude, -122.0841);
    }

    #[tokio::test]
    async fn multiple_candidates_are_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/maps/api/place/findplacefromtext/json");
                then.status(200).json_body(json!({
                    "candidates": [
                        candidate_json("p-1", "Safeway", "1 A St, Town, CA 90000"),
                        candidate_json("p-2", "Safeway", "2 B St, Town, CA 90000")
                    ],
                    "status": "OK"
                }));
            })
            .await;

        let err = client(&server)
            .vet_store("safeway", "town")
            .await
            .expect_err("ambiguous");
        assert!(err.is_rejection());
        match err {
            PlacesError::Ambiguous { candidates } => assert_eq!(candidates.len(), 2),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn zero_results_is_rejected_as_ambiguous() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/maps/api/place/findplacefromtext/json");
                then.status(200)
                    .json_body(json!({ "candidates": [], "status": "ZERO_RESULTS" }));
            })
            .await;

        let err = client(&server)
            .vet_store("nothing", "nowhere")
            .await
            .expect_err("no match");
        assert!(matches!(err, PlacesError::Ambiguous { ref candidates } if candidates.is_empty()));
    }

    #[tokio::test]
    async fn irrelevant_place_type_is_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/maps/api/place/findplacefromtext/json");
                then.status(200).json_body(json!({
                    "candidates": [candidate_json("p-1", "City Park", "1 Park Ave, Town, CA 90000")],
                    "status": "OK"
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/maps/api/place/details/json");
                then.status(200).json_body(json!({
                    "result": { "types": ["park", "point_of_interest"] },
                    "status": "OK"
                }));
            })
            .await;

        let err = client(&server)
            .vet_store("city park", "town")
            .await
            .expect_err("not a store");
        assert!(matches!(err, PlacesError::NotAStore { .. }));
    }

    #[tokio::test]
    async fn api_error_status_is_not_a_rejection() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/maps/api/place/findplacefromtext/json");
                then.status(200).json_body(json!({
                    "candidates": [],
                    "status": "REQUEST_DENIED",
                    "error_message": "The provided API key is invalid."
                }));
            })
            .await;

        let err = client(&server)
            .find_place("anything")
            .await
            .expect_err("denied");
        assert!(!err.is_rejection());
        assert!(err.to_string().contains("REQUEST_DENIED"));
    }

    #[tokio::test]
    async fn http_error_returns_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/maps/api/place/details/json");
                then.status(500).body("boom");
            })
            .await;

        let err = client(&server)
            .place_types("p-1")
            .await
            .expect_err("should error");
        match err {
            PlacesError::Status { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
