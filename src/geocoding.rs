use async_trait::async_trait;
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::errors::{AppError, AppResult};
use crate::markers::Coordinates;

/// Looks up coordinates for a place name. `Ok(None)` means the service answered but
/// found nothing.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, place: &str) -> AppResult<Option<Coordinates>>;
}

pub struct GoogleGeocoder {
    http: Client,
    endpoint: String,
    api_key: SecretString,
}

impl GoogleGeocoder {
    pub fn new(http: Client, endpoint: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            api_key,
        }
    }

    fn request_url(&self, place: &str) -> AppResult<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|err| AppError::Config(format!("invalid geocoding endpoint: {err}")))?;
        url.query_pairs_mut()
            .append_pair("address", place)
            .append_pair("key", self.api_key.expose_secret());
        Ok(url)
    }
}

#[derive(Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Deserialize)]
struct GeocodeResult {
    geometry: GeocodeGeometry,
}

#[derive(Deserialize)]
struct GeocodeGeometry {
    location: GeocodeLocation,
}

#[derive(Deserialize)]
struct GeocodeLocation {
    lat: f64,
    lng: f64,
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    async fn geocode(&self, place: &str) -> AppResult<Option<Coordinates>> {
        let url = self.request_url(place)?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(AppError::from_http)?
            .error_for_status()
            .map_err(AppError::from_http)?;

        let parsed: GeocodeResponse = response.json().await.map_err(AppError::from_http)?;
        match parsed.status.as_deref() {
            None | Some("OK") => {}
            Some("ZERO_RESULTS") => return Ok(None),
            Some(status) => {
                let detail = parsed
                    .error_message
                    .map(|message| format!(": {message}"))
                    .unwrap_or_default();
                return Err(AppError::Service(format!(
                    "geocoding service answered {status}{detail}"
                )));
            }
        }

        Ok(parsed
            .results
            .into_iter()
            .next()
            .map(|result| {
                Coordinates::new(result.geometry.location.lat, result.geometry.location.lng)
            }))
    }
}

#[cfg(test)]
mod tests {
    use httptest::matchers::{all_of, contains, request, url_decoded};
    use httptest::responders::{json_encoded, status_code};
    use httptest::{Expectation, Server};
    use serde_json::json;

    use super::*;

    fn geocoder(server: &Server) -> GoogleGeocoder {
        GoogleGeocoder::new(
            Client::new(),
            server.url_str("/maps/api/geocode/json"),
            SecretString::from("maps-key".to_string()),
        )
    }

    #[tokio::test]
    async fn returns_first_result_location() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/maps/api/geocode/json"),
                request::query(url_decoded(contains(("address", "Paris, France")))),
                request::query(url_decoded(contains(("key", "maps-key")))),
            ])
            .respond_with(json_encoded(json!({
                "status": "OK",
                "results": [
                    { "geometry": { "location": { "lat": 48.86, "lng": 2.35 } } },
                    { "geometry": { "location": { "lat": 33.66, "lng": -95.55 } } }
                ]
            }))),
        );

        let coords = geocoder(&server).geocode("Paris, France").await.unwrap();
        assert_eq!(coords, Some(Coordinates::new(48.86, 2.35)));
    }

    #[tokio::test]
    async fn zero_results_is_not_an_error() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/maps/api/geocode/json"))
                .respond_with(json_encoded(json!({ "status": "ZERO_RESULTS", "results": [] }))),
        );

        let coords = geocoder(&server).geocode("Nowhereville, Qx").await.unwrap();
        assert!(coords.is_none());
    }

    #[tokio::test]
    async fn denied_requests_are_service_errors() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/maps/api/geocode/json"))
                .respond_with(json_encoded(json!({
                    "status": "REQUEST_DENIED",
                    "error_message": "The provided API key is invalid.",
                    "results": []
                }))),
        );

        let err = geocoder(&server).geocode("Oslo").await.unwrap_err();
        assert!(err.to_string().contains("REQUEST_DENIED"));
    }

    #[tokio::test]
    async fn transport_errors_do_not_leak_the_key() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/maps/api/geocode/json"))
                .respond_with(status_code(500)),
        );

        let err = geocoder(&server).geocode("Oslo").await.unwrap_err();
        assert!(matches!(err, AppError::Http(_)));
        assert!(!err.to_string().contains("maps-key"));
    }
}
