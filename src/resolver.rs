use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::time::timeout;
use tracing::trace;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult, GeocodeFailure, ResolveError};
use crate::extraction::{ChatCompletionExtractor, PlaceExtractor};
use crate::geocoding::{Geocoder, GoogleGeocoder};
use crate::markers::ResolvedPoint;

/// Chains place extraction and geocoding for a single row. Stateless per call and
/// cheap to clone.
#[derive(Clone)]
pub struct LocationResolver {
    extractor: Arc<dyn PlaceExtractor>,
    geocoder: Arc<dyn Geocoder>,
    call_timeout: Duration,
}

impl LocationResolver {
    pub fn new(
        extractor: Arc<dyn PlaceExtractor>,
        geocoder: Arc<dyn Geocoder>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            extractor,
            geocoder,
            call_timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let openai_key = config.openai_api_key.clone().ok_or_else(|| {
            AppError::Config("OPENAI_API_KEY is required to extract locations".into())
        })?;
        let maps_key = config.google_maps_api_key.clone().ok_or_else(|| {
            AppError::Config("GOOGLE_MAPS_API_KEY is required to geocode locations".into())
        })?;

        let http = Client::builder()
            .user_agent(concat!("location-mapper/", env!("CARGO_PKG_VERSION")))
            .timeout(config.remote_timeout())
            .build()
            .map_err(AppError::from_http)?;

        let extractor = ChatCompletionExtractor::new(
            http.clone(),
            config.extraction_endpoint.clone(),
            openai_key,
            config.extraction_model.clone(),
        );
        let geocoder = GoogleGeocoder::new(http, config.geocoding_endpoint.clone(), maps_key);

        Ok(Self::new(
            Arc::new(extractor),
            Arc::new(geocoder),
            config.remote_timeout(),
        ))
    }

    /// Resolves one row. A single attempt per remote call; any failure is final for
    /// this row.
    pub async fn resolve(
        &self,
        description: &str,
        id: &str,
    ) -> Result<ResolvedPoint, ResolveError> {
        let extracted = timeout(self.call_timeout, self.extractor.extract_place(description)).await;
        let place = match extracted {
            Ok(Ok(place)) => place.trim().to_string(),
            Ok(Err(err)) => return Err(ResolveError::extraction(id, err.to_string())),
            Err(_) => return Err(ResolveError::extraction(id, "timed out")),
        };
        if place.is_empty() {
            return Err(ResolveError::extraction(id, "empty place name"));
        }
        trace!(id, place = %place, "extracted place name");

        let coordinates = match timeout(self.call_timeout, self.geocoder.geocode(&place)).await {
            Ok(Ok(Some(coordinates))) => coordinates,
            Ok(Ok(None)) => return Err(ResolveError::geocode(id, GeocodeFailure::NotFound)),
            Ok(Err(err)) => {
                return Err(ResolveError::geocode(
                    id,
                    GeocodeFailure::Transport(err.to_string()),
                ))
            }
            Err(_) => {
                return Err(ResolveError::geocode(
                    id,
                    GeocodeFailure::Transport("timed out".into()),
                ))
            }
        };

        ResolvedPoint::new(id, description, coordinates)
            .ok_or_else(|| ResolveError::geocode(id, GeocodeFailure::OutOfRange))
    }
}
