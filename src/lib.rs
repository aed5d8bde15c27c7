mod batch;
mod config;
mod errors;
mod export;
mod extraction;
mod geocoding;
mod ingestion;
mod markers;
mod notification;
mod resolver;
mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::batch::{
    BatchCoordinator, BatchProgress, BatchResult, ConcurrencyPolicy, ProgressObserver,
};
pub use crate::config::{AppConfig, PublicAppConfig};
pub use crate::errors::{AppError, AppResult, GeocodeFailure, ResolveError};
pub use crate::export::{
    escape_xml, to_csv, to_geo_markup, DirectoryDownloadSink, DownloadSink, ExportArtifact,
    CSV_FILE_NAME, KML_FILE_NAME, KML_MIME,
};
pub use crate::extraction::{ChatCompletionExtractor, PlaceExtractor};
pub use crate::geocoding::{Geocoder, GoogleGeocoder};
pub use crate::ingestion::{parse_geo_markup, parse_rows, Record};
pub use crate::markers::{
    Coordinates, MapSink, MarkerDetail, MarkerHandle, MarkerStore, NullMapSink, ResolvedPoint,
    TracingMapSink,
};
pub use crate::notification::{Notifier, Toast};
pub use crate::resolver::LocationResolver;
pub use crate::telemetry::TelemetryClient;

/// Rejects a missing input file before any work starts.
pub fn require_input(input: Option<&Path>) -> AppResult<&Path> {
    input.ok_or(AppError::MissingInput)
}

/// One mapping session: the marker store, the notification slot and the coordinator
/// that feeds them.
pub struct MapSession {
    store: MarkerStore,
    notifier: Notifier,
    resolver: LocationResolver,
    coordinator: BatchCoordinator,
}

impl MapSession {
    pub fn new(
        config: AppConfig,
        resolver: LocationResolver,
        sink: Arc<dyn MapSink>,
        telemetry: Option<TelemetryClient>,
    ) -> Self {
        let store = MarkerStore::new(sink);
        let mut coordinator = BatchCoordinator::new(resolver.clone(), store.clone())
            .with_batch_size(config.batch_size)
            .with_policy(config.concurrency_policy());
        if let Some(telemetry) = telemetry {
            coordinator = coordinator.with_telemetry(telemetry);
        }

        Self {
            store,
            notifier: Notifier::new(),
            resolver,
            coordinator,
        }
    }

    pub fn store(&self) -> &MarkerStore {
        &self.store
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub async fn process_csv(&self, input: Option<&Path>) -> AppResult<BatchResult> {
        self.process_csv_with_progress(input, None).await
    }

    pub async fn process_csv_with_progress(
        &self,
        input: Option<&Path>,
        observer: Option<ProgressObserver>,
    ) -> AppResult<BatchResult> {
        let path = require_input(input)?;
        let bytes = std::fs::read(path)?;
        info!(path = %path.display(), bytes = bytes.len(), "loaded input table");
        self.process_bytes(&bytes, observer).await
    }

    pub async fn process_bytes(
        &self,
        bytes: &[u8],
        observer: Option<ProgressObserver>,
    ) -> AppResult<BatchResult> {
        let records = parse_rows(bytes)?;
        let result = self.coordinator.run(records, observer).await;
        self.notifier.show(result.summary_message());
        Ok(result)
    }

    /// Resolves a single typed description outside any batch. A failure is reported
    /// through the notifier and yields `None`.
    pub async fn resolve_one(&self, description: &str, id: &str) -> Option<ResolvedPoint> {
        let description = description.trim();
        let outcome = if description.is_empty() {
            Err(ResolveError::extraction(id, "empty description"))
        } else {
            self.resolver.resolve(description, id).await
        };

        match outcome {
            Ok(point) => {
                self.store.append(point.clone());
                info!(id, lat = point.lat(), lng = point.lng(), "marked single location");
                Some(point)
            }
            Err(err) => {
                warn!(id = %err.id(), kind = err.kind(), error = %err, "failed to mark location");
                self.notifier.show(format!("Unable to mark ID {} on the map.", err.id()));
                None
            }
        }
    }

    pub fn export_kml(&self, sink: &dyn DownloadSink) -> AppResult<PathBuf> {
        sink.deliver(&ExportArtifact::kml(&self.store.all()))
    }

    pub fn export_csv(&self, sink: &dyn DownloadSink) -> AppResult<PathBuf> {
        sink.deliver(&ExportArtifact::csv(&self.store.all())?)
    }
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,location_mapper_lib=debug"));
        if let Err(err) = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
        {
            warn!(?err, "tracing subscriber already installed");
        }
    });
}
